// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Dynamic values and keys flowing through the connection graph.
//!
//! Ports exchange [`Value`] handles: cheaply cloneable, type-erased
//! containers around `Arc<dyn Any>`. There is no coercion between port
//! types; a setter that expects an `f64` fails its computation when it
//! receives something else.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

/// A type-erased value passed from an output port to an input port.
///
/// Cloning a `Value` clones the `Arc`, not the payload, so fan-out to
/// many dependents is cheap regardless of payload size.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Value {
    /// Wraps an arbitrary payload.
    pub fn new<T: Send + Sync + 'static>(payload: T) -> Self {
        Self {
            inner: Arc::new(payload),
        }
    }

    /// The unit value, for setters that only need to be poked.
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Returns `true` if the payload is of type `T`.
    pub fn is<T: Send + Sync + 'static>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrows the payload as `T`, if that is what it holds.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clones the payload out as `T`.
    ///
    /// This is the accessor most setter closures use; the error message
    /// names the expected type so a miswired graph is diagnosable from
    /// the surfaced `ComputationFailed`.
    pub fn extract<T: Clone + 'static>(&self) -> anyhow::Result<T> {
        self.downcast_ref::<T>().cloned().ok_or_else(|| {
            anyhow!(
                "value does not hold a {}",
                std::any::type_name::<T>()
            )
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.inner.type_id()).finish()
    }
}

/// Key designating one slice of a multi-output or one virtual
/// single-input view of a multi-input (`port.at(key)`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_matches_payload_type() {
        let v = Value::new(42.5f64);
        assert_eq!(v.extract::<f64>().unwrap(), 42.5);
        assert!(v.extract::<i64>().is_err());
    }

    #[test]
    fn clone_shares_payload() {
        let v = Value::new(vec![1, 2, 3]);
        let w = v.clone();
        assert_eq!(w.downcast_ref::<Vec<i32>>().unwrap(), &vec![1, 2, 3]);
    }

    #[test]
    fn keys_from_ints_and_strings() {
        assert_eq!(Key::from(3), Key::Int(3));
        assert_eq!(Key::from("left"), Key::Str("left".to_string()));
        assert_eq!(Key::from(5i64).to_string(), "5");
    }
}
