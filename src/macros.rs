// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Macro port resolution.
//!
//! A macro input re-exports inner inputs of a sub-graph; a macro
//! output aliases one inner output. Everything that addresses a port
//! (connect, disconnect, direct calls, configuration setters)
//! resolves macro ports first, so the rest of the engine only ever
//! sees real ports. Macros may nest; expansion is flattened here with
//! a depth guard against self-referential declarations.

use crate::errors::ConnectError;
use crate::graph::{InputRef, OutputRef};
use crate::network::Network;
use crate::ports::descriptor::{InputKind, OutputKind};

/// Deeper nesting than this is assumed to be a cycle between macro
/// declarations.
const MAX_MACRO_DEPTH: usize = 32;

impl Network {
    /// Flattens a (possibly macro) input reference into the real
    /// inputs it stands for, in declaration order. A key designator on
    /// the macro reference is pushed down onto each inner reference
    /// that does not carry one of its own.
    pub(crate) fn resolve_inputs(
        &self,
        input: &InputRef,
    ) -> Result<Vec<InputRef>, ConnectError> {
        let mut resolved = Vec::new();
        self.resolve_input_into(input, 0, &mut resolved)?;
        Ok(resolved)
    }

    fn resolve_input_into(
        &self,
        input: &InputRef,
        depth: usize,
        resolved: &mut Vec<InputRef>,
    ) -> Result<(), ConnectError> {
        let cell = self.graph.node(input.node)?;
        let port = &cell.table.inputs[input.port];
        match &port.kind {
            InputKind::Macro { targets } => {
                if depth >= MAX_MACRO_DEPTH {
                    return Err(ConnectError::MacroCycle {
                        port: format!("{}.{}", cell.name, port.name),
                    });
                }
                let targets = targets.clone();
                for target in targets {
                    let inner = InputRef {
                        node: target.node,
                        port: target.port,
                        key: target.key.or_else(|| input.key.clone()),
                    };
                    self.resolve_input_into(&inner, depth + 1, resolved)?;
                }
                Ok(())
            }
            _ => {
                resolved.push(input.clone());
                Ok(())
            }
        }
    }

    /// Follows macro output aliases down to the real output.
    pub(crate) fn resolve_output(
        &self,
        output: &OutputRef,
    ) -> Result<OutputRef, ConnectError> {
        let mut current = output.clone();
        for _ in 0..MAX_MACRO_DEPTH {
            let cell = self.graph.node(current.node)?;
            let port = &cell.table.outputs[current.port];
            match &port.kind {
                OutputKind::Macro { target } => {
                    current = OutputRef {
                        node: target.node,
                        port: target.port,
                        key: current.key.clone().or_else(|| target.key.clone()),
                    };
                }
                _ => return Ok(current),
            }
        }
        let cell = self.graph.node(output.node)?;
        Err(ConnectError::MacroCycle {
            port: format!("{}.{}", cell.name, cell.table.outputs[output.port].name),
        })
    }
}
