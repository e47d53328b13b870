//! Runtime errors.
//!
//! Two tiers: [`LoadError`] rejects a configuration wholesale before any
//! runtime change is made; [`NodeError`] affects a single node (and its
//! dependents), which turns unhealthy while the rest of the graph keeps
//! running.

use crate::graph::{CycleError, NodeId};
use crate::registry::Stability;
use thiserror::Error;

/// Errors that reject `load_source` entirely. The previously running graph
/// is left untouched.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration has {} parse error(s): {}", .0.len(), render_parse_errors(.0))]
    Parse(Vec<conflux_dsl::ParseError>),

    #[error("{0}")]
    Cycle(CycleError),

    #[error("block {id} defined more than once")]
    DuplicateNode { id: NodeId },

    #[error("declare {name:?} defined more than once")]
    DuplicateDeclare { name: String },

    #[error("unknown component type {name:?} (block {id})")]
    UnknownComponent { id: String, name: String },

    #[error("component {id} has stability {stability}, below the configured floor {floor}")]
    Stability {
        id: NodeId,
        stability: Stability,
        floor: Stability,
    },

    #[error("attribute {name:?} is not allowed at the top level")]
    TopLevelAttribute { name: String },

    #[error("block {id}: {reason}")]
    InvalidBlock { id: String, reason: String },
}

fn render_parse_errors(errors: &[conflux_dsl::ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors scoped to one node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Schema violation or unresolvable reference while evaluating the
    /// node's block.
    #[error("{0}")]
    Eval(#[from] conflux_dsl::EvalError),

    /// An imported module contains content a module may not carry.
    #[error("{0}")]
    Content(String),

    /// The import source failed to fetch or deliver content.
    #[error("{0}")]
    Source(String),

    /// Component construction or reconfiguration failed.
    #[error("{0}")]
    Component(#[from] crate::component::ComponentError),

    /// `run` was called before a successful `evaluate`.
    #[error("node has not been evaluated")]
    Unevaluated,
}
