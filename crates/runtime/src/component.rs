//! The component plugin interface.
//!
//! Component implementations are opaque to the controller: it builds them
//! from coerced arguments, runs each inside a supervised task, pushes new
//! arguments via [`Component::update`] when supported, and receives export
//! values through the [`Options::on_state_change`] callback.

use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{Arguments, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by component implementations.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component does not reconfigure in place; the controller replaces
    /// it instead.
    #[error("component does not support in-place updates")]
    UpdateUnsupported,

    #[error("build failed: {0}")]
    Build(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Runtime(String),
}

/// Callback a component uses to publish a new export record.
pub type OnStateChange = Arc<dyn Fn(Value) + Send + Sync>;

/// Per-instance facilities handed to a component at build time.
///
/// Everything a component needs from the runtime comes through here; there
/// are no ambient globals.
#[derive(Clone)]
pub struct Options {
    /// Node id within the owning controller (`metrics.scrape.nodes`).
    pub id: String,
    /// Globally unique id, prefixed with the controller path for nested
    /// controllers.
    pub global_id: String,
    /// Directory owned exclusively by this component instance.
    pub data_path: PathBuf,
    /// Publishes a new export record. The controller records the value and
    /// schedules dependents.
    pub on_state_change: OnStateChange,
}

/// A runnable component instance.
///
/// `run` executes until the token is cancelled. `update` applies new
/// arguments in place; the default declines, which makes the controller
/// tear the instance down and build a fresh one.
#[async_trait]
pub trait Component: Send + Sync {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ComponentError>;

    fn update(&self, args: Arguments) -> Result<(), ComponentError> {
        let _ = args;
        Err(ComponentError::UpdateUnsupported)
    }

    /// Component-specific health, combined into the node's aggregate.
    fn health(&self) -> Option<Health> {
        None
    }
}
