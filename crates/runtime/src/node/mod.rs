//! Graph node kinds, one per block class.
//!
//! Every node wraps one configuration block and implements [`BlockNode`];
//! nodes with a long-running task also implement [`RunnableNode`] and get
//! a worker from the scheduler. Node internals use interior mutability:
//! the controller's evaluator and the node's own task are the only
//! mutators, never concurrently for the same field.

mod component;
mod custom;
mod declare;
mod foreach;
mod import;

pub use component::ComponentNode;
pub use custom::{CustomComponentNode, CustomRegistry, Template};
pub use declare::{ArgumentNode, ArgumentValues, DeclareNode, ExportNode, OnExport};
pub use foreach::{ForeachNode, instance_ids, template_fingerprint};
pub use import::ImportConfigNode;

use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::registry::{Registry, Stability};
use async_trait::async_trait;
use conflux_dsl::{Block, Scope, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Callback nodes use to tell their controller that an export or content
/// change happened and dependents need re-evaluation.
pub type UpdateNotifier = Arc<dyn Fn(NodeId) + Send + Sync>;

/// Shared facilities a controller hands to every node it creates.
#[derive(Clone)]
pub struct NodeGlobals {
    /// Path of the owning controller; empty for the root controller.
    pub controller_id: String,
    /// Root of the per-component data directories.
    pub data_path: PathBuf,
    /// Components below this stability are refused.
    pub min_stability: Stability,
    /// How long a replaced worker may take to stop.
    pub stop_timeout: Duration,
    pub registry: Arc<Registry>,
    pub on_node_update: UpdateNotifier,
}

impl NodeGlobals {
    /// Globally unique id for a node of this controller.
    pub fn global_id(&self, node_id: &NodeId) -> String {
        if self.controller_id.is_empty() {
            node_id.to_string()
        } else {
            format!("{}/{}", self.controller_id, node_id)
        }
    }
}

/// Behavior common to all graph nodes.
pub trait BlockNode: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// The block this node was built from (current version).
    fn block(&self) -> Block;

    /// Swap in a new block. Takes effect at the next evaluation.
    fn update_block(&self, block: Block);

    fn current_health(&self) -> Health;
}

/// A node with a long-running task.
#[async_trait]
pub trait RunnableNode: BlockNode {
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError>;
}

/// A node of the controller graph.
#[derive(Clone)]
pub enum Node {
    Component(Arc<ComponentNode>),
    Custom(Arc<CustomComponentNode>),
    Import(Arc<ImportConfigNode>),
    Declare(Arc<DeclareNode>),
    Argument(Arc<ArgumentNode>),
    Export(Arc<ExportNode>),
    Foreach(Arc<ForeachNode>),
}

impl Node {
    pub fn as_block_node(&self) -> &dyn BlockNode {
        match self {
            Node::Component(n) => n.as_ref(),
            Node::Custom(n) => n.as_ref(),
            Node::Import(n) => n.as_ref(),
            Node::Declare(n) => n.as_ref(),
            Node::Argument(n) => n.as_ref(),
            Node::Export(n) => n.as_ref(),
            Node::Foreach(n) => n.as_ref(),
        }
    }

    /// Re-project the node's block against an up-to-date scope.
    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        match self {
            Node::Component(n) => n.evaluate_node(scope),
            Node::Custom(n) => n.evaluate(scope),
            Node::Import(n) => n.evaluate(scope),
            Node::Declare(n) => n.evaluate(scope),
            Node::Argument(n) => n.evaluate(scope),
            Node::Export(n) => n.evaluate(scope),
            Node::Foreach(n) => n.evaluate(scope),
        }
    }

    /// The node as a schedulable task, if it has one.
    pub fn as_runnable(&self) -> Option<Arc<dyn RunnableNode>> {
        match self {
            Node::Component(n) => Some(Arc::clone(n) as Arc<dyn RunnableNode>),
            Node::Custom(n) => Some(Arc::clone(n) as Arc<dyn RunnableNode>),
            Node::Import(n) => Some(Arc::clone(n) as Arc<dyn RunnableNode>),
            Node::Foreach(n) => Some(Arc::clone(n) as Arc<dyn RunnableNode>),
            Node::Declare(_) | Node::Argument(_) | Node::Export(_) => None,
        }
    }

    /// The node's current export record, if it publishes one.
    pub fn exports(&self) -> Option<Value> {
        match self {
            Node::Component(n) => n.exports(),
            Node::Custom(n) => n.exports(),
            Node::Argument(n) => n.exports(),
            Node::Import(_) | Node::Declare(_) | Node::Export(_) | Node::Foreach(_) => None,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.as_block_node().node_id()
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Component(_) => "component",
            Node::Custom(_) => "custom",
            Node::Import(_) => "import",
            Node::Declare(_) => "declare",
            Node::Argument(_) => "argument",
            Node::Export(_) => "export",
            Node::Foreach(_) => "foreach",
        }
    }
}
