//! Long-running task supervision.
//!
//! The scheduler owns one worker task per runnable node. `apply_tasks`
//! installs exactly the given set: new tasks get a worker, vanished or
//! replaced tasks are cancelled and awaited up to the stop deadline, after
//! which the worker is orphaned and logged. Task equality is `Arc`
//! identity, which forces a cancel-then-start replacement whenever a node
//! object is rebuilt.

use crate::graph::NodeId;
use crate::node::RunnableNode;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default time to wait for a cancelled worker before orphaning it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    node: Arc<dyn RunnableNode>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor for the controller's runnable nodes.
pub struct Scheduler {
    stop_timeout: Duration,
    workers: tokio::sync::Mutex<IndexMap<NodeId, Worker>>,
}

impl Scheduler {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            stop_timeout,
            workers: tokio::sync::Mutex::new(IndexMap::new()),
        }
    }

    /// Install exactly the given task set.
    ///
    /// Workers whose node is gone, or whose node object changed identity,
    /// are stopped before their replacement starts; a NodeId never has two
    /// live workers.
    pub async fn apply_tasks(&self, parent: &CancellationToken, tasks: Vec<Arc<dyn RunnableNode>>) {
        let desired: IndexMap<NodeId, Arc<dyn RunnableNode>> = tasks
            .into_iter()
            .map(|node| (node.node_id().clone(), node))
            .collect();

        let mut workers = self.workers.lock().await;

        let stale: Vec<NodeId> = workers
            .iter()
            .filter(|(id, worker)| match desired.get(*id) {
                Some(node) => !Arc::ptr_eq(node, &worker.node),
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(worker) = workers.shift_remove(&id) {
                self.stop_worker(&id, worker).await;
            }
        }

        for (id, node) in desired {
            if workers.contains_key(&id) {
                continue;
            }
            debug!(node = %id, "starting worker");
            let token = parent.child_token();
            let run_node = Arc::clone(&node);
            let run_token = token.clone();
            let run_id = id.clone();
            let handle = tokio::spawn(async move {
                if let Err(err) = run_node.run(run_token).await {
                    error!(node = %run_id, %err, "node stopped running");
                }
            });
            workers.insert(
                id,
                Worker {
                    node,
                    token,
                    handle,
                },
            );
        }
    }

    /// Cancel every worker and wait for each up to the stop deadline.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        let all: Vec<NodeId> = workers.keys().cloned().collect();
        for id in all {
            if let Some(worker) = workers.shift_remove(&id) {
                self.stop_worker(&id, worker).await;
            }
        }
    }

    /// Node ids with a live worker (test and status surface).
    pub async fn running(&self) -> Vec<NodeId> {
        self.workers.lock().await.keys().cloned().collect()
    }

    async fn stop_worker(&self, id: &NodeId, worker: Worker) {
        debug!(node = %id, "stopping worker");
        worker.token.cancel();
        match tokio::time::timeout(self.stop_timeout, worker.handle).await {
            Ok(_) => {}
            Err(_) => {
                warn!(node = %id, timeout = ?self.stop_timeout, "worker did not stop in time; orphaning");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Health;
    use crate::node::BlockNode;
    use async_trait::async_trait;
    use conflux_dsl::{Block, Span};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A minimal runnable node that counts starts and stops.
    struct CountingNode {
        id: NodeId,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CountingNode {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::from(id),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl BlockNode for CountingNode {
        fn node_id(&self) -> &NodeId {
            &self.id
        }

        fn block(&self) -> Block {
            Block {
                name: vec!["test".into()],
                label: None,
                body: Vec::new(),
                span: Span::default(),
            }
        }

        fn update_block(&self, _block: Block) {}

        fn current_health(&self) -> Health {
            Health::default()
        }
    }

    #[async_trait]
    impl RunnableNode for CountingNode {
        async fn run(&self, ctx: CancellationToken) -> Result<(), crate::error::NodeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            ctx.cancelled().await;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_apply_starts_and_removal_stops() {
        let sched = Scheduler::new(Duration::from_secs(1));
        let parent = CancellationToken::new();
        let node = CountingNode::new("test.a");

        sched
            .apply_tasks(&parent, vec![node.clone() as Arc<dyn RunnableNode>])
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(node.starts.load(Ordering::SeqCst), 1);

        sched.apply_tasks(&parent, Vec::new()).await;
        assert_eq!(node.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_task_not_restarted() {
        let sched = Scheduler::new(Duration::from_secs(1));
        let parent = CancellationToken::new();
        let node = CountingNode::new("test.a");

        for _ in 0..3 {
            sched
                .apply_tasks(&parent, vec![node.clone() as Arc<dyn RunnableNode>])
                .await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(node.starts.load(Ordering::SeqCst), 1);
        assert_eq!(node.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replaced_task_is_cancel_then_start() {
        let sched = Scheduler::new(Duration::from_secs(1));
        let parent = CancellationToken::new();
        let first = CountingNode::new("test.a");
        let second = CountingNode::new("test.a");

        sched
            .apply_tasks(&parent, vec![first.clone() as Arc<dyn RunnableNode>])
            .await;
        sched
            .apply_tasks(&parent, vec![second.clone() as Arc<dyn RunnableNode>])
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(first.stops.load(Ordering::SeqCst), 1);
        assert_eq!(second.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let sched = Scheduler::new(Duration::from_secs(1));
        let parent = CancellationToken::new();
        let a = CountingNode::new("test.a");
        let b = CountingNode::new("test.b");

        sched
            .apply_tasks(
                &parent,
                vec![
                    a.clone() as Arc<dyn RunnableNode>,
                    b.clone() as Arc<dyn RunnableNode>,
                ],
            )
            .await;
        sched.shutdown().await;

        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert_eq!(b.stops.load(Ordering::SeqCst), 1);
        assert!(sched.running().await.is_empty());
    }
}
