//! Node wrapping a registered component type.

use crate::component::{Component, ComponentError, Options};
use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::node::{BlockNode, NodeGlobals, RunnableNode, UpdateNotifier};
use crate::registry::Registration;
use async_trait::async_trait;
use conflux_dsl::{Arguments, Block, Scope, Value, evaluate_block};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The managed component instance and everything that decides whether the
/// next evaluation updates it in place or rebuilds it.
struct ComponentState {
    args: Option<Arguments>,
    component: Option<Arc<dyn Component>>,
    /// Bumped on every rebuild so the run loop can tell a real replacement
    /// from a stale wakeup.
    generation: u64,
    /// Set when an in-place update failed; the next successful evaluation
    /// rebuilds instead of retrying the update.
    update_failed: bool,
}

/// A graph node owning one component instance.
///
/// Created when the controller sees a block whose name is registered.
/// Evaluation projects the block body onto the component's argument
/// schema; if the arguments changed, the running instance is updated in
/// place when it supports that, and rebuilt (cancel-then-construct by the
/// run loop) when it does not.
pub struct ComponentNode {
    id: NodeId,
    global_id: String,
    registration: Registration,
    data_path: std::path::PathBuf,
    on_update: UpdateNotifier,

    // Lock order: block/state before any health mutex.
    block: Mutex<Block>,
    state: Mutex<ComponentState>,
    exports: Mutex<Option<Value>>,
    rebuild: Notify,

    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
}

impl ComponentNode {
    pub fn new(block: Block, registration: Registration, globals: &NodeGlobals) -> Arc<Self> {
        let id = NodeId::from(block.id());
        let global_id = globals.global_id(&id);
        let data_path = globals.data_path.join(&global_id);
        Arc::new(Self {
            id,
            global_id,
            registration,
            data_path,
            on_update: Arc::clone(&globals.on_node_update),
            block: Mutex::new(block),
            state: Mutex::new(ComponentState {
                args: None,
                component: None,
                generation: 0,
                update_failed: false,
            }),
            exports: Mutex::new(None),
            rebuild: Notify::new(),
            eval_health: Mutex::new(Health::default()),
            run_health: Mutex::new(Health::default()),
        })
    }

    /// The dotted component type name (`metrics.scrape`).
    pub fn component_name(&self) -> &'static str {
        self.registration.name
    }

    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    /// Most recent successfully coerced arguments.
    pub fn arguments(&self) -> Option<Arguments> {
        self.state.lock().expect("state lock").args.clone()
    }

    /// Most recent export record published by the component.
    pub fn exports(&self) -> Option<Value> {
        self.exports.lock().expect("exports lock").clone()
    }

    fn set_eval_health(&self, health: Health) {
        *self.eval_health.lock().expect("health lock") = health;
    }

    fn set_run_health(&self, health: Health) {
        *self.run_health.lock().expect("health lock") = health;
    }

    fn options(self: &Arc<Self>) -> Options {
        let weak: Weak<ComponentNode> = Arc::downgrade(self);
        let on_state_change = Arc::new(move |value: Value| {
            let Some(node) = weak.upgrade() else {
                return;
            };
            let changed = {
                let mut exports = node.exports.lock().expect("exports lock");
                if exports.as_ref() == Some(&value) {
                    false
                } else {
                    *exports = Some(value);
                    true
                }
            };
            if changed {
                (node.on_update)(node.id.clone());
            }
        });
        Options {
            id: self.id.to_string(),
            global_id: self.global_id.clone(),
            data_path: self.data_path.clone(),
            on_state_change,
        }
    }

    /// Evaluate with access to the owning Arc (needed to hand the
    /// component a weak self-reference for export publication).
    pub fn evaluate_node(self: &Arc<Self>, scope: &Scope) -> Result<(), NodeError> {
        let block = self.block.lock().expect("block lock").clone();
        let schema = (self.registration.args)();

        let args = match evaluate_block(&block.body, block.span, scope, &schema) {
            Ok(args) => args,
            Err(err) => {
                self.set_eval_health(Health::unhealthy(err.to_string()));
                return Err(err.into());
            }
        };

        let mut state = self.state.lock().expect("state lock");

        if state.component.is_some()
            && !state.update_failed
            && state.args.as_ref() == Some(&args)
        {
            drop(state);
            self.set_eval_health(Health::healthy("component evaluated"));
            return Ok(());
        }

        if let Some(component) = state.component.clone().filter(|_| !state.update_failed) {
            match component.update(args.clone()) {
                Ok(()) => {
                    state.args = Some(args);
                    drop(state);
                    debug!(node = %self.id, "component updated in place");
                    self.set_eval_health(Health::healthy("component updated"));
                    return Ok(());
                }
                Err(ComponentError::UpdateUnsupported) => {
                    debug!(node = %self.id, "component does not update in place; rebuilding");
                }
                Err(err) => {
                    state.update_failed = true;
                    drop(state);
                    warn!(node = %self.id, %err, "in-place update failed; previous configuration keeps running");
                    self.set_eval_health(Health::unhealthy(format!(
                        "failed to update component: {}",
                        err
                    )));
                    return Err(err.into());
                }
            }
        }

        if let Err(err) = std::fs::create_dir_all(&self.data_path) {
            drop(state);
            let err = ComponentError::Build(format!(
                "failed to create data directory {}: {}",
                self.data_path.display(),
                err
            ));
            self.set_eval_health(Health::unhealthy(err.to_string()));
            return Err(err.into());
        }

        match (self.registration.build)(self.options(), args.clone()) {
            Ok(component) => {
                state.component = Some(component);
                state.generation += 1;
                state.args = Some(args);
                state.update_failed = false;
                drop(state);
                self.rebuild.notify_one();
                self.set_eval_health(Health::healthy("component built"));
                Ok(())
            }
            Err(err) => {
                drop(state);
                self.set_eval_health(Health::unhealthy(format!(
                    "failed to build component: {}",
                    err
                )));
                Err(err.into())
            }
        }
    }

    fn current_component(&self) -> (u64, Option<Arc<dyn Component>>) {
        let state = self.state.lock().expect("state lock");
        (state.generation, state.component.clone())
    }
}

impl BlockNode for ComponentNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn block(&self) -> Block {
        self.block.lock().expect("block lock").clone()
    }

    fn update_block(&self, block: Block) {
        *self.block.lock().expect("block lock") = block;
    }

    fn current_health(&self) -> Health {
        let eval = self.eval_health.lock().expect("health lock").clone();
        let run = self.run_health.lock().expect("health lock").clone();
        let mut facets = vec![eval, run];
        if let (_, Some(component)) = self.current_component() {
            if let Some(health) = component.health() {
                facets.push(health);
            }
        }
        Health::least_healthy(facets)
    }
}

#[async_trait]
impl RunnableNode for ComponentNode {
    /// Runs the managed component until the token cancels, swapping in a
    /// fresh instance whenever evaluation rebuilt it.
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        self.set_run_health(Health::healthy("started component"));

        'replace: loop {
            let (generation, component) = self.current_component();
            let Some(component) = component else {
                self.set_run_health(Health::unhealthy("component never evaluated"));
                return Err(NodeError::Unevaluated);
            };

            let child = ctx.child_token();
            let mut run = Box::pin(component.run(child.clone()));

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        child.cancel();
                        self.set_run_health(Health::exited("component shut down cleanly"));
                        return Ok(());
                    }
                    _ = self.rebuild.notified() => {
                        let (current, _) = self.current_component();
                        if current != generation {
                            child.cancel();
                            continue 'replace;
                        }
                        // Stale wakeup; the running instance is current.
                    }
                    result = &mut run => {
                        if ctx.is_cancelled() {
                            self.set_run_health(Health::exited("component shut down cleanly"));
                            return Ok(());
                        }
                        return match result {
                            Ok(()) => {
                                self.set_run_health(Health::exited("component finished"));
                                Ok(())
                            }
                            Err(err) => {
                                self.set_run_health(Health::exited(format!(
                                    "component shut down with error: {}",
                                    err
                                )));
                                Err(err.into())
                            }
                        };
                    }
                }
            }
        }
    }
}
