//! Declare instantiation: custom components backed by a nested controller.

use crate::controller::{Controller, ControllerOptions, ModuleContext};
use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::node::declare::{ArgumentValues, OnExport};
use crate::node::{BlockNode, NodeGlobals, RunnableNode, UpdateNotifier};
use async_trait::async_trait;
use conflux_dsl::{
    ArgsSchema, Block, Body, Scope, Stmt, Value, ValueKind, evaluate_block,
};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Namespace used to resolve declare instantiations: local declares, the
/// declares contributed by each import (keyed by import label), and the
/// enclosing scope's namespace for nested controllers.
///
/// Children inherit but never overwrite the parent's declares: lookups try
/// the local level first and fall back outward.
pub struct CustomRegistry {
    pub parent: Option<Arc<CustomRegistry>>,
    /// declare label → declare block
    pub declares: IndexMap<String, Block>,
    /// import label → that module's namespace
    pub imports: IndexMap<String, Arc<CustomRegistry>>,
}

impl CustomRegistry {
    /// An empty namespace.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            declares: IndexMap::new(),
            imports: IndexMap::new(),
        })
    }

    /// Resolve a block name to a declare body and the namespace it was
    /// defined in (so its own references resolve against the defining
    /// module, not the instantiating one).
    pub fn lookup(registry: &Arc<Self>, name: &[String]) -> Option<(Block, Arc<Self>)> {
        match name {
            [] => None,
            [single] => match registry.declares.get(single) {
                Some(block) => Some((block.clone(), Arc::clone(registry))),
                None => registry
                    .parent
                    .as_ref()
                    .and_then(|parent| Self::lookup(parent, name)),
            },
            [first, rest @ ..] => match registry.imports.get(first) {
                Some(module) => Self::lookup(module, rest),
                None => registry
                    .parent
                    .as_ref()
                    .and_then(|parent| Self::lookup(parent, name)),
            },
        }
    }

    /// Whether `segment` names a declare or import namespace anywhere in
    /// the chain. Used to tell "declare whose module is still loading"
    /// apart from a genuinely unknown component type.
    pub fn knows_prefix(registry: &Arc<Self>, segment: &str) -> bool {
        if registry.declares.contains_key(segment) || registry.imports.contains_key(segment) {
            return true;
        }
        registry
            .parent
            .as_ref()
            .is_some_and(|parent| Self::knows_prefix(parent, segment))
    }
}

/// A resolved declare template.
#[derive(Clone)]
pub struct Template {
    pub body: Body,
    pub fingerprint: u64,
    /// Namespace the declare was defined in.
    pub registry: Arc<CustomRegistry>,
}

/// A node instantiating a declare.
///
/// Owns a nested controller that loads the declare body. Supplied
/// attribute values flow in through the shared argument map; `export`
/// blocks flow back out as this node's export record.
pub struct CustomComponentNode {
    id: NodeId,
    block: Mutex<Block>,
    template: Option<Template>,
    /// Schema derived from the template's argument blocks.
    args_schema: ArgsSchema,
    arguments: ArgumentValues,
    child: Controller,
    on_update: UpdateNotifier,

    exports: Mutex<IndexMap<String, Value>>,
    published: Mutex<Option<Value>>,

    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
}

impl CustomComponentNode {
    pub fn new(block: Block, template: Option<Template>, globals: NodeGlobals) -> Arc<Self> {
        let id = NodeId::from(block.id());
        let global_id = globals.global_id(&id);
        let arguments: ArgumentValues = Arc::new(RwLock::new(IndexMap::new()));

        Arc::new_cyclic(|weak: &Weak<CustomComponentNode>| {
            let export_weak = weak.clone();
            let on_export: OnExport = Arc::new(move |name: &str, value: Value| {
                if let Some(node) = export_weak.upgrade() {
                    node.record_export(name, value);
                }
            });

            let child = Controller::new(ControllerOptions {
                controller_id: global_id,
                data_path: globals.data_path.clone(),
                min_stability: globals.min_stability,
                stop_timeout: globals.stop_timeout,
                registry: Arc::clone(&globals.registry),
                parent_custom_registry: template.as_ref().map(|t| Arc::clone(&t.registry)),
                module: Some(ModuleContext {
                    arguments: Arc::clone(&arguments),
                    on_export,
                }),
                base_scope: Arc::new(Scope::default()),
            });

            let args_schema = template
                .as_ref()
                .map(|t| argument_schema(&t.body))
                .unwrap_or_default();

            Self {
                id,
                block: Mutex::new(block),
                template,
                args_schema,
                arguments,
                child,
                on_update: globals.on_node_update,
                exports: Mutex::new(IndexMap::new()),
                published: Mutex::new(None),
                eval_health: Mutex::new(Health::default()),
                run_health: Mutex::new(Health::default()),
            }
        })
    }

    /// Fingerprint of the declare body this node was resolved against.
    pub fn template_fingerprint(&self) -> Option<u64> {
        self.template.as_ref().map(|t| t.fingerprint)
    }

    pub fn exports(&self) -> Option<Value> {
        self.published.lock().expect("exports lock").clone()
    }

    fn record_export(&self, name: &str, value: Value) {
        let record = {
            let mut exports = self.exports.lock().expect("exports lock");
            exports.insert(name.to_string(), value);
            Value::Object(exports.clone())
        };
        let changed = {
            let mut published = self.published.lock().expect("exports lock");
            if published.as_ref() == Some(&record) {
                false
            } else {
                *published = Some(record);
                true
            }
        };
        if changed {
            (self.on_update)(self.id.clone());
        }
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        if self.template.is_none() {
            let block = self.block.lock().expect("block lock").clone();
            let message = format!(
                "declare {:?} is not available (module not yet loaded?)",
                block.full_name()
            );
            *self.eval_health.lock().expect("health lock") = Health::unhealthy(message.clone());
            return Err(NodeError::Content(message));
        }

        let block = self.block.lock().expect("block lock").clone();
        let args = match evaluate_block(&block.body, block.span, scope, &self.args_schema) {
            Ok(args) => args,
            Err(err) => {
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let changed = {
            let mut values = self.arguments.write().expect("argument values lock");
            if *values == *args.record() {
                false
            } else {
                *values = args.record().clone();
                true
            }
        };
        if changed {
            debug!(node = %self.id, "custom component arguments changed");
            self.child.invalidate_arguments();
        }

        *self.eval_health.lock().expect("health lock") =
            Health::healthy("custom component evaluated");
        Ok(())
    }
}

/// Derive the instantiation schema from the template's `argument` blocks:
/// one attribute per argument, accepting any value.
fn argument_schema(body: &Body) -> ArgsSchema {
    let mut schema = ArgsSchema::new();
    for stmt in body {
        let Stmt::Block(block) = stmt else {
            continue;
        };
        if block.full_name() != "argument" {
            continue;
        }
        let Some(label) = &block.label else {
            continue;
        };
        // Presence is validated by the argument node itself, which knows
        // whether the argument is optional or has a default.
        schema = schema.optional_no_default(label.clone(), ValueKind::Any);
    }
    schema
}

impl BlockNode for CustomComponentNode {
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
        Health::least_healthy([eval, run, self.child.aggregate_health()])
    }
}

#[async_trait]
impl RunnableNode for CustomComponentNode {
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        let Some(template) = &self.template else {
            // Nothing to run; stay alive so the node keeps reporting its
            // unhealthy evaluation until a reload resolves the declare.
            ctx.cancelled().await;
            return Ok(());
        };

        self.set_run_health(Health::healthy("started custom component"));

        if let Err(err) = self.child.load_body(template.body.clone()).await {
            warn!(node = %self.id, %err, "declare body failed to load");
            self.set_run_health(Health::unhealthy(format!(
                "declare body failed to load: {}",
                err
            )));
            ctx.cancelled().await;
            return Ok(());
        }

        self.child.run(ctx).await;
        self.set_run_health(Health::exited("custom component shut down"));
        Ok(())
    }
}

impl CustomComponentNode {
    fn set_run_health(&self, health: Health) {
        *self.run_health.lock().expect("health lock") = health;
    }
}
