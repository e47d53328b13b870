//! Foreach: a templated sub-graph instantiated once per collection
//! element.

use crate::controller::{Controller, ControllerOptions};
use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::node::custom::CustomRegistry;
use crate::node::{BlockNode, NodeGlobals, RunnableNode};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use conflux_dsl::{
    ArgsSchema, Block, Body, EvalError, Scope, Stmt, Value, ValueKind, evaluate_block,
};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Compute identity-stable instance ids for a collection.
///
/// Without an id field, ids are element indices. With one, elements must
/// be objects carrying the field; duplicates disambiguate with an `_N`
/// suffix where N counts occurrences of the same key, starting at 1. Ids
/// derived this way survive reloads and collection reordering, so
/// instances update in place instead of being recreated.
pub fn instance_ids(collection: &[Value], id_field: Option<&str>) -> Result<Vec<String>, String> {
    let Some(field) = id_field else {
        return Ok((0..collection.len()).map(|i| i.to_string()).collect());
    };

    let mut counts: IndexMap<String, usize> = IndexMap::new();
    let mut ids = Vec::with_capacity(collection.len());
    for (index, element) in collection.iter().enumerate() {
        let Some(object) = element.as_object() else {
            return Err(format!(
                "id is set but element {} is {}, not an object",
                index,
                element.kind_name()
            ));
        };
        let Some(value) = object.get(field) else {
            return Err(format!("element {} has no field {:?}", index, field));
        };
        let key = match value {
            Value::String(s) => s.clone(),
            other => format!("{}", other),
        };
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        ids.push(format!("{}_{}", key, count));
    }
    Ok(ids)
}

/// One materialized instance: a nested controller running the template
/// with the loop variable bound.
struct ForeachInstance {
    id: NodeId,
    child: Controller,
    template: Body,
    loaded: AtomicBool,
    run_health: Mutex<Health>,
}

impl ForeachInstance {
    fn set_run_health(&self, health: Health) {
        *self.run_health.lock().expect("health lock") = health;
    }
}

impl BlockNode for ForeachInstance {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn block(&self) -> Block {
        Block {
            name: vec!["foreach".to_string()],
            label: None,
            body: Vec::new(),
            span: conflux_dsl::Span::default(),
        }
    }

    fn update_block(&self, _block: Block) {}

    fn current_health(&self) -> Health {
        let run = self.run_health.lock().expect("health lock").clone();
        Health::least_healthy([run, self.child.aggregate_health()])
    }
}

#[async_trait]
impl RunnableNode for ForeachInstance {
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        if !self.loaded.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.child.load_body(self.template.clone()).await {
                warn!(instance = %self.id, %err, "foreach template failed to load");
                self.set_run_health(Health::unhealthy(format!(
                    "template failed to load: {}",
                    err
                )));
                ctx.cancelled().await;
                return Ok(());
            }
        }
        self.set_run_health(Health::healthy("instance running"));
        self.child.run(ctx).await;
        self.set_run_health(Health::exited("instance shut down"));
        Ok(())
    }
}

/// A `foreach "label" { collection = …, var = "x", [id = "…"], template {…} }`
/// node.
pub struct ForeachNode {
    id: NodeId,
    global_id: String,
    globals: NodeGlobals,
    block: Mutex<Block>,
    /// Statements of the block body minus the template block.
    template: Mutex<Body>,
    custom_registry: Mutex<Arc<CustomRegistry>>,
    instances: Mutex<IndexMap<String, Arc<ForeachInstance>>>,
    refresh: Notify,
    running: AtomicBool,
    scheduler: Scheduler,
    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
}

impl ForeachNode {
    /// Create the node; fails if the body has no template block.
    pub fn new(block: Block, globals: NodeGlobals) -> Result<Arc<Self>, String> {
        let template = extract_template(&block.body)
            .ok_or_else(|| "foreach requires a template block".to_string())?;
        let id = NodeId::from(block.id());
        let global_id = globals.global_id(&id);
        let stop_timeout = globals.stop_timeout;
        Ok(Arc::new(Self {
            id,
            global_id,
            globals,
            block: Mutex::new(block),
            template: Mutex::new(template),
            custom_registry: Mutex::new(CustomRegistry::empty()),
            instances: Mutex::new(IndexMap::new()),
            refresh: Notify::new(),
            running: AtomicBool::new(false),
            scheduler: Scheduler::new(stop_timeout),
            eval_health: Mutex::new(Health::default()),
            run_health: Mutex::new(Health::default()),
        }))
    }

    /// Namespace the template resolves declares against (set by the
    /// controller on every load).
    pub fn set_custom_registry(&self, registry: Arc<CustomRegistry>) {
        *self.custom_registry.lock().expect("registry lock") = registry;
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new()
            .required("collection", ValueKind::List(Box::new(ValueKind::Any)))
            .required("var", ValueKind::String)
            .optional_no_default("id", ValueKind::String)
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        let block = self.block.lock().expect("block lock").clone();
        let attrs: Body = block
            .body
            .iter()
            .filter(|stmt| !is_template(stmt))
            .cloned()
            .collect();

        let args = match evaluate_block(&attrs, block.span, scope, &Self::schema()) {
            Ok(args) => args,
            Err(err) => {
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let collection = args.list("collection").unwrap_or_default().to_vec();
        let var = args.str("var").unwrap_or_default().to_string();
        let id_field = args.str("id").map(|s| s.to_string());

        let ids = match instance_ids(&collection, id_field.as_deref()) {
            Ok(ids) => ids,
            Err(message) => {
                let err = EvalError::Message {
                    message,
                    span: block.span,
                };
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let parent_scope = Arc::new(scope.clone());
        let registry = self.custom_registry.lock().expect("registry lock").clone();
        let template = self.template.lock().expect("template lock").clone();

        let mut set_changed = false;
        {
            let mut instances = self.instances.lock().expect("instances lock");
            let mut next: IndexMap<String, Arc<ForeachInstance>> = IndexMap::new();

            for (instance_id, element) in ids.iter().zip(collection.iter()) {
                let mut binding = IndexMap::new();
                binding.insert(var.clone(), element.clone());
                let instance_scope =
                    Arc::new(Scope::with_parent(Arc::clone(&parent_scope), binding));

                match instances.get(instance_id) {
                    Some(existing) => {
                        // Same identity: refresh the scope in place. The
                        // child controller skips work if nothing changed.
                        existing.child.update_base_scope(instance_scope);
                        next.insert(instance_id.clone(), Arc::clone(existing));
                    }
                    None => {
                        debug!(node = %self.id, instance = %instance_id, "creating foreach instance");
                        set_changed = true;
                        let child = Controller::new(ControllerOptions {
                            controller_id: format!("{}/{}", self.global_id, instance_id),
                            data_path: self.globals.data_path.clone(),
                            min_stability: self.globals.min_stability,
                            stop_timeout: self.globals.stop_timeout,
                            registry: Arc::clone(&self.globals.registry),
                            parent_custom_registry: Some(Arc::clone(&registry)),
                            module: None,
                            base_scope: instance_scope,
                        });
                        next.insert(
                            instance_id.clone(),
                            Arc::new(ForeachInstance {
                                id: NodeId::from(format!("{}.{}", self.id, instance_id)),
                                child,
                                template: template.clone(),
                                loaded: AtomicBool::new(false),
                                run_health: Mutex::new(Health::default()),
                            }),
                        );
                    }
                }
            }

            if next.keys().ne(instances.keys()) {
                set_changed = true;
            }
            *instances = next;
        }

        if set_changed && self.running.load(Ordering::SeqCst) {
            self.refresh.notify_one();
        }

        *self.eval_health.lock().expect("health lock") = Health::healthy("foreach evaluated");
        Ok(())
    }

    /// Current instance ids, in collection order.
    pub fn instance_id_list(&self) -> Vec<String> {
        self.instances
            .lock()
            .expect("instances lock")
            .keys()
            .cloned()
            .collect()
    }

    async fn apply_instances(&self, ctx: &CancellationToken) {
        let tasks: Vec<Arc<dyn RunnableNode>> = {
            let instances = self.instances.lock().expect("instances lock");
            instances
                .values()
                .map(|instance| Arc::clone(instance) as Arc<dyn RunnableNode>)
                .collect()
        };
        self.scheduler.apply_tasks(ctx, tasks).await;
    }
}

fn is_template(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Block(block) if block.full_name() == "template")
}

fn extract_template(body: &Body) -> Option<Body> {
    body.iter().find_map(|stmt| match stmt {
        Stmt::Block(block) if block.full_name() == "template" => Some(block.body.clone()),
        _ => None,
    })
}

/// Content hash of the template block inside a foreach body.
///
/// The controller reuses a foreach node (updating attributes in place) as
/// long as the template is unchanged; a template change replaces the node
/// and its instances wholesale.
pub fn template_fingerprint(block: &Block) -> Option<u64> {
    block.body.iter().find_map(|stmt| match stmt {
        Stmt::Block(inner) if inner.full_name() == "template" => Some(inner.fingerprint()),
        _ => None,
    })
}

impl BlockNode for ForeachNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn block(&self) -> Block {
        self.block.lock().expect("block lock").clone()
    }

    fn update_block(&self, block: Block) {
        if let Some(template) = extract_template(&block.body) {
            *self.template.lock().expect("template lock") = template;
        }
        *self.block.lock().expect("block lock") = block;
    }

    fn current_health(&self) -> Health {
        let eval = self.eval_health.lock().expect("health lock").clone();
        let run = self.run_health.lock().expect("health lock").clone();
        let mut facets = vec![eval, run];
        {
            let instances = self.instances.lock().expect("instances lock");
            facets.extend(instances.values().map(|i| i.current_health()));
        }
        Health::least_healthy(facets)
    }
}

#[async_trait]
impl RunnableNode for ForeachNode {
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        self.running.store(true, Ordering::SeqCst);
        self.set_run_health(Health::healthy("started foreach"));
        self.apply_instances(&ctx).await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.scheduler.shutdown().await;
                    self.running.store(false, Ordering::SeqCst);
                    self.set_run_health(Health::exited("foreach shut down"));
                    return Ok(());
                }
                _ = self.refresh.notified() => {
                    self.apply_instances(&ctx).await;
                }
            }
        }
    }
}

impl ForeachNode {
    fn set_run_health(&self, health: Health) {
        *self.run_health.lock().expect("health lock") = health;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, &str)]) -> Value {
        let mut fields = IndexMap::new();
        for (key, value) in pairs {
            fields.insert(key.to_string(), Value::String(value.to_string()));
        }
        Value::Object(fields)
    }

    #[test]
    fn test_index_ids_without_id_field() {
        let collection = vec![Value::Int(5), Value::Int(5)];
        assert_eq!(instance_ids(&collection, None).unwrap(), vec!["0", "1"]);
    }

    #[test]
    fn test_id_field_with_duplicates() {
        let collection = vec![
            obj(&[("ns", "dev"), ("b", "3")]),
            obj(&[("ns", "prod"), ("b", "3")]),
            obj(&[("ns", "dev"), ("b", "4")]),
        ];
        assert_eq!(
            instance_ids(&collection, Some("ns")).unwrap(),
            vec!["dev_1", "prod_1", "dev_2"]
        );
    }

    #[test]
    fn test_id_field_stable_under_permutation() {
        let forward = vec![obj(&[("ns", "dev")]), obj(&[("ns", "prod")])];
        let reversed = vec![obj(&[("ns", "prod")]), obj(&[("ns", "dev")])];

        let mut forward_ids = instance_ids(&forward, Some("ns")).unwrap();
        let mut reversed_ids = instance_ids(&reversed, Some("ns")).unwrap();
        forward_ids.sort();
        reversed_ids.sort();
        assert_eq!(forward_ids, reversed_ids);
    }

    #[test]
    fn test_id_field_requires_objects() {
        let collection = vec![Value::Int(1)];
        assert!(instance_ids(&collection, Some("ns")).is_err());
    }

    #[test]
    fn test_id_field_missing_key() {
        let collection = vec![obj(&[("other", "x")])];
        assert!(instance_ids(&collection, Some("ns")).is_err());
    }
}
