//! The controller: owns the graph, applies configurations transactionally,
//! and drives re-evaluation in dependency order.
//!
//! One controller manages one flat namespace of nodes. Imports, declare
//! instantiations and foreach instances each nest another controller whose
//! node ids are prefixed with the parent's controller path.
//!
//! Locking: `state` is a plain RwLock never held across awaits; the async
//! `reconcile_guard` serializes loads and reconciles so two never
//! interleave. Node health locks are always taken after node state locks.

use crate::error::LoadError;
use crate::graph::{Dag, NodeId};
use crate::health::Health;
use crate::node::{
    ArgumentNode, BlockNode, ComponentNode, CustomComponentNode, CustomRegistry, DeclareNode,
    ExportNode, ForeachNode, ImportConfigNode, Node, NodeGlobals, Template, UpdateNotifier,
};
use crate::node::{ArgumentValues, OnExport};
use crate::registry::{Registry, Stability};
use crate::scheduler::{DEFAULT_STOP_TIMEOUT, Scheduler};
use conflux_dsl::{Block, Body, Scope, Stmt, Value, parse_file};
use indexmap::{IndexMap, IndexSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scope variable holding the module directory of an imported body.
pub const MODULE_PATH: &str = "MODULE_PATH";

/// Context for a controller that runs a declare body on behalf of a
/// custom component instance.
#[derive(Clone)]
pub struct ModuleContext {
    /// Values the instantiation supplied for `argument` blocks.
    pub arguments: ArgumentValues,
    /// Receives each `export` block's value.
    pub on_export: OnExport,
}

/// Construction options for a controller.
#[derive(Clone)]
pub struct ControllerOptions {
    /// Path prefix for global ids; empty for the root controller.
    pub controller_id: String,
    /// Root of per-component data directories.
    pub data_path: PathBuf,
    /// Component types below this stability are refused.
    pub min_stability: Stability,
    /// Grace period when stopping replaced workers.
    pub stop_timeout: Duration,
    pub registry: Arc<Registry>,
    /// Declares visible from the enclosing scope (nested controllers).
    pub parent_custom_registry: Option<Arc<CustomRegistry>>,
    /// Set when this controller runs a declare body.
    pub module: Option<ModuleContext>,
    /// Scope beneath node exports (foreach var bindings, MODULE_PATH).
    pub base_scope: Arc<Scope>,
}

impl ControllerOptions {
    /// Root controller options with defaults suitable for tests and
    /// embedding.
    pub fn root(data_path: PathBuf, registry: Arc<Registry>) -> Self {
        Self {
            controller_id: String::new(),
            data_path,
            min_stability: Stability::Experimental,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            registry,
            parent_custom_registry: None,
            module: None,
            base_scope: Arc::new(Scope::default()),
        }
    }
}

/// Snapshot of one node's public state.
#[derive(Clone, serde::Serialize)]
pub struct ComponentSnapshot {
    pub id: NodeId,
    pub kind: &'static str,
    pub health: Health,
    pub arguments: Option<Value>,
    pub exports: Option<Value>,
}

#[derive(Default)]
struct State {
    nodes: IndexMap<NodeId, Node>,
    graph: Dag,
    custom_registry: Option<Arc<CustomRegistry>>,
    last_body: Option<Body>,
}

/// Pending work discovered outside a reconcile pass.
#[derive(Default)]
struct DirtySet {
    /// Nodes whose exports changed: re-evaluate their dependents.
    exports_changed: IndexSet<NodeId>,
    /// Nodes that must re-evaluate themselves (and their dependents).
    invalidated: IndexSet<NodeId>,
    /// An import node delivered new module content: reload the whole body
    /// so fresh declares are visible.
    reload: bool,
}

impl DirtySet {
    fn is_empty(&self) -> bool {
        self.exports_changed.is_empty() && self.invalidated.is_empty() && !self.reload
    }
}

struct ControllerInner {
    opts: ControllerOptions,
    base_scope: RwLock<Arc<Scope>>,
    state: RwLock<State>,
    scheduler: Scheduler,
    /// Parent token for all workers this controller spawns.
    root_token: CancellationToken,
    dirty: Mutex<DirtySet>,
    notify: Notify,
    reconcile_guard: tokio::sync::Mutex<()>,
}

/// A running component graph.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub fn new(opts: ControllerOptions) -> Self {
        let base_scope = Arc::clone(&opts.base_scope);
        let stop_timeout = opts.stop_timeout;
        let inner = Arc::new(ControllerInner {
            opts,
            base_scope: RwLock::new(base_scope),
            state: RwLock::new(State::default()),
            scheduler: Scheduler::new(stop_timeout),
            root_token: CancellationToken::new(),
            dirty: Mutex::new(DirtySet::default()),
            notify: Notify::new(),
            reconcile_guard: tokio::sync::Mutex::new(()),
        });
        Self { inner }
    }

    /// The notifier handed to this controller's nodes.
    fn update_notifier(&self) -> UpdateNotifier {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        Arc::new(move |id: NodeId| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let is_import = {
                let state = inner.state.read().expect("state lock");
                matches!(state.nodes.get(&id), Some(Node::Import(_)))
            };
            {
                let mut dirty = inner.dirty.lock().expect("dirty lock");
                if is_import {
                    dirty.reload = true;
                } else {
                    dirty.exports_changed.insert(id);
                }
            }
            inner.notify.notify_one();
        })
    }

    fn globals(&self) -> NodeGlobals {
        NodeGlobals {
            controller_id: self.inner.opts.controller_id.clone(),
            data_path: self.inner.opts.data_path.clone(),
            min_stability: self.inner.opts.min_stability,
            stop_timeout: self.inner.opts.stop_timeout,
            registry: Arc::clone(&self.inner.opts.registry),
            on_node_update: self.update_notifier(),
        }
    }

    /// Parse `text` and swap in the resulting graph.
    ///
    /// Transactional: parse, cycle, duplicate-id and stability errors
    /// reject the load and leave the running graph untouched.
    pub async fn load_source(&self, text: &str) -> Result<(), LoadError> {
        let file = parse_file("config.cfx", text).map_err(LoadError::Parse)?;
        self.load_body(file.body).await
    }

    /// Like [`Controller::load_source`] for an already-parsed body.
    pub async fn load_body(&self, body: Body) -> Result<(), LoadError> {
        let _guard = self.inner.reconcile_guard.lock().await;
        self.load_body_locked(body).await
    }

    async fn load_body_locked(&self, body: Body) -> Result<(), LoadError> {
        let plan = self.plan_load(&body)?;

        // Commit: apply deferred block updates, swap the graph.
        {
            let mut state = self.inner.state.write().expect("state lock");
            for (node, block) in &plan.block_updates {
                node.as_block_node().update_block(block.clone());
            }
            state.nodes = plan.nodes.clone();
            state.graph = plan.graph.clone();
            state.custom_registry = Some(Arc::clone(&plan.custom_registry));
            state.last_body = Some(body);
        }

        info!(
            controller = %self.controller_id_for_log(),
            nodes = plan.nodes.len(),
            changed = plan.dirty.len(),
            "configuration loaded"
        );

        self.evaluate_frontier(&plan.dirty);
        self.gc_data_dirs();

        let tasks: Vec<_> = plan
            .nodes
            .values()
            .filter_map(|node| node.as_runnable())
            .collect();
        self.inner
            .scheduler
            .apply_tasks(&self.inner.root_token, tasks)
            .await;

        Ok(())
    }

    fn controller_id_for_log(&self) -> &str {
        if self.inner.opts.controller_id.is_empty() {
            "root"
        } else {
            &self.inner.opts.controller_id
        }
    }

    /// Build the candidate node set, edges and dirty set for a new body
    /// without touching running state.
    fn plan_load(&self, body: &Body) -> Result<LoadPlan, LoadError> {
        let globals = self.globals();
        let old: IndexMap<NodeId, Node> = {
            let state = self.inner.state.read().expect("state lock");
            state.nodes.clone()
        };

        // Split out declares first: they name the custom component types
        // the remaining blocks may use.
        let mut declares: IndexMap<String, Block> = IndexMap::new();
        let mut blocks: Vec<Block> = Vec::new();
        for stmt in body {
            match stmt {
                Stmt::Attribute(attr) => {
                    return Err(LoadError::TopLevelAttribute {
                        name: attr.name.clone(),
                    });
                }
                Stmt::Block(block) => {
                    if block.full_name() == "declare" {
                        let Some(label) = block.label.clone() else {
                            return Err(LoadError::InvalidBlock {
                                id: block.full_name(),
                                reason: "declare blocks require a label".to_string(),
                            });
                        };
                        if declares.insert(label.clone(), block.clone()).is_some() {
                            return Err(LoadError::DuplicateDeclare { name: label });
                        }
                    }
                    blocks.push(block.clone());
                }
            }
        }

        let mut nodes: IndexMap<NodeId, Node> = IndexMap::new();
        let mut block_updates: Vec<(Node, Block)> = Vec::new();
        let mut dirty: IndexSet<NodeId> = IndexSet::new();

        // Import nodes come first: their already-fetched content decides
        // which custom component types exist.
        let mut imports: IndexMap<String, Arc<ImportConfigNode>> = IndexMap::new();
        for block in &blocks {
            if !is_import_block(block) {
                continue;
            }
            let id = NodeId::from(block.id());
            if nodes.contains_key(&id) {
                return Err(LoadError::DuplicateNode { id });
            }
            let Some(label) = block.label.clone() else {
                return Err(LoadError::InvalidBlock {
                    id: block.full_name(),
                    reason: "import blocks require a label".to_string(),
                });
            };
            let kind = crate::import::SourceKind::from_block_name(&block.full_name()).ok_or_else(
                || LoadError::UnknownComponent {
                    id: block.id(),
                    name: block.full_name(),
                },
            )?;

            let node = match old.get(&id) {
                Some(Node::Import(existing)) if existing.kind() == kind => {
                    if existing.block().fingerprint() != block.fingerprint() {
                        block_updates.push((Node::Import(Arc::clone(existing)), block.clone()));
                        dirty.insert(id.clone());
                    }
                    Arc::clone(existing)
                }
                _ => {
                    dirty.insert(id.clone());
                    ImportConfigNode::new(block.clone(), globals.clone(), kind)
                }
            };
            imports.insert(label, Arc::clone(&node));
            nodes.insert(id, Node::Import(node));
        }

        let custom_registry = Arc::new(CustomRegistry {
            parent: self.inner.opts.parent_custom_registry.clone(),
            declares: declares.clone(),
            imports: imports
                .iter()
                .map(|(label, node)| (label.clone(), node.namespace()))
                .collect(),
        });

        for block in &blocks {
            if is_import_block(block) {
                continue;
            }
            let id = NodeId::from(block.id());
            if nodes.contains_key(&id) {
                return Err(LoadError::DuplicateNode { id });
            }
            let node = self.classify_block(
                block,
                &globals,
                &custom_registry,
                &old,
                &mut block_updates,
                &mut dirty,
            )?;
            nodes.insert(id, node);
        }

        // Reference extraction: edges to the longest node-id prefix of
        // each dotted path. References come from the freshly-parsed
        // blocks, not the nodes: reused nodes still hold their previous
        // block until the plan commits.
        let mut graph = Dag::new();
        for id in nodes.keys() {
            graph.insert(id.clone());
        }
        let mut old_graph_edges: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
        {
            let state = self.inner.state.read().expect("state lock");
            for id in nodes.keys() {
                old_graph_edges.insert(id.clone(), state.graph.dependencies(id));
            }
        }
        for block in &blocks {
            let id = NodeId::from(block.id());
            let refs = conflux_dsl::body_references(&block.body);
            let mut deps: IndexSet<NodeId> = IndexSet::new();
            for path in &refs {
                if let Some(dep) = match_node_prefix(&nodes, path) {
                    if dep != id {
                        deps.insert(dep);
                    }
                }
            }
            if old_graph_edges.get(&id) != Some(&deps) {
                dirty.insert(id.clone());
            }
            graph.replace_edges(&id, deps);
        }

        graph.topo_sort().map_err(LoadError::Cycle)?;

        Ok(LoadPlan {
            nodes,
            graph,
            custom_registry,
            block_updates,
            dirty,
        })
    }

    fn classify_block(
        &self,
        block: &Block,
        globals: &NodeGlobals,
        custom_registry: &Arc<CustomRegistry>,
        old: &IndexMap<NodeId, Node>,
        block_updates: &mut Vec<(Node, Block)>,
        dirty: &mut IndexSet<NodeId>,
    ) -> Result<Node, LoadError> {
        let id = NodeId::from(block.id());
        let name = block.full_name();

        if name == "declare" {
            let node = match old.get(&id) {
                Some(Node::Declare(existing)) => {
                    if existing.block().fingerprint() != block.fingerprint() {
                        block_updates.push((Node::Declare(Arc::clone(existing)), block.clone()));
                        dirty.insert(id.clone());
                    }
                    Arc::clone(existing)
                }
                _ => {
                    dirty.insert(id.clone());
                    DeclareNode::new(block.clone())
                }
            };
            return Ok(Node::Declare(node));
        }

        if name == "foreach" {
            let template_fp = crate::node::template_fingerprint(block);
            let node = match old.get(&id) {
                Some(Node::Foreach(existing))
                    if template_fp.is_some()
                        && crate::node::template_fingerprint(&existing.block())
                            == template_fp =>
                {
                    if existing.block().fingerprint() != block.fingerprint() {
                        block_updates.push((Node::Foreach(Arc::clone(existing)), block.clone()));
                        dirty.insert(id.clone());
                    }
                    Arc::clone(existing)
                }
                _ => {
                    dirty.insert(id.clone());
                    ForeachNode::new(block.clone(), globals.clone()).map_err(|reason| {
                        LoadError::InvalidBlock {
                            id: block.id(),
                            reason,
                        }
                    })?
                }
            };
            node.set_custom_registry(Arc::clone(custom_registry));
            return Ok(Node::Foreach(node));
        }

        if name == "argument" || name == "export" {
            let Some(module) = &self.inner.opts.module else {
                return Err(LoadError::InvalidBlock {
                    id: block.id(),
                    reason: format!("{} blocks are only allowed inside declare bodies", name),
                });
            };
            if block.label.is_none() {
                return Err(LoadError::InvalidBlock {
                    id: block.id(),
                    reason: format!("{} blocks require a label", name),
                });
            }
            let node = if name == "argument" {
                match old.get(&id) {
                    Some(Node::Argument(existing)) => {
                        if existing.block().fingerprint() != block.fingerprint() {
                            block_updates
                                .push((Node::Argument(Arc::clone(existing)), block.clone()));
                            dirty.insert(id.clone());
                        }
                        Node::Argument(Arc::clone(existing))
                    }
                    _ => {
                        dirty.insert(id.clone());
                        Node::Argument(ArgumentNode::new(
                            block.clone(),
                            Arc::clone(&module.arguments),
                            Arc::clone(&globals.on_node_update),
                        ))
                    }
                }
            } else {
                match old.get(&id) {
                    Some(Node::Export(existing)) => {
                        if existing.block().fingerprint() != block.fingerprint() {
                            block_updates.push((Node::Export(Arc::clone(existing)), block.clone()));
                            dirty.insert(id.clone());
                        }
                        Node::Export(Arc::clone(existing))
                    }
                    _ => {
                        dirty.insert(id.clone());
                        Node::Export(ExportNode::new(block.clone(), Arc::clone(&module.on_export)))
                    }
                }
            };
            return Ok(node);
        }

        if let Some(registration) = self.inner.opts.registry.get(&name) {
            if registration.stability < self.inner.opts.min_stability {
                return Err(LoadError::Stability {
                    id,
                    stability: registration.stability,
                    floor: self.inner.opts.min_stability,
                });
            }
            let node = match old.get(&id) {
                Some(Node::Component(existing)) if existing.component_name() == name => {
                    if existing.block().fingerprint() != block.fingerprint() {
                        block_updates.push((Node::Component(Arc::clone(existing)), block.clone()));
                        dirty.insert(id.clone());
                    }
                    Arc::clone(existing)
                }
                _ => {
                    dirty.insert(id.clone());
                    ComponentNode::new(block.clone(), registration.clone(), globals)
                }
            };
            return Ok(Node::Component(node));
        }

        // Not a registered type: a declare instantiation, possibly through
        // an import namespace whose content is still being fetched.
        if CustomRegistry::knows_prefix(custom_registry, &block.name[0]) {
            let template = CustomRegistry::lookup(custom_registry, &block.name).map(
                |(declare_block, registry)| Template {
                    body: declare_block.body.clone(),
                    fingerprint: declare_block.fingerprint(),
                    registry,
                },
            );
            // As with foreach: attribute edits update the node in place
            // (evaluate pushes changed arguments into the nested
            // controller); only a template change replaces it.
            let node = match old.get(&id) {
                Some(Node::Custom(existing))
                    if existing.template_fingerprint()
                        == template.as_ref().map(|t| t.fingerprint) =>
                {
                    if existing.block().fingerprint() != block.fingerprint() {
                        block_updates.push((Node::Custom(Arc::clone(existing)), block.clone()));
                        dirty.insert(id.clone());
                    }
                    Arc::clone(existing)
                }
                _ => {
                    dirty.insert(id.clone());
                    CustomComponentNode::new(block.clone(), template, globals.clone())
                }
            };
            return Ok(Node::Custom(node));
        }

        Err(LoadError::UnknownComponent {
            id: block.id(),
            name,
        })
    }

    /// Evaluate the dirty nodes and their transitive dependents in
    /// topological order. Per-node failures are recorded as health and do
    /// not abort the pass.
    fn evaluate_frontier(&self, dirty: &IndexSet<NodeId>) {
        if dirty.is_empty() {
            return;
        }
        let (order, frontier, nodes) = {
            let state = self.inner.state.read().expect("state lock");
            let order = state
                .graph
                .topo_sort()
                .expect("committed graph is acyclic");
            let mut frontier = state.graph.descendants(dirty);
            for id in dirty {
                frontier.insert(id.clone());
            }
            (order, frontier, state.nodes.clone())
        };

        for id in order {
            if !frontier.contains(&id) {
                continue;
            }
            let Some(node) = nodes.get(&id) else {
                continue;
            };
            let scope = self.build_scope(&nodes);
            match node.evaluate(&scope) {
                Ok(()) => debug!(node = %id, "node evaluated"),
                Err(err) => {
                    // The node recorded its own health; dependents still
                    // run and surface their own reference errors.
                    error!(node = %id, %err, "node failed to evaluate");
                }
            }
        }
    }

    /// Scope visible to node evaluation: every node's exports nested under
    /// its dotted id, over the controller's base scope.
    fn build_scope(&self, nodes: &IndexMap<NodeId, Node>) -> Scope {
        let mut vars: IndexMap<String, Value> = IndexMap::new();
        for (id, node) in nodes {
            if let Some(exports) = node.exports() {
                insert_nested(&mut vars, id.as_str(), exports);
            }
        }
        let base = self.inner.base_scope.read().expect("base scope lock");
        Scope::with_parent(Arc::clone(&base), vars)
    }

    /// Remove data directories whose component no longer exists.
    fn gc_data_dirs(&self) {
        if !self.inner.opts.controller_id.is_empty() {
            return;
        }
        let live: IndexSet<String> = {
            let state = self.inner.state.read().expect("state lock");
            state
                .nodes
                .values()
                .filter_map(|node| match node {
                    Node::Component(n) => Some(n.global_id().to_string()),
                    _ => Some(node.node_id().to_string()),
                })
                .collect()
        };
        let Ok(entries) = std::fs::read_dir(&self.inner.opts.data_path) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let keep = live
                .iter()
                .any(|id| id == &name || id.starts_with(&format!("{}/", name)));
            if !keep {
                debug!(dir = %name, "removing stale data directory");
                if let Err(err) = std::fs::remove_dir_all(entry.path()) {
                    warn!(dir = %name, %err, "failed to remove stale data directory");
                }
            }
        }
    }

    /// Drive reconciliation until `ctx` cancels, then stop every worker.
    pub async fn run(&self, ctx: CancellationToken) {
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.inner.root_token.cancel();
                    self.inner.scheduler.shutdown().await;
                    return;
                }
                _ = self.inner.notify.notified() => {
                    self.reconcile().await;
                }
            }
        }
    }

    /// Process queued export changes and invalidations.
    async fn reconcile(&self) {
        let _guard = self.inner.reconcile_guard.lock().await;
        loop {
            let dirty = {
                let mut pending = self.inner.dirty.lock().expect("dirty lock");
                std::mem::take(&mut *pending)
            };
            if dirty.is_empty() {
                return;
            }

            if dirty.reload {
                let body = {
                    let state = self.inner.state.read().expect("state lock");
                    state.last_body.clone()
                };
                if let Some(body) = body {
                    if let Err(err) = self.load_body_locked(body).await {
                        error!(%err, "reload after module content change failed");
                    }
                }
                // Export changes drained alongside the reload still get
                // their dependents re-evaluated below.
            }

            let frontier = {
                let state = self.inner.state.read().expect("state lock");
                let mut roots = dirty.exports_changed.clone();
                roots.extend(dirty.invalidated.iter().cloned());
                let mut frontier = state.graph.descendants(&roots);
                for id in &dirty.invalidated {
                    frontier.insert(id.clone());
                }
                frontier
            };
            self.evaluate_frontier(&frontier);
        }
    }

    /// Signal that a node's exports changed; dependents are re-evaluated
    /// by the next reconcile pass.
    pub fn on_component_update(&self, id: NodeId) {
        {
            let mut dirty = self.inner.dirty.lock().expect("dirty lock");
            dirty.exports_changed.insert(id);
        }
        self.inner.notify.notify_one();
    }

    /// Mark every node for re-evaluation (base scope changed).
    pub fn invalidate_all(&self) {
        let ids: Vec<NodeId> = {
            let state = self.inner.state.read().expect("state lock");
            state.nodes.keys().cloned().collect()
        };
        {
            let mut dirty = self.inner.dirty.lock().expect("dirty lock");
            dirty.invalidated.extend(ids);
        }
        self.inner.notify.notify_one();
    }

    /// Mark every argument node for re-evaluation (supplied values
    /// changed).
    pub fn invalidate_arguments(&self) {
        let ids: Vec<NodeId> = {
            let state = self.inner.state.read().expect("state lock");
            state
                .nodes
                .iter()
                .filter(|(_, node)| matches!(node, Node::Argument(_)))
                .map(|(id, _)| id.clone())
                .collect()
        };
        {
            let mut dirty = self.inner.dirty.lock().expect("dirty lock");
            dirty.invalidated.extend(ids);
        }
        self.inner.notify.notify_one();
    }

    /// Replace the base scope; re-evaluates everything if it changed.
    pub fn update_base_scope(&self, scope: Arc<Scope>) {
        {
            let mut current = self.inner.base_scope.write().expect("base scope lock");
            if **current == *scope {
                return;
            }
            *current = scope;
        }
        self.invalidate_all();
    }

    /// The live node for an id, if present.
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        let state = self.inner.state.read().expect("state lock");
        state.nodes.get(id).cloned()
    }

    /// Snapshot one node's public state.
    pub fn get_component(&self, id: &NodeId) -> Option<ComponentSnapshot> {
        let state = self.inner.state.read().expect("state lock");
        let node = state.nodes.get(id)?;
        let arguments = match node {
            Node::Component(n) => n.arguments().map(|args| args.to_value()),
            _ => None,
        };
        Some(ComponentSnapshot {
            id: id.clone(),
            kind: node.kind(),
            health: node.as_block_node().current_health(),
            arguments,
            exports: node.exports(),
        })
    }

    /// Worst health across this controller's nodes.
    pub fn aggregate_health(&self) -> Health {
        let state = self.inner.state.read().expect("state lock");
        Health::least_healthy(
            state
                .nodes
                .values()
                .map(|node| node.as_block_node().current_health()),
        )
    }

    /// Node ids in topological evaluation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let state = self.inner.state.read().expect("state lock");
        state.graph.topo_sort().expect("committed graph is acyclic")
    }

    /// All graph edges, deterministic order.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let state = self.inner.state.read().expect("state lock");
        state.graph.edge_list()
    }
}

struct LoadPlan {
    nodes: IndexMap<NodeId, Node>,
    graph: Dag,
    custom_registry: Arc<CustomRegistry>,
    block_updates: Vec<(Node, Block)>,
    dirty: IndexSet<NodeId>,
}

fn is_import_block(block: &Block) -> bool {
    block.name.len() == 2 && block.name[0] == "import"
}

/// Find the longest prefix of `path` that names a node.
fn match_node_prefix(nodes: &IndexMap<NodeId, Node>, path: &conflux_dsl::Path) -> Option<NodeId> {
    for len in (2..=path.len()).rev() {
        let candidate = NodeId::from(path.prefix(len).to_string());
        if nodes.contains_key(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Insert `value` at the dotted path `id` inside the scope variable tree,
/// merging with objects already present.
fn insert_nested(vars: &mut IndexMap<String, Value>, id: &str, value: Value) {
    let segments: Vec<&str> = id.split('.').collect();
    let mut current = vars;
    for segment in &segments[..segments.len() - 1] {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(IndexMap::new()));
        if !matches!(entry, Value::Object(_)) {
            *entry = Value::Object(IndexMap::new());
        }
        let Value::Object(fields) = entry else {
            unreachable!()
        };
        current = fields;
    }
    current.insert(segments[segments.len() - 1].to_string(), value);
}
