//! Import node: brings declare and import blocks from a module source
//! into the graph.
//!
//! The imported declares are stored on the node and contributed to the
//! enclosing controller's custom-component namespace. For every nested
//! import block the node creates a child ImportConfigNode, evaluated and
//! run by this node. When the source delivers new content, declares and
//! children are rebuilt and the root import node notifies the controller
//! for re-evaluation.

use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::import::{ImportSource, Snapshot, SourceKind, new_source};
use crate::node::custom::CustomRegistry;
use crate::node::{BlockNode, NodeGlobals, RunnableNode};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use conflux_dsl::{Block, Scope, Stmt, Value, parse_file};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::controller::MODULE_PATH;

struct ImportState {
    content: Snapshot,
    declares: IndexMap<String, Block>,
    children: IndexMap<String, Arc<ImportConfigNode>>,
    children_running: bool,
}

pub struct ImportConfigNode {
    id: NodeId,
    global_id: String,
    label: String,
    kind: SourceKind,
    globals: NodeGlobals,
    block: Mutex<Block>,
    source: Arc<dyn ImportSource>,
    children_update: Notify,
    scheduler: Scheduler,

    // Lock order: state before any health mutex.
    state: Mutex<ImportState>,
    /// True while a content update is being applied, so child
    /// notifications don't double-notify the controller.
    in_content_update: AtomicBool,

    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
    content_health: Mutex<Health>,
}

impl ImportConfigNode {
    pub fn new(block: Block, globals: NodeGlobals, kind: SourceKind) -> Arc<Self> {
        let id = NodeId::from(block.id());
        let global_id = globals.global_id(&id);
        let label = block.label.clone().unwrap_or_default();
        let data_path = globals.data_path.join(&global_id);
        let stop_timeout = globals.stop_timeout;

        Arc::new_cyclic(|weak: &Weak<ImportConfigNode>| {
            let content_weak = weak.clone();
            let source = new_source(
                kind,
                Arc::new(move |snapshot: Snapshot| {
                    if let Some(node) = content_weak.upgrade() {
                        ImportConfigNode::on_content_update(&node, snapshot);
                    }
                }),
                data_path,
            );

            Self {
                id,
                global_id,
                label,
                kind,
                globals,
                block: Mutex::new(block),
                source,
                children_update: Notify::new(),
                scheduler: Scheduler::new(stop_timeout),
                state: Mutex::new(ImportState {
                    content: Snapshot::new(),
                    declares: IndexMap::new(),
                    children: IndexMap::new(),
                    children_running: false,
                }),
                in_content_update: AtomicBool::new(false),
                eval_health: Mutex::new(Health::default()),
                run_health: Mutex::new(Health::default()),
                content_health: Mutex::new(Health::default()),
            }
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// All declare blocks imported from the current snapshot.
    pub fn imported_declares(&self) -> IndexMap<String, Block> {
        self.state.lock().expect("state lock").declares.clone()
    }

    /// This module's namespace: its declares plus each nested import's
    /// namespace.
    pub fn namespace(&self) -> Arc<CustomRegistry> {
        let state = self.state.lock().expect("state lock");
        Arc::new(CustomRegistry {
            parent: None,
            declares: state.declares.clone(),
            imports: state
                .children
                .iter()
                .map(|(label, child)| (label.clone(), child.namespace()))
                .collect(),
        })
    }

    /// Evaluate this node and its children with a module scope.
    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        let block = self.block.lock().expect("block lock").clone();
        match self.source.evaluate(&block.body, block.span, scope) {
            Ok(()) => {
                self.set_eval_health(Health::healthy("source evaluated"));
                Ok(())
            }
            Err(err) => {
                self.set_eval_health(Health::unhealthy(format!(
                    "source evaluation failed: {}",
                    err
                )));
                Err(err)
            }
        }
    }

    /// Applied every time the managed source delivers new content.
    fn on_content_update(self: &Arc<Self>, snapshot: Snapshot) {
        let changed = {
            let mut state = self.state.lock().expect("state lock");
            self.in_content_update.store(true, Ordering::SeqCst);

            if state.content == snapshot {
                self.in_content_update.store(false, Ordering::SeqCst);
                return;
            }

            state.content = snapshot.clone();
            state.declares = IndexMap::new();
            state.children = IndexMap::new();

            for (file, text) in &snapshot {
                let parsed = match parse_file(file, text) {
                    Ok(parsed) => parsed,
                    Err(errors) => {
                        let message = format!(
                            "imported content from {:?} cannot be parsed: {}",
                            file,
                            errors
                                .first()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "unknown error".to_string())
                        );
                        error!(node = %self.id, file = %file, "failed to parse module content");
                        self.fail_content_update(message);
                        return;
                    }
                };
                if let Err(message) = self.process_imported_content(&mut state, &parsed.body) {
                    error!(node = %self.id, file = %file, %message, "invalid module content");
                    self.fail_content_update(message);
                    return;
                }
            }

            // Evaluate the children that were just derived.
            let mut module_scope = IndexMap::new();
            module_scope.insert(
                MODULE_PATH.to_string(),
                Value::String(self.source.module_path()),
            );
            let scope = Scope::new(module_scope);
            for child in state.children.values() {
                if let Err(err) = child.evaluate(&scope) {
                    let message = format!(
                        "nested import {} failed to evaluate: {}",
                        child.label, err
                    );
                    error!(node = %self.id, %message, "failed to evaluate nested import");
                    self.fail_content_update(message);
                    return;
                }
            }

            if state.children_running {
                self.children_update.notify_one();
            }
            true
        };

        if changed {
            self.set_content_health(Health::healthy("content updated"));
            self.in_content_update.store(false, Ordering::SeqCst);
            (self.globals.on_node_update)(self.id.clone());
        }
    }

    fn fail_content_update(&self, message: String) {
        self.set_content_health(Health::unhealthy(message));
        self.in_content_update.store(false, Ordering::SeqCst);
    }

    /// Sort module statements into declares and nested imports; anything
    /// else is a content error.
    fn process_imported_content(
        self: &Arc<Self>,
        state: &mut ImportState,
        body: &[Stmt],
    ) -> Result<(), String> {
        for stmt in body {
            let Stmt::Block(block) = stmt else {
                return Err("only declare and import blocks are allowed in a module".to_string());
            };

            let name = block.full_name();
            if name == "declare" {
                let Some(label) = block.label.clone() else {
                    return Err("declare blocks require a label".to_string());
                };
                if state.declares.contains_key(&label) {
                    return Err(format!("declare block redefined {}", label));
                }
                state.declares.insert(label, block.clone());
                continue;
            }

            if let Some(child_kind) = SourceKind::from_block_name(&name) {
                // A remotely fetched module must not reach into the local
                // filesystem.
                if self.kind == SourceKind::Http && child_kind == SourceKind::File {
                    return Err(format!(
                        "importing a module via import.http (node {}) that contains an import.file block is not supported",
                        self.id
                    ));
                }
                let Some(label) = block.label.clone() else {
                    return Err("import blocks require a label".to_string());
                };
                if state.children.contains_key(&label) {
                    return Err(format!("import block redefined {}", label));
                }

                let parent_weak = Arc::downgrade(self);
                let mut child_globals = self.globals.clone();
                child_globals.controller_id = self.global_id.clone();
                child_globals.on_node_update = Arc::new(move |_child_id: NodeId| {
                    if let Some(parent) = parent_weak.upgrade() {
                        parent.on_children_content_update();
                    }
                });

                state.children.insert(
                    label,
                    ImportConfigNode::new(block.clone(), child_globals, child_kind),
                );
                continue;
            }

            return Err(format!(
                "only declare and import blocks are allowed in a module, got {}",
                name
            ));
        }
        Ok(())
    }

    /// A child delivered new content. If this node is itself mid-update
    /// it will notify when done; otherwise bubble up now.
    fn on_children_content_update(&self) {
        if !self.in_content_update.load(Ordering::SeqCst) {
            (self.globals.on_node_update)(self.id.clone());
        }
    }

    async fn apply_children(&self, ctx: &CancellationToken) {
        let tasks: Vec<Arc<dyn RunnableNode>> = {
            let mut state = self.state.lock().expect("state lock");
            state.children_running = true;
            state
                .children
                .values()
                .map(|child| Arc::clone(child) as Arc<dyn RunnableNode>)
                .collect()
        };
        self.scheduler.apply_tasks(ctx, tasks).await;
    }

    fn set_eval_health(&self, health: Health) {
        *self.eval_health.lock().expect("health lock") = health;
    }

    fn set_run_health(&self, health: Health) {
        *self.run_health.lock().expect("health lock") = health;
    }

    fn set_content_health(&self, health: Health) {
        *self.content_health.lock().expect("health lock") = health;
    }
}

impl BlockNode for ImportConfigNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn block(&self) -> Block {
        self.block.lock().expect("block lock").clone()
    }

    fn update_block(&self, block: Block) {
        *self.block.lock().expect("block lock") = block;
    }

    /// Combines run, eval, content and source health with every child's
    /// aggregate.
    fn current_health(&self) -> Health {
        let children: Vec<Health> = {
            let state = self.state.lock().expect("state lock");
            state
                .children
                .values()
                .map(|child| child.current_health())
                .collect()
        };
        let mut facets = vec![
            self.run_health.lock().expect("health lock").clone(),
            self.eval_health.lock().expect("health lock").clone(),
            self.content_health.lock().expect("health lock").clone(),
            self.source.current_health(),
        ];
        facets.extend(children);
        Health::least_healthy(facets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthLevel;
    use crate::registry::{Registry, Stability};
    use std::time::Duration;

    fn globals() -> NodeGlobals {
        NodeGlobals {
            controller_id: String::new(),
            data_path: std::env::temp_dir().join("conflux-import-tests"),
            min_stability: Stability::Experimental,
            stop_timeout: Duration::from_secs(1),
            registry: Arc::new(Registry::new()),
            on_node_update: Arc::new(|_| {}),
        }
    }

    fn import_node(kind: SourceKind) -> Arc<ImportConfigNode> {
        let source = format!("{} \"lib\" {{ }}", kind.block_name());
        let file = parse_file("test.cfx", &source).unwrap();
        let Some(Stmt::Block(block)) = file.body.into_iter().next() else {
            panic!("expected block");
        };
        ImportConfigNode::new(block, globals(), kind)
    }

    fn snapshot_of(content: &str) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert("module.cfx".to_string(), content.to_string());
        snapshot
    }

    #[test]
    fn test_declares_and_nested_imports_accepted() {
        let node = import_node(SourceKind::String);
        node.on_content_update(snapshot_of(
            r#"
            declare "first" { }
            declare "second" { }
            import.string "inner" { content = "" }
            "#,
        ));

        let declares = node.imported_declares();
        assert_eq!(
            declares.keys().cloned().collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert_eq!(node.current_health().level, HealthLevel::Healthy);

        let namespace = node.namespace();
        assert!(namespace.declares.contains_key("first"));
        assert!(namespace.imports.contains_key("inner"));
    }

    #[test]
    fn test_component_blocks_are_content_errors() {
        let node = import_node(SourceKind::String);
        node.on_content_update(snapshot_of("testcomponents.passthrough \"p\" { input = 1 }"));

        let health = node.current_health();
        assert_eq!(health.level, HealthLevel::Unhealthy);
        assert!(health.message.contains("only declare and import blocks"));
    }

    #[test]
    fn test_declare_redefinition_is_content_error() {
        let node = import_node(SourceKind::String);
        node.on_content_update(snapshot_of("declare \"x\" { }\ndeclare \"x\" { }"));

        let health = node.current_health();
        assert_eq!(health.level, HealthLevel::Unhealthy);
        assert!(health.message.contains("redefined"));
    }

    #[test]
    fn test_http_module_may_not_contain_import_file() {
        let node = import_node(SourceKind::Http);
        node.on_content_update(snapshot_of(
            "import.file \"x\" { path = \"/etc/conflux\" }",
        ));

        let health = node.current_health();
        assert_eq!(health.level, HealthLevel::Unhealthy);
        assert!(health.message.contains("import.file"));
        assert!(health.message.contains("import.http.lib"));
    }

    #[test]
    fn test_http_module_may_contain_other_imports() {
        let node = import_node(SourceKind::Http);
        node.on_content_update(snapshot_of(
            "import.http \"x\" { url = \"https://example.com/lib.cfx\" }",
        ));
        assert_eq!(node.current_health().level, HealthLevel::Healthy);
    }

    #[test]
    fn test_unchanged_snapshot_is_ignored() {
        let node = import_node(SourceKind::String);
        node.on_content_update(snapshot_of("declare \"x\" { }"));
        let first = node.current_health();
        node.on_content_update(snapshot_of("declare \"x\" { }"));
        let second = node.current_health();
        assert_eq!(first.update_time, second.update_time);
    }
}

#[async_trait]
impl RunnableNode for ImportConfigNode {
    /// Runs the managed source and the import children until cancelled.
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        self.set_run_health(Health::healthy("started import"));
        self.apply_children(&ctx).await;

        let source = Arc::clone(&self.source);
        let source_token = ctx.child_token();
        let mut source_run = Box::pin(source.run(source_token.clone()));

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    source_token.cancel();
                    self.scheduler.shutdown().await;
                    self.set_run_health(Health::exited("import shut down cleanly"));
                    return Ok(());
                }
                _ = self.children_update.notified() => {
                    self.apply_children(&ctx).await;
                }
                result = &mut source_run => {
                    self.scheduler.shutdown().await;
                    return match result {
                        Ok(()) => {
                            self.set_run_health(Health::exited("import shut down cleanly"));
                            Ok(())
                        }
                        Err(err) => {
                            self.set_run_health(Health::exited(format!(
                                "import shut down with error: {}",
                                err
                            )));
                            Err(err)
                        }
                    };
                }
            }
        }
    }
}
