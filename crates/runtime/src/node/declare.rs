//! Nodes for the module system: declare definitions, and the argument and
//! export blocks inside declare bodies.

use crate::error::NodeError;
use crate::graph::NodeId;
use crate::health::Health;
use crate::node::{BlockNode, UpdateNotifier};
use conflux_dsl::{
    ArgsSchema, Block, EvalError, Scope, Value, ValueKind, evaluate_block,
};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, RwLock};

/// Values supplied to a custom component instance, shared between the
/// instantiating node and the argument nodes of its nested controller.
pub type ArgumentValues = Arc<RwLock<IndexMap<String, Value>>>;

/// Callback an export node uses to deliver one field of the enclosing
/// custom component's export record.
pub type OnExport = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// A `declare "name" { ... }` template definition.
///
/// Holds the body for instantiation elsewhere; nothing to evaluate or run.
pub struct DeclareNode {
    id: NodeId,
    block: Mutex<Block>,
}

impl DeclareNode {
    pub fn new(block: Block) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::from(block.id()),
            block: Mutex::new(block),
        })
    }

    pub fn label(&self) -> String {
        self.block().label.unwrap_or_default()
    }

    pub fn evaluate(&self, _scope: &Scope) -> Result<(), NodeError> {
        Ok(())
    }
}

impl BlockNode for DeclareNode {
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
        Health::healthy("declare defined")
    }
}

/// An `argument "name" { optional = ..., default = ... }` block inside a
/// declare body.
///
/// Publishes `argument.<name>.value` into the nested controller's scope
/// from the value the instantiation supplied.
pub struct ArgumentNode {
    id: NodeId,
    label: String,
    block: Mutex<Block>,
    values: ArgumentValues,
    on_update: UpdateNotifier,
    exports: Mutex<Option<Value>>,
    eval_health: Mutex<Health>,
}

impl ArgumentNode {
    pub fn new(block: Block, values: ArgumentValues, on_update: UpdateNotifier) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::from(block.id()),
            label: block.label.clone().unwrap_or_default(),
            block: Mutex::new(block),
            values,
            on_update,
            exports: Mutex::new(None),
            eval_health: Mutex::new(Health::default()),
        })
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new()
            .optional("optional", ValueKind::Bool, Value::Bool(false))
            .optional_no_default("default", ValueKind::Any)
    }

    pub fn exports(&self) -> Option<Value> {
        self.exports.lock().expect("exports lock").clone()
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        let block = self.block.lock().expect("block lock").clone();
        let args = match evaluate_block(&block.body, block.span, scope, &Self::schema()) {
            Ok(args) => args,
            Err(err) => {
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let supplied = self
            .values
            .read()
            .expect("argument values lock")
            .get(&self.label)
            .cloned();
        let optional = args.bool("optional").unwrap_or(false);

        let value = match supplied.or_else(|| args.get("default").cloned()) {
            Some(value) => value,
            None if optional => Value::Null,
            None => {
                let err = EvalError::Message {
                    message: format!("missing required argument {:?}", self.label),
                    span: block.span,
                };
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let mut record = IndexMap::new();
        record.insert("value".to_string(), value);
        let record = Value::Object(record);

        let changed = {
            let mut exports = self.exports.lock().expect("exports lock");
            if exports.as_ref() == Some(&record) {
                false
            } else {
                *exports = Some(record);
                true
            }
        };
        *self.eval_health.lock().expect("health lock") = Health::healthy("argument evaluated");
        if changed {
            (self.on_update)(self.id.clone());
        }
        Ok(())
    }
}

impl BlockNode for ArgumentNode {
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
        self.eval_health.lock().expect("health lock").clone()
    }
}

/// An `export "name" { value = ... }` block inside a declare body.
///
/// Each evaluation delivers the computed value as one field of the
/// enclosing custom component's export record.
pub struct ExportNode {
    id: NodeId,
    label: String,
    block: Mutex<Block>,
    on_export: OnExport,
    current: Mutex<Option<Value>>,
    eval_health: Mutex<Health>,
}

impl ExportNode {
    pub fn new(block: Block, on_export: OnExport) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::from(block.id()),
            label: block.label.clone().unwrap_or_default(),
            block: Mutex::new(block),
            on_export,
            current: Mutex::new(None),
            eval_health: Mutex::new(Health::default()),
        })
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new().required("value", ValueKind::Any)
    }

    pub fn current_value(&self) -> Option<Value> {
        self.current.lock().expect("value lock").clone()
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<(), NodeError> {
        let block = self.block.lock().expect("block lock").clone();
        let args = match evaluate_block(&block.body, block.span, scope, &Self::schema()) {
            Ok(args) => args,
            Err(err) => {
                *self.eval_health.lock().expect("health lock") =
                    Health::unhealthy(err.to_string());
                return Err(err.into());
            }
        };

        let value = args.get("value").cloned().unwrap_or(Value::Null);
        let changed = {
            let mut current = self.current.lock().expect("value lock");
            if current.as_ref() == Some(&value) {
                false
            } else {
                *current = Some(value.clone());
                true
            }
        };
        *self.eval_health.lock().expect("health lock") = Health::healthy("export evaluated");
        if changed {
            (self.on_export)(&self.label, value);
        }
        Ok(())
    }
}

impl BlockNode for ExportNode {
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
        self.eval_health.lock().expect("health lock").clone()
    }
}
