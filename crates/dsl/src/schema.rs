//! Argument schemas and the coerced argument record.
//!
//! Every component type declares an [`ArgsSchema`] describing the
//! attributes and sub-blocks its configuration block accepts. The
//! evaluator projects a block body onto the schema, producing an
//! [`Arguments`] record with typed accessors.

use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use std::time::Duration;

/// Schema for one block class: its attributes and nested sub-blocks.
#[derive(Debug, Clone, Default)]
pub struct ArgsSchema {
    pub attributes: Vec<AttrSpec>,
    pub blocks: Vec<BlockSpec>,
}

impl ArgsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required attribute.
    pub fn required(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.attributes.push(AttrSpec {
            name: name.into(),
            required: true,
            kind,
            default: None,
        });
        self
    }

    /// Add an optional attribute with a default value.
    pub fn optional(mut self, name: impl Into<String>, kind: ValueKind, default: Value) -> Self {
        self.attributes.push(AttrSpec {
            name: name.into(),
            required: false,
            kind,
            default: Some(default),
        });
        self
    }

    /// Add an optional attribute that is absent unless set.
    pub fn optional_no_default(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.attributes.push(AttrSpec {
            name: name.into(),
            required: false,
            kind,
            default: None,
        });
        self
    }

    /// Add a nested block spec.
    pub fn block(
        mut self,
        name: impl Into<String>,
        required: bool,
        multiple: bool,
        schema: ArgsSchema,
    ) -> Self {
        self.blocks.push(BlockSpec {
            name: name.into(),
            required,
            multiple,
            schema,
        });
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrSpec> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn block_spec(&self, name: &str) -> Option<&BlockSpec> {
        self.blocks.iter().find(|block| block.name == name)
    }
}

/// One attribute of a schema.
#[derive(Debug, Clone)]
pub struct AttrSpec {
    pub name: String,
    pub required: bool,
    pub kind: ValueKind,
    pub default: Option<Value>,
}

/// One nested block class of a schema.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub name: String,
    pub required: bool,
    /// Whether the block may appear more than once. Multiple blocks
    /// project to a list of records; single blocks to one record.
    pub multiple: bool,
    pub schema: ArgsSchema,
}

/// A coerced argument record, produced by projecting a block body onto an
/// [`ArgsSchema`].
///
/// Accessors panic-free: they return `None` on absent or differently-typed
/// fields. Schema validation has already guaranteed the shapes components
/// rely on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments(IndexMap<String, Value>);

impl Arguments {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn record(&self) -> &IndexMap<String, Value> {
        &self.0
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_float)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.get(name).and_then(Value::as_duration)
    }

    pub fn list(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_list)
    }

    pub fn secret(&self, name: &str) -> Option<&crate::value::Secret> {
        match self.get(name) {
            Some(Value::Secret(s)) => Some(s),
            _ => None,
        }
    }

    /// Compile a regex-kinded attribute. The schema already validated the
    /// pattern, so compilation only fails if the field was never coerced.
    pub fn regex(&self, name: &str) -> Option<regex::Regex> {
        self.str(name).and_then(|s| regex::Regex::new(s).ok())
    }

    pub fn capsule(&self, name: &str) -> Option<&crate::value::Capsule> {
        self.get(name).and_then(Value::as_capsule)
    }

    /// Sub-block records for a `multiple` block spec.
    pub fn blocks(&self, name: &str) -> Vec<Arguments> {
        match self.get(name) {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned().map(Arguments::new))
                .collect(),
            Some(Value::Object(fields)) => vec![Arguments::new(fields.clone())],
            _ => Vec::new(),
        }
    }

    /// The record as a plain object value (used to republish exports).
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
