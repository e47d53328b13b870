//! Identifier scopes for evaluation.

use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// A chained identifier-to-value map.
///
/// Scopes nest: module evaluation, declare instantiation and foreach
/// bindings each layer a child scope over the enclosing one. Lookup walks
/// outward until a binding is found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    parent: Option<Arc<Scope>>,
    variables: IndexMap<String, Value>,
}

impl Scope {
    /// A root scope holding the given bindings.
    pub fn new(variables: IndexMap<String, Value>) -> Self {
        Self {
            parent: None,
            variables,
        }
    }

    /// A child scope shadowing `parent`.
    pub fn with_parent(parent: Arc<Scope>, variables: IndexMap<String, Value>) -> Self {
        Self {
            parent: Some(parent),
            variables,
        }
    }

    /// Look up an identifier, walking parent scopes.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        match self.variables.get(name) {
            Some(value) => Some(value),
            None => self.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Whether an identifier is bound anywhere in the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Bindings of this scope level only (not parents).
    pub fn local_variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_parents() {
        let mut root_vars = IndexMap::new();
        root_vars.insert("outer".to_string(), Value::Int(1));
        let root = Arc::new(Scope::new(root_vars));

        let mut child_vars = IndexMap::new();
        child_vars.insert("inner".to_string(), Value::Int(2));
        let child = Scope::with_parent(root, child_vars);

        assert_eq!(child.lookup("outer"), Some(&Value::Int(1)));
        assert_eq!(child.lookup("inner"), Some(&Value::Int(2)));
        assert_eq!(child.lookup("missing"), None);
    }

    #[test]
    fn test_child_shadows_parent() {
        let mut root_vars = IndexMap::new();
        root_vars.insert("x".to_string(), Value::Int(1));
        let root = Arc::new(Scope::new(root_vars));

        let mut child_vars = IndexMap::new();
        child_vars.insert("x".to_string(), Value::Int(2));
        let child = Scope::with_parent(root, child_vars);

        assert_eq!(child.lookup("x"), Some(&Value::Int(2)));
    }
}
