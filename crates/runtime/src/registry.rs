//! Component type registration.

use crate::component::{Component, ComponentError, Options};
use conflux_dsl::{ArgsSchema, Arguments};
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Maturity of a component type. The controller refuses to instantiate
/// component types below its configured floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    Experimental,
    PublicPreview,
    GenerallyAvailable,
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stability::Experimental => "experimental",
            Stability::PublicPreview => "public-preview",
            Stability::GenerallyAvailable => "generally-available",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Stability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "experimental" => Ok(Stability::Experimental),
            "public-preview" => Ok(Stability::PublicPreview),
            "generally-available" => Ok(Stability::GenerallyAvailable),
            other => Err(format!("unknown stability level {:?}", other)),
        }
    }
}

/// Constructor for a component instance.
pub type BuildFn = fn(Options, Arguments) -> Result<Arc<dyn Component>, ComponentError>;

/// A registered component type.
#[derive(Clone)]
pub struct Registration {
    /// Dotted block name (`metrics.scrape`).
    pub name: &'static str,
    pub stability: Stability,
    /// Produces the argument schema for this component type.
    pub args: fn() -> ArgsSchema,
    pub build: BuildFn,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("component type {0:?} registered twice")]
    Duplicate(String),
}

/// The set of known component types.
#[derive(Default)]
pub struct Registry {
    components: IndexMap<&'static str, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        if self.components.contains_key(registration.name) {
            return Err(RegistryError::Duplicate(registration.name.to_string()));
        }
        self.components.insert(registration.name, registration);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.components.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.keys().copied()
    }
}
