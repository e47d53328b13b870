//! Conflux runtime: the controller that turns parsed configuration into a
//! running, supervised component graph.
//!
//! # Architecture
//!
//! - [`graph`] — dependency DAG with topological evaluation order
//! - [`node`] — one node kind per block class (components, imports,
//!   declares, foreach)
//! - [`controller`] — transactional loads and reactive re-evaluation
//! - [`scheduler`] — one supervised task per runnable node
//! - [`import`] — module sources (file, string, http, git)
//! - [`health`] — worst-of health aggregation
//!
//! Data flows from configuration text through the [`conflux_dsl`] parser
//! into a graph of nodes, evaluated in dependency order; export changes
//! propagate back through the controller's reconcile loop.

pub mod component;
pub mod controller;
pub mod error;
pub mod graph;
pub mod health;
pub mod import;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod testcomponents;

pub use component::{Component, ComponentError, OnStateChange, Options};
pub use controller::{
    ComponentSnapshot, Controller, ControllerOptions, MODULE_PATH, ModuleContext,
};
pub use error::{LoadError, NodeError};
pub use graph::{CycleError, Dag, NodeId};
pub use health::{Health, HealthLevel};
pub use registry::{Registration, Registry, RegistryError, Stability};
pub use scheduler::{DEFAULT_STOP_TIMEOUT, Scheduler};
