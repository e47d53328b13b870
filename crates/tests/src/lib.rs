//! End-to-end harness: a root controller with the test components
//! registered, running in a background task.

use conflux_dsl::Value;
use conflux_runtime::controller::{ComponentSnapshot, Controller, ControllerOptions};
use conflux_runtime::error::LoadError;
use conflux_runtime::graph::NodeId;
use conflux_runtime::registry::Registry;
use conflux_runtime::testcomponents;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running controller plus the plumbing tests need around it.
pub struct TestHarness {
    pub controller: Controller,
    token: CancellationToken,
    run_handle: JoinHandle<()>,
    _data_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Build a controller with the test components, load `config`, and
    /// start the reconcile loop.
    pub async fn start(config: &str) -> Result<Self, LoadError> {
        Self::start_with(config, |opts| opts).await
    }

    /// Like [`TestHarness::start`] with a hook to adjust controller
    /// options (e.g. the stability floor).
    pub async fn start_with(
        config: &str,
        adjust: impl FnOnce(ControllerOptions) -> ControllerOptions,
    ) -> Result<Self, LoadError> {
        // RUST_LOG=debug makes test failures traceable.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let mut registry = Registry::new();
        testcomponents::register_all(&mut registry).expect("test components register once");

        let data_dir = tempfile::tempdir().expect("temp dir");
        let opts = adjust(ControllerOptions::root(
            data_dir.path().to_path_buf(),
            Arc::new(registry),
        ));
        let controller = Controller::new(opts);
        controller.load_source(config).await?;

        let token = CancellationToken::new();
        let run_controller = controller.clone();
        let run_token = token.clone();
        let run_handle = tokio::spawn(async move {
            run_controller.run(run_token).await;
        });

        Ok(Self {
            controller,
            token,
            run_handle,
            _data_dir: data_dir,
        })
    }

    pub async fn load(&self, config: &str) -> Result<(), LoadError> {
        self.controller.load_source(config).await
    }

    pub fn snapshot(&self, id: &str) -> Option<ComponentSnapshot> {
        self.controller.get_component(&NodeId::from(id))
    }

    /// A field of a node's export record.
    pub fn export(&self, id: &str, field: &str) -> Option<Value> {
        let snapshot = self.snapshot(id)?;
        match snapshot.exports? {
            Value::Object(fields) => fields.get(field).cloned(),
            _ => None,
        }
    }

    pub fn export_int(&self, id: &str, field: &str) -> Option<i64> {
        self.export(id, field).and_then(|v| v.as_int())
    }

    /// Poll until `predicate` holds, panicking after `timeout`.
    pub async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not reached within {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop the controller and wait for shutdown.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.run_handle.await;
    }
}
