//! Git module source: clones a repository into the node's data directory
//! and serves `.cfx` files under a subpath.
//!
//! Repository operations shell out to the `git` binary. After a
//! successful initial clone, fetch failures degrade source health but the
//! last checked-out snapshot keeps being served.

use super::{ContentCallback, Emitter, ImportSource, MODULE_EXTENSION, Snapshot, SourceKind};
use crate::error::NodeError;
use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{
    ArgsSchema, Body, Scope, Span, Value, ValueKind, evaluate_block,
};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone, PartialEq)]
struct GitArgs {
    repository: String,
    revision: String,
    path: String,
    pull_frequency: Duration,
}

pub struct GitSource {
    emitter: Emitter,
    /// Working tree location, private to the owning import node.
    checkout_dir: PathBuf,
    args: Mutex<Option<GitArgs>>,
    health: Mutex<Health>,
}

impl GitSource {
    pub fn new(callback: ContentCallback, data_path: PathBuf) -> Self {
        Self {
            emitter: Emitter::new(callback),
            checkout_dir: data_path.join("repository"),
            args: Mutex::new(None),
            health: Mutex::new(Health::default()),
        }
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new()
            .required("repository", ValueKind::String)
            .optional("revision", ValueKind::String, Value::String("HEAD".into()))
            .optional("path", ValueKind::String, Value::String(String::new()))
            .optional(
                "pull_frequency",
                ValueKind::Duration,
                Value::Duration(Duration::from_secs(60)),
            )
    }

    fn set_health(&self, health: Health) {
        *self.health.lock().expect("health lock") = health;
    }

    /// Run one git invocation, failing with its stderr.
    async fn git(args: &[&str]) -> Result<(), String> {
        let output = Command::new("git")
            .args(args)
            .output()
            .await
            .map_err(|err| format!("failed to run git: {}", err))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    async fn sync_repository(&self, args: &GitArgs) -> Result<(), String> {
        let dir = self.checkout_dir.display().to_string();

        if !self.checkout_dir.join(".git").exists() {
            if let Some(parent) = self.checkout_dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| format!("failed to create {}: {}", parent.display(), err))?;
            }
            Self::git(&["clone", "--quiet", &args.repository, &dir]).await?;
        } else {
            Self::git(&["-C", &dir, "fetch", "--quiet", "--all"]).await?;
        }

        if args.revision != "HEAD" {
            Self::git(&["-C", &dir, "checkout", "--quiet", "--detach", &args.revision]).await?;
        }
        Ok(())
    }

    async fn read_snapshot(&self, args: &GitArgs) -> Result<Snapshot, String> {
        let root = if args.path.is_empty() {
            self.checkout_dir.clone()
        } else {
            self.checkout_dir.join(&args.path)
        };

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|err| format!("failed to read {}: {}", root.display(), err))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| format!("failed to read {}: {}", root.display(), err))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(MODULE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();

        let mut snapshot = Snapshot::new();
        for file in files {
            let content = tokio::fs::read_to_string(&file)
                .await
                .map_err(|err| format!("failed to read {}: {}", file.display(), err))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            snapshot.insert(name, content);
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl ImportSource for GitSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    fn evaluate(&self, body: &Body, span: Span, scope: &Scope) -> Result<(), NodeError> {
        let args = evaluate_block(body, span, scope, &Self::schema())?;
        let parsed = GitArgs {
            repository: args.str("repository").unwrap_or_default().to_string(),
            revision: args.str("revision").unwrap_or("HEAD").to_string(),
            path: args.str("path").unwrap_or_default().to_string(),
            pull_frequency: args
                .duration("pull_frequency")
                .unwrap_or(Duration::from_secs(60)),
        };
        *self.args.lock().expect("args lock") = Some(parsed);
        Ok(())
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        loop {
            let Some(args) = self.args.lock().expect("args lock").clone() else {
                return Err(NodeError::Unevaluated);
            };

            let result = match self.sync_repository(&args).await {
                Ok(()) => self.read_snapshot(&args).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(snapshot) => {
                    self.emitter.emit(snapshot);
                    self.set_health(Health::healthy("repository synced"));
                }
                Err(message) => {
                    warn!(repository = %args.repository, %message, "git import sync failed");
                    self.set_health(Health::unhealthy(message));
                }
            }

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(args.pull_frequency) => {}
            }
        }
    }

    fn module_path(&self) -> String {
        let args = self.args.lock().expect("args lock");
        args.as_ref().map(|a| a.path.clone()).unwrap_or_default()
    }

    fn current_health(&self) -> Health {
        self.health.lock().expect("health lock").clone()
    }
}
