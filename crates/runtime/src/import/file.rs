//! Filesystem module source: polls a file or a directory of `.cfx` files.

use super::{ContentCallback, Emitter, ImportSource, MODULE_EXTENSION, Snapshot, SourceKind};
use crate::error::NodeError;
use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{
    ArgsSchema, Body, Scope, Span, Value, ValueKind, evaluate_block,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone, PartialEq)]
struct FileArgs {
    path: PathBuf,
    poll_frequency: Duration,
}

pub struct FileSource {
    emitter: Emitter,
    args: Mutex<Option<FileArgs>>,
    health: Mutex<Health>,
}

impl FileSource {
    pub fn new(callback: ContentCallback) -> Self {
        Self {
            emitter: Emitter::new(callback),
            args: Mutex::new(None),
            health: Mutex::new(Health::default()),
        }
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new()
            .required("path", ValueKind::String)
            .optional(
                "poll_frequency",
                ValueKind::Duration,
                Value::Duration(Duration::from_secs(60)),
            )
    }

    fn set_health(&self, health: Health) {
        *self.health.lock().expect("health lock") = health;
    }

    /// Read the file, or every module file in the directory, into a
    /// snapshot.
    async fn read_snapshot(path: &Path) -> Result<Snapshot, String> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|err| format!("failed to stat {}: {}", path.display(), err))?;

        let mut snapshot = Snapshot::new();
        if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(path)
                .await
                .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
            let mut files = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| format!("failed to read {}: {}", path.display(), err))?
            {
                let entry_path = entry.path();
                if entry_path.extension().and_then(|e| e.to_str()) == Some(MODULE_EXTENSION) {
                    files.push(entry_path);
                }
            }
            // Deterministic order regardless of directory iteration.
            files.sort();
            for file in files {
                let content = tokio::fs::read_to_string(&file)
                    .await
                    .map_err(|err| format!("failed to read {}: {}", file.display(), err))?;
                snapshot.insert(file.display().to_string(), content);
            }
        } else {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
            snapshot.insert(path.display().to_string(), content);
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl ImportSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn evaluate(&self, body: &Body, span: Span, scope: &Scope) -> Result<(), NodeError> {
        let args = evaluate_block(body, span, scope, &Self::schema())?;
        let parsed = FileArgs {
            path: PathBuf::from(args.str("path").unwrap_or_default()),
            poll_frequency: args
                .duration("poll_frequency")
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

            match Self::read_snapshot(&args.path).await {
                Ok(snapshot) => {
                    self.emitter.emit(snapshot);
                    self.set_health(Health::healthy("module read from disk"));
                }
                Err(message) => {
                    warn!(path = %args.path.display(), %message, "file import poll failed");
                    self.set_health(Health::unhealthy(message));
                }
            }

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(args.poll_frequency) => {}
            }
        }
    }

    fn module_path(&self) -> String {
        let args = self.args.lock().expect("args lock");
        let Some(args) = args.as_ref() else {
            return String::new();
        };
        if args.path.extension().is_some() {
            args.path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else {
            args.path.display().to_string()
        }
    }

    fn current_health(&self) -> Health {
        self.health.lock().expect("health lock").clone()
    }
}
