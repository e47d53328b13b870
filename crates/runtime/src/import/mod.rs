//! Pluggable module providers for `import.<kind>` blocks.
//!
//! A source watches its backing store and delivers `path → text` snapshots
//! to the owning import node: once at startup and again whenever the
//! content changes. Snapshot comparison happens here so an unchanged
//! fetch never wakes the node.

mod file;
mod git;
mod http;
mod string;

pub use file::FileSource;
pub use git::GitSource;
pub use http::HttpSource;
pub use string::StringSource;

use crate::error::NodeError;
use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{Body, Scope, Span};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// File extension of configuration modules.
pub const MODULE_EXTENSION: &str = "cfx";

/// A `path → text` module snapshot.
pub type Snapshot = IndexMap<String, String>;

/// Receives snapshots from a source.
pub type ContentCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// The kind of import source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    String,
    Http,
    Git,
}

impl SourceKind {
    /// Parse a block name (`import.file`) into a source kind.
    pub fn from_block_name(name: &str) -> Option<Self> {
        match name {
            "import.file" => Some(SourceKind::File),
            "import.string" => Some(SourceKind::String),
            "import.http" => Some(SourceKind::Http),
            "import.git" => Some(SourceKind::Git),
            _ => None,
        }
    }

    pub fn block_name(&self) -> &'static str {
        match self {
            SourceKind::File => "import.file",
            SourceKind::String => "import.string",
            SourceKind::Http => "import.http",
            SourceKind::Git => "import.git",
        }
    }
}

/// A module provider.
#[async_trait]
pub trait ImportSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Project the import block body onto this source's own argument
    /// schema.
    fn evaluate(&self, body: &Body, span: Span, scope: &Scope) -> Result<(), NodeError>;

    /// Watch the backing store, delivering snapshots until cancelled.
    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError>;

    /// Directory-like identifier for resolving relative references inside
    /// the module (exposed as `MODULE_PATH`).
    fn module_path(&self) -> String;

    fn current_health(&self) -> Health;
}

/// Construct the source for an import kind.
///
/// `data_path` is the node's private directory (used by sources that need
/// a working tree, like git).
pub fn new_source(
    kind: SourceKind,
    callback: ContentCallback,
    data_path: PathBuf,
) -> Arc<dyn ImportSource> {
    match kind {
        SourceKind::File => Arc::new(FileSource::new(callback)),
        SourceKind::String => Arc::new(StringSource::new(callback)),
        SourceKind::Http => Arc::new(HttpSource::new(callback)),
        SourceKind::Git => Arc::new(GitSource::new(callback, data_path)),
    }
}

/// Shared snapshot-diffing state: remembers the last emitted snapshot and
/// invokes the callback only on change.
pub(crate) struct Emitter {
    callback: ContentCallback,
    last: Mutex<Option<Snapshot>>,
}

impl Emitter {
    pub(crate) fn new(callback: ContentCallback) -> Self {
        Self {
            callback,
            last: Mutex::new(None),
        }
    }

    /// Deliver `snapshot` if it differs from the last delivered one.
    pub(crate) fn emit(&self, snapshot: Snapshot) {
        {
            let mut last = self.last.lock().expect("snapshot lock");
            if last.as_ref() == Some(&snapshot) {
                return;
            }
            *last = Some(snapshot.clone());
        }
        (self.callback)(snapshot);
    }
}
