//! Inline module source: a single synthetic file from the `content`
//! attribute.

use super::{ContentCallback, Emitter, ImportSource, Snapshot, SourceKind};
use crate::error::NodeError;
use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{ArgsSchema, Body, Scope, Span, ValueKind, evaluate_block};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Name of the synthetic file an inline module is delivered under.
const INLINE_FILE: &str = "inline.cfx";

pub struct StringSource {
    emitter: Emitter,
    health: Mutex<Health>,
}

impl StringSource {
    pub fn new(callback: ContentCallback) -> Self {
        Self {
            emitter: Emitter::new(callback),
            health: Mutex::new(Health::default()),
        }
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new().required("content", ValueKind::String)
    }
}

#[async_trait]
impl ImportSource for StringSource {
    fn kind(&self) -> SourceKind {
        SourceKind::String
    }

    fn evaluate(&self, body: &Body, span: Span, scope: &Scope) -> Result<(), NodeError> {
        let args = evaluate_block(body, span, scope, &Self::schema())?;
        let content = args.str("content").unwrap_or_default().to_string();

        // Inline content is fully known at evaluation time; deliver the
        // snapshot immediately instead of waiting for the run loop.
        let mut snapshot = Snapshot::new();
        snapshot.insert(INLINE_FILE.to_string(), content);
        self.emitter.emit(snapshot);

        *self.health.lock().expect("health lock") = Health::healthy("inline content delivered");
        Ok(())
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        ctx.cancelled().await;
        Ok(())
    }

    fn module_path(&self) -> String {
        String::new()
    }

    fn current_health(&self) -> Health {
        self.health.lock().expect("health lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_dsl::parse_file;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn body_of(source: &str) -> (Body, Span) {
        let file = parse_file("test.cfx", source).unwrap();
        match file.body.into_iter().next().unwrap() {
            conflux_dsl::Stmt::Block(block) => (block.body, block.span),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_content_delivered_once_per_change() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let source = StringSource::new(Arc::new(move |snapshot: Snapshot| {
            assert!(snapshot.contains_key("inline.cfx"));
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let (body, span) = body_of(r#"import.string "lib" { content = `declare "x" { }` }"#);
        let scope = Scope::default();
        source.evaluate(&body, span, &scope).unwrap();
        source.evaluate(&body, span, &scope).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_content_is_schema_error() {
        let source = StringSource::new(Arc::new(|_| {}));
        let (body, span) = body_of(r#"import.string "lib" { }"#);
        assert!(source.evaluate(&body, span, &Scope::default()).is_err());
    }
}
