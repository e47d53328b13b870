//! HTTP module source: periodic conditional GET.

use super::{ContentCallback, Emitter, ImportSource, Snapshot, SourceKind};
use crate::error::NodeError;
use crate::health::Health;
use async_trait::async_trait;
use conflux_dsl::{
    ArgsSchema, Body, Scope, Span, Value, ValueKind, evaluate_block,
};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone, PartialEq)]
struct HttpArgs {
    url: String,
    poll_frequency: Duration,
    timeout: Duration,
}

pub struct HttpSource {
    emitter: Emitter,
    args: Mutex<Option<HttpArgs>>,
    /// ETag of the last 200 response, sent back as If-None-Match.
    etag: Mutex<Option<String>>,
    health: Mutex<Health>,
}

impl HttpSource {
    pub fn new(callback: ContentCallback) -> Self {
        Self {
            emitter: Emitter::new(callback),
            args: Mutex::new(None),
            etag: Mutex::new(None),
            health: Mutex::new(Health::default()),
        }
    }

    fn schema() -> ArgsSchema {
        ArgsSchema::new()
            .required("url", ValueKind::String)
            .optional(
                "poll_frequency",
                ValueKind::Duration,
                Value::Duration(Duration::from_secs(60)),
            )
            .optional(
                "timeout",
                ValueKind::Duration,
                Value::Duration(Duration::from_secs(10)),
            )
    }

    fn set_health(&self, health: Health) {
        *self.health.lock().expect("health lock") = health;
    }

    async fn fetch(&self, args: &HttpArgs) -> Result<(), String> {
        let client = reqwest::Client::builder()
            .timeout(args.timeout)
            .build()
            .map_err(|err| format!("failed to build http client: {}", err))?;

        let mut request = client.get(&args.url);
        if let Some(etag) = self.etag.lock().expect("etag lock").clone() {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|err| format!("GET {} failed: {}", args.url, err))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(format!(
                "GET {} returned status {}",
                args.url,
                response.status()
            ));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        *self.etag.lock().expect("etag lock") = etag;

        let body = response
            .text()
            .await
            .map_err(|err| format!("failed to read body from {}: {}", args.url, err))?;

        let mut snapshot = Snapshot::new();
        snapshot.insert(args.url.clone(), body);
        self.emitter.emit(snapshot);
        Ok(())
    }
}

#[async_trait]
impl ImportSource for HttpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Http
    }

    fn evaluate(&self, body: &Body, span: Span, scope: &Scope) -> Result<(), NodeError> {
        let args = evaluate_block(body, span, scope, &Self::schema())?;
        let parsed = HttpArgs {
            url: args.str("url").unwrap_or_default().to_string(),
            poll_frequency: args
                .duration("poll_frequency")
                .unwrap_or(Duration::from_secs(60)),
            timeout: args.duration("timeout").unwrap_or(Duration::from_secs(10)),
        };
        *self.args.lock().expect("args lock") = Some(parsed);
        Ok(())
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), NodeError> {
        loop {
            let Some(args) = self.args.lock().expect("args lock").clone() else {
                return Err(NodeError::Unevaluated);
            };

            match self.fetch(&args).await {
                Ok(()) => self.set_health(Health::healthy("module fetched")),
                Err(message) => {
                    warn!(url = %args.url, %message, "http import poll failed");
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
        match args.url.rsplit_once('/') {
            Some((base, _)) => base.to_string(),
            None => args.url.clone(),
        }
    }

    fn current_health(&self) -> Health {
        self.health.lock().expect("health lock").clone()
    }
}
