//! HTTP adapters for completion events and image scans
//!
//! The runner itself is synchronous; each request gets a short-lived tokio
//! runtime and blocks on it.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::orchestrator::{
    CdCompletionEvent, CiCompletionEvent, EventNotifier, ImageScanner, ScanEvent,
};
use crate::pipeline::{Phase, PipelineError, PipelineResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn client() -> PipelineResult<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| PipelineError::Io(format!("Failed to build http client: {e}")))
}

/// POSTs `body` as JSON to `url`, mapping any failure through `fail`
fn post_json<T: Serialize>(
    client: &Client,
    url: &str,
    body: &T,
    fail: fn(String) -> PipelineError,
) -> PipelineResult {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Io(format!("Failed to create runtime: {e}")))?;

    rt.block_on(async {
        let response = client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| fail(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(format!("{url} answered {status}: {text}")));
        }
        Ok::<(), PipelineError>(())
    })
}

/// Sends completion events to the control plane
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    endpoint: String,
    client: Client,
}

impl HttpNotifier {
    /// Creates a notifier posting to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> PipelineResult<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: client()?,
        })
    }

    fn send<T: Serialize>(&self, event: &T) -> PipelineResult {
        post_json(&self.client, &self.endpoint, event, PipelineError::Notification)
    }
}

impl EventNotifier for HttpNotifier {
    fn send_ci_event(&self, event: &CiCompletionEvent) -> PipelineResult {
        tracing::info!(
            pipeline_id = event.pipeline_id,
            failed = event.is_failure(),
            "Sending CI completion event"
        );
        self.send(event)
    }

    fn send_cd_event(&self, event: &CdCompletionEvent) -> PipelineResult {
        tracing::info!(
            workflow_runner_id = event.workflow_runner_id,
            failed = event.failure_reason.is_some(),
            "Sending CD completion event"
        );
        self.send(event)
    }
}

/// Requests image scans from the scanner service
#[derive(Debug, Clone)]
pub struct HttpScanner {
    url: String,
    client: Client,
}

impl HttpScanner {
    /// Creates a scanner client for the service at `endpoint`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> PipelineResult<Self> {
        Ok(Self {
            url: scan_url(endpoint),
            client: client()?,
        })
    }
}

fn scan_url(endpoint: &str) -> String {
    format!("{}/scanner/image", endpoint.trim_end_matches('/'))
}

fn scan_failed(reason: String) -> PipelineError {
    PipelineError::infrastructure(Phase::Scan, reason)
}

impl ImageScanner for HttpScanner {
    fn scan(&self, event: &ScanEvent) -> PipelineResult {
        tracing::info!(image = %event.image, digest = %event.image_digest, "Requesting image scan");
        post_json(&self.client, &self.url, event, scan_failed)
    }
}
