use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runs::{RunOrchestrator, RunSummary};

use super::source::ImageSource;
use super::watcher::ImageWatcher;

pub struct IngestController {
    handle: Option<JoinHandle<RunSummary>>,
    cancel_token: Option<CancellationToken>,
}

impl IngestController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start_live(
        &mut self,
        orchestrator: Arc<RunOrchestrator>,
        source: ImageSource,
        poll_interval: Duration,
        config: Value,
    ) -> Result<CancellationToken> {
        if self.handle.is_some() {
            bail!("live session already active");
        }

        let cancel_token = CancellationToken::new();
        let mut watcher = ImageWatcher::new(source, poll_interval, cancel_token.clone());

        info!("starting live session, polling every {}ms", poll_interval.as_millis());
        let handle = tokio::spawn(async move {
            orchestrator.run_live(&mut watcher, config).await
        });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token.clone());
        Ok(cancel_token)
    }

    pub async fn stop(&mut self) -> Result<Option<RunSummary>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.wait().await
    }

    pub async fn wait(&mut self) -> Result<Option<RunSummary>> {
        self.cancel_token = None;
        match self.handle.take() {
            Some(handle) => handle
                .await
                .context("live session task failed to join")
                .map(Some),
            None => Ok(None),
        }
    }
}

impl Default for IngestController {
    fn default() -> Self {
        Self::new()
    }
}
