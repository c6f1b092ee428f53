use std::collections::VecDeque;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::OrchestrationFault;

use super::source::{ImageSource, IngestedImage};

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Turns an [`ImageSource`] into an unbounded stream of decoded inputs.
///
/// Items found in one scan are handed out before the next scan. Between scans the
/// watcher sleeps for the poll interval. Cancellation is checked before each scan and
/// during the sleep, never while a scan is running.
pub struct ImageWatcher {
    source: Option<ImageSource>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
    pending: VecDeque<IngestedImage>,
    scanned: bool,
}

impl ImageWatcher {
    pub fn new(source: ImageSource, poll_interval: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            source: Some(source),
            poll_interval,
            cancel_token,
            pending: VecDeque::new(),
            scanned: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<IngestedImage>, OrchestrationFault> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if self.cancel_token.is_cancelled() {
                return Ok(None);
            }

            if self.scanned {
                tokio::select! {
                    _ = self.cancel_token.cancelled() => {
                        log_info!("image watcher stopping");
                        return Ok(None);
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            self.scanned = true;

            let items = self.scan().await?;
            self.pending.extend(items);
        }
    }

    async fn scan(&mut self) -> Result<Vec<IngestedImage>, OrchestrationFault> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| OrchestrationFault::IngestAborted("image source lost".into()))?;

        let (source, items) = tokio::task::spawn_blocking(move || {
            let items = source.poll_cycle();
            (source, items)
        })
        .await
        .map_err(|err| OrchestrationFault::IngestAborted(err.to_string()))?;

        self.source = Some(source);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Source;
    use crate::events::NullEventSink;
    use crate::settings::default_extensions;
    use image::DynamicImage;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn watcher_in(root: &std::path::Path, interval: Duration, token: CancellationToken) -> ImageWatcher {
        let source = ImageSource::new(
            root.join("x"),
            root.join("y"),
            &default_extensions(),
            Arc::new(NullEventSink),
        )
        .unwrap();
        ImageWatcher::new(source, interval, token)
    }

    #[tokio::test]
    async fn yields_both_sources_then_stops_on_cancel() {
        let root = tempdir().unwrap();
        let token = CancellationToken::new();
        let mut watcher = watcher_in(root.path(), Duration::from_millis(10), token.clone());
        DynamicImage::new_rgb8(2, 2).save(root.path().join("x").join("1.png")).unwrap();
        DynamicImage::new_rgb8(2, 2).save(root.path().join("y").join("1.png")).unwrap();

        let first = watcher.next().await.unwrap().unwrap();
        let second = watcher.next().await.unwrap().unwrap();
        assert_eq!(first.source, Source::X);
        assert_eq!(second.source, Source::Y);

        token.cancel();
        assert!(watcher.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_before_first_scan_yields_nothing() {
        let root = tempdir().unwrap();
        let token = CancellationToken::new();
        let mut watcher = watcher_in(root.path(), Duration::from_millis(10), token.clone());
        DynamicImage::new_rgb8(2, 2).save(root.path().join("x").join("1.png")).unwrap();

        token.cancel();
        assert!(watcher.next().await.unwrap().is_none());
        assert!(root.path().join("x").join("1.png").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_poll_interval_between_scans() {
        let root = tempdir().unwrap();
        let token = CancellationToken::new();
        let mut watcher = watcher_in(root.path(), Duration::from_secs(2), token.clone());
        let x = root.path().join("x");
        DynamicImage::new_rgb8(2, 2).save(x.join("a.png")).unwrap();
        DynamicImage::new_rgb8(2, 2).save(x.join("b.png")).unwrap();

        let started = Instant::now();
        watcher.next().await.unwrap().unwrap();
        watcher.next().await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
