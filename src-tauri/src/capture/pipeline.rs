use std::sync::{Arc, RwLock};

use anyhow::Context;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::display::DisplayInfo;
use crate::error::{ScannerError, ScannerResult};
use crate::permissions::CaptureGrant;
use crate::settings::CaptureSettings;

use super::encode::encode_jpeg;
use super::session::{ProjectionSlot, SessionHandle};
use super::{ProjectionSource, RawFrame, ScreenshotEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Turns one capture grant into one encoded still of the current display.
pub struct CapturePipeline {
    source: Arc<dyn ProjectionSource>,
    display: Arc<dyn DisplayInfo>,
    slot: ProjectionSlot,
    settings: RwLock<CaptureSettings>,
}

impl CapturePipeline {
    pub fn new(
        source: Arc<dyn ProjectionSource>,
        display: Arc<dyn DisplayInfo>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            source,
            display,
            slot: ProjectionSlot::new(),
            settings: RwLock::new(settings),
        }
    }

    pub fn configure(&self, settings: CaptureSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    fn settings(&self) -> CaptureSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    /// Releases the in-flight session, if any. Safe to call concurrently with
    /// the capture's own completion; only one of them performs the release.
    pub fn abort(&self) -> bool {
        let released = self.slot.release_active();
        if released {
            log_info!("In-flight capture aborted; projection released");
        }
        released
    }

    /// Captures one frame using `grant`, which is spent on every path.
    ///
    /// Waits the settle delay, then polls for a frame until the frame-wait
    /// window closes. The projection is released before encoding starts.
    pub async fn capture(
        &self,
        grant: Option<CaptureGrant>,
        cancel: &CancellationToken,
    ) -> ScannerResult<ScreenshotEvent> {
        let grant = grant.ok_or(ScannerError::NoGrant)?;
        let settings = self.settings();
        let started = Instant::now();

        // Claim the slot first so a second projection is never opened while
        // one is live.
        let guard = self.slot.reserve()?;

        let metrics = self
            .display
            .metrics()
            .map_err(|err| ScannerError::Platform(err.context("read display metrics")))?;

        let grant_id = grant.id();
        let session = self
            .source
            .open(grant, &metrics)
            .map_err(|err| ScannerError::Platform(err.context("open screen projection")))?;
        guard.activate(session)?;
        log_debug!(
            "Projection open for grant {grant_id}: {}x{} @{}dpi",
            metrics.width_px,
            metrics.height_px,
            metrics.density_dpi
        );

        let frame = wait_for_frame(guard.handle(), &settings, cancel).await;
        guard.release();
        drop(guard);
        let frame = frame?;
        let read_ms = started.elapsed().as_millis();

        let quality = settings.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .context("jpeg encode worker join failed")?
            .map_err(|err| ScannerError::CaptureFailed(format!("encode frame: {err:#}")))?;

        if cancel.is_cancelled() {
            return Err(ScannerError::Cancelled);
        }

        log_info!(
            "Captured {} byte JPEG in {}ms (frame after {}ms)",
            jpeg.len(),
            started.elapsed().as_millis(),
            read_ms
        );
        Ok(ScreenshotEvent::new(jpeg))
    }
}

async fn wait_for_frame(
    session: SessionHandle,
    settings: &CaptureSettings,
    cancel: &CancellationToken,
) -> ScannerResult<RawFrame> {
    // The mirror needs at least one composited frame before the reader has
    // anything; reading immediately tends to return nothing or a stale buffer.
    tokio::select! {
        _ = sleep(settings.settle_delay()) => {}
        _ = cancel.cancelled() => return Err(ScannerError::Cancelled),
    }

    let deadline = Instant::now() + settings.frame_wait();
    loop {
        if let Some(frame) = read_frame(session.clone()).await? {
            return Ok(frame);
        }

        if Instant::now() >= deadline {
            log_warn!(
                "No frame within {}ms after settle delay",
                settings.frame_wait_ms
            );
            return Err(ScannerError::CaptureFailed(format!(
                "no frame available within {}ms",
                settings.settle_delay_ms + settings.frame_wait_ms
            )));
        }

        tokio::select! {
            _ = sleep(settings.frame_poll()) => {}
            _ = cancel.cancelled() => return Err(ScannerError::Cancelled),
        }
    }
}

async fn read_frame(session: SessionHandle) -> ScannerResult<Option<RawFrame>> {
    let read = tokio::task::spawn_blocking(move || {
        session.with_session(|mirror| mirror.acquire_latest_frame())
    })
    .await
    .context("frame reader worker join failed")?;

    match read {
        // Released underneath us by the stop path.
        None => Err(ScannerError::Cancelled),
        Some(Ok(frame)) => Ok(frame),
        Some(Err(err)) => Err(ScannerError::CaptureFailed(format!("read frame: {err:#}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{FakeDisplay, FakeProjection, FrameScript};
    use std::time::Duration;

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            settle_delay_ms: 10,
            frame_wait_ms: 60,
            frame_poll_ms: 5,
            jpeg_quality: 80,
        }
    }

    fn pipeline(script: FrameScript) -> (Arc<CapturePipeline>, Arc<FakeProjection>) {
        let projection = Arc::new(FakeProjection::new(script));
        let pipeline = CapturePipeline::new(
            projection.clone(),
            Arc::new(FakeDisplay::small()),
            fast_settings(),
        );
        (Arc::new(pipeline), projection)
    }

    fn grant() -> Option<CaptureGrant> {
        Some(CaptureGrant::new(-1, b"projection-token".to_vec()))
    }

    #[tokio::test]
    async fn test_capture_produces_jpeg_and_releases() {
        let (pipeline, projection) = pipeline(FrameScript::Ready);
        let event = pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!event.image_data.is_empty());
        assert_eq!(&event.image_data[..2], &[0xFF, 0xD8]);
        assert!(event.captured_at_millis > 0);

        let counters = projection.counters();
        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.released(), 1);
        assert_eq!(counters.live(), 0);
        assert!(!pipeline.is_active());
    }

    #[tokio::test]
    async fn test_open_uses_real_display_size() {
        let (pipeline, projection) = pipeline(FrameScript::Ready);
        pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap();
        let metrics = projection.counters().last_metrics().unwrap();
        assert_eq!((metrics.width_px, metrics.height_px), (64, 48));
    }

    #[tokio::test]
    async fn test_missing_grant_fails_without_opening() {
        let (pipeline, projection) = pipeline(FrameScript::Ready);
        let err = pipeline
            .capture(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::NoGrant));
        assert_eq!(projection.counters().opened(), 0);
    }

    #[tokio::test]
    async fn test_frame_arriving_late_is_picked_up() {
        let (pipeline, projection) = pipeline(FrameScript::AfterPolls(3));
        pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(projection.counters().reads(), 4);
        assert_eq!(projection.counters().live(), 0);
    }

    #[tokio::test]
    async fn test_no_frame_within_window_fails_and_releases() {
        let (pipeline, projection) = pipeline(FrameScript::Empty);
        let err = pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::CaptureFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(projection.counters().released(), 1);
        assert_eq!(projection.counters().live(), 0);
    }

    #[tokio::test]
    async fn test_reader_error_releases() {
        let (pipeline, projection) = pipeline(FrameScript::ReadError);
        let err = pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::CaptureFailed(_)));
        assert_eq!(projection.counters().live(), 0);
        assert_eq!(projection.counters().released(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_spends_grant() {
        let (pipeline, projection) = pipeline(FrameScript::OpenError);
        let err = pipeline
            .capture(grant(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Platform(_)));
        assert_eq!(projection.counters().grants_seen(), 1);
        assert_eq!(projection.counters().live(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_settle_releases_once() {
        let (pipeline, projection) = pipeline(FrameScript::Ready);
        pipeline.configure(CaptureSettings {
            settle_delay_ms: 500,
            ..fast_settings()
        });

        let cancel = CancellationToken::new();
        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.capture(grant(), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pipeline.is_active());

        // The stop path: release from outside, then cancel.
        assert!(pipeline.abort());
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ScannerError::Cancelled));
        assert_eq!(projection.counters().released(), 1);
        assert_eq!(projection.counters().live(), 0);
        assert_eq!(projection.counters().reads(), 0);
    }

    #[tokio::test]
    async fn test_abort_alone_stops_capture() {
        let (pipeline, projection) = pipeline(FrameScript::Empty);
        pipeline.configure(CaptureSettings {
            frame_wait_ms: 2_000,
            ..fast_settings()
        });

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.capture(grant(), &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        pipeline.abort();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ScannerError::Cancelled));
        assert_eq!(projection.counters().released(), 1);
        assert_eq!(projection.counters().live(), 0);
    }

    #[tokio::test]
    async fn test_abort_during_slow_read_returns_immediately() {
        let (pipeline, projection) = pipeline(FrameScript::SlowRead(400));

        let cancel = CancellationToken::new();
        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.capture(grant(), &cancel).await })
        };
        // Settle is 10ms, so the first read is in progress by now.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(projection.counters().reads(), 1);

        let started = std::time::Instant::now();
        cancel.cancel();
        assert!(pipeline.abort());
        assert!(started.elapsed() < Duration::from_millis(100));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ScannerError::Cancelled));
        assert_eq!(projection.counters().reads(), 1);
        assert_eq!(projection.counters().released(), 1);
        assert_eq!(projection.counters().live(), 0);
        assert!(!pipeline.is_active());
    }

    #[tokio::test]
    async fn test_concurrent_capture_is_busy() {
        let (pipeline, projection) = pipeline(FrameScript::Ready);
        pipeline.configure(CaptureSettings {
            settle_delay_ms: 200,
            ..fast_settings()
        });

        let first = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.capture(grant(), &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = pipeline.capture(grant(), &CancellationToken::new()).await;
        assert!(matches!(second, Err(ScannerError::CaptureBusy)));
        assert_eq!(projection.counters().opened(), 1);
        assert_eq!(projection.counters().grants_seen(), 1);

        first.await.unwrap().unwrap();
        assert_eq!(projection.counters().opened(), 1);
        assert_eq!(projection.counters().released(), 1);
        assert_eq!(projection.counters().live(), 0);
    }

    #[tokio::test]
    async fn test_every_attempt_returns_counter_to_zero() {
        for script in [
            FrameScript::Ready,
            FrameScript::Empty,
            FrameScript::AfterPolls(2),
            FrameScript::ReadError,
            FrameScript::OpenError,
        ] {
            let (pipeline, projection) = pipeline(script);
            let _ = pipeline.capture(grant(), &CancellationToken::new()).await;
            assert_eq!(projection.counters().live(), 0, "{script:?}");
            assert_eq!(
                projection.counters().released(),
                projection.counters().opened(),
                "{script:?}"
            );
        }
    }
}
