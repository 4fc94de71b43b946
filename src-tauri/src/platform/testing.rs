//! In-process stand-ins for the platform seams, used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};

use crate::capture::{MirrorSession, ProjectionSource, RawFrame};
use crate::display::{DisplayInfo, DisplayMetrics};
use crate::overlay::{BubbleGeometry, OverlaySurface, Position, TapHandler};
use crate::permissions::{
    CaptureGrant, ConsentPrompt, ConsentResponder, OverlayPermissionSource, PermissionBroker,
};
use crate::service::StatusIndicator;

pub struct FakeDisplay {
    pub metrics: DisplayMetrics,
}

impl FakeDisplay {
    pub fn phone() -> Self {
        Self {
            metrics: DisplayMetrics {
                width_px: 1080,
                height_px: 2400,
                density_dpi: 320,
                scale: 2.0,
            },
        }
    }

    /// Tiny display so capture tests encode quickly.
    pub fn small() -> Self {
        Self {
            metrics: DisplayMetrics {
                width_px: 64,
                height_px: 48,
                density_dpi: 160,
                scale: 1.0,
            },
        }
    }
}

impl DisplayInfo for FakeDisplay {
    fn metrics(&self) -> Result<DisplayMetrics> {
        Ok(self.metrics)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    pub attached: Option<BubbleGeometry>,
    pub attach_calls: usize,
    pub detach_calls: usize,
    pub moves: Vec<Position>,
    pub pressed: bool,
    pub fail_attach: bool,
}

#[derive(Clone, Default)]
pub struct FakeSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> SurfaceLog {
        self.log.lock().unwrap().clone()
    }

    pub fn fail_attach(&self, fail: bool) {
        self.log.lock().unwrap().fail_attach = fail;
    }
}

impl OverlaySurface for FakeSurface {
    fn attach(&mut self, geometry: BubbleGeometry) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_attach {
            bail!("window manager rejected the view");
        }
        assert!(log.attached.is_none(), "bubble attached twice");
        log.attach_calls += 1;
        log.attached = Some(geometry);
        Ok(())
    }

    fn move_to(&mut self, position: Position) -> Result<()> {
        self.log.lock().unwrap().moves.push(position);
        Ok(())
    }

    fn set_pressed(&mut self, pressed: bool) {
        self.log.lock().unwrap().pressed = pressed;
    }

    fn detach(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        assert!(log.attached.take().is_some(), "detach without attach");
        log.detach_calls += 1;
        Ok(())
    }
}

pub struct FakeOverlayPermission {
    granted: AtomicBool,
    failing: AtomicBool,
    grant_on_settings: AtomicBool,
    settings_opened: AtomicUsize,
}

impl FakeOverlayPermission {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            failing: AtomicBool::new(false),
            grant_on_settings: AtomicBool::new(false),
            settings_opened: AtomicUsize::new(0),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Simulates the user flipping the switch on the settings page.
    pub fn grant_when_settings_opened(&self) {
        self.grant_on_settings.store(true, Ordering::SeqCst);
    }

    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::SeqCst)
    }
}

impl OverlayPermissionSource for FakeOverlayPermission {
    fn can_draw_overlays(&self) -> Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("settings provider unavailable");
        }
        Ok(self.granted.load(Ordering::SeqCst))
    }

    fn open_overlay_settings(&self) -> Result<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        if self.grant_on_settings.load(Ordering::SeqCst) {
            self.set_granted(true);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentScript {
    Grant,
    Deny,
    /// Drops the responder without answering.
    Drop,
    /// Keeps the responder until the test answers.
    Hold,
    Fail,
}

pub struct ScriptedConsent {
    script: ConsentScript,
    launches: AtomicUsize,
    held: Mutex<Vec<ConsentResponder>>,
}

impl ScriptedConsent {
    pub fn new(script: ConsentScript) -> Self {
        Self {
            script,
            launches: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn answer_held(&self, granted: bool) {
        for responder in self.held.lock().unwrap().drain(..) {
            if granted {
                responder.grant(-1, b"projection-token".to_vec());
            } else {
                responder.deny();
            }
        }
    }
}

impl ConsentPrompt for ScriptedConsent {
    fn launch(&self, responder: ConsentResponder) -> Result<()> {
        let script = self.script;
        if script == ConsentScript::Fail {
            bail!("projection manager unavailable");
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        match script {
            ConsentScript::Grant => responder.grant(-1, b"projection-token".to_vec()),
            ConsentScript::Deny => responder.deny(),
            ConsentScript::Drop => drop(responder),
            ConsentScript::Hold => self.held.lock().unwrap().push(responder),
            ConsentScript::Fail => unreachable!(),
        }
        Ok(())
    }
}

pub fn test_broker(overlay_granted: bool) -> (PermissionBroker, Arc<FakeOverlayPermission>) {
    let overlay = Arc::new(FakeOverlayPermission::new(overlay_granted));
    let broker = PermissionBroker::new(
        overlay.clone(),
        Arc::new(ScriptedConsent::new(ConsentScript::Grant)),
    );
    (broker, overlay)
}

pub fn counting_tap() -> (TapHandler, Arc<AtomicUsize>) {
    let taps = Arc::new(AtomicUsize::new(0));
    let counter = taps.clone();
    (
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        taps,
    )
}

/// RGBA gradient with `padding` extra bytes at the end of every row.
pub fn gradient_frame(width: u32, height: u32, padding: usize) -> RawFrame {
    let row_stride = width as usize * 4 + padding;
    let mut data = Vec::with_capacity(row_stride * height as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255]);
        }
        data.extend(std::iter::repeat(0xAB).take(padding));
    }
    RawFrame {
        width,
        height,
        row_stride,
        data,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScript {
    Ready,
    /// The reader never produces a frame.
    Empty,
    /// The first `n` reads come back empty.
    AfterPolls(usize),
    /// Every read blocks for this many milliseconds, then yields a frame.
    SlowRead(u64),
    ReadError,
    OpenError,
}

#[derive(Default)]
pub struct ProjectionCounters {
    opened: AtomicUsize,
    released: AtomicUsize,
    live: AtomicIsize,
    reads: AtomicUsize,
    grants_seen: AtomicUsize,
    last_metrics: Mutex<Option<DisplayMetrics>>,
}

impl ProjectionCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet released.
    pub fn live(&self) -> isize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn grants_seen(&self) -> usize {
        self.grants_seen.load(Ordering::SeqCst)
    }

    pub fn last_metrics(&self) -> Option<DisplayMetrics> {
        *self.last_metrics.lock().unwrap()
    }
}

pub struct FakeProjection {
    script: FrameScript,
    counters: Arc<ProjectionCounters>,
}

impl FakeProjection {
    pub fn new(script: FrameScript) -> Self {
        Self {
            script,
            counters: Arc::new(ProjectionCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<ProjectionCounters> {
        self.counters.clone()
    }

    /// Opens a session without a grant, for slot tests.
    pub fn open_session(&self) -> Box<dyn MirrorSession> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeMirror {
            script: self.script,
            counters: self.counters.clone(),
            metrics: FakeDisplay::small().metrics,
            reads: 0,
            released: false,
        })
    }
}

impl ProjectionSource for FakeProjection {
    fn open(&self, grant: CaptureGrant, metrics: &DisplayMetrics) -> Result<Box<dyn MirrorSession>> {
        self.counters.grants_seen.fetch_add(1, Ordering::SeqCst);
        drop(grant);
        let script = self.script;
        if script == FrameScript::OpenError {
            return Err(anyhow!("virtual display creation refused"));
        }
        *self.counters.last_metrics.lock().unwrap() = Some(*metrics);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMirror {
            script,
            counters: self.counters.clone(),
            metrics: *metrics,
            reads: 0,
            released: false,
        }))
    }
}

struct FakeMirror {
    script: FrameScript,
    counters: Arc<ProjectionCounters>,
    metrics: DisplayMetrics,
    reads: usize,
    released: bool,
}

impl MirrorSession for FakeMirror {
    fn acquire_latest_frame(&mut self) -> Result<Option<RawFrame>> {
        assert!(!self.released, "frame read after release");
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.reads += 1;
        let frame = gradient_frame(self.metrics.width_px, self.metrics.height_px, 0);
        match self.script {
            FrameScript::Ready => Ok(Some(frame)),
            FrameScript::Empty => Ok(None),
            FrameScript::AfterPolls(n) if self.reads > n => Ok(Some(frame)),
            FrameScript::AfterPolls(_) => Ok(None),
            FrameScript::SlowRead(ms) => {
                std::thread::sleep(std::time::Duration::from_millis(ms));
                Ok(Some(frame))
            }
            FrameScript::ReadError => bail!("image reader closed"),
            FrameScript::OpenError => unreachable!(),
        }
    }

    fn release(&mut self) {
        assert!(!self.released, "projection released twice");
        self.released = true;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingIndicator {
    visible: AtomicBool,
    shows: AtomicUsize,
    hides: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingIndicator {
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    pub fn hides(&self) -> usize {
        self.hides.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StatusIndicator for RecordingIndicator {
    fn show(&self, _title: &str, _text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("notification channel blocked");
        }
        self.shows.fetch_add(1, Ordering::SeqCst);
        self.visible.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
        self.visible.store(false, Ordering::SeqCst);
    }
}
