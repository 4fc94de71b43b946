use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{ScannerError, ScannerResult};

use super::MirrorSession;

enum Occupant {
    Idle,
    /// A capture owns the slot but its projection is still being opened.
    Reserved,
    Ready(Box<dyn MirrorSession>),
    /// A blocking reader has the session checked out.
    Reading { release_requested: bool },
}

struct SlotState {
    generation: u64,
    occupant: Occupant,
}

/// The process-wide screen-capture session. A capture reserves the slot
/// before opening its projection, so at most one projection exists at a
/// time. The lock is never held across a frame read; a release that lands
/// mid-read is deferred to the reader, which performs it when the read
/// returns. Either way the session is released exactly once.
#[derive(Clone)]
pub struct ProjectionSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl Default for ProjectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                generation: 0,
                occupant: Occupant::Idle,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the slot for a new capture. Fails with `CaptureBusy` while any
    /// other capture holds it, without touching the projection source.
    pub fn reserve(&self) -> ScannerResult<SessionGuard> {
        let mut state = self.lock();
        if !matches!(state.occupant, Occupant::Idle) {
            return Err(ScannerError::CaptureBusy);
        }
        state.generation = state.generation.wrapping_add(1);
        state.occupant = Occupant::Reserved;
        Ok(SessionGuard {
            slot: self.clone(),
            generation: state.generation,
        })
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.lock().occupant, Occupant::Idle)
    }

    /// Ends whatever capture holds the slot. Returns whether there was one.
    /// Never waits on an in-progress frame read.
    pub fn release_active(&self) -> bool {
        let generation = self.lock().generation;
        self.release_generation(generation)
    }

    fn release_generation(&self, generation: u64) -> bool {
        let session = {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }
            if let Occupant::Reading { release_requested } = &mut state.occupant {
                let first = !*release_requested;
                *release_requested = true;
                return first;
            }
            match std::mem::replace(&mut state.occupant, Occupant::Idle) {
                Occupant::Idle => return false,
                Occupant::Ready(session) => Some(session),
                Occupant::Reserved | Occupant::Reading { .. } => None,
            }
        };
        release(session);
        true
    }

    fn activate(&self, generation: u64, session: Box<dyn MirrorSession>) -> ScannerResult<()> {
        {
            let mut state = self.lock();
            if state.generation == generation && matches!(state.occupant, Occupant::Reserved) {
                state.occupant = Occupant::Ready(session);
                return Ok(());
            }
        }
        // Aborted while the projection was being opened.
        release(Some(session));
        Err(ScannerError::Cancelled)
    }

    /// Runs `f` against the session of `generation` without holding the
    /// slot. `None` means the session was released before or during the call.
    fn with_session<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut dyn MirrorSession) -> T,
    ) -> Option<T> {
        let mut session = {
            let mut state = self.lock();
            if state.generation != generation || !matches!(state.occupant, Occupant::Ready(_)) {
                return None;
            }
            match std::mem::replace(
                &mut state.occupant,
                Occupant::Reading {
                    release_requested: false,
                },
            ) {
                Occupant::Ready(session) => session,
                _ => return None,
            }
        };

        let output = f(&mut *session);

        let mut state = self.lock();
        if let Occupant::Reading {
            release_requested: false,
        } = state.occupant
        {
            state.occupant = Occupant::Ready(session);
            return Some(output);
        }
        state.occupant = Occupant::Idle;
        drop(state);
        release(Some(session));
        None
    }
}

fn release(session: Option<Box<dyn MirrorSession>>) -> bool {
    match session {
        Some(mut session) => {
            session.release();
            debug!("Projection session released");
            true
        }
        None => false,
    }
}

/// Scoped ownership of one reservation: dropping the guard ends the capture
/// unless someone else already did.
pub struct SessionGuard {
    slot: ProjectionSlot,
    generation: u64,
}

impl SessionGuard {
    /// Hands the freshly opened projection to the slot. If the capture was
    /// aborted meanwhile, the projection is released and `Cancelled` returned.
    pub fn activate(&self, session: Box<dyn MirrorSession>) -> ScannerResult<()> {
        self.slot.activate(self.generation, session)
    }

    pub fn with_session<T>(&self, f: impl FnOnce(&mut dyn MirrorSession) -> T) -> Option<T> {
        self.slot.with_session(self.generation, f)
    }

    /// Owned handle for use from a blocking worker.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            slot: self.slot.clone(),
            generation: self.generation,
        }
    }

    pub fn release(&self) -> bool {
        self.slot.release_generation(self.generation)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Non-owning reference to an installed session.
#[derive(Clone)]
pub struct SessionHandle {
    slot: ProjectionSlot,
    generation: u64,
}

impl SessionHandle {
    pub fn with_session<T>(&self, f: impl FnOnce(&mut dyn MirrorSession) -> T) -> Option<T> {
        self.slot.with_session(self.generation, f)
    }
}
