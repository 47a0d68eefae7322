//! Readiness gating.
//!
//! Two latches guard world population after a scene load:
//!
//! * [`ReadinessGate`] (one per side) – may objects be instantiated yet?
//!   It aggregates named boolean checks contributed by manager components,
//!   plus the built-in [`MIN_DELAY_CHECK`].
//! * [`AdmissionLatch`] (server only) – may players join? Opened by the
//!   staged spawner once static content is in place, and never before the
//!   server gate has latched.
//!
//! Both are polled once per tick; nothing here blocks.

use log::{debug, info};
use std::time::Duration;

use crate::component::ManagerComponent;
use crate::types::Side;

/// Mandatory check: enough time has passed since the scene finished loading.
pub const MIN_DELAY_CHECK: &str = "min_delay_elapsed";

// ---------------------------------------------------------------------------
// Check mapping
// ---------------------------------------------------------------------------

/// Check name → satisfied, kept in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessStates {
    entries: Vec<(String, bool)>,
}

impl ReadinessStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, ready: bool) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, value)) => *value = ready,
            None => self.entries.push((name.to_string(), ready)),
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| *value)
    }

    pub fn all_satisfied(&self) -> bool {
        self.entries.iter().all(|(_, value)| *value)
    }

    /// Names of checks still holding the gate closed.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, value)| !*value)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Gathering,
    Ready,
}

#[derive(Debug)]
pub struct ReadinessGate {
    side: Side,
    min_delay: Duration,
    /// Session time of the last scene load; `None` between a scene change and
    /// the next load.
    scene_loaded_at: Option<Duration>,
    states: ReadinessStates,
    latched: bool,
}

impl ReadinessGate {
    pub fn new(side: Side, min_delay: Duration) -> Self {
        Self {
            side,
            min_delay,
            scene_loaded_at: None,
            states: ReadinessStates::new(),
            latched: false,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Scene change started: drop every check and the latch together.
    pub fn reset(&mut self) {
        self.states.clear();
        self.latched = false;
        self.scene_loaded_at = None;
        debug!("{} readiness gate reset", self.side);
    }

    /// Scene finished loading at session time `now`; gathering starts over.
    pub fn on_scene_loaded(&mut self, now: Duration) {
        self.reset();
        self.scene_loaded_at = Some(now);
    }

    /// Re-evaluate every check and latch once all hold.
    ///
    /// Safe to call every frame. Once latched this returns `true` without
    /// touching the checks again, until the next [`reset`](Self::reset).
    pub fn poll(&mut self, now: Duration, contributors: &mut [Box<dyn ManagerComponent>]) -> bool {
        if self.latched {
            return true;
        }
        let Some(loaded_at) = self.scene_loaded_at else {
            return false;
        };

        let elapsed = now.saturating_sub(loaded_at);
        self.states.set(MIN_DELAY_CHECK, elapsed >= self.min_delay);
        for component in contributors.iter_mut() {
            component.update_ready_states(self.side, &mut self.states);
        }

        if self.states.all_satisfied() {
            self.latched = true;
            info!(
                "{} ready to instantiate objects ({} checks)",
                self.side,
                self.states.len()
            );
        }
        self.latched
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn state(&self) -> GateState {
        if self.latched {
            GateState::Ready
        } else {
            GateState::Gathering
        }
    }

    pub fn states(&self) -> &ReadinessStates {
        &self.states
    }
}

// ---------------------------------------------------------------------------
// Player admission
// ---------------------------------------------------------------------------

/// Server-side "ready to instantiate players" latch.
#[derive(Debug, Default)]
pub struct AdmissionLatch {
    open: bool,
}

impl AdmissionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the latch. Refused (returns `false`) while `objects` has not latched.
    pub fn open(&mut self, objects: &ReadinessGate) -> bool {
        if !objects.is_latched() {
            return false;
        }
        self.open = true;
        true
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
