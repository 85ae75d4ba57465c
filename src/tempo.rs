//! Tick <-> millisecond mapping under a live tempo and tempo scale.
//!
//! The mapping is piecewise linear in wall-clock time: every tempo or scale
//! change re-anchors the line at the instant of the change, so the mapping
//! stays continuous. At the defaults (125 BPM, scale 1.0) one tick equals
//! one millisecond.

pub(crate) const DEFAULT_BPM: f64 = 125.0;

/// Value type guarded by the scheduler mutex; never locks on its own.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TempoMap {
    bpm: f64,
    scale: f64,
    anchor_ms: f64,
    anchor_ticks: f64,
}

impl TempoMap {
    pub(crate) fn new() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            scale: 1.0,
            anchor_ms: 0.0,
            anchor_ticks: 0.0,
        }
    }

    pub(crate) fn bpm(&self) -> f64 {
        self.bpm
    }

    pub(crate) fn scale(&self) -> f64 {
        self.scale
    }

    /// Effective tempo; zero freezes playback.
    pub(crate) fn effective(&self) -> f64 {
        self.bpm * self.scale
    }

    /// Returns +inf when the effective tempo is zero.
    pub(crate) fn ticks_to_ms(&self, ticks: f64) -> f64 {
        let tempo = self.effective();
        if tempo <= 0.0 {
            return f64::INFINITY;
        }
        (ticks - self.anchor_ticks) * 125.0 / tempo + self.anchor_ms
    }

    /// Inverse of [`ticks_to_ms`]; with a zero effective tempo, time is
    /// frozen at the anchor tick.
    pub(crate) fn ms_to_ticks(&self, ms: f64) -> f64 {
        (ms - self.anchor_ms) * self.effective() / 125.0 + self.anchor_ticks
    }

    /// Apply a tempo change from a scheduled tempo meta-event. The anchor is
    /// the event's scheduled position, not the wake-up time.
    pub(crate) fn set_bpm(&mut self, bpm: f64, at_ms: f64, at_ticks: f64) {
        self.anchor_ms = at_ms;
        self.anchor_ticks = at_ticks;
        self.bpm = bpm;
    }

    /// Apply a pending scale change at `now_ms`. The anchor tick is computed
    /// with the old scale before the new one takes effect, keeping the
    /// mapping continuous.
    pub(crate) fn rescale(&mut self, now_ms: f64, scale: f64) {
        self.anchor_ticks = self.ms_to_ticks(now_ms);
        self.anchor_ms = now_ms;
        self.scale = scale;
    }
}
