//! Small shared enums used across node and parameter types.
//!
//! Both [`Waveform`] and [`SyncMode`] are stored as a single atomic byte on
//! their owning node so that, like every other per-sample field, they may be
//! read by the realtime thread and written by the control thread without
//! locking (see the concurrency contract in the crate root docs).

use std::sync::atomic::{AtomicU8, Ordering};

/// Oscillator / LFO waveform shapes.
///
/// The discriminants match the script host's waveform globals exactly
/// (`Sine=0, Saw=1, InvSaw=2, Square=3, Triangle=4`), so a script can pass a
/// plain integer and the host can round-trip it without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Waveform {
    Sine = 0,
    Saw = 1,
    InvSaw = 2,
    Square = 3,
    Triangle = 4,
}

impl Waveform {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Waveform::Sine,
            1 => Waveform::Saw,
            2 => Waveform::InvSaw,
            3 => Waveform::Square,
            _ => Waveform::Triangle,
        }
    }

    /// Evaluate the waveform at a phase in `[0, 2*PI)`.
    pub fn eval(self, phase: f32) -> f32 {
        use std::f32::consts::PI;
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Saw => phase / PI - 1.0,
            Waveform::InvSaw => 1.0 - phase / PI,
            Waveform::Square => {
                if phase < PI {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 2.0 * (phase / PI - 1.0).abs() - 1.0,
        }
    }
}

/// An atomic cell holding a [`Waveform`], written and read with relaxed
/// ordering like every other per-sample parameter.
#[derive(Debug)]
pub struct AtomicWaveform(AtomicU8);

impl AtomicWaveform {
    pub fn new(initial: Waveform) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> Waveform {
        Waveform::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: Waveform) {
        self.0.store(value as u8, Ordering::Relaxed);
    }
}

/// Whether a voice-template node is realized fresh per voice or shared
/// across every voice derived from the same template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncMode {
    PerVoice = 0,
    Shared = 1,
}

impl SyncMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SyncMode::Shared,
            _ => SyncMode::PerVoice,
        }
    }
}

/// An atomic cell holding a [`SyncMode`].
///
/// A node's sync mode is normally set once — at construction for a node
/// made directly by the script host, or immediately after by
/// `VoiceManager::instantiate_nodes` for a node realized from a
/// `NodeSpec` — but it is stored atomically for uniformity with the rest
/// of a node's per-sample fields, per §5's list of fields every node
/// carries as an atomic.
#[derive(Debug)]
pub struct AtomicSyncMode(AtomicU8);

impl AtomicSyncMode {
    pub fn new(initial: SyncMode) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> SyncMode {
        SyncMode::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: SyncMode) {
        self.0.store(value as u8, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_roundtrips_through_atomic_cell() {
        let cell = AtomicWaveform::new(Waveform::Sine);
        assert_eq!(cell.load(), Waveform::Sine);
        cell.store(Waveform::Square);
        assert_eq!(cell.load(), Waveform::Square);
    }

    #[test]
    fn sync_mode_roundtrips_through_atomic_cell() {
        let cell = AtomicSyncMode::new(SyncMode::PerVoice);
        assert_eq!(cell.load(), SyncMode::PerVoice);
        cell.store(SyncMode::Shared);
        assert_eq!(cell.load(), SyncMode::Shared);
    }

    #[test]
    fn waveform_shapes_at_known_phases() {
        use std::f32::consts::PI;
        assert!((Waveform::Sine.eval(PI / 2.0) - 1.0).abs() < 1e-5);
        assert!((Waveform::Saw.eval(0.0) - (-1.0)).abs() < 1e-5);
        assert!((Waveform::InvSaw.eval(0.0) - 1.0).abs() < 1e-5);
        assert_eq!(Waveform::Square.eval(0.0), 1.0);
        assert_eq!(Waveform::Square.eval(PI + 0.001), -1.0);
        assert!((Waveform::Triangle.eval(0.0) - 1.0).abs() < 1e-5);
    }
}
