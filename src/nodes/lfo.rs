//! Low-frequency control oscillator that fans its output out to other
//! nodes' parameters.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;

use crate::node::{Node, NodeBase};
use crate::nodes::control::ControlTargets;
use crate::param::{AtomicWaveform, SyncMode, Waveform};
use crate::SAMPLE_RATE;

/// `out = base + amp * wave(phase + shift)`, additionally written into
/// every target registered via [`Lfo::add_target`].
#[derive(Debug)]
pub struct Lfo {
    base: NodeBase,
    pub lfo_base: Arc<AtomicF32>,
    pub amp: Arc<AtomicF32>,
    pub freq: Arc<AtomicF32>,
    pub shift: Arc<AtomicF32>,
    phase: AtomicF32,
    pub waveform: Arc<AtomicWaveform>,
    targets: ControlTargets,
}

impl Lfo {
    pub fn new(base: f32, amp: f32, freq: f32, shift: f32, waveform: Waveform) -> Self {
        Self {
            base: NodeBase::new(SyncMode::PerVoice),
            lfo_base: Arc::new(AtomicF32::new(base)),
            amp: Arc::new(AtomicF32::new(amp)),
            freq: Arc::new(AtomicF32::new(freq)),
            shift: Arc::new(AtomicF32::new(shift)),
            phase: AtomicF32::new(0.0),
            waveform: Arc::new(AtomicWaveform::new(waveform)),
            targets: ControlTargets::new(),
        }
    }

    /// Register a target parameter. Each subsequent `update()` overwrites it.
    pub fn add_target(&self, target: Arc<AtomicF32>) {
        self.targets.add_target(target);
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new(0.0, 1.0, 5.0, 0.0, Waveform::Sine)
    }
}

impl Node for Lfo {
    fn update(&self) {
        use std::f32::consts::PI;

        let lfo_base = self.lfo_base.load(Ordering::Relaxed);
        let amp = self.amp.load(Ordering::Relaxed);
        let freq = self.freq.load(Ordering::Relaxed);
        let shift = self.shift.load(Ordering::Relaxed);
        let waveform = self.waveform.load();

        let phase = (self.phase.load(Ordering::Relaxed) + 2.0 * PI * freq / SAMPLE_RATE)
            .rem_euclid(2.0 * PI);
        self.phase.store(phase, Ordering::Relaxed);

        let value = lfo_base + amp * waveform.eval((phase + shift).rem_euclid(2.0 * PI));
        self.base.publish(value);
        self.targets.write_all(value);
    }

    fn out(&self) -> f32 {
        self.base.out()
    }

    fn sinked(&self) -> bool {
        self.base.sinked()
    }

    fn set_sinked(&self, value: bool) {
        self.base.set_sinked(value);
    }

    fn sync_mode(&self) -> SyncMode {
        self.base.sync_mode()
    }

    fn set_sync_mode(&self, value: SyncMode) {
        self.base.set_sync_mode(value);
    }

    fn out_ptr(&self) -> Arc<AtomicF32> {
        self.base.out_ptr()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_every_registered_target_each_sample() {
        let lfo = Lfo::new(0.5, 0.5, 1.0, 0.0, Waveform::Sine);
        let target_a = Arc::new(AtomicF32::new(0.0));
        let target_b = Arc::new(AtomicF32::new(0.0));
        lfo.add_target(target_a.clone());
        lfo.add_target(target_b.clone());

        lfo.update();

        assert_eq!(lfo.out(), target_a.load(Ordering::Relaxed));
        assert_eq!(lfo.out(), target_b.load(Ordering::Relaxed));
    }

    #[test]
    fn output_tracks_base_plus_amp_times_wave_shape() {
        let lfo = Lfo::new(0.5, 0.5, 1.0, 0.0, Waveform::Sine);
        for _ in 0..100 {
            lfo.update();
            assert!(lfo.out() >= 0.0 - 1e-5 && lfo.out() <= 1.0 + 1e-5);
        }
    }
}
