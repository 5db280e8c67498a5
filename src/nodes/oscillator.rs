//! Audio-rate oscillator.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;

use crate::node::{Node, NodeBase};
use crate::param::{AtomicWaveform, SyncMode, Waveform};
use crate::SAMPLE_RATE;

/// Sine/saw/square/triangle oscillator.
///
/// `out = amp * wave(phase)`, where `phase` advances by `2*PI*freq/SR` each
/// sample and wraps into `[0, 2*PI)`.
#[derive(Debug)]
pub struct Oscillator {
    base: NodeBase,
    pub amp: Arc<AtomicF32>,
    pub freq: Arc<AtomicF32>,
    phase: AtomicF32,
    pub waveform: Arc<AtomicWaveform>,
}

impl Oscillator {
    pub fn new(amp: f32, freq: f32, waveform: Waveform) -> Self {
        Self {
            base: NodeBase::new(SyncMode::PerVoice),
            amp: Arc::new(AtomicF32::new(amp)),
            freq: Arc::new(AtomicF32::new(freq)),
            phase: AtomicF32::new(0.0),
            waveform: Arc::new(AtomicWaveform::new(waveform)),
        }
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new(1.0, 440.0, Waveform::Sine)
    }
}

impl Node for Oscillator {
    fn update(&self) {
        use std::f32::consts::PI;

        let amp = self.amp.load(Ordering::Relaxed);
        let freq = self.freq.load(Ordering::Relaxed);
        let waveform = self.waveform.load();

        let phase = (self.phase.load(Ordering::Relaxed) + 2.0 * PI * freq / SAMPLE_RATE)
            .rem_euclid(2.0 * PI);
        self.phase.store(phase, Ordering::Relaxed);

        self.base.publish(amp * waveform.eval(phase));
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
    use approx::assert_relative_eq;

    #[test]
    fn sine_tone_matches_closed_form() {
        let osc = Oscillator::new(0.5, 220.0, Waveform::Sine);
        let mut expected_phase = 0.0_f32;
        for _ in 0..1000 {
            osc.update();
            expected_phase += 2.0 * std::f32::consts::PI * 220.0 / SAMPLE_RATE;
            let expected = 0.5 * expected_phase.sin();
            assert_relative_eq!(osc.out(), expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn waveform_can_be_switched_at_runtime() {
        let osc = Oscillator::new(1.0, 100.0, Waveform::Square);
        osc.update();
        assert_eq!(osc.out(), 1.0);
        osc.waveform.store(Waveform::Saw);
        // Saw's shape differs from square's at the same phase once advanced.
        osc.update();
        assert_ne!(osc.out(), 1.0);
    }
}
