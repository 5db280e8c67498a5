//! Biquad low-pass filter.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;

use crate::node::{Node, NodeBase, RtCell};
use crate::nodes::effect::EffectInputs;
use crate::param::SyncMode;
use crate::SAMPLE_RATE;

/// Direct-form-I biquad low-pass filter.
///
/// Coefficients are recomputed from `cutoff`/`q` on every sample rather than
/// cached on parameter change — simple and correct, as the contract
/// prescribes; a production filter would cache them and invalidate on
/// write.
#[derive(Debug)]
pub struct Filter {
    base: NodeBase,
    pub cutoff: Arc<AtomicF32>,
    pub q: Arc<AtomicF32>,
    inputs: EffectInputs,
    x1: RtCell<f32>,
    x2: RtCell<f32>,
    y1: RtCell<f32>,
    y2: RtCell<f32>,
}

impl Filter {
    pub fn new(cutoff: f32, q: f32) -> Self {
        Self {
            base: NodeBase::new(SyncMode::PerVoice),
            cutoff: Arc::new(AtomicF32::new(cutoff)),
            q: Arc::new(AtomicF32::new(q)),
            inputs: EffectInputs::new(),
            x1: RtCell::new(0.0),
            x2: RtCell::new(0.0),
            y1: RtCell::new(0.0),
            y2: RtCell::new(0.0),
        }
    }

    /// Register an upstream `out` atomic to sum as this filter's input.
    pub fn add_input(&self, input: Arc<AtomicF32>) {
        self.inputs.add_input(input);
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new(500.0, 1.0)
    }
}

impl Node for Filter {
    fn update(&self) {
        use std::f32::consts::PI;

        let cutoff = self.cutoff.load(Ordering::Relaxed).max(1.0);
        let q = self.q.load(Ordering::Relaxed).max(0.01);

        let omega = 2.0 * PI * cutoff / SAMPLE_RATE;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        let x0 = self.inputs.sum();
        let x1 = self.x1.get();
        let x2 = self.x2.get();
        let y1 = self.y1.get();
        let y2 = self.y2.get();

        let y0 = (b0 / a0) * x0 + (b1 / a0) * x1 + (b2 / a0) * x2
            - (a1 / a0) * y1
            - (a2 / a0) * y2;

        self.x2.set(x1);
        self.x1.set(x0);
        self.y2.set(y1);
        self.y1.set(y0);

        self.base.publish(y0);
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
    use crate::nodes::oscillator::Oscillator;
    use crate::param::Waveform;

    #[test]
    fn lowpass_reduces_rms_of_a_sawtooth() {
        let osc = Oscillator::new(1.0, 440.0, Waveform::Saw);
        let filter = Filter::new(500.0, 1.0);
        filter.add_input(osc.out_ptr());

        let mut filtered_sq_sum = 0.0_f64;
        let mut dry_sq_sum = 0.0_f64;
        for _ in 0..4096 {
            osc.update();
            filter.update();
            filtered_sq_sum += (filter.out() as f64).powi(2);
            dry_sq_sum += (osc.out() as f64).powi(2);
        }

        let filtered_rms = (filtered_sq_sum / 4096.0).sqrt();
        let dry_rms = (dry_sq_sum / 4096.0).sqrt();
        assert!(
            filtered_rms < dry_rms,
            "filtered RMS {filtered_rms} should be less than dry RMS {dry_rms}"
        );
    }
}
