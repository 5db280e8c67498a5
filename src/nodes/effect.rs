//! `EffectInputs`: the input-list building block shared by every
//! `EffectNode` (currently just [`crate::nodes::filter::Filter`]).

use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF32;

/// A lock-free list of upstream `out` atomics an effect node sums on every
/// `update()`. Mirrors [`crate::nodes::control::ControlTargets`]'s
/// lock-free-swap shape, just for the opposite data direction (reading
/// inputs rather than writing targets).
#[derive(Debug, Default)]
pub struct EffectInputs {
    inputs: ArcSwap<Vec<Arc<AtomicF32>>>,
}

impl EffectInputs {
    pub fn new() -> Self {
        Self {
            inputs: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add_input(&self, input: Arc<AtomicF32>) {
        let mut updated = (**self.inputs.load()).clone();
        updated.push(input);
        self.inputs.store(Arc::new(updated));
    }

    /// Sum every registered input's current `out` value (relaxed ordering).
    pub fn sum(&self) -> f32 {
        self.inputs
            .load()
            .iter()
            .map(|input| input.load(std::sync::atomic::Ordering::Relaxed))
            .sum()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inputs.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_adds_every_registered_input() {
        let inputs = EffectInputs::new();
        inputs.add_input(Arc::new(AtomicF32::new(0.3)));
        inputs.add_input(Arc::new(AtomicF32::new(0.4)));
        assert_eq!(inputs.len(), 2);
        assert!((inputs.sum() - 0.7).abs() < 1e-6);
    }
}
