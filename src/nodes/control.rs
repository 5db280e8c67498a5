//! `ControlTargets`: the target-list building block shared by every
//! `ControlNode` (currently just [`crate::nodes::lfo::Lfo`]).

use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF32;

/// A lock-free list of parameter atomics a control node writes into on
/// every `update()`.
///
/// Mutation (`add_target`) happens on the control thread; reads
/// (`for_each`) happen on the realtime thread inside `update()`. Using
/// `ArcSwap` instead of a `Mutex` means the realtime thread never blocks,
/// even if the control thread is mid-mutation — it simply sees the target
/// list from just before or just after the swap.
#[derive(Debug, Default)]
pub struct ControlTargets {
    targets: ArcSwap<Vec<Arc<AtomicF32>>>,
}

impl ControlTargets {
    pub fn new() -> Self {
        Self {
            targets: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a new target atomic. Appends to a fresh copy of the list
    /// and swaps it in; existing readers keep using the old list until
    /// their current `update()` call finishes.
    pub fn add_target(&self, target: Arc<AtomicF32>) {
        let mut updated = (**self.targets.load()).clone();
        updated.push(target);
        self.targets.store(Arc::new(updated));
    }

    /// Write `value` (relaxed ordering) into every registered target.
    pub fn write_all(&self, value: f32) {
        for target in self.targets.load().iter() {
            target.store(value, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.targets.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_target_then_write_all_updates_every_target() {
        let targets = ControlTargets::new();
        let a = Arc::new(AtomicF32::new(0.0));
        let b = Arc::new(AtomicF32::new(0.0));
        targets.add_target(a.clone());
        targets.add_target(b.clone());
        assert_eq!(targets.len(), 2);

        targets.write_all(0.75);

        assert_eq!(a.load(std::sync::atomic::Ordering::Relaxed), 0.75);
        assert_eq!(b.load(std::sync::atomic::Ordering::Relaxed), 0.75);
    }
}
