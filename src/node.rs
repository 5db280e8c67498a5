//! The [`Node`] trait: the uniform surface every DSP node presents to the
//! graph and the renderer.
//!
//! Node variants are a closed set (`Oscillator`, `Lfo`, `Filter`) modeled as
//! a trait object (`Arc<dyn Node>`) rather than an enum, following the
//! teacher crate's `AudioNode` trait-object approach. `Arc` (rather than the
//! teacher's `Box`) is used because node handles are cloned across the
//! script boundary and into the renderer's published snapshot; a node's
//! address must stay stable for the lifetime described in the concurrency
//! contract.

use std::any::Any;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;

use crate::param::{AtomicSyncMode, SyncMode};

/// Stable identity of a node within a [`crate::graph::Graph`].
///
/// Indices are reused after `removeNode`, so a `NodeId` is only meaningful
/// relative to a particular graph generation — holding one past a
/// `removeNode` call on that id is a logic error, not a memory-safety one.
pub type NodeId = usize;

/// Every processing element in the graph implements this trait.
///
/// `update()` is called once per sample, in topological order, by the
/// realtime thread. Implementations must not allocate or block.
pub trait Node: Any + Send + Sync {
    /// Advance internal state by one sample and publish a new `out` value.
    fn update(&self);

    /// The node's current output, written by the last `update()` call.
    fn out(&self) -> f32;

    /// Whether this node currently contributes to the output mix.
    fn sinked(&self) -> bool;

    /// Flip the sink flag. Used by the `play()` host operation.
    fn set_sinked(&self, value: bool);

    /// Whether this node is realized per-voice or shared across voices of
    /// the same template. Irrelevant for nodes created directly from the
    /// script host (outside any voice template), where it defaults to
    /// `PerVoice`.
    fn sync_mode(&self) -> SyncMode;

    /// Stamp the node's sync mode. Called by `VoiceManager::instantiate_nodes`
    /// right after construction so a node built from a `Shared` `NodeSpec`
    /// actually reports `Shared`; nodes created directly by the script host
    /// never call this and keep the `PerVoice` default.
    fn set_sync_mode(&self, value: SyncMode);

    /// A clone of the shared atomic backing this node's `out` value.
    ///
    /// `EffectNode::addInput` and similar wiring operations need a stable,
    /// independently-owned handle to another node's output rather than a
    /// borrow, since the upstream node may outlive the borrow's scope from
    /// the script host's point of view (it is only ever dropped when the
    /// graph drops its own `Arc<dyn Node>`).
    fn out_ptr(&self) -> Arc<AtomicF32>;

    /// Support downcasting a `&dyn Node` back to its concrete type, needed
    /// by `ParamBinding` resolution in the voice subsystem.
    fn as_any(&self) -> &dyn Any;
}

/// Shared building block: the `out` and `sinked` atomics every node carries,
/// plus the node's fixed sync mode.
///
/// Concrete node types embed a `NodeBase` and delegate the common `Node`
/// methods to it, the way the original C++ `Node` base class held `out` and
/// `sinked` for every derived node.
#[derive(Debug)]
pub struct NodeBase {
    out: Arc<AtomicF32>,
    sinked: AtomicBool,
    sync_mode: AtomicSyncMode,
}

impl NodeBase {
    pub fn new(sync_mode: SyncMode) -> Self {
        Self {
            out: Arc::new(AtomicF32::new(0.0)),
            sinked: AtomicBool::new(false),
            sync_mode: AtomicSyncMode::new(sync_mode),
        }
    }

    pub fn out(&self) -> f32 {
        self.out.load(Ordering::Relaxed)
    }

    pub fn out_ptr(&self) -> Arc<AtomicF32> {
        self.out.clone()
    }

    pub fn publish(&self, value: f32) {
        self.out.store(value, Ordering::Relaxed);
    }

    pub fn sinked(&self) -> bool {
        self.sinked.load(Ordering::Relaxed)
    }

    pub fn set_sinked(&self, value: bool) {
        self.sinked.store(value, Ordering::Relaxed);
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode.load()
    }

    pub fn set_sync_mode(&self, value: SyncMode) {
        self.sync_mode.store(value);
    }
}

/// A `Cell<T>` that is only ever touched by the realtime thread, wrapped so
/// it can live inside a `Node` that is otherwise shared via `Arc` across
/// threads.
///
/// This is the same pattern the teacher crate uses for `GraphCell` in
/// `main.rs` ("each instance is only accessed by one thread at a time"):
/// the type is `Sync` by assertion, not by construction, because nothing
/// about `Cell<T>` is actually thread-safe. Every field stored in an
/// `RtCell` here (biquad filter history) is written and read exclusively
/// from inside `update()`, which only the realtime thread ever calls.
#[derive(Debug)]
pub struct RtCell<T>(Cell<T>);

// SAFETY: callers only ever read/write an `RtCell`'s contents from within
// `Node::update()`, which the contract guarantees is invoked by a single
// realtime thread. No other thread accesses these fields.
unsafe impl<T> Sync for RtCell<T> {}

impl<T: Copy> RtCell<T> {
    pub fn new(value: T) -> Self {
        Self(Cell::new(value))
    }

    pub fn get(&self) -> T {
        self.0.get()
    }

    pub fn set(&self, value: T) {
        self.0.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_base_tracks_out_and_sinked() {
        let base = NodeBase::new(SyncMode::PerVoice);
        assert_eq!(base.out(), 0.0);
        assert!(!base.sinked());

        base.publish(0.5);
        base.set_sinked(true);

        assert_eq!(base.out(), 0.5);
        assert!(base.sinked());
        assert_eq!(base.sync_mode(), SyncMode::PerVoice);
        assert_eq!(base.out_ptr().load(Ordering::Relaxed), 0.5);
    }

    #[test]
    fn rt_cell_reads_back_last_write() {
        let cell = RtCell::new(0.0_f32);
        cell.set(1.25);
        assert_eq!(cell.get(), 1.25);
    }
}
