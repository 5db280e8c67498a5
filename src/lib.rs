//! Patchline: a live-coded modular audio synthesizer core.
//!
//! A user authors patches in an embedded Lua layer ([`script`]); patches
//! instantiate oscillators, LFOs, and filters ([`nodes`]) onto a
//! [`graph::Graph`], optionally through a [`voice::VoiceManager`] template,
//! and a [`renderer::Renderer`] renders the result to the default output
//! device in realtime.
//!
//! # Concurrency contract
//!
//! Exactly two threads touch this core at audio time: the *realtime
//! thread*, entered only through the device callback, which must not
//! allocate, lock, or call into the script host; and the *control thread*,
//! driven by the script host and the file watcher, which performs every
//! graph and voice mutation. A third *watcher thread* only reads file
//! metadata and signals the control thread — it never touches the graph,
//! the script engine, or the audio device.
//!
//! `topoOrder`, `sinkedNodes`, and the node table are published from the
//! control thread to the realtime thread as a single [`graph::GraphSnapshot`]
//! behind an `arc_swap::ArcSwap`, so one `load()` per device callback sees a
//! consistent view for every frame in that callback. Every per-sample
//! scalar on a node (`out`, `sinked`, `syncMode`, parameters) is an atomic
//! accessed with `Ordering::Relaxed` from either thread — one-sample
//! staleness is tolerated in exchange for the realtime thread never
//! blocking.

pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod param;
pub mod pattern;
pub mod renderer;
pub mod script;
pub mod voice;
pub mod watcher;

/// Device sample rate, as encoded in the original source (`DEVICE_SAMPLE_RATE`).
pub const SAMPLE_RATE: f32 = 44_800.0;

/// Output channel count: a mono signal duplicated across left/right.
pub const CHANNELS: usize = 2;
