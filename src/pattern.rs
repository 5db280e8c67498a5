//! Event/pattern subsystem stub.
//!
//! The original source sketches a `PatternEngine` with a timestamped event
//! queue (`NoteOn`, `NoteOff`, `SetParam`, `KillAll`) but never wires it up
//! to anything — no caller constructs one, no compiler stage emits events
//! into it. This module keeps the types real (backed by an actual SPSC
//! ring buffer rather than a `Vec` stand-in) so they type-check and are
//! exercised by unit tests, without claiming the renderer drains them.

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::node::NodeId;

/// A pattern-engine event, timestamped in samples from some epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Spawn a voice from a template, or reset a synced node.
    NoteOn {
        template_id: usize,
        pitch: f32,
        velocity: f32,
    },
    /// Release a previously spawned voice.
    NoteOff { voice_id: usize },
    /// Push a value into a voice's parameter binding.
    SetParam {
        voice_id: usize,
        param_id: usize,
        value: f32,
    },
    /// Emergency stop: free every active voice.
    KillAll,
}

/// A timestamped event as it sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub ts_samples: u64,
    pub event: Event,
}

/// Single-producer/single-consumer event queue, split into a producer half
/// (control thread) and a consumer half (realtime thread), mirroring the
/// teacher's `ringbuf::HeapRb` usage for its own audio streaming buffer.
///
/// The contract (§9 Design Notes) only requires that *if* implemented, a
/// pattern engine drains this before each frame using lock-free primitives
/// and touches only atomic params and voice-manager slot state. Nothing in
/// this crate currently calls `drain`; the renderer does not consume events.
pub struct EventQueue {
    producer: HeapProd<TimedEvent>,
    consumer: HeapCons<TimedEvent>,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::new(capacity).split();
        Self { producer, consumer }
    }

    /// Push an event; returns it back if the queue is full.
    pub fn push(&mut self, event: TimedEvent) -> Result<(), TimedEvent> {
        self.producer.try_push(event)
    }

    /// Drain every currently-queued event, invoking `f` on each in FIFO
    /// order. Intended to be called once per frame by a realtime consumer.
    pub fn drain(&mut self, mut f: impl FnMut(TimedEvent)) {
        while let Some(event) = self.consumer.try_pop() {
            f(event);
        }
    }
}

/// Not yet functional: the cue-name-to-template lookup the original source
/// sketches on `PatternEngine` alongside the event queue.
#[derive(Debug, Default)]
pub struct PatternEngine {
    cue_map: std::collections::HashMap<String, NodeId>,
    events: Option<EventQueue>,
}

impl PatternEngine {
    pub fn new() -> Self {
        Self {
            cue_map: std::collections::HashMap::new(),
            events: None,
        }
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            cue_map: std::collections::HashMap::new(),
            events: Some(EventQueue::with_capacity(capacity)),
        }
    }

    pub fn register_cue(&mut self, name: impl Into<String>, node_id: NodeId) {
        self.cue_map.insert(name.into(), node_id);
    }

    pub fn cue(&self, name: &str) -> Option<NodeId> {
        self.cue_map.get(name).copied()
    }

    pub fn events_mut(&mut self) -> Option<&mut EventQueue> {
        self.events.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_fifo_order() {
        let mut queue = EventQueue::with_capacity(4);
        queue
            .push(TimedEvent {
                ts_samples: 0,
                event: Event::KillAll,
            })
            .unwrap();
        queue
            .push(TimedEvent {
                ts_samples: 10,
                event: Event::NoteOff { voice_id: 2 },
            })
            .unwrap();

        let mut seen = Vec::new();
        queue.drain(|e| seen.push(e));

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event, Event::KillAll);
        assert_eq!(seen[1].event, Event::NoteOff { voice_id: 2 });
    }

    #[test]
    fn push_fails_once_capacity_is_exhausted() {
        let mut queue = EventQueue::with_capacity(1);
        queue
            .push(TimedEvent {
                ts_samples: 0,
                event: Event::KillAll,
            })
            .unwrap();
        let overflow = queue.push(TimedEvent {
            ts_samples: 1,
            event: Event::KillAll,
        });
        assert!(overflow.is_err());
    }

    #[test]
    fn pattern_engine_resolves_registered_cues() {
        let mut pe = PatternEngine::new();
        pe.register_cue("kick", 3);
        assert_eq!(pe.cue("kick"), Some(3));
        assert_eq!(pe.cue("snare"), None);
    }
}
