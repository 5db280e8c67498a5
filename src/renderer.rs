//! Per-frame topological evaluation and sink mixing.
//!
//! Grounded in the teacher's `LiveSession`/`Mixer` audio-callback bodies
//! (`.teacher_ref/live.rs`, `.teacher_ref/audio.rs`): a renderer that holds
//! a lock-free handle onto published state and fills an interleaved buffer
//! one frame at a time, never allocating or blocking inside the callback.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::graph::GraphSnapshot;
use crate::CHANNELS;

/// Renders audio from a graph's published [`GraphSnapshot`].
///
/// Holds only an `Arc<ArcSwap<GraphSnapshot>>` — a cheap, `Send + Sync`
/// handle independent of the [`crate::graph::Graph`] itself, which lives on
/// the control thread. This is what the device callback captures by move.
pub struct Renderer {
    snapshot: Arc<ArcSwap<GraphSnapshot>>,
}

impl Renderer {
    pub fn new(snapshot: Arc<ArcSwap<GraphSnapshot>>) -> Self {
        Self { snapshot }
    }

    /// Fill an interleaved buffer of `frame_count` stereo frames.
    ///
    /// `buffer.len()` must be `frame_count * CHANNELS`. Loads the snapshot
    /// once per call (not per frame), so every frame in this callback sees
    /// the same `topoOrder`/`sinkedNodes`, satisfying the ordering
    /// guarantee in the concurrency contract.
    pub fn render(&self, buffer: &mut [f32], frame_count: usize) {
        debug_assert_eq!(buffer.len(), frame_count * CHANNELS);

        let snapshot = self.snapshot.load();

        for frame in 0..frame_count {
            for &id in snapshot.topo_order.iter() {
                if let Some(node) = &snapshot.nodes[id] {
                    node.update();
                }
            }

            let mut sample = 0.0_f32;
            for &id in snapshot.sinked_nodes.iter() {
                if let Some(node) = snapshot.nodes.get(id).and_then(|slot| slot.as_ref()) {
                    sample += node.out();
                }
            }

            let base = frame * CHANNELS;
            for channel in 0..CHANNELS {
                buffer[base + channel] = sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::nodes::filter::Filter;
    use crate::nodes::oscillator::Oscillator;
    use crate::param::Waveform;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn single_sine_tone_matches_closed_form() {
        let mut graph = Graph::new();
        let osc_id = graph.add_node(Arc::new(Oscillator::new(0.5, 220.0, Waveform::Sine)));
        graph.set_sinked(osc_id, true).unwrap();

        let renderer = Renderer::new(graph.snapshot_handle());

        let frame_count = 256;
        let mut buffer = vec![0.0_f32; frame_count * CHANNELS];
        renderer.render(&mut buffer, frame_count);

        let mut phase = 0.0_f32;
        for n in 0..frame_count {
            phase += 2.0 * PI * 220.0 / crate::SAMPLE_RATE;
            let expected = 0.5 * phase.sin();
            assert_relative_eq!(buffer[n * CHANNELS], expected, epsilon = 1e-4);
            assert_eq!(buffer[n * CHANNELS], buffer[n * CHANNELS + 1]);
        }
    }

    #[test]
    fn empty_sink_set_renders_silence() {
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Oscillator::new(1.0, 440.0, Waveform::Sine)));
        graph.sort().unwrap();

        let renderer = Renderer::new(graph.snapshot_handle());
        let mut buffer = vec![1.0_f32; 64 * CHANNELS];
        renderer.render(&mut buffer, 64);

        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn oscillator_through_filter_reduces_energy_vs_dry() {
        let mut dry_graph = Graph::new();
        let dry_osc = dry_graph.add_node(Arc::new(Oscillator::new(1.0, 440.0, Waveform::Saw)));
        dry_graph.set_sinked(dry_osc, true).unwrap();
        let dry_renderer = Renderer::new(dry_graph.snapshot_handle());
        let mut dry_buffer = vec![0.0_f32; 4096 * CHANNELS];
        dry_renderer.render(&mut dry_buffer, 4096);

        let mut wet_graph = Graph::new();
        let osc = Arc::new(Oscillator::new(1.0, 440.0, Waveform::Saw));
        let filter = Arc::new(Filter::new(500.0, 1.0));
        filter.add_input(osc.out_ptr());
        let osc_id = wet_graph.add_node(osc);
        let filter_id = wet_graph.add_node(filter);
        wet_graph.add_edge(osc_id, filter_id);
        wet_graph.set_sinked(filter_id, true).unwrap();
        let wet_renderer = Renderer::new(wet_graph.snapshot_handle());
        let mut wet_buffer = vec![0.0_f32; 4096 * CHANNELS];
        wet_renderer.render(&mut wet_buffer, 4096);

        let rms = |buf: &[f32]| -> f64 {
            let sum_sq: f64 = buf.iter().step_by(CHANNELS).map(|&s| (s as f64).powi(2)).sum();
            (sum_sq / (buf.len() / CHANNELS) as f64).sqrt()
        };

        assert!(rms(&wet_buffer) < rms(&dry_buffer));
    }
}
