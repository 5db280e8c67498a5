//! Scenario: an LFO attached to an oscillator's `amp` parameter should track
//! the closed-form envelope `base + ampLfo * wave(phase)` within 1e-3 at
//! every sample, and the oscillator's instantaneous output should never
//! exceed that envelope.

use std::f32::consts::PI;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use patchline::graph::Graph;
use patchline::node::Node;
use patchline::nodes::lfo::Lfo;
use patchline::nodes::oscillator::Oscillator;
use patchline::param::Waveform;
use patchline::SAMPLE_RATE;

#[test]
fn lfo_modulated_amplitude_tracks_closed_form_envelope() {
    let mut graph = Graph::new();

    let osc = Arc::new(Oscillator::new(1.0, 2_000.0, Waveform::Sine));
    let lfo = Arc::new(Lfo::new(0.5, 0.5, 2.0, 0.0, Waveform::Sine));
    lfo.add_target(osc.amp.clone());

    let osc_id = graph.add_node(osc.clone());
    let lfo_id = graph.add_node(lfo.clone());
    graph.add_edge(lfo_id, osc_id);
    graph.set_sinked(osc_id, true).unwrap();

    let mut expected_phase = 0.0_f32;
    for n in 0..8_192 {
        lfo.update();
        osc.update();

        expected_phase = (expected_phase + 2.0 * PI * 2.0 / SAMPLE_RATE).rem_euclid(2.0 * PI);
        let expected_envelope = 0.5 + 0.5 * expected_phase.sin();

        let amp = osc.amp.load(Ordering::Relaxed);
        assert!(
            (amp - expected_envelope).abs() < 1e-3,
            "frame {n}: amp {amp}, expected {expected_envelope}"
        );
        assert!(
            osc.out().abs() <= expected_envelope + 1e-3,
            "frame {n}: |out| {} exceeds envelope {expected_envelope}",
            osc.out().abs()
        );
    }
}

#[test]
fn lfo_drives_two_independent_oscillators_to_the_same_envelope() {
    let mut graph = Graph::new();

    let osc_a = Arc::new(Oscillator::new(1.0, 300.0, Waveform::Saw));
    let osc_b = Arc::new(Oscillator::new(1.0, 900.0, Waveform::Square));
    let lfo = Arc::new(Lfo::new(0.0, 1.0, 3.0, 0.0, Waveform::Triangle));
    lfo.add_target(osc_a.amp.clone());
    lfo.add_target(osc_b.amp.clone());

    let a_id = graph.add_node(osc_a.clone());
    let b_id = graph.add_node(osc_b.clone());
    let lfo_id = graph.add_node(lfo.clone());
    graph.add_edge(lfo_id, a_id);
    graph.add_edge(lfo_id, b_id);
    graph.sort().unwrap();

    for _ in 0..1_000 {
        lfo.update();
        osc_a.update();
        osc_b.update();
        assert_eq!(
            osc_a.amp.load(Ordering::Relaxed),
            osc_b.amp.load(Ordering::Relaxed)
        );
    }
}
