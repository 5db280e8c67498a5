//! Voice templates, instantiation, and the voice manager.
//!
//! Grounded directly in the original source's `voice.h`/`voice.cpp`
//! (`VoiceTemplate`, `VoiceInstance`, `VoiceManager::instantiateNodes`,
//! `allocateVoice`, `freeVoice`), reworked from the C++ `-1`-sentinel /
//! `unique_ptr` ownership style into `Option<NodeId>` and an arena of
//! `Option<VoiceInstance>` slots, matching this crate's own `Graph` arena
//! (`src/graph.rs`).

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;

use crate::error::VoiceError;
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::nodes::filter::Filter;
use crate::nodes::lfo::Lfo;
use crate::nodes::oscillator::Oscillator;
use crate::param::{AtomicWaveform, SyncMode};

/// Which scalar a [`ParamSpec`]/[`ParamBinding`] names, matching §4.4's
/// `OscFreq/OscAmp/OscWaveform/Lfo*/Filter*` resolution table exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    OscFreq,
    OscAmp,
    OscWaveform,
    LfoBase,
    LfoAmp,
    LfoFreq,
    LfoShift,
    LfoWaveform,
    FilterCutoff,
    FilterQ,
}

/// One node slot in a [`VoiceTemplate`]: how to build it, and whether a
/// fresh copy is made per voice or a single instance is shared across every
/// voice derived from the template.
pub struct NodeSpec {
    pub sync_mode: SyncMode,
    pub factory: Arc<dyn Fn() -> Arc<dyn Node> + Send + Sync>,
}

impl NodeSpec {
    pub fn per_voice(factory: impl Fn() -> Arc<dyn Node> + Send + Sync + 'static) -> Self {
        Self {
            sync_mode: SyncMode::PerVoice,
            factory: Arc::new(factory),
        }
    }

    pub fn shared(factory: impl Fn() -> Arc<dyn Node> + Send + Sync + 'static) -> Self {
        Self {
            sync_mode: SyncMode::Shared,
            factory: Arc::new(factory),
        }
    }
}

/// An edge between two template-local node indices.
#[derive(Debug, Clone, Copy)]
pub struct EdgeSpec {
    pub parent_idx: usize,
    pub child_idx: usize,
}

/// Exposes one of a template-local node's parameters at a dense `param_id`.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub node_idx: usize,
    pub param_id: usize,
}

/// A tagged pointer to the atomic a [`ParamSpec`] resolved to, once a
/// template has been instantiated into real graph nodes.
#[derive(Clone)]
pub enum ParamBinding {
    Float(Arc<AtomicF32>),
    Waveform(Arc<AtomicWaveform>),
}

impl ParamBinding {
    /// Write `value` into the bound atomic with relaxed ordering. A no-op
    /// type mismatch (float value against a waveform binding) is rejected
    /// at `instantiate_params` time, not here, so this never needs to fail.
    pub fn set_scalar(&self, value: f32) {
        if let ParamBinding::Float(atomic) = self {
            atomic.store(value, Ordering::Relaxed);
        }
    }

    pub fn set_waveform(&self, value: crate::param::Waveform) {
        if let ParamBinding::Waveform(atomic) = self {
            atomic.store(value);
        }
    }
}

/// A blueprint for a sub-graph: node specs, template-local edges, and a
/// dense parameter surface built from them on `register_template`.
#[derive(Default)]
pub struct VoiceTemplate {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    pub params: Vec<ParamSpec>,
}

impl VoiceTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    pub fn with_edge(mut self, parent_idx: usize, child_idx: usize) -> Self {
        self.edges.push(EdgeSpec {
            parent_idx,
            child_idx,
        });
        self
    }

    pub fn with_param(mut self, kind: ParamKind, node_idx: usize) -> Self {
        let param_id = self.params.len();
        self.params.push(ParamSpec {
            kind,
            node_idx,
            param_id,
        });
        self
    }
}

/// Whether a realized voice is still sounding, fading, or fully retired.
/// Nothing in this crate transitions a voice to `Releasing` yet — the
/// distilled core only models `Active`/`Inactive` — but the state is kept
/// three-valued so a future envelope/release stage has somewhere to put it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Active,
    Releasing,
    Inactive,
}

/// A realized [`VoiceTemplate`]: the graph ids of its nodes (in
/// template-local order) and its resolved parameter bindings.
pub struct VoiceInstance {
    pub voice_id: usize,
    pub template_id: usize,
    pub node_ids: Vec<NodeId>,
    pub param_bindings: Vec<ParamBinding>,
    pub state: VoiceState,
}

/// Owns registered templates, a fixed-capacity instance arena, and the
/// per-template memoization table of realized shared-node ids.
pub struct VoiceManager {
    templates: Vec<VoiceTemplate>,
    shared_node_ids: Vec<Vec<Option<NodeId>>>,
    instances: Vec<Option<VoiceInstance>>,
    free_voice_ids: VecDeque<usize>,
    max_voices: usize,
}

impl VoiceManager {
    pub fn new(max_voices: usize) -> Self {
        Self {
            templates: Vec::new(),
            shared_node_ids: Vec::new(),
            instances: (0..max_voices).map(|_| None).collect(),
            free_voice_ids: (0..max_voices).collect(),
            max_voices,
        }
    }

    /// Append `template`, pushing a fresh `-1`-filled shared-node row the
    /// size of its node list.
    pub fn register_template(&mut self, template: VoiceTemplate) -> usize {
        let id = self.templates.len();
        self.shared_node_ids.push(vec![None; template.nodes.len()]);
        self.templates.push(template);
        id
    }

    pub fn template(&self, template_id: usize) -> Result<&VoiceTemplate, VoiceError> {
        self.templates
            .get(template_id)
            .ok_or(VoiceError::InvalidTemplate(template_id))
    }

    /// Realize every `NodeSpec` in the template, wire its declared edges,
    /// and re-sort the graph. `Shared` nodes are created once per template
    /// and reused from `shared_node_ids` on every subsequent call.
    pub fn instantiate_nodes(
        &mut self,
        graph: &mut Graph,
        template_id: usize,
    ) -> Result<Vec<NodeId>, VoiceError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or(VoiceError::InvalidTemplate(template_id))?;

        let mut node_ids = Vec::with_capacity(template.nodes.len());
        for (i, spec) in template.nodes.iter().enumerate() {
            let id = match spec.sync_mode {
                SyncMode::PerVoice => {
                    let node = (spec.factory)();
                    node.set_sync_mode(SyncMode::PerVoice);
                    graph.add_node(node)
                }
                SyncMode::Shared => match self.shared_node_ids[template_id][i] {
                    Some(existing) => existing,
                    None => {
                        let node = (spec.factory)();
                        node.set_sync_mode(SyncMode::Shared);
                        let id = graph.add_node(node);
                        self.shared_node_ids[template_id][i] = Some(id);
                        id
                    }
                },
            };
            node_ids.push(id);
        }

        for edge in &template.edges {
            graph.add_edge(node_ids[edge.parent_idx], node_ids[edge.child_idx]);
        }

        graph
            .sort()
            .map_err(|_| VoiceError::InvalidTemplate(template_id))?;

        Ok(node_ids)
    }

    /// Resolve every `ParamSpec` against the realized `node_ids` into a
    /// tagged [`ParamBinding`], indexed by `param_id`.
    ///
    /// This only exposes the target atomic externally; it does not itself
    /// call `Lfo::add_target` for a `ParamSpec` whose node happens to sit
    /// downstream of a template-declared LFO edge. A template's `edges`
    /// give the graph its topology (and, for a filter, its `add_input`
    /// wiring must still be done by the caller); turning a `lfo -> osc`
    /// template edge into an actual `add_target` registration is left to
    /// the caller of `allocate_voice`, matching how the original source's
    /// own `instantiateParams` stops at resolving bindings too.
    pub fn instantiate_params(
        &self,
        graph: &Graph,
        template_id: usize,
        node_ids: &[NodeId],
    ) -> Result<Vec<ParamBinding>, VoiceError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or(VoiceError::InvalidTemplate(template_id))?;

        let mut bindings = Vec::with_capacity(template.params.len());
        for spec in &template.params {
            let node_id = *node_ids
                .get(spec.node_idx)
                .ok_or(VoiceError::InvalidParamBinding(spec.param_id))?;
            let node = graph
                .get(node_id)
                .ok_or(VoiceError::InvalidParamBinding(spec.param_id))?;

            let binding = resolve_param(node.as_any(), spec.kind)
                .ok_or(VoiceError::InvalidParamBinding(spec.param_id))?;
            bindings.push(binding);
        }
        Ok(bindings)
    }

    /// Pop a free voice slot, instantiate the template's nodes and params,
    /// and store the resulting instance.
    pub fn allocate_voice(
        &mut self,
        graph: &mut Graph,
        template_id: usize,
    ) -> Result<usize, VoiceError> {
        if template_id >= self.templates.len() {
            return Err(VoiceError::InvalidTemplate(template_id));
        }
        let voice_id = self.free_voice_ids.pop_front().ok_or(VoiceError::OutOfVoices)?;

        let node_ids = match self.instantiate_nodes(graph, template_id) {
            Ok(ids) => ids,
            Err(err) => {
                self.free_voice_ids.push_front(voice_id);
                return Err(err);
            }
        };
        let param_bindings = match self.instantiate_params(graph, template_id, &node_ids) {
            Ok(bindings) => bindings,
            Err(err) => {
                self.free_voice_ids.push_front(voice_id);
                return Err(err);
            }
        };

        self.instances[voice_id] = Some(VoiceInstance {
            voice_id,
            template_id,
            node_ids,
            param_bindings,
            state: VoiceState::Active,
        });

        Ok(voice_id)
    }

    /// Remove only this voice's `PerVoice` nodes from the graph (shared
    /// nodes persist), then release the slot.
    pub fn free_voice(&mut self, graph: &mut Graph, voice_id: usize) -> Result<(), VoiceError> {
        let instance = self
            .instances
            .get_mut(voice_id)
            .ok_or(VoiceError::InvalidVoice(voice_id))?
            .take()
            .ok_or(VoiceError::InvalidVoice(voice_id))?;

        for node_id in &instance.node_ids {
            if let Some(node) = graph.get(*node_id) {
                if node.sync_mode() == SyncMode::PerVoice {
                    let _ = graph.remove_node(*node_id);
                }
            }
        }

        self.free_voice_ids.push_back(voice_id);
        Ok(())
    }

    /// Drop every instance and reset the free-id queue. Does not garbage
    /// collect shared nodes; the contract only mandates instance release.
    pub fn free_all_voices(&mut self) {
        for slot in &mut self.instances {
            *slot = None;
        }
        self.free_voice_ids = (0..self.max_voices).collect();
    }

    pub fn instance(&self, voice_id: usize) -> Option<&VoiceInstance> {
        self.instances.get(voice_id).and_then(Option::as_ref)
    }
}

fn resolve_param(node: &dyn Any, kind: ParamKind) -> Option<ParamBinding> {
    match kind {
        ParamKind::OscFreq => node
            .downcast_ref::<Oscillator>()
            .map(|osc| ParamBinding::Float(osc.freq.clone())),
        ParamKind::OscAmp => node
            .downcast_ref::<Oscillator>()
            .map(|osc| ParamBinding::Float(osc.amp.clone())),
        ParamKind::OscWaveform => node
            .downcast_ref::<Oscillator>()
            .map(|osc| ParamBinding::Waveform(osc.waveform.clone())),
        ParamKind::LfoBase => node
            .downcast_ref::<Lfo>()
            .map(|lfo| ParamBinding::Float(lfo.lfo_base.clone())),
        ParamKind::LfoAmp => node
            .downcast_ref::<Lfo>()
            .map(|lfo| ParamBinding::Float(lfo.amp.clone())),
        ParamKind::LfoFreq => node
            .downcast_ref::<Lfo>()
            .map(|lfo| ParamBinding::Float(lfo.freq.clone())),
        ParamKind::LfoShift => node
            .downcast_ref::<Lfo>()
            .map(|lfo| ParamBinding::Float(lfo.shift.clone())),
        ParamKind::LfoWaveform => node
            .downcast_ref::<Lfo>()
            .map(|lfo| ParamBinding::Waveform(lfo.waveform.clone())),
        ParamKind::FilterCutoff => node
            .downcast_ref::<Filter>()
            .map(|filter| ParamBinding::Float(filter.cutoff.clone())),
        ParamKind::FilterQ => node
            .downcast_ref::<Filter>()
            .map(|filter| ParamBinding::Float(filter.q.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Waveform;

    fn osc_lfo_template() -> VoiceTemplate {
        VoiceTemplate::new()
            .with_node(NodeSpec::per_voice(|| {
                Arc::new(Oscillator::new(1.0, 440.0, Waveform::Sine))
            }))
            .with_node(NodeSpec::shared(|| {
                Arc::new(Lfo::new(0.5, 0.5, 1.0, 0.0, Waveform::Sine))
            }))
            .with_edge(1, 0)
            .with_param(ParamKind::OscAmp, 0)
    }

    #[test]
    fn per_voice_nodes_are_disjoint_across_voices() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(4);
        let template_id = manager.register_template(osc_lfo_template());

        let a = manager.allocate_voice(&mut graph, template_id).unwrap();
        let b = manager.allocate_voice(&mut graph, template_id).unwrap();

        let osc_a = manager.instance(a).unwrap().node_ids[0];
        let osc_b = manager.instance(b).unwrap().node_ids[0];
        assert_ne!(osc_a, osc_b);
    }

    #[test]
    fn shared_nodes_are_identical_across_voices() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(4);
        let template_id = manager.register_template(osc_lfo_template());

        let a = manager.allocate_voice(&mut graph, template_id).unwrap();
        let b = manager.allocate_voice(&mut graph, template_id).unwrap();

        let lfo_a = manager.instance(a).unwrap().node_ids[1];
        let lfo_b = manager.instance(b).unwrap().node_ids[1];
        assert_eq!(lfo_a, lfo_b);
    }

    #[test]
    fn instantiated_nodes_report_the_sync_mode_their_spec_declared() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(4);
        let template_id = manager.register_template(osc_lfo_template());

        let a = manager.allocate_voice(&mut graph, template_id).unwrap();
        let instance = manager.instance(a).unwrap();
        let osc_id = instance.node_ids[0];
        let lfo_id = instance.node_ids[1];

        assert_eq!(graph.get(osc_id).unwrap().sync_mode(), SyncMode::PerVoice);
        assert_eq!(graph.get(lfo_id).unwrap().sync_mode(), SyncMode::Shared);
    }

    #[test]
    fn free_voice_removes_only_per_voice_nodes() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(4);
        let template_id = manager.register_template(osc_lfo_template());

        let a = manager.allocate_voice(&mut graph, template_id).unwrap();
        let osc_a = manager.instance(a).unwrap().node_ids[0];
        let lfo = manager.instance(a).unwrap().node_ids[1];

        manager.free_voice(&mut graph, a).unwrap();

        assert!(graph.get(osc_a).is_none());
        assert!(graph.get(lfo).is_some());
        assert!(manager.instance(a).is_none());
    }

    #[test]
    fn allocate_voice_fails_once_every_slot_is_taken() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(1);
        let template_id = manager.register_template(osc_lfo_template());

        manager.allocate_voice(&mut graph, template_id).unwrap();
        let result = manager.allocate_voice(&mut graph, template_id);
        assert_eq!(result.unwrap_err(), VoiceError::OutOfVoices);
    }

    #[test]
    fn param_binding_writes_reach_the_bound_oscillator() {
        let mut graph = Graph::new();
        let mut manager = VoiceManager::new(4);
        let template_id = manager.register_template(osc_lfo_template());

        let voice_id = manager.allocate_voice(&mut graph, template_id).unwrap();
        let instance = manager.instance(voice_id).unwrap();
        let osc_id = instance.node_ids[0];
        instance.param_bindings[0].set_scalar(0.25);

        let node = graph.get(osc_id).unwrap();
        let osc = node.as_any().downcast_ref::<Oscillator>().unwrap();
        assert_eq!(osc.amp.load(Ordering::Relaxed), 0.25);
    }
}
