//! Typed errors at the boundaries that need to match on failure kind: graph
//! mutation and voice allocation. The outer CLI/audio-init boundary keeps
//! the teacher crate's own `Box<dyn std::error::Error>` convention instead,
//! since nothing downstream of `main` needs to match on those failures.

use thiserror::Error;

/// Failures from graph mutation operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// `sort()` would have produced a cycle; the previous `topoOrder` is
    /// left untouched and the renderer keeps using it.
    #[error("graph has a cycle and cannot be topologically sorted")]
    CycleDetected,

    /// A node id was used that does not currently name a live node.
    #[error("node {0} does not exist")]
    InvalidNode(usize),
}

/// Failures from voice subsystem operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoiceError {
    /// `registerTemplate`/`allocateVoice` referenced a template id outside
    /// `0..voiceTemplates.len()`.
    #[error("template {0} does not exist")]
    InvalidTemplate(usize),

    /// `allocateVoice` was called with every voice slot already in use.
    #[error("no free voice slots")]
    OutOfVoices,

    /// A voice id was used that does not currently name a live voice.
    #[error("voice {0} does not exist")]
    InvalidVoice(usize),

    /// `instantiateParams` resolved a `ParamSpec` whose `nodeIdx` names a
    /// missing node, or whose `kind` does not match the realized node's
    /// concrete type (e.g. `FilterCutoff` on an oscillator).
    #[error("param binding {0} names a missing node or the wrong node kind")]
    InvalidParamBinding(usize),
}
