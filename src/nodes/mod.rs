//! The closed set of DSP node kinds: oscillators, LFOs, and biquad filters,
//! plus the `ControlNode`/`EffectNode` building blocks they share.

pub mod control;
pub mod effect;
pub mod filter;
pub mod lfo;
pub mod oscillator;
