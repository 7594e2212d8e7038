//! et-render: The EchoTrace propagation renderer
//!
//! Auralizes propagation output in real time:
//! - per-path frequency-band-split delay lines with Doppler-correct
//!   time-varying taps and per-callback gain ramps
//! - amplitude panning over an arbitrary speaker layout
//! - a parallel-comb / series-all-pass reverberator whose decay times are
//!   driven by the engine's per-source reverb statistics
//!
//! Two threads meet here: the simulation thread hands over path buffers via
//! `update_paths`, the audio thread drains `fill_buffer`. One renderer-wide
//! mutex guards all state in between.

mod crossover;
mod renderer;
mod speaker;

pub use crossover::*;
pub use renderer::*;
pub use speaker::*;
