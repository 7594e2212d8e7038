//! et-propagate: The EchoTrace propagation engine
//!
//! Each simulation tick the `SoundPropagator` discovers the acoustic paths
//! from every enabled source to the listener:
//! - direct and transmitted paths from one occlusion/all-hits ray per source
//! - specular reflection paths found by listener probe rays and validated
//!   with the image-source method
//! - edge diffraction paths over diffracting edges, attenuated by a UTD
//!   coefficient per frequency band
//! - a statistical reverb response per source from source probe rays
//!
//! Results land in a `PropagationPathBuffer` that the renderer consumes.
//! The `PropagationController` wraps the propagator and adapts ray counts
//! to a wall-clock frame budget.

mod buffer;
mod controller;
mod diffraction;
mod path;
mod propagator;

pub use buffer::*;
pub use controller::*;
pub use diffraction::*;
pub use path::*;
pub use propagator::*;
