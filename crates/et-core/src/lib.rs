//! et-core: Shared types for the EchoTrace acoustics engine
//!
//! This crate provides the foundational value types used across the
//! propagation and rendering crates:
//! - `Sample` and the `SoundOutput` pull-audio interface
//! - `FrequencyResponse` - fixed 8-band linear-gain algebra
//! - `FrequencyPartition` - split frequencies defining rendering bands
//! - `SoundMaterial` - reflection/absorption/transmission response triple
//! - `DistanceAttenuation` - inverse polynomial rolloff
//! - `EtError` - the workspace error type

mod attenuation;
mod error;
mod material;
mod partition;
mod response;
mod sample;

pub use attenuation::*;
pub use error::*;
pub use material::*;
pub use partition::*;
pub use response::*;
pub use sample::*;
