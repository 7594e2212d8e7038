//! et-scene: Scene model for the EchoTrace acoustics engine
//!
//! Everything the propagation engine traces against lives here:
//! - `SoundMesh` - preprocessed triangle meshes with per-edge diffraction
//!   classification and a triangle BVH
//! - `SoundObject` / `SoundScene` - rigid mesh instances plus sources and a
//!   rebuildable object-level BVH
//! - `SoundSource` / `SoundListener` - endpoints with their probe caches
//! - `RayTracer` - closest-hit, binary-occlusion and all-hits queries
//! - the `SOUNDMESH` binary mesh format

mod bvh;
pub mod cache;
mod listener;
mod math;
mod mesh;
mod object;
mod ray;
mod scene;
mod serializer;
mod source;

pub use bvh::*;
pub use cache::*;
pub use listener::*;
pub use math::*;
pub use mesh::*;
pub use object::*;
pub use ray::*;
pub use scene::*;
pub use serializer::*;
pub use source::*;
