//! The SOUNDMESH binary mesh format, version 1
//!
//! Layout:
//! - 16-byte header: `"SOUNDMESH"`, version byte, endianness byte
//!   (0 = little, 1 = big), one pad byte, and a u32 checksum equal to the
//!   sum of every byte after the header, mod 2^32.
//! - material block: band count, band center frequencies, material count,
//!   then per material the reflection, absorption and transmission gains.
//! - vertex block: count, then x/y/z floats per vertex.
//! - triangle block: count, then per triangle three vertex indices, three
//!   neighbor indices (a triangle's own index marks a missing neighbor),
//!   three edge-diffraction flag bytes, one pad byte, and a material index.
//! - bounding sphere: center x/y/z and radius.
//!
//! Files written with a different band count are resampled onto the fixed
//! 8-band grid by piecewise-linear interpolation over band centers, clamped
//! at the ends. Readers verify the checksum and accept either endianness;
//! writers always produce little-endian.

use crate::mesh::{BoundingSphere, EdgeType, SoundMesh, SoundTriangle};
use et_core::{
    EtError, EtResult, FrequencyResponse, SoundMaterial, BAND_CENTER_FREQUENCIES, NUM_BANDS,
};
use glam::vec3;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 9] = b"SOUNDMESH";
const HEADER_SIZE: usize = 16;
const VERSION: u8 = 1;

/// Serialize a mesh to a writer.
pub fn write_sound_mesh<W: Write>(writer: &mut W, mesh: &SoundMesh) -> EtResult<()> {
    let mut body = Vec::new();
    write_body(&mut body, mesh);

    let checksum = byte_sum(&body);
    let mut header = [0u8; HEADER_SIZE];
    header[..9].copy_from_slice(MAGIC);
    header[9] = VERSION;
    header[10] = 0; // little endian
    header[12..16].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header)?;
    writer.write_all(&body)?;
    info!(
        "wrote sound mesh: {} vertices, {} triangles, {} materials",
        mesh.vertices().len(),
        mesh.triangles().len(),
        mesh.materials().len()
    );
    Ok(())
}

/// Serialize a mesh to a file path.
pub fn save_sound_mesh(path: impl AsRef<Path>, mesh: &SoundMesh) -> EtResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_sound_mesh(&mut writer, mesh)
}

/// Deserialize a mesh from a reader.
pub fn read_sound_mesh<R: Read>(reader: &mut R) -> EtResult<SoundMesh> {
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|_| EtError::NotASoundMesh)?;
    if &header[..9] != MAGIC {
        return Err(EtError::NotASoundMesh);
    }
    if header[9] != VERSION {
        return Err(EtError::UnsupportedVersion(header[9]));
    }
    let big_endian = header[10] != 0;
    let expected_checksum = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    let computed = byte_sum(&body);
    if computed != expected_checksum {
        return Err(EtError::ChecksumMismatch {
            expected: expected_checksum,
            computed,
        });
    }

    parse_body(&body, big_endian)
}

/// Deserialize a mesh from a file path.
pub fn load_sound_mesh(path: impl AsRef<Path>) -> EtResult<SoundMesh> {
    let mut reader = BufReader::new(File::open(path)?);
    read_sound_mesh(&mut reader)
}

fn write_body(body: &mut Vec<u8>, mesh: &SoundMesh) {
    // Material band layout.
    push_u32(body, NUM_BANDS as u32);
    for &center in &BAND_CENTER_FREQUENCIES {
        push_f32(body, center);
    }

    // Materials.
    push_u32(body, mesh.materials().len() as u32);
    for material in mesh.materials() {
        for response in [
            material.reflection(),
            material.absorption(),
            material.transmission(),
        ] {
            for band in 0..NUM_BANDS {
                push_f32(body, response[band]);
            }
        }
    }

    // Vertices.
    push_u32(body, mesh.vertices().len() as u32);
    for vertex in mesh.vertices() {
        push_f32(body, vertex.x);
        push_f32(body, vertex.y);
        push_f32(body, vertex.z);
    }

    // Triangles.
    push_u32(body, mesh.triangles().len() as u32);
    for (index, triangle) in mesh.triangles().iter().enumerate() {
        for corner in 0..3 {
            push_u32(body, triangle.vertex_index(corner));
        }
        for edge in 0..3 {
            push_u32(body, triangle.neighbor(edge).unwrap_or(index as u32));
        }
        for edge in 0..3 {
            body.push(match triangle.edge_type(edge) {
                EdgeType::Diffracting => 1,
                EdgeType::NonDiffracting => 0,
            });
        }
        body.push(0); // padding
        push_u32(body, triangle.material_index());
    }

    // Bounding sphere.
    let sphere = mesh.bounding_sphere();
    push_f32(body, sphere.center.x);
    push_f32(body, sphere.center.y);
    push_f32(body, sphere.center.z);
    push_f32(body, sphere.radius);
}

fn parse_body(body: &[u8], big_endian: bool) -> EtResult<SoundMesh> {
    let mut cursor = Cursor {
        body,
        offset: 0,
        big_endian,
    };

    // Material band layout.
    let num_file_bands = cursor.read_u32()? as usize;
    if num_file_bands == 0 || num_file_bands > 1024 {
        return Err(EtError::InvalidMesh(format!(
            "implausible band count {num_file_bands}"
        )));
    }
    let mut file_band_centers = Vec::with_capacity(num_file_bands);
    for _ in 0..num_file_bands {
        file_band_centers.push(cursor.read_f32()?);
    }

    // Materials.
    let num_materials = cursor.read_u32()? as usize;
    let mut materials = Vec::with_capacity(num_materials);
    let mut gains = vec![0.0f32; num_file_bands];
    for _ in 0..num_materials {
        let mut responses = [FrequencyResponse::default(); 3];
        for response in &mut responses {
            for gain in gains.iter_mut() {
                *gain = cursor.read_f32()?;
            }
            *response = resample_response(&file_band_centers, &gains);
        }
        materials.push(SoundMaterial::new(responses[0], responses[1], responses[2]));
    }

    // Vertices.
    let num_vertices = cursor.read_u32()? as usize;
    let mut vertices = Vec::with_capacity(num_vertices);
    for _ in 0..num_vertices {
        let x = cursor.read_f32()?;
        let y = cursor.read_f32()?;
        let z = cursor.read_f32()?;
        vertices.push(vec3(x, y, z));
    }

    // Triangles.
    let num_triangles = cursor.read_u32()? as usize;
    let mut triangles = Vec::with_capacity(num_triangles);
    for index in 0..num_triangles {
        let v0 = cursor.read_u32()?;
        let v1 = cursor.read_u32()?;
        let v2 = cursor.read_u32()?;
        let mut neighbors = [None; 3];
        for neighbor in &mut neighbors {
            let value = cursor.read_u32()?;
            if value != index as u32 {
                if value as usize >= num_triangles {
                    return Err(EtError::InvalidMesh(format!(
                        "neighbor index {value} out of range"
                    )));
                }
                *neighbor = Some(value);
            }
        }
        let mut edge_types = [EdgeType::NonDiffracting; 3];
        for edge_type in &mut edge_types {
            if cursor.read_u8()? != 0 {
                *edge_type = EdgeType::Diffracting;
            }
        }
        cursor.read_u8()?; // padding
        let material = cursor.read_u32()?;
        triangles.push((SoundTriangle::new(v0, v1, v2, material), neighbors, edge_types));
    }

    // Bounding sphere.
    let cx = cursor.read_f32()?;
    let cy = cursor.read_f32()?;
    let cz = cursor.read_f32()?;
    let radius = cursor.read_f32()?;
    let bounding_sphere = BoundingSphere {
        center: vec3(cx, cy, cz),
        radius,
    };

    let mesh = SoundMesh::from_preprocessed(vertices, triangles, materials, bounding_sphere)?;
    info!(
        "read sound mesh: {} vertices, {} triangles, {} materials",
        mesh.vertices().len(),
        mesh.triangles().len(),
        mesh.materials().len()
    );
    Ok(mesh)
}

/// Piecewise-linear resampling of a response onto the 8-band grid, clamped
/// at the ends of the file's band-center axis.
fn resample_response(file_centers: &[f32], gains: &[f32]) -> FrequencyResponse {
    let mut response = FrequencyResponse::default();
    for band in 0..NUM_BANDS {
        let target = BAND_CENTER_FREQUENCIES[band];
        response[band] = if target <= file_centers[0] {
            gains[0]
        } else if target >= file_centers[file_centers.len() - 1] {
            gains[gains.len() - 1]
        } else {
            let upper = file_centers
                .iter()
                .position(|&f| f >= target)
                .unwrap_or(file_centers.len() - 1);
            let (f0, f1) = (file_centers[upper - 1], file_centers[upper]);
            let fraction = if f1 > f0 { (target - f0) / (f1 - f0) } else { 0.0 };
            gains[upper - 1] + (gains[upper] - gains[upper - 1]) * fraction
        };
    }
    response
}

fn byte_sum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}

fn push_u32(body: &mut Vec<u8>, value: u32) {
    body.extend_from_slice(&value.to_le_bytes());
}

fn push_f32(body: &mut Vec<u8>, value: f32) {
    body.extend_from_slice(&value.to_le_bytes());
}

struct Cursor<'a> {
    body: &'a [u8],
    offset: usize,
    big_endian: bool,
}

impl Cursor<'_> {
    fn take(&mut self, len: usize) -> EtResult<&[u8]> {
        if self.offset + len > self.body.len() {
            return Err(EtError::TruncatedFile);
        }
        let slice = &self.body[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> EtResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> EtResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    fn read_f32(&mut self) -> EtResult<f32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.big_endian {
            f32::from_be_bytes(bytes)
        } else {
            f32::from_le_bytes(bytes)
        })
    }
}
