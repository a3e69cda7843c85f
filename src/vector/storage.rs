//! Segment files for persisting one collection's embeddings.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `CSVE`, version, dimension, vector count
//! - Records: owner id (u64) followed by `dimension` f32 values, all
//!   little-endian
//!
//! Segments are rewritten whole on save (temp file + rename) and read back
//! through a memory map.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{EngineError, EngineResult, StorageContext};
use crate::types::{Collection, OwnerId};
use crate::vector::VectorDimension;

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector segment files.
const MAGIC_BYTES: &[u8; 4] = b"CSVE";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes per owner id (u64).
const BYTES_PER_ID: usize = 8;

/// Decoded contents of a segment file.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub dimension: VectorDimension,
    pub vectors: Vec<(OwnerId, Vec<f32>)>,
}

/// Path of the segment file for `collection` under `dir`.
pub fn segment_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.vec", collection.as_str()))
}

/// Writes a segment, replacing any previous file atomically.
pub fn write_segment(
    path: &Path,
    dimension: VectorDimension,
    vectors: &[(OwnerId, &[f32])],
) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).at_path(parent)?;
    }

    let tmp_path = path.with_extension("vec.tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .at_path(&tmp_path)?;
        let mut out = BufWriter::new(file);
        write_header(&mut out, dimension, vectors.len()).at_path(&tmp_path)?;

        for (owner_id, vector) in vectors {
            if vector.len() != dimension.get() {
                return Err(EngineError::Storage {
                    path: path.to_path_buf(),
                    reason: format!(
                        "refusing to write vector of length {} into a {}-dimensional segment",
                        vector.len(),
                        dimension.get()
                    ),
                });
            }
            out.write_all(&owner_id.to_bytes()).at_path(&tmp_path)?;
            for &value in *vector {
                out.write_all(&value.to_le_bytes()).at_path(&tmp_path)?;
            }
        }
        out.flush().at_path(&tmp_path)?;
    }

    std::fs::rename(&tmp_path, path).at_path(path)
}

/// Reads a whole segment back into memory.
pub fn read_segment(path: &Path) -> EngineResult<Segment> {
    let file = File::open(path).at_path(path)?;
    // SAFETY: segment files are only ever replaced by rename, never mutated in place.
    let mmap = unsafe { MmapOptions::new().map(&file) }.at_path(path)?;

    let (version, dimension, vector_count) = read_header(&mmap).at_path(path)?;
    if version != STORAGE_VERSION {
        return Err(EngineError::Storage {
            path: path.to_path_buf(),
            reason: format!("unsupported segment version {version}, expected {STORAGE_VERSION}"),
        });
    }

    let dim = dimension.get();
    let record_size = BYTES_PER_ID + dim * BYTES_PER_F32;
    let expected_len = HEADER_SIZE + vector_count * record_size;
    if mmap.len() != expected_len {
        return Err(EngineError::Storage {
            path: path.to_path_buf(),
            reason: format!(
                "segment is {} bytes but header promises {expected_len}; file is truncated or corrupted",
                mmap.len()
            ),
        });
    }

    let mut vectors = Vec::with_capacity(vector_count);
    for record in mmap[HEADER_SIZE..].chunks_exact(record_size) {
        let mut id_bytes = [0u8; BYTES_PER_ID];
        id_bytes.copy_from_slice(&record[..BYTES_PER_ID]);
        let vector = record[BYTES_PER_ID..]
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        vectors.push((OwnerId::from_bytes(id_bytes), vector));
    }

    Ok(Segment { dimension, vectors })
}

fn write_header(out: &mut impl Write, dimension: VectorDimension, count: usize) -> io::Result<()> {
    let dim = u32::try_from(dimension.get()).map_err(io::Error::other)?;
    let count = u32::try_from(count).map_err(io::Error::other)?;
    out.write_all(MAGIC_BYTES)?;
    out.write_all(&STORAGE_VERSION.to_le_bytes())?;
    out.write_all(&dim.to_le_bytes())?;
    out.write_all(&count.to_le_bytes())?;
    Ok(())
}

fn read_header(mmap: &Mmap) -> io::Result<(u32, VectorDimension, usize)> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

    if mmap.len() < HEADER_SIZE {
        return Err(invalid("file too small to contain header"));
    }
    if &mmap[0..4] != MAGIC_BYTES {
        return Err(invalid("invalid magic bytes"));
    }

    let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
    let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
    let dimension =
        VectorDimension::new(dim_value as usize).map_err(|e| invalid(&e.to_string()))?;
    let vector_count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

    Ok((version, dimension, vector_count))
}
