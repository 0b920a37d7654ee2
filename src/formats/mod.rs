//! File format support for vector shards
//!
//! Two shard encodings are understood:
//!
//! * the native flat shard: a small header followed by row-major `f32` data
//! * classic `.fvecs`: every record carries its own dimension prefix
//!
//! Readers return a flat row-major buffer plus the dimension, and honor an
//! optional first-N limit without reading past it. Decode failures surface as
//! `std::io::Error` with kind `InvalidData` (or `UnexpectedEof`), so callers can
//! tell a malformed file apart from a missing one.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes opening every native shard
pub const SHARD_MAGIC: &[u8; 8] = b"SHPQVEC\0";

/// Current native shard version
pub const SHARD_VERSION: u32 = 1;

/// Size of the native shard header in bytes
pub const SHARD_HEADER_SIZE: u64 = 8 + 4 + 4 + 8;

/// Shard encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardFormat {
    /// Native flat shard with header
    Native,
    /// Float vectors (.fvecs), 4-byte dimension prefix per record
    Fvecs,
}

impl ShardFormat {
    /// Pick the encoding for a shard file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "fvecs" => ShardFormat::Fvecs,
            _ => ShardFormat::Native,
        }
    }
}

/// Header of a native shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    /// Vector dimension
    pub dimension: u32,
    /// Number of vectors stored
    pub count: u64,
}

impl ShardHeader {
    /// Read and validate a header
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != SHARD_MAGIC {
            return Err(invalid_data("invalid magic number"));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != SHARD_VERSION {
            return Err(invalid_data(format!("unsupported shard version: {}", version)));
        }

        let dimension = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u64::<LittleEndian>()?;
        if dimension == 0 {
            return Err(invalid_data("shard declares zero dimension"));
        }

        Ok(Self { dimension, count })
    }

    /// Write the header
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(SHARD_MAGIC)?;
        writer.write_u32::<LittleEndian>(SHARD_VERSION)?;
        writer.write_u32::<LittleEndian>(self.dimension)?;
        writer.write_u64::<LittleEndian>(self.count)?;
        Ok(())
    }

    /// Total file size this header implies
    pub fn expected_file_len(&self) -> Option<u64> {
        self.count
            .checked_mul(self.dimension as u64)?
            .checked_mul(4)?
            .checked_add(SHARD_HEADER_SIZE)
    }
}

/// Read a native shard, keeping at most `limit` vectors
///
/// `file_len` is the size of the underlying file; a payload that does not
/// match the header is rejected before any vector is read.
pub fn read_shard<R: Read>(
    reader: &mut R,
    file_len: u64,
    limit: Option<usize>,
) -> io::Result<(Vec<f32>, usize)> {
    let header = ShardHeader::read_from(reader)?;
    let expected = header
        .expected_file_len()
        .ok_or_else(|| invalid_data("shard size overflows"))?;

    if file_len != expected {
        return Err(invalid_data(format!(
            "payload size mismatch: header implies {} bytes, file has {}",
            expected, file_len
        )));
    }

    let dimension = header.dimension as usize;
    let available = usize::try_from(header.count).map_err(|_| invalid_data("shard too large"))?;
    let take = limit.map_or(available, |n| n.min(available));

    let mut data = vec![0.0f32; take * dimension];
    reader.read_f32_into::<LittleEndian>(&mut data)?;

    Ok((data, dimension))
}

/// Read a native shard file
pub fn read_shard_file<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<(Vec<f32>, usize)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    read_shard(&mut reader, file_len, limit)
}

/// Write vectors as a native shard
pub fn write_shard<P: AsRef<Path>>(path: P, data: &[f32], dimension: usize) -> io::Result<()> {
    check_layout(data, dimension)?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header = ShardHeader {
        dimension: dimension as u32,
        count: (data.len() / dimension) as u64,
    };
    header.write_to(&mut writer)?;

    for &value in data {
        writer.write_f32::<LittleEndian>(value)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read vectors from fvecs format, keeping at most `limit` records
///
/// `file_len` is the size of the underlying stream. Every record's declared
/// dimension is checked against the bytes left before anything is allocated;
/// a record that would run past the end, or a trailing fragment shorter than a
/// dimension prefix, is rejected as `InvalidData`. An empty stream yields no
/// vectors and dimension 0.
pub fn read_fvecs<R: Read>(reader: &mut R, file_len: u64, limit: Option<usize>) -> io::Result<(Vec<f32>, usize)> {
    let mut data = Vec::new();
    let mut dimension: Option<usize> = None;
    let mut records = 0usize;
    let mut remaining = file_len;

    while limit.map_or(true, |n| records < n) {
        if remaining == 0 {
            break;
        }
        if remaining < 4 {
            return Err(invalid_data(format!(
                "truncated record {}: {} trailing bytes",
                records, remaining
            )));
        }

        let dim = reader.read_u32::<LittleEndian>()? as usize;
        remaining -= 4;

        match dimension {
            Some(expected) if expected != dim => {
                return Err(invalid_data(format!(
                    "inconsistent record dimension at record {}: {} vs {}",
                    records, dim, expected
                )));
            }
            None if dim == 0 => return Err(invalid_data("record declares zero dimension")),
            None => dimension = Some(dim),
            _ => {}
        }

        let record_bytes = (dim as u64) * 4;
        if record_bytes > remaining {
            return Err(invalid_data(format!(
                "record {} declares dimension {} but only {} bytes remain",
                records, dim, remaining
            )));
        }

        let start = data.len();
        data.resize(start + dim, 0.0);
        reader.read_f32_into::<LittleEndian>(&mut data[start..])?;
        remaining -= record_bytes;
        records += 1;
    }

    Ok((data, dimension.unwrap_or(0)))
}

/// Read an fvecs file
pub fn read_fvecs_file<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<(Vec<f32>, usize)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    read_fvecs(&mut reader, file_len, limit)
}

/// Write vectors to fvecs format
pub fn write_fvecs<P: AsRef<Path>>(path: P, data: &[f32], dimension: usize) -> io::Result<()> {
    check_layout(data, dimension)?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    for vector in data.chunks_exact(dimension) {
        writer.write_u32::<LittleEndian>(dimension as u32)?;
        for &value in vector {
            writer.write_f32::<LittleEndian>(value)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read headerless little-endian `f32` rows of a known dimension
pub fn read_raw_f32<R: Read>(
    reader: &mut R,
    dimension: usize,
    limit: Option<usize>,
) -> io::Result<Vec<f32>> {
    if dimension == 0 {
        return Err(invalid_data("dimension must be positive"));
    }

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let row_bytes = dimension * 4;
    if bytes.len() % row_bytes != 0 {
        return Err(invalid_data(format!(
            "{} bytes is not a whole number of {}-dimensional rows",
            bytes.len(),
            dimension
        )));
    }

    let rows = bytes.len() / row_bytes;
    let take = limit.map_or(rows, |n| n.min(rows));

    Ok(bytes[..take * row_bytes]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn check_layout(data: &[f32], dimension: usize) -> io::Result<()> {
    if dimension == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "dimension must be positive"));
    }
    if data.len() % dimension != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("buffer of {} floats is not a multiple of dimension {}", data.len(), dimension),
        ));
    }
    Ok(())
}

fn invalid_data<E>(msg: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
