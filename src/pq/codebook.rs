//! Trained codebooks and their on-disk form
//!
//! A codebook file starts with an 8-byte magic and a version word, followed by
//! the bincode-encoded [`Codebook`].

use crate::pq::quantizer::PQLayout;
use crate::trainer::TrainerConfig;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes opening every codebook file
pub const CODEBOOK_MAGIC: &[u8; 8] = b"SHPQCBK\0";

/// Current codebook file version
pub const CODEBOOK_VERSION: u32 = 1;

/// Trained quantizer state for one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    /// Configuration that produced this codebook, with the resolved dimension
    pub config: TrainerConfig,
    /// Resolved quantizer structure
    pub layout: PQLayout,
    /// Number of vectors the quantizer was trained on
    pub num_training_vectors: usize,
    /// Serialized quantizer, interpreted by the backend that wrote it
    pub blob: Vec<u8>,
}

impl Codebook {
    /// Vector dimension the codebook was trained for
    pub fn dimension(&self) -> usize {
        self.layout.dimension
    }

    /// Factory spec used to build the quantizer, if any
    pub fn factory_spec(&self) -> Option<&str> {
        self.config.factory_spec.as_deref()
    }

    /// Write the codebook to a stream
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(CODEBOOK_MAGIC)?;
        writer.write_u32::<LittleEndian>(CODEBOOK_VERSION)?;
        bincode::serialize_into(&mut *writer, self)?;
        Ok(())
    }

    /// Read a codebook from a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != CODEBOOK_MAGIC {
            return Err(Error::Serialization("Not a codebook file (invalid magic number)".to_string()));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != CODEBOOK_VERSION {
            return Err(Error::Serialization(format!("Unsupported codebook version: {}", version)));
        }

        Ok(bincode::deserialize_from(reader)?)
    }

    /// Save codebook to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load codebook from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Memory and structure statistics
    pub fn memory_stats(&self) -> CodebookStats {
        let total_centroids = self.layout.num_subspaces * self.layout.num_centroids();
        CodebookStats {
            memory_bytes: total_centroids * self.layout.subspace_dimension() * std::mem::size_of::<f32>(),
            total_centroids,
            code_bits: self.layout.num_subspaces * self.layout.bits_per_code,
            compression_ratio: (self.layout.dimension * 32) as f32
                / (self.layout.num_subspaces * self.layout.bits_per_code) as f32,
        }
    }
}

/// Codebook memory and structure statistics
#[derive(Debug)]
pub struct CodebookStats {
    /// Bytes taken by centroids
    pub memory_bytes: usize,
    /// Centroids across all subspaces
    pub total_centroids: usize,
    /// Bits per encoded vector
    pub code_bits: usize,
    /// Original bits / encoded bits
    pub compression_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::TrainingSet;
    use crate::trainer::{PqTrainer, QuantizerTrainer};
    use crate::utils::generate_random_vectors;
    use crate::Distance;
    use tempfile::TempDir;

    fn create_test_codebook() -> Codebook {
        let set = TrainingSet::from_vectors(&generate_random_vectors(40, 8)).unwrap();
        let config = TrainerConfig {
            dimension: 8,
            sub_quantizers: Some(4),
            bits_per_code: 4,
            metric: Distance::L2,
            iterations: 5,
            ..Default::default()
        };
        PqTrainer.train(&set, &config).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.index");
        let codebook = create_test_codebook();

        codebook.save(&path).unwrap();
        let loaded = Codebook::load(&path).unwrap();
        assert_eq!(loaded, codebook);
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.index");
        std::fs::write(&path, b"SHPQVEC\0 but not a codebook").unwrap();
        assert!(matches!(Codebook::load(&path), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_memory_stats() {
        let stats = create_test_codebook().memory_stats();
        assert_eq!(stats.total_centroids, 4 * 16);
        assert_eq!(stats.memory_bytes, 4 * 16 * 2 * 4);
        assert_eq!(stats.code_bits, 16);
        assert_eq!(stats.compression_ratio, 16.0);
    }
}
