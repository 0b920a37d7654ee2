//! Codebook persistence
//!
//! One file per trained index, `{destination}/{index}.index`. Whether an
//! existing destination may be reused is decided once per run, before any
//! index is processed; after that every index writes its own file and there
//! is nothing left to coordinate.

use crate::pq::Codebook;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of persisted codebooks
pub const CODEBOOK_EXTENSION: &str = "index";

/// Writes trained codebooks to a destination directory
#[derive(Debug, Clone, Copy, Default)]
pub struct CodebookStore;

impl CodebookStore {
    /// Approve and create the destination directory
    ///
    /// Fails with [`Error::DestinationExists`] when `path` already exists and
    /// `overwrite` is false.
    pub fn prepare_destination(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() && !overwrite {
            return Err(Error::DestinationExists(path.to_path_buf()));
        }

        fs::create_dir_all(path)?;
        log::debug!("Destination {} ready", path.display());
        Ok(())
    }

    /// Path of the codebook for `index`
    pub fn codebook_path(&self, destination: &Path, index: usize) -> PathBuf {
        destination.join(format!("{}.{}", index, CODEBOOK_EXTENSION))
    }

    /// Persist the codebook of `index`, replacing any previous file
    pub fn write(&self, destination: &Path, index: usize, codebook: &Codebook) -> Result<PathBuf> {
        let path = self.codebook_path(destination, index);
        codebook.save(&path)?;
        log::debug!("Wrote codebook for index {} to {}", index, path.display());
        Ok(path)
    }

    /// Load the codebook of `index`
    pub fn read(&self, destination: &Path, index: usize) -> Result<Codebook> {
        Codebook::load(self.codebook_path(destination, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::TrainingSet;
    use crate::trainer::{PqTrainer, QuantizerTrainer, TrainerConfig};
    use crate::utils::generate_random_vectors;
    use tempfile::TempDir;

    fn codebook(seed: u64) -> Codebook {
        let set = TrainingSet::from_vectors(&generate_random_vectors(20, 4)).unwrap();
        let config = TrainerConfig {
            dimension: 4,
            iterations: 3,
            seed,
            ..Default::default()
        };
        PqTrainer.train(&set, &config).unwrap()
    }

    #[test]
    fn test_prepare_new_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("codebooks");

        CodebookStore.prepare_destination(&dest, false).unwrap();
        assert!(dest.is_dir());
    }

    #[test]
    fn test_existing_destination_requires_overwrite() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("codebooks");
        fs::create_dir(&dest).unwrap();

        let err = CodebookStore.prepare_destination(&dest, false).unwrap_err();
        assert!(matches!(err, Error::DestinationExists(p) if p == dest));

        // Idempotent with overwrite
        CodebookStore.prepare_destination(&dest, true).unwrap();
        CodebookStore.prepare_destination(&dest, true).unwrap();
    }

    #[test]
    fn test_write_names_file_by_index_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = CodebookStore;

        let first = codebook(1);
        let path = store.write(dir.path(), 17, &first).unwrap();
        assert_eq!(path, dir.path().join("17.index"));

        let second = codebook(2);
        store.write(dir.path(), 17, &second).unwrap();
        assert_eq!(store.read(dir.path(), 17).unwrap(), second);
    }
}
