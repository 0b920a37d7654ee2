//! Shard locators and the shard store
//!
//! A shard holds the vectors captured for one `(base_path, run_id, index)`
//! triple and lives at `{base_path}/r{run_id}_i{index}.{ext}`.

use crate::formats::{self, ShardFormat};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Default shard file extension
pub const DEFAULT_SHARD_EXTENSION: &str = "index";

/// Identifies one shard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardLocator {
    /// Directory holding the shards of one capture
    pub base_path: PathBuf,
    /// Run identifier
    pub run_id: usize,
    /// Flattened (layer, head) index
    pub index: usize,
}

impl ShardLocator {
    /// Create a locator
    pub fn new<P: Into<PathBuf>>(base_path: P, run_id: usize, index: usize) -> Self {
        Self {
            base_path: base_path.into(),
            run_id,
            index,
        }
    }

    /// File name of this shard for the given extension
    pub fn file_name(&self, extension: &str) -> String {
        format!("r{}_i{}.{}", self.run_id, self.index, extension)
    }

    /// Full path of this shard for the given extension
    pub fn path(&self, extension: &str) -> PathBuf {
        self.base_path.join(self.file_name(extension))
    }
}

/// Vectors read from one shard, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct VectorShard {
    data: Vec<f32>,
    dimension: usize,
}

impl VectorShard {
    /// Wrap a row-major buffer
    pub fn new(data: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 && !data.is_empty() {
            return Err(Error::InvalidConfig("Vectors must have a positive dimension".to_string()));
        }
        if dimension > 0 && data.len() % dimension != 0 {
            return Err(Error::InvalidConfig(format!(
                "Buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        Ok(Self { data, dimension })
    }

    /// Vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Whether the shard holds no vectors
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major vector data
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Iterate over vectors
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Take the row-major buffer
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Read access to vector shards
pub trait ShardStore: Send + Sync {
    /// Read a shard, keeping at most `limit` leading vectors
    ///
    /// Fails with [`Error::NotFound`] when the shard does not exist and with
    /// [`Error::Corrupt`] when it exists but cannot be decoded.
    fn read(&self, locator: &ShardLocator, limit: Option<usize>) -> Result<VectorShard>;

    /// Where a locator resolves to, for diagnostics
    fn describe(&self, locator: &ShardLocator) -> PathBuf;
}

/// Shard store backed by files on local disk
#[derive(Debug, Clone)]
pub struct FileShardStore {
    extension: String,
    format: ShardFormat,
}

impl FileShardStore {
    /// Create a store reading `*.{extension}` shards
    pub fn new(extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let format = ShardFormat::from_extension(&extension);
        Self { extension, format }
    }

    /// Shard file extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn decode(&self, path: &Path, limit: Option<usize>) -> io::Result<(Vec<f32>, usize)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        match self.format {
            ShardFormat::Native => formats::read_shard(&mut reader, file_len, limit),
            ShardFormat::Fvecs => formats::read_fvecs(&mut reader, file_len, limit),
        }
    }
}

impl Default for FileShardStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_EXTENSION)
    }
}

impl ShardStore for FileShardStore {
    fn read(&self, locator: &ShardLocator, limit: Option<usize>) -> Result<VectorShard> {
        let path = locator.path(&self.extension);
        if !path.is_file() {
            return Err(Error::NotFound(path));
        }

        let (data, dimension) = match self.decode(&path, limit) {
            Ok(decoded) => decoded,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(path)),
            Err(source) => return Err(Error::Corrupt { path, source }),
        };

        log::debug!(
            "Read {} vectors of dimension {} from {}",
            if dimension == 0 { 0 } else { data.len() / dimension },
            dimension,
            path.display()
        );

        VectorShard::new(data, dimension)
    }

    fn describe(&self, locator: &ShardLocator) -> PathBuf {
        locator.path(&self.extension)
    }
}
