//! Integration tests for the shardpq training pipeline

use shardpq::formats::write_shard;
use shardpq::pq::ProductQuantizer;
use shardpq::{
    Codebook, CodebookStore, DimensionPolicy, EmptyIndexPolicy, Error, FileShardStore, IndexStatus, PipelineConfig,
    PipelineDriver, PqTrainer, Result, ScanPolicy, ShardLocator, ShardStore, TrainingSet, VectorAggregator,
    VectorShard,
};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate synthetic clustered vectors, flattened row-major
fn generate_clustered_vectors(
    num_clusters: usize,
    vectors_per_cluster: usize,
    dimension: usize,
    cluster_spread: f32,
    seed: u64,
) -> Vec<f32> {
    use rand::prelude::*;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(num_clusters * vectors_per_cluster * dimension);

    for _ in 0..num_clusters {
        let center: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-10.0..10.0)).collect();
        for _ in 0..vectors_per_cluster {
            data.extend(center.iter().map(|&c| c + rng.gen_range(-cluster_spread..cluster_spread)));
        }
    }

    data
}

fn put_shard(base: &Path, run_id: usize, index: usize, count: usize, dimension: usize) -> Vec<f32> {
    let data = generate_clustered_vectors(1, count, dimension, 1.0, (run_id * 1000 + index) as u64);
    std::fs::create_dir_all(base).unwrap();
    write_shard(ShardLocator::new(base, run_id, index).path("index"), &data, dimension).unwrap();
    data
}

fn pipeline_config(inputs: &[PathBuf], range: Range<usize>, destination: PathBuf) -> PipelineConfig {
    let mut config = PipelineConfig::new(inputs.to_vec(), range, destination);
    config.max_run_id = 10;
    config.trainer.iterations = 5;
    config.threads = 2;
    config
}

/// Shard store that counts reads
struct CountingStore {
    inner: FileShardStore,
    reads: Arc<AtomicUsize>,
}

impl ShardStore for CountingStore {
    fn read(&self, locator: &ShardLocator, limit: Option<usize>) -> Result<VectorShard> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(locator, limit)
    }

    fn describe(&self, locator: &ShardLocator) -> PathBuf {
        self.inner.describe(locator)
    }
}

#[test]
fn test_small_index_trains_and_empty_index_is_skipped() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 3, 4);
    put_shard(&a, 1, 0, 2, 4);

    let config = pipeline_config(&[a], 0..2, dir.path().join("out"));
    let summaries = PipelineDriver::default().run(&config).unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].status, IndexStatus::Trained);
    assert_eq!(summaries[0].vectors_trained_on, 5);
    assert_eq!(summaries[1].status, IndexStatus::SkippedNoVectors);

    let codebook = CodebookStore.read(&config.destination, 0).unwrap();
    assert_eq!(codebook.dimension(), 4);
    assert_eq!(codebook.num_training_vectors, 5);
    assert!(!config.destination.join("1.index").exists());
}

#[test]
fn test_dimension_mismatch_fails_only_its_index() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 6, 4);
    put_shard(&a, 1, 0, 6, 8);
    put_shard(&a, 0, 1, 6, 4);

    let config = pipeline_config(&[a], 0..2, dir.path().join("out"));
    let summaries = PipelineDriver::default().run(&config).unwrap();

    assert_eq!(summaries[0].status, IndexStatus::SkippedDimensionMismatch);
    let message = summaries[0].message.as_deref().unwrap();
    assert!(message.contains("r1_i0.index"));
    assert!(message.contains("expected 4, got 8"));
    assert!(!config.destination.join("0.index").exists());

    assert_eq!(summaries[1].status, IndexStatus::Trained);
    assert!(config.destination.join("1.index").is_file());
}

#[test]
fn test_factory_spec_overrides_sub_quantizers() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 300, 128);

    let mut config = pipeline_config(&[a], 0..1, dir.path().join("out"));
    config.trainer.sub_quantizers = Some(3);
    config.trainer.factory_spec = Some("PQ8".to_string());
    config.trainer.iterations = 2;

    let summaries = PipelineDriver::default().run(&config).unwrap();
    assert_eq!(summaries[0].status, IndexStatus::Trained);

    let codebook = CodebookStore.read(&config.destination, 0).unwrap();
    assert_eq!(codebook.factory_spec(), Some("PQ8"));
    assert_eq!(codebook.layout.num_subspaces, 8);
    assert_eq!(codebook.dimension(), 128);
}

#[test]
fn test_existing_destination_fails_before_any_shard_read() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 20, 4);

    let destination = dir.path().join("out");
    let config = pipeline_config(&[a], 0..1, destination.clone());
    PipelineDriver::default().run(&config).unwrap();

    let reads = Arc::new(AtomicUsize::new(0));
    let driver = PipelineDriver::new(
        Box::new(CountingStore {
            inner: FileShardStore::default(),
            reads: reads.clone(),
        }),
        Box::new(PqTrainer),
    );

    let err = driver.run(&config).unwrap_err();
    assert!(matches!(err, Error::DestinationExists(ref p) if p == &destination));
    assert_eq!(reads.load(Ordering::SeqCst), 0);

    let mut config = config;
    config.overwrite = true;
    let summaries = driver.run(&config).unwrap();
    assert!(summaries[0].is_trained());
    assert!(reads.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_runs_are_deterministic() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    let b = dir.path().join("B");
    for index in 0..3 {
        put_shard(&a, 0, index, 40, 8);
        put_shard(&b, 2, index, 25, 8);
    }

    let run = |name: &str| -> Vec<Codebook> {
        let mut config = pipeline_config(&[a.clone(), b.clone()], 0..3, dir.path().join(name));
        config.trainer.sub_quantizers = Some(2);
        config.threads = 3;
        PipelineDriver::default().run(&config).unwrap();
        (0..3)
            .map(|i| CodebookStore.read(&config.destination, i).unwrap())
            .collect()
    };

    assert_eq!(run("first"), run("second"));
}

#[test]
fn test_collect_order_and_scan_policies() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    let b = dir.path().join("B");
    let a0 = put_shard(&a, 0, 5, 2, 3);
    let a2 = put_shard(&a, 2, 5, 3, 3);
    let b1 = put_shard(&b, 1, 5, 4, 3);

    let store = FileShardStore::default();
    let paths = [a.clone(), b.clone()];

    let all = VectorAggregator::new(&store).collect(&paths, 5, 10, None).unwrap();
    let expected: Vec<f32> = [a0.clone(), a2, b1.clone()].concat();
    assert_eq!(all.training_set.as_slice(), expected.as_slice());
    assert_eq!(all.shards_read, 3);

    let again = VectorAggregator::new(&store).collect(&paths, 5, 10, None).unwrap();
    assert_eq!(again.training_set, all.training_set);

    // B has no r0, so stop-at-gap never reaches its r1
    let gap = VectorAggregator::new(&store)
        .scan_policy(ScanPolicy::StopAtGap)
        .collect(&paths, 5, 10, None)
        .unwrap();
    assert_eq!(gap.training_set.as_slice(), a0.as_slice());
    assert_eq!(gap.shards_read, 1);

    let limited = VectorAggregator::new(&store).collect(&paths, 5, 10, Some(1)).unwrap();
    assert_eq!(limited.training_set.len(), 3);
}

#[test]
fn test_corrupt_shard_is_skipped_with_warning() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 10, 4);
    std::fs::write(ShardLocator::new(&a, 1, 0).path("index"), b"not a shard").unwrap();
    put_shard(&a, 2, 0, 10, 4);

    let config = pipeline_config(&[a], 0..1, dir.path().join("out"));
    let summaries = PipelineDriver::default().run(&config).unwrap();

    assert_eq!(summaries[0].status, IndexStatus::Trained);
    assert_eq!(summaries[0].vectors_trained_on, 20);
    assert_eq!(summaries[0].warnings.len(), 1);
    assert_eq!(summaries[0].warnings[0].run_id, 1);

    let json = std::fs::read_to_string(config.destination.join("summary.json")).unwrap();
    assert!(json.contains("\"trained\""));
    assert!(json.contains("r1_i0.index"));
}

#[test]
fn test_explicit_dimension_rejects_other_shards() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 0, 10, 4);

    let mut config = pipeline_config(&[a], 0..1, dir.path().join("out"));
    config.dimension_policy = DimensionPolicy::Explicit(8);

    let summaries = PipelineDriver::default().run(&config).unwrap();
    assert_eq!(summaries[0].status, IndexStatus::SkippedDimensionMismatch);
}

#[test]
fn test_strict_mode_aborts_on_empty_index() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    put_shard(&a, 0, 1, 10, 4);

    let mut config = pipeline_config(&[a], 0..2, dir.path().join("out"));
    config.empty_policy = EmptyIndexPolicy::AbortRun;

    assert!(matches!(PipelineDriver::default().run(&config), Err(Error::NoVectors(0))));
    assert!(!config.destination.join("1.index").exists());

    let json = std::fs::read_to_string(config.destination.join("summary.json")).unwrap();
    assert!(json.contains("\"skipped_no_vectors\""));
    assert!(!json.contains("\"trained\""));
}

#[test]
fn test_trained_codebook_compresses_clustered_data() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("A");
    let data = generate_clustered_vectors(8, 50, 16, 0.1, 7);
    std::fs::create_dir_all(&a).unwrap();
    write_shard(ShardLocator::new(&a, 0, 0).path("index"), &data, 16).unwrap();

    let mut config = pipeline_config(&[a], 0..1, dir.path().join("out"));
    config.trainer.sub_quantizers = Some(4);
    config.trainer.iterations = 10;
    PipelineDriver::default().run(&config).unwrap();

    let codebook = CodebookStore.read(&config.destination, 0).unwrap();
    let pq = ProductQuantizer::from_codebook(&codebook).unwrap();
    let set = TrainingSet::new(data, 16).unwrap();

    let codes = pq.encode(set.vector(0)).unwrap();
    assert_eq!(codes.len(), 4);
    assert_eq!(pq.decode(&codes).unwrap().len(), 16);

    let mut mean = vec![0.0f32; 16];
    for v in set.vectors() {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x / set.len() as f32;
        }
    }
    let variance: f32 = set
        .vectors()
        .map(|v| v.iter().zip(&mean).map(|(x, m)| (x - m) * (x - m)).sum::<f32>())
        .sum::<f32>()
        / set.len() as f32;

    let mse = pq.reconstruction_error(&set).unwrap();
    assert!(mse < 0.25 * variance, "reconstruction error {} vs variance {}", mse, variance);
}
