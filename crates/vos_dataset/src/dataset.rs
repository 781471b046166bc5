//! Training dataset facade: index → tuple → optional merge.

use crate::assembler::SampleAssembler;
use crate::aug::SampleTransform;
use crate::config::DatasetConfig;
use crate::frame::FrameAccessor;
use crate::index::{SequenceEntry, SequenceIndex};
use crate::loader::FrameLoader;
use crate::merge::ClipMerger;
use crate::types::{DatasetResult, SampleTuple, VosDatasetError};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Indexable source of training tuples over a set of named sequences.
///
/// Index `i` maps to sequence `i % sequences`; each sequence appears
/// `repeat_time` times per epoch. The sequence index is an immutable snapshot
/// swapped atomically by [`TrainingDataset::reload`], so concurrent samplers
/// always see a complete listing.
pub struct TrainingDataset {
    loader: Arc<dyn FrameLoader>,
    names: Vec<String>,
    index: RwLock<Arc<SequenceIndex>>,
    config: DatasetConfig,
    assembler: SampleAssembler,
    merger: ClipMerger,
    accessor: FrameAccessor,
    transform: Option<Arc<dyn SampleTransform>>,
    seed: u64,
    epoch: AtomicU64,
}

impl TrainingDataset {
    pub fn new(
        loader: Arc<dyn FrameLoader>,
        names: Vec<String>,
        config: DatasetConfig,
    ) -> DatasetResult<Self> {
        config.validate()?;
        let index = SequenceIndex::load(loader.as_ref(), &names)?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        tracing::info!(
            sequences = index.len(),
            requested = names.len(),
            seed,
            config = %config.describe(),
            "training dataset ready"
        );
        Ok(Self {
            accessor: FrameAccessor::new(loader.clone(), config.swap_channels),
            assembler: SampleAssembler::from_config(&config),
            merger: ClipMerger::from_config(&config),
            index: RwLock::new(Arc::new(index)),
            loader,
            names,
            config,
            transform: None,
            seed,
            epoch: AtomicU64::new(0),
        })
    }

    /// Apply `transform` to each tuple before it is merged.
    pub fn with_transform(mut self, transform: Arc<dyn SampleTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current index snapshot.
    pub fn index(&self) -> Arc<SequenceIndex> {
        self.index.read().clone()
    }

    pub fn len(&self) -> usize {
        self.index.read().len() * self.config.repeat_time
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Select the per-index random stream used by [`TrainingDataset::get`].
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    /// Re-list every sequence through the loader and swap in the new index.
    /// Samplers already running keep the snapshot they started with.
    pub fn reload(&self) -> DatasetResult<()> {
        let fresh = SequenceIndex::load(self.loader.as_ref(), &self.names)?;
        let count = fresh.len();
        *self.index.write() = Arc::new(fresh);
        tracing::info!(sequences = count, "sequence index reloaded");
        Ok(())
    }

    /// Sample `index` with a generator derived from the dataset seed, the
    /// current epoch and the index.
    pub fn get(&self, index: usize) -> DatasetResult<SampleTuple> {
        let mut rng = StdRng::seed_from_u64(stream_seed(self.seed, self.epoch(), index));
        self.sample_with(index, &mut rng)
    }

    /// Sample `index` drawing all randomness from `rng`.
    pub fn sample_with(&self, index: usize, rng: &mut dyn RngCore) -> DatasetResult<SampleTuple> {
        let snapshot = self.index();
        let count = snapshot.len();
        if count == 0 {
            return Err(VosDatasetError::Other("dataset has no sequences".to_string()));
        }
        let position = index % count;
        let first_seq = snapshot.by_position(position)?;
        let first = self.clip(&first_seq, rng)?;

        if !self.should_merge(&first, rng) {
            return Ok(first);
        }
        let partner = partner_position(position, count, rng);
        let second_seq = snapshot.by_position(partner)?;
        let second = self.clip(&second_seq, rng)?;
        if first.reference.dims() != second.reference.dims() {
            tracing::warn!(
                first = %first.meta.seq_name,
                second = %second.meta.seq_name,
                "frame sizes differ; skipping merge"
            );
            return Ok(first);
        }
        self.merger.merge(first, second, rng)
    }

    /// Samples for `indices` produced in parallel, returned in input order.
    pub fn sample_batch(&self, indices: &[usize]) -> DatasetResult<Vec<SampleTuple>> {
        indices.par_iter().map(|&i| self.get(i)).collect()
    }

    fn clip(&self, seq: &SequenceEntry, rng: &mut dyn RngCore) -> DatasetResult<SampleTuple> {
        let tuple = self.assembler.assemble(seq, &self.accessor, rng)?.value;
        match &self.transform {
            Some(transform) => transform.apply(tuple, rng),
            None => Ok(tuple),
        }
    }

    /// Clips without objects are always merged; others with `merge_prob`.
    fn should_merge(&self, first: &SampleTuple, rng: &mut dyn RngCore) -> bool {
        self.config.dynamic_merge
            && !first.meta.dense_seq
            && (first.meta.obj_num == 0 || rng.random_range(0.0..1.0) < self.config.merge_prob)
    }
}

/// A sequence position other than `position`, or `position` itself when it
/// is the only one.
fn partner_position(position: usize, count: usize, rng: &mut dyn RngCore) -> usize {
    if count <= 1 {
        return position;
    }
    loop {
        let other = rng.random_range(0..count);
        if other != position {
            return other;
        }
    }
}

/// SplitMix64 finaliser over the seed, epoch and index.
fn stream_seed(seed: u64, epoch: u64, index: usize) -> u64 {
    let mut z = seed
        ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
