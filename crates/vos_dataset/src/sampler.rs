//! Gap-based temporal sampling of reference and current frame positions.
//!
//! A training window is a reference frame followed by `seq_len - 1` frames,
//! each reached from the previous one by a random positive gap. Every check
//! here runs in a bounded retry loop and falls back to a deterministic answer
//! when the budget runs out; callers see which path was taken through
//! [`Attempt::succeeded`].

use crate::config::DatasetConfig;
use crate::frame::FrameAccessor;
use crate::index::SequenceEntry;
use crate::types::{Attempt, DatasetResult, BACKGROUND_ID, IGNORE_ID};
use rand::{Rng, RngCore};
use std::collections::HashSet;

/// Reflections applied before `reflect_index` gives up and clamps.
pub const MAX_REFLECTIONS: usize = 64;

/// Ordered temporal offsets between consecutive sampled frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapChain {
    pub gaps: Vec<usize>,
    pub total: usize,
}

impl GapChain {
    pub fn new(gaps: Vec<usize>) -> Self {
        let total = gaps.iter().sum();
        Self { gaps, total }
    }

    /// Unit gaps covering at most `remaining` frames, zero-padded to `count`.
    pub fn unit_fallback(count: usize, remaining: usize) -> Self {
        let mut gaps = vec![1; count.min(remaining)];
        gaps.resize(count, 0);
        Self::new(gaps)
    }
}

#[derive(Debug, Clone)]
pub struct TemporalSampler {
    pub seq_len: usize,
    pub rand_gap: usize,
    pub max_total_gap: usize,
    pub gap_max_try: usize,
    pub ref_max_try: usize,
    pub min_fg_pixels: usize,
    pub ignore_thresh: f32,
}

impl Default for TemporalSampler {
    fn default() -> Self {
        Self::from_config(&DatasetConfig::default())
    }
}

impl TemporalSampler {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            seq_len: cfg.seq_len,
            rand_gap: cfg.rand_gap,
            max_total_gap: cfg.max_total_gap,
            gap_max_try: cfg.gap_max_try,
            ref_max_try: cfg.ref_max_try,
            min_fg_pixels: cfg.min_fg_pixels,
            ignore_thresh: cfg.ignore_thresh,
        }
    }

    /// Number of gaps in a chain for this window length.
    pub fn gap_count(&self) -> usize {
        self.seq_len.saturating_sub(1)
    }

    /// Pick an annotated frame (index into `seq.labels`) to serve as reference.
    ///
    /// Candidates come from `[0, labels - seq_len)`. A candidate is rejected
    /// when it has fewer than `min_fg_pixels` non-zero pixels or when its
    /// ignore/foreground ratio exceeds `ignore_thresh`. After `ref_max_try`
    /// draws the last candidate is returned as-is.
    pub fn select_reference(
        &self,
        seq: &SequenceEntry,
        accessor: &FrameAccessor,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<Attempt<usize>> {
        let search_range = seq.labels.len().saturating_sub(self.seq_len);
        if search_range <= 1 {
            return Ok(Attempt::fallback(0));
        }
        let mut rejected = HashSet::new();
        let mut candidate = 0;
        for _ in 0..self.ref_max_try {
            candidate = rng.random_range(0..search_range);
            if rejected.contains(&candidate) {
                continue;
            }
            let label = accessor.read_label_at(seq, candidate)?;
            let foreground = label.iter().filter(|&&v| v != BACKGROUND_ID).count();
            let ignored = label.iter().filter(|&&v| v == IGNORE_ID).count();
            if self.reference_acceptable(foreground, ignored) {
                return Ok(Attempt::ok(candidate));
            }
            rejected.insert(candidate);
        }
        tracing::debug!(
            sequence = %seq.name,
            candidate,
            tries = self.ref_max_try,
            "reference selection exhausted; keeping last candidate"
        );
        Ok(Attempt::fallback(candidate))
    }

    fn reference_acceptable(&self, foreground: usize, ignored: usize) -> bool {
        if foreground < self.min_fg_pixels || foreground == 0 {
            return false;
        }
        (ignored as f32 / foreground as f32) <= self.ignore_thresh
    }

    /// Draw `count` gaps uniform in `[1, rand_gap]`, redrawing the whole chain
    /// while its sum exceeds `max_total_gap`.
    pub fn sample_gaps(&self, count: usize, rng: &mut dyn RngCore) -> Attempt<GapChain> {
        let upper = self.rand_gap.max(1);
        let mut chain = GapChain::new(Vec::new());
        for _ in 0..self.gap_max_try.max(1) {
            chain = GapChain::new((0..count).map(|_| rng.random_range(1..=upper)).collect());
            if chain.total <= self.max_total_gap {
                return Attempt::ok(chain);
            }
        }
        Attempt::fallback(chain)
    }

    /// Gap chain starting at image position `start` whose landing frame is in
    /// range and annotated. Falls back to unit gaps when retries run out.
    pub fn derive_valid_gaps(
        &self,
        seq: &SequenceEntry,
        start: usize,
        rng: &mut dyn RngCore,
    ) -> Attempt<GapChain> {
        let count = self.gap_count();
        let lands_on_label =
            |chain: &GapChain| start + chain.total < seq.images.len() && seq.has_label(start + chain.total);

        let chain = self.sample_gaps(count, rng).value;
        if lands_on_label(&chain) {
            return Attempt::ok(chain);
        }
        for _ in 0..self.gap_max_try {
            let chain = self.sample_gaps(count, rng).value;
            if lands_on_label(&chain) {
                return Attempt::ok(chain);
            }
        }
        let remaining = seq.images.len().saturating_sub(start);
        tracing::debug!(
            sequence = %seq.name,
            start,
            remaining,
            "gap sampling exhausted; using unit gaps"
        );
        Attempt::fallback(GapChain::unit_fallback(count, remaining))
    }
}

/// Frame positions reached by walking `gaps` from `start`, each folded into
/// `[0, len)` by reflection.
pub fn derive_indices(start: usize, gaps: &[usize], len: usize) -> Vec<usize> {
    let mut now = start as i64;
    gaps.iter()
        .map(|&gap| {
            now += gap as i64;
            reflect_index(now, len)
        })
        .collect()
}

/// Fold `index` into `[0, len)`: negatives reflect to `-index`, overshoots to
/// `2 * (len - 1) - index`, repeated until in range. Clamps after
/// [`MAX_REFLECTIONS`] bounces.
pub fn reflect_index(index: i64, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let last = len as i64 - 1;
    let mut idx = index;
    for _ in 0..MAX_REFLECTIONS {
        if idx < 0 {
            idx = -idx;
        } else if idx > last {
            idx = 2 * last - idx;
        } else {
            return idx as usize;
        }
    }
    tracing::debug!(index, len, "reflection did not settle; clamping");
    idx.clamp(0, last) as usize
}
