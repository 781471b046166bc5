//! Dataset configuration: defaults, TOML loading, and environment overrides.

use crate::types::{DatasetResult, VosDatasetError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest `max_obj_n` whose disjoint merge band `[N+1, 2N]` stays below the
/// ignore sentinel.
pub const MAX_OBJ_LIMIT: usize = 127;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Frames per tuple: reference + previous + `seq_len - 2` current frames.
    pub seq_len: usize,
    /// Upper bound of each random gap, inclusive.
    pub rand_gap: usize,
    /// Largest accepted sum of a gap chain.
    pub max_total_gap: usize,
    /// Retry budget for gap chains.
    pub gap_max_try: usize,
    /// Retry budget for reference-frame selection.
    pub ref_max_try: usize,
    /// Minimum non-zero pixels for a reference frame.
    pub min_fg_pixels: usize,
    /// Largest ignored/foreground pixel ratio for a reference frame.
    pub ignore_thresh: f32,
    /// Retry budget for the reference-completeness check.
    pub consistency_max_try: usize,
    /// Reverse the sequence with probability 0.5 before sampling.
    pub rand_reverse: bool,
    /// Merge a second clip into the sample.
    pub dynamic_merge: bool,
    /// Probability of merging when the first clip has objects.
    pub merge_prob: f32,
    /// Cap on objects per merged tuple.
    pub max_obj_n: usize,
    /// Objects with at most this many pixels after merging are dropped.
    pub min_obj_pixels: usize,
    /// Keep ignore pixels from either source where the merge yields background.
    pub ignore_in_merge: bool,
    /// Added to the background channel before arg-max.
    pub background_bias: f32,
    /// Reverse the channel axis of decoded images (BGR <-> RGB).
    pub swap_channels: bool,
    /// Each sequence appears this many times per epoch.
    pub repeat_time: usize,
    /// Base seed for per-index generators. Random when unset.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            seq_len: 5,
            rand_gap: 3,
            max_total_gap: 99,
            gap_max_try: 10,
            ref_max_try: 40,
            min_fg_pixels: 200,
            ignore_thresh: 1.0,
            consistency_max_try: 5,
            rand_reverse: true,
            dynamic_merge: true,
            merge_prob: 0.3,
            max_obj_n: 10,
            min_obj_pixels: 100,
            ignore_in_merge: false,
            background_bias: 0.1,
            swap_channels: false,
            repeat_time: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct DatasetConfigFile {
    seq_len: Option<usize>,
    rand_gap: Option<usize>,
    max_total_gap: Option<usize>,
    gap_max_try: Option<usize>,
    ref_max_try: Option<usize>,
    min_fg_pixels: Option<usize>,
    ignore_thresh: Option<f32>,
    consistency_max_try: Option<usize>,
    rand_reverse: Option<bool>,
    merge: Option<MergeSection>,
    swap_channels: Option<bool>,
    repeat_time: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MergeSection {
    enabled: Option<bool>,
    prob: Option<f32>,
    max_obj_n: Option<usize>,
    min_obj_pixels: Option<usize>,
    ignore_in_merge: Option<bool>,
    background_bias: Option<f32>,
}

impl DatasetConfig {
    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| VosDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&raw).map_err(|source| VosDatasetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> DatasetResult<Self> {
        Self::from_toml_str(raw).map_err(|e| VosDatasetError::Config(e.to_string()))
    }

    fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: DatasetConfigFile = toml::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: DatasetConfigFile) -> Self {
        let d = Self::default();
        let merge = file.merge.unwrap_or_default();
        Self {
            seq_len: file.seq_len.unwrap_or(d.seq_len),
            rand_gap: file.rand_gap.unwrap_or(d.rand_gap),
            max_total_gap: file.max_total_gap.unwrap_or(d.max_total_gap),
            gap_max_try: file.gap_max_try.unwrap_or(d.gap_max_try),
            ref_max_try: file.ref_max_try.unwrap_or(d.ref_max_try),
            min_fg_pixels: file.min_fg_pixels.unwrap_or(d.min_fg_pixels),
            ignore_thresh: file.ignore_thresh.unwrap_or(d.ignore_thresh),
            consistency_max_try: file.consistency_max_try.unwrap_or(d.consistency_max_try),
            rand_reverse: file.rand_reverse.unwrap_or(d.rand_reverse),
            dynamic_merge: merge.enabled.unwrap_or(d.dynamic_merge),
            merge_prob: merge.prob.unwrap_or(d.merge_prob),
            max_obj_n: merge.max_obj_n.unwrap_or(d.max_obj_n),
            min_obj_pixels: merge.min_obj_pixels.unwrap_or(d.min_obj_pixels),
            ignore_in_merge: merge.ignore_in_merge.unwrap_or(d.ignore_in_merge),
            background_bias: merge.background_bias.unwrap_or(d.background_bias),
            swap_channels: file.swap_channels.unwrap_or(d.swap_channels),
            repeat_time: file.repeat_time.unwrap_or(d.repeat_time),
            seed: file.seed.or(d.seed),
        }
    }

    /// Apply `VOS_DATASET_SEED`, `VOS_DATASET_MERGE_PROB` and `VOS_DATASET_SEQ_LEN`
    /// when set and parseable.
    pub fn with_env_overrides(mut self) -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        if let Some(seed) = parse::<u64>("VOS_DATASET_SEED") {
            self.seed = Some(seed);
        }
        if let Some(prob) = parse::<f32>("VOS_DATASET_MERGE_PROB") {
            self.merge_prob = prob;
        }
        if let Some(seq_len) = parse::<usize>("VOS_DATASET_SEQ_LEN") {
            self.seq_len = seq_len;
        }
        self
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.seq_len < 2 {
            return Err(VosDatasetError::Config(format!(
                "seq_len must be at least 2 (reference + previous), got {}",
                self.seq_len
            )));
        }
        if self.rand_gap == 0 {
            return Err(VosDatasetError::Config("rand_gap must be positive".to_string()));
        }
        if self.max_obj_n == 0 || self.max_obj_n > MAX_OBJ_LIMIT {
            return Err(VosDatasetError::Config(format!(
                "max_obj_n must be in 1..={MAX_OBJ_LIMIT}, got {}",
                self.max_obj_n
            )));
        }
        if !(0.0..=1.0).contains(&self.merge_prob) {
            return Err(VosDatasetError::Config(format!(
                "merge_prob must be in [0, 1], got {}",
                self.merge_prob
            )));
        }
        if self.repeat_time == 0 {
            return Err(VosDatasetError::Config("repeat_time must be positive".to_string()));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "seq_len={} rand_gap={} max_total_gap={} min_fg={} ignore_thresh={:.2} reverse={} merge={} merge_p={:.2} max_obj={} min_obj_px={} ignore_in_merge={} repeat={} seed={}",
            self.seq_len,
            self.rand_gap,
            self.max_total_gap,
            self.min_fg_pixels,
            self.ignore_thresh,
            self.rand_reverse,
            self.dynamic_merge,
            self.merge_prob,
            self.max_obj_n,
            self.min_obj_pixels,
            self.ignore_in_merge,
            self.repeat_time,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }
}
