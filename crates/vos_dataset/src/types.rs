//! Core types, error definitions, and sample structures for vos_dataset.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Pixel value excluded from losses and consistency checks.
pub const IGNORE_ID: u8 = 255;
/// Pixel value of the background object.
pub const BACKGROUND_ID: u8 = 0;

pub type DatasetResult<T> = Result<T, VosDatasetError>;

#[derive(Debug, Error)]
pub enum VosDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("png decode error at {path}: {source}")]
    Png {
        path: PathBuf,
        #[source]
        source: png::DecodingError,
    },
    #[error("sequence {sequence}: frame {frame} has no label")]
    MissingLabel { sequence: String, frame: String },
    #[error("sequence {sequence}: no image frame with stem {stem}")]
    MissingFrame { sequence: String, stem: String },
    #[error("unknown sequence {0}")]
    UnknownSequence(String),
    #[error("invalid label map at {path}: {msg}")]
    InvalidLabel { path: PathBuf, msg: String },
    #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("config parse error at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Other(String),
}

/// Per-frame label: either the annotation read from the loader or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Present(Array2<u8>),
    Absent,
}

impl Label {
    pub fn is_present(&self) -> bool {
        matches!(self, Label::Present(_))
    }

    pub fn into_array(self) -> Option<Array2<u8>> {
        match self {
            Label::Present(arr) => Some(arr),
            Label::Absent => None,
        }
    }
}

/// Outcome of a bounded retry loop. `succeeded == false` means the value is
/// the best-effort fallback, not one that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt<T> {
    pub value: T,
    pub succeeded: bool,
}

impl<T> Attempt<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            succeeded: true,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            succeeded: false,
        }
    }
}

/// One (image, label) pair of a sample tuple. Unlabeled frames carry an
/// all-ignore label so every position has a dense label array.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    /// H×W×3, values on the decoded 0..255 scale.
    pub image: Array3<f32>,
    /// H×W object ids.
    pub label: Array2<u8>,
}

impl FramePair {
    pub fn new(image: Array3<f32>, label: Array2<u8>) -> Self {
        Self { image, label }
    }

    /// (height, width) of the label map.
    pub fn dims(&self) -> (usize, usize) {
        self.label.dim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub seq_name: String,
    /// Number of image frames in the source sequence.
    pub frame_num: usize,
    pub obj_num: usize,
    pub dense_seq: bool,
}

/// Which fallbacks were taken while building a tuple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDiagnostics {
    pub reference_valid: bool,
    pub gaps_valid: bool,
    pub consistent: bool,
    pub consistency_tries: usize,
    pub reversed: bool,
    pub merged: Option<MergeReport>,
}

/// Bookkeeping from one merge call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Composited ids kept, in output channel order (index 0 is background).
    pub selected_ids: Vec<u16>,
    /// One-hot channel count applied at each position, reference first.
    pub channel_counts: Vec<usize>,
    /// Largest object id produced by compositing, ignoring sentinel pixels.
    pub max_composited_id: u16,
    /// True when more than `max_obj_n` objects survived and a random subset was kept.
    pub truncated: bool,
}

/// A training tuple: reference frame, previous frame and the current frames.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTuple {
    pub reference: FramePair,
    pub previous: FramePair,
    pub current: Vec<FramePair>,
    pub meta: SampleMeta,
    /// Annotation flags per position, reference first.
    pub labeled: Vec<bool>,
    pub diagnostics: SampleDiagnostics,
}

impl SampleTuple {
    /// Number of frame positions (reference + previous + current).
    pub fn positions(&self) -> usize {
        2 + self.current.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = &FramePair> {
        std::iter::once(&self.reference)
            .chain(std::iter::once(&self.previous))
            .chain(self.current.iter())
    }

    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut FramePair> {
        std::iter::once(&mut self.reference)
            .chain(std::iter::once(&mut self.previous))
            .chain(self.current.iter_mut())
    }

    /// Rebuild a tuple from frames laid out reference first.
    pub(crate) fn from_frames(
        mut frames: Vec<FramePair>,
        meta: SampleMeta,
        labeled: Vec<bool>,
        diagnostics: SampleDiagnostics,
    ) -> DatasetResult<Self> {
        if frames.len() < 2 {
            return Err(VosDatasetError::Other(format!(
                "sample tuple needs at least 2 frames, got {}",
                frames.len()
            )));
        }
        let current = frames.split_off(2);
        let previous = frames.pop().ok_or_else(|| {
            VosDatasetError::Other("sample tuple lost its previous frame".to_string())
        })?;
        let reference = frames.pop().ok_or_else(|| {
            VosDatasetError::Other("sample tuple lost its reference frame".to_string())
        })?;
        Ok(Self {
            reference,
            previous,
            current,
            meta,
            labeled,
            diagnostics,
        })
    }

    pub(crate) fn into_frames(self) -> (Vec<FramePair>, SampleMeta, Vec<bool>, SampleDiagnostics) {
        let mut frames = Vec::with_capacity(self.positions());
        frames.push(self.reference);
        frames.push(self.previous);
        frames.extend(self.current);
        (frames, self.meta, self.labeled, self.diagnostics)
    }
}

/// Distinct object ids in a label map, excluding background and the ignore sentinel.
pub fn object_ids(label: &Array2<u8>) -> std::collections::BTreeSet<u8> {
    label
        .iter()
        .copied()
        .filter(|&v| v != BACKGROUND_ID && v != IGNORE_ID)
        .collect()
}
