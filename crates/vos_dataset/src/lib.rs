//! Training-sample generation for semi-supervised video object segmentation.
//!
//! This crate provides utilities for:
//! - Indexing annotated video sequences from disk or memory
//! - Gap-based temporal sampling of reference/previous/current frames
//! - Object-id consistency between the reference and later frames
//! - Compositing two clips into one multi-object sample
//! - Tuple-level augmentation and index validation
//! - Burn-compatible collation (feature `burn-runtime`)

// Module declarations
pub mod assembler;
pub mod aug;
pub mod config;
pub mod dataset;
pub mod frame;
pub mod index;
pub mod loader;
pub mod merge;
pub mod sampler;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod batch;

// Re-export public API
pub use assembler::SampleAssembler;
pub use aug::{SampleTransform, TransformPipeline, TransformPipelineBuilder};
pub use config::DatasetConfig;
pub use dataset::TrainingDataset;
pub use frame::{Frame, FrameAccessor};
pub use index::{SequenceEntry, SequenceIndex};
pub use loader::{read_split, DirectoryLoader, FrameLoader, MemoryLoader};
pub use merge::ClipMerger;
pub use sampler::{derive_indices, reflect_index, GapChain, TemporalSampler};
pub use types::*;
pub use validation::{
    summarize_index, validate_summary, IndexSummary, ValidationOutcome, ValidationReport,
    ValidationThresholds,
};

#[cfg(feature = "burn-runtime")]
pub use batch::{collate_clips, ClipBatch};
