//! Building reference/previous/current tuples with consistent object ids.

use crate::config::DatasetConfig;
use crate::frame::FrameAccessor;
use crate::index::SequenceEntry;
use crate::sampler::{derive_indices, TemporalSampler};
use crate::types::{
    object_ids, Attempt, DatasetResult, FramePair, Label, SampleDiagnostics, SampleMeta,
    SampleTuple, VosDatasetError, IGNORE_ID,
};
use ndarray::Array2;
use rand::{Rng, RngCore};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct SampleAssembler {
    pub sampler: TemporalSampler,
    pub consistency_max_try: usize,
    pub rand_reverse: bool,
}

impl Default for SampleAssembler {
    fn default() -> Self {
        Self::from_config(&DatasetConfig::default())
    }
}

/// One sampled window before the consistency verdict.
struct Draft {
    tuple: SampleTuple,
    consistent: bool,
}

impl SampleAssembler {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            sampler: TemporalSampler::from_config(cfg),
            consistency_max_try: cfg.consistency_max_try,
            rand_reverse: cfg.rand_reverse,
        }
    }

    /// Sample a tuple from `seq` in which every object of the previous and
    /// current frames also appears in the reference frame.
    ///
    /// Windows that break this are redrawn up to `consistency_max_try` times;
    /// after that the last window is returned with `succeeded == false`.
    pub fn assemble(
        &self,
        seq: &SequenceEntry,
        accessor: &FrameAccessor,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<Attempt<SampleTuple>> {
        let reversed = self.rand_reverse && rng.random_bool(0.5);
        let flipped;
        let seq = if reversed {
            flipped = seq.reversed();
            &flipped
        } else {
            seq
        };

        if !seq.is_annotated() {
            let mut tuple = self.unannotated(seq, accessor, rng)?;
            tuple.diagnostics.reversed = reversed;
            return Ok(Attempt::ok(tuple));
        }

        let tries = self.consistency_max_try.max(1);
        let mut last = None;
        for attempt in 1..=tries {
            let Draft {
                mut tuple,
                consistent,
            } = self.draft(seq, accessor, rng)?;
            tuple.diagnostics.consistency_tries = attempt;
            tuple.diagnostics.reversed = reversed;
            if consistent {
                return Ok(Attempt::ok(tuple));
            }
            last = Some(tuple);
        }

        tracing::warn!(
            sequence = %seq.name,
            tries,
            "consistency retries exhausted; accepting tuple with objects missing from reference"
        );
        last.map(Attempt::fallback)
            .ok_or_else(|| VosDatasetError::Other("no sampling attempt was made".to_string()))
    }

    fn draft(
        &self,
        seq: &SequenceEntry,
        accessor: &FrameAccessor,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<Draft> {
        let reference_pick = self.sampler.select_reference(seq, accessor, rng)?;
        let reference = accessor.read_reference(seq, reference_pick.value)?;
        let start = seq
            .image_position(&reference.stem)
            .ok_or_else(|| VosDatasetError::MissingFrame {
                sequence: seq.name.clone(),
                stem: reference.stem.clone(),
            })?;
        let ref_label = reference.label.into_array().ok_or_else(|| VosDatasetError::MissingLabel {
            sequence: seq.name.clone(),
            frame: reference.stem.clone(),
        })?;

        let gaps = self.sampler.derive_valid_gaps(seq, start, rng);
        let indices = derive_indices(start, &gaps.value.gaps, seq.images.len());

        let ref_ids = object_ids(&ref_label);
        let obj_num = ref_ids.last().copied().map(usize::from).unwrap_or(0);
        let mut later_ids = BTreeSet::new();
        let mut frames = Vec::with_capacity(indices.len() + 1);
        let mut labeled = Vec::with_capacity(indices.len() + 1);
        let fill_dim = ref_label.dim();
        frames.push(FramePair::new(reference.image, ref_label));
        labeled.push(true);

        for idx in indices {
            let frame = accessor.read(seq, idx)?;
            let label = match frame.label {
                Label::Present(label) => {
                    later_ids.extend(object_ids(&label));
                    labeled.push(true);
                    label
                }
                Label::Absent => {
                    labeled.push(false);
                    Array2::from_elem(fill_dim, IGNORE_ID)
                }
            };
            frames.push(FramePair::new(frame.image, label));
        }

        let consistent = later_ids.is_subset(&ref_ids);
        let meta = SampleMeta {
            seq_name: seq.name.clone(),
            frame_num: seq.images.len(),
            obj_num,
            dense_seq: false,
        };
        let diagnostics = SampleDiagnostics {
            reference_valid: reference_pick.succeeded,
            gaps_valid: gaps.succeeded,
            consistent,
            ..SampleDiagnostics::default()
        };
        let tuple = SampleTuple::from_frames(frames, meta, labeled, diagnostics)?;
        Ok(Draft { tuple, consistent })
    }

    /// Degenerate window for a sequence with no annotated frames: image 0 as
    /// reference with an all-background label and no objects.
    fn unannotated(
        &self,
        seq: &SequenceEntry,
        accessor: &FrameAccessor,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<SampleTuple> {
        tracing::debug!(sequence = %seq.name, "sequence has no labels; sampling degenerate tuple");
        let reference = accessor.read(seq, 0)?;
        let (height, width, _) = reference.image.dim();
        let gaps = self.sampler.derive_valid_gaps(seq, 0, rng);
        let indices = derive_indices(0, &gaps.value.gaps, seq.images.len());

        let mut frames = Vec::with_capacity(indices.len() + 1);
        let mut labeled = Vec::with_capacity(indices.len() + 1);
        frames.push(FramePair::new(reference.image, Array2::zeros((height, width))));
        labeled.push(false);
        for idx in indices {
            let frame = accessor.read(seq, idx)?;
            frames.push(FramePair::new(
                frame.image,
                Array2::from_elem((height, width), IGNORE_ID),
            ));
            labeled.push(false);
        }
        let meta = SampleMeta {
            seq_name: seq.name.clone(),
            frame_num: seq.images.len(),
            obj_num: 0,
            dense_seq: false,
        };
        let diagnostics = SampleDiagnostics {
            reference_valid: false,
            gaps_valid: gaps.succeeded,
            consistent: true,
            consistency_tries: 1,
            ..SampleDiagnostics::default()
        };
        SampleTuple::from_frames(frames, meta, labeled, diagnostics)
    }
}
