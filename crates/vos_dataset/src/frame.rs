//! Resolving frame positions to decoded image and label arrays.

use crate::index::SequenceEntry;
use crate::loader::{frame_stem, FrameLoader};
use crate::types::{DatasetResult, Label, VosDatasetError};
use ndarray::{Array2, Array3, Axis};
use std::sync::Arc;

/// A decoded frame: image always, label only when annotated.
#[derive(Debug, Clone)]
pub struct Frame {
    pub stem: String,
    pub image: Array3<f32>,
    pub label: Label,
}

/// Reads frames of a sequence through a [`FrameLoader`].
#[derive(Clone)]
pub struct FrameAccessor {
    loader: Arc<dyn FrameLoader>,
    swap_channels: bool,
}

impl FrameAccessor {
    pub fn new(loader: Arc<dyn FrameLoader>, swap_channels: bool) -> Self {
        Self {
            loader,
            swap_channels,
        }
    }

    /// Image frame `index` of `seq`, with its label if the stem is annotated.
    pub fn read(&self, seq: &SequenceEntry, index: usize) -> DatasetResult<Frame> {
        let image_id = seq.images.get(index).ok_or_else(|| {
            VosDatasetError::Other(format!(
                "sequence {}: image index {index} out of range ({} frames)",
                seq.name,
                seq.images.len()
            ))
        })?;
        let image = self.read_image(&seq.name, image_id)?;
        let label = match seq.label_for_image(index) {
            Some(label_id) => Label::Present(self.loader.read_label(&seq.name, label_id)?),
            None => Label::Absent,
        };
        Ok(Frame {
            stem: frame_stem(image_id).to_string(),
            image,
            label,
        })
    }

    /// Annotated frame `label_index` of `seq`. The label is required.
    pub fn read_reference(&self, seq: &SequenceEntry, label_index: usize) -> DatasetResult<Frame> {
        let label_id = self.label_id(seq, label_index)?;
        let stem = frame_stem(label_id);
        let image_pos = seq
            .image_position(stem)
            .ok_or_else(|| VosDatasetError::MissingFrame {
                sequence: seq.name.clone(),
                stem: stem.to_string(),
            })?;
        let image = self.read_image(&seq.name, &seq.images[image_pos])?;
        let label = self.loader.read_label(&seq.name, label_id)?;
        Ok(Frame {
            stem: stem.to_string(),
            image,
            label: Label::Present(label),
        })
    }

    /// Only the label of annotated frame `label_index`.
    pub fn read_label_at(&self, seq: &SequenceEntry, label_index: usize) -> DatasetResult<Array2<u8>> {
        let label_id = self.label_id(seq, label_index)?;
        self.loader.read_label(&seq.name, label_id)
    }

    fn label_id<'a>(&self, seq: &'a SequenceEntry, label_index: usize) -> DatasetResult<&'a str> {
        seq.labels
            .get(label_index)
            .map(String::as_str)
            .ok_or_else(|| VosDatasetError::MissingLabel {
                sequence: seq.name.clone(),
                frame: format!("#{label_index}"),
            })
    }

    fn read_image(&self, seq: &str, image_id: &str) -> DatasetResult<Array3<f32>> {
        let mut image = self.loader.read_image(seq, image_id)?;
        if image.len_of(Axis(2)) != 3 {
            return Err(VosDatasetError::ShapeMismatch {
                context: "image channels",
                expected: vec![3],
                found: vec![image.len_of(Axis(2))],
            });
        }
        if self.swap_channels {
            image.invert_axis(Axis(2));
        }
        Ok(image)
    }
}
