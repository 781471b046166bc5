//! Per-tuple augmentation applied before clips are merged.

use crate::types::{DatasetResult, FramePair, SampleTuple, VosDatasetError};
use image::imageops::FilterType;
use ndarray::{Array2, Array3, Axis};
use rand::{Rng, RngCore};

/// Transformation applied to every tuple the dataset produces.
///
/// Geometric changes must be applied identically to all frames of a tuple so
/// object ids keep matching across positions.
pub trait SampleTransform: Send + Sync {
    fn apply(&self, tuple: SampleTuple, rng: &mut dyn RngCore) -> DatasetResult<SampleTuple>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformPipeline {
    /// Resize every frame to this (width, height).
    pub target_size: Option<(u32, u32)>,
    /// Probability of flipping the whole tuple horizontally.
    pub flip_horizontal_prob: f32,
    /// Probability of jittering brightness/contrast, drawn per frame.
    pub color_jitter_prob: f32,
    /// Max jitter scale for brightness/contrast.
    pub color_jitter_strength: f32,
}

impl TransformPipeline {
    pub fn builder() -> TransformPipelineBuilder {
        TransformPipelineBuilder::new()
    }

    pub fn is_identity(&self) -> bool {
        self.target_size.is_none()
            && self.flip_horizontal_prob <= 0.0
            && (self.color_jitter_prob <= 0.0 || self.color_jitter_strength <= 0.0)
    }

    pub fn describe(&self) -> String {
        let ts = self
            .target_size
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "target_size={} flip_p={:.2} color_jitter_p={:.2} strength={:.2}",
            ts, self.flip_horizontal_prob, self.color_jitter_prob, self.color_jitter_strength
        )
    }
}

impl SampleTransform for TransformPipeline {
    fn apply(&self, mut tuple: SampleTuple, rng: &mut dyn RngCore) -> DatasetResult<SampleTuple> {
        if let Some((w, h)) = self.target_size {
            for frame in tuple.frames_mut() {
                resize_frame(frame, w, h)?;
            }
        }
        let flip = self.flip_horizontal_prob > 0.0
            && rng.random_range(0.0..1.0) < self.flip_horizontal_prob;
        for frame in tuple.frames_mut() {
            if flip {
                hflip(frame);
            }
            maybe_jitter(
                &mut frame.image,
                self.color_jitter_prob,
                self.color_jitter_strength,
                rng,
            );
        }
        Ok(tuple)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

/// Images are resampled bilinearly, labels with nearest-neighbour so ids are
/// never blended.
fn resize_frame(frame: &mut FramePair, width: u32, height: u32) -> DatasetResult<()> {
    let (h, w) = frame.dims();
    if (w as u32, h as u32) == (width, height) {
        return Ok(());
    }
    let pixels: Vec<f32> = frame.image.iter().copied().collect();
    let src = image::Rgb32FImage::from_raw(w as u32, h as u32, pixels).ok_or_else(|| {
        VosDatasetError::ShapeMismatch {
            context: "resize image",
            expected: vec![h, w, 3],
            found: frame.image.shape().to_vec(),
        }
    })?;
    let resized = image::imageops::resize(&src, width, height, FilterType::Triangle);
    frame.image = Array3::from_shape_vec((height as usize, width as usize, 3), resized.into_raw())
        .map_err(|e| VosDatasetError::Other(format!("resize image: {e}")))?;

    let ids: Vec<u8> = frame.label.iter().copied().collect();
    let src = image::GrayImage::from_raw(w as u32, h as u32, ids).ok_or_else(|| {
        VosDatasetError::ShapeMismatch {
            context: "resize label",
            expected: vec![h, w],
            found: frame.label.shape().to_vec(),
        }
    })?;
    let resized = image::imageops::resize(&src, width, height, FilterType::Nearest);
    frame.label = Array2::from_shape_vec((height as usize, width as usize), resized.into_raw())
        .map_err(|e| VosDatasetError::Other(format!("resize label: {e}")))?;
    Ok(())
}

fn hflip(frame: &mut FramePair) {
    frame.image.invert_axis(Axis(1));
    frame.label.invert_axis(Axis(1));
}

pub(crate) fn maybe_jitter(
    img: &mut Array3<f32>,
    prob: f32,
    strength: f32,
    rng: &mut dyn RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    img.mapv_inplace(|px| {
        let v = px / 255.0;
        let v = ((v - 0.5) * contrast + 0.5) * bright;
        v.clamp(0.0, 1.0) * 255.0
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SampleDiagnostics, SampleMeta};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tuple(height: usize, width: usize) -> SampleTuple {
        let frames = (0..3u8)
            .map(|k| {
                let mut label = Array2::zeros((height, width));
                label[[0, 0]] = k + 1;
                let image = Array3::from_shape_fn((height, width, 3), |(_, c, _)| c as f32);
                FramePair::new(image, label)
            })
            .collect();
        let meta = SampleMeta {
            seq_name: "clip".into(),
            frame_num: 3,
            obj_num: 1,
            dense_seq: false,
        };
        SampleTuple::from_frames(frames, meta, vec![true; 3], SampleDiagnostics::default())
            .unwrap()
    }

    #[test]
    fn flip_applies_to_every_frame() {
        let pipeline = TransformPipeline::builder().flip_horizontal_prob(1.0).build();
        let mut rng = StdRng::seed_from_u64(0);
        let out = pipeline.apply(tuple(2, 4), &mut rng).unwrap();
        for (k, frame) in out.frames().enumerate() {
            assert_eq!(frame.label[[0, 3]], k as u8 + 1);
            assert_eq!(frame.label[[0, 0]], 0);
            assert_eq!(frame.image[[0, 0, 0]], 3.0);
        }
    }

    #[test]
    fn resize_keeps_label_ids_discrete() {
        let mut t = tuple(4, 4);
        t.reference.label.fill(7);
        t.reference.label[[0, 0]] = 1;
        let pipeline = TransformPipeline::builder().target_size(Some((8, 6))).build();
        let mut rng = StdRng::seed_from_u64(0);
        let out = pipeline.apply(t, &mut rng).unwrap();
        for frame in out.frames() {
            assert_eq!(frame.dims(), (6, 8));
            assert_eq!(frame.image.dim(), (6, 8, 3));
        }
        assert!(out.reference.label.iter().all(|&v| v == 1 || v == 7));
    }

    #[test]
    fn jitter_stays_on_byte_scale_and_leaves_labels() {
        let pipeline = TransformPipeline::builder().color_jitter(1.0, 0.5).build();
        let mut t = tuple(2, 2);
        t.reference.image.fill(250.0);
        let labels_before: Vec<_> = t.frames().map(|f| f.label.clone()).collect();
        let mut rng = StdRng::seed_from_u64(9);
        let out = pipeline.apply(t, &mut rng).unwrap();
        for (frame, before) in out.frames().zip(&labels_before) {
            assert!(frame.image.iter().all(|&v| (0.0..=255.0).contains(&v)));
            assert_eq!(&frame.label, before);
        }
    }

    #[test]
    fn default_pipeline_is_identity() {
        let pipeline = TransformPipeline::default();
        assert!(pipeline.is_identity());
        let t = tuple(2, 3);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pipeline.apply(t.clone(), &mut rng).unwrap(), t);
        assert!(pipeline.describe().contains("target_size=none"));
    }
}
