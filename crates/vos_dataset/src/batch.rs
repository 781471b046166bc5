//! Collating sample tuples into Burn tensors.

use crate::types::{DatasetResult, SampleTuple, VosDatasetError};
use ndarray::Axis;

pub struct ClipBatch<B: burn::tensor::backend::Backend> {
    /// `[N, T, 3, H, W]`, scaled to 0..1.
    pub images: burn::tensor::Tensor<B, 5>,
    /// `[N, T, H, W]` object ids as floats; ignore pixels stay 255.
    pub labels: burn::tensor::Tensor<B, 4>,
    /// `[N, T]`, 1.0 where the position carries a real annotation.
    pub labeled: burn::tensor::Tensor<B, 2>,
    /// `[N]`
    pub obj_num: burn::tensor::Tensor<B, 1>,
}

/// Stack `samples` into one batch. Every tuple must have the same number of
/// positions and every frame the same size.
pub fn collate_clips<B: burn::tensor::backend::Backend>(
    samples: &[SampleTuple],
    device: &B::Device,
) -> DatasetResult<ClipBatch<B>> {
    let first = samples
        .first()
        .ok_or_else(|| VosDatasetError::Other("cannot collate an empty batch".to_string()))?;
    let positions = first.positions();
    let (height, width) = first.reference.dims();
    let batch_len = samples.len();
    let plane = height * width;

    let mut images_buf: Vec<f32> = Vec::with_capacity(batch_len * positions * 3 * plane);
    let mut labels_buf: Vec<f32> = Vec::with_capacity(batch_len * positions * plane);
    let mut labeled_buf: Vec<f32> = Vec::with_capacity(batch_len * positions);
    let mut obj_buf: Vec<f32> = Vec::with_capacity(batch_len);

    for sample in samples {
        if sample.positions() != positions || sample.labeled.len() != positions {
            return Err(VosDatasetError::ShapeMismatch {
                context: "collate positions",
                expected: vec![positions],
                found: vec![sample.positions(), sample.labeled.len()],
            });
        }
        for frame in sample.frames() {
            if frame.dims() != (height, width) || frame.image.dim() != (height, width, 3) {
                return Err(VosDatasetError::ShapeMismatch {
                    context: "collate frame",
                    expected: vec![height, width, 3],
                    found: frame.image.shape().to_vec(),
                });
            }
            for channel in frame.image.axis_iter(Axis(2)) {
                images_buf.extend(channel.iter().map(|v| v / 255.0));
            }
            labels_buf.extend(frame.label.iter().map(|&v| f32::from(v)));
        }
        labeled_buf.extend(sample.labeled.iter().map(|&l| if l { 1.0 } else { 0.0 }));
        obj_buf.push(sample.meta.obj_num as f32);
    }

    let images = burn::tensor::Tensor::<B, 1>::from_floats(images_buf.as_slice(), device)
        .reshape([batch_len, positions, 3, height, width]);
    let labels = burn::tensor::Tensor::<B, 1>::from_floats(labels_buf.as_slice(), device)
        .reshape([batch_len, positions, height, width]);
    let labeled = burn::tensor::Tensor::<B, 1>::from_floats(labeled_buf.as_slice(), device)
        .reshape([batch_len, positions]);
    let obj_num = burn::tensor::Tensor::<B, 1>::from_floats(obj_buf.as_slice(), device);
    tracing::trace!(batch_len, positions, height, width, "collated clip batch");

    Ok(ClipBatch {
        images,
        labels,
        labeled,
        obj_num,
    })
}
