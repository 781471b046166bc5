//! Synthetic clip builders shared by the integration tests.
#![allow(dead_code)]

use ndarray::{s, Array2, Array3};
use vos_dataset::{FramePair, SampleDiagnostics, SampleMeta, SampleTuple};

pub type MemoryFrame = (String, Array3<f32>, Option<Array2<u8>>);

/// `height × width` label split into horizontal bands, one per id, with the
/// remaining rows left as background.
pub fn banded_label(height: usize, width: usize, bands: &[(u8, std::ops::Range<usize>)]) -> Array2<u8> {
    let mut label = Array2::zeros((height, width));
    for (id, rows) in bands {
        label.slice_mut(s![rows.clone(), ..]).fill(*id);
    }
    label
}

/// `frames` annotated frames whose label is produced by `label_for(i)`.
pub fn clip(frames: usize, size: (usize, usize), label_for: impl Fn(usize) -> Option<Array2<u8>>) -> Vec<MemoryFrame> {
    (0..frames)
        .map(|i| {
            (
                format!("{i:05}"),
                Array3::from_elem((size.0, size.1, 3), i as f32),
                label_for(i),
            )
        })
        .collect()
}

/// A tuple with the same label at every position.
pub fn tuple_with_label(label: Array2<u8>, positions: usize, fill: f32) -> SampleTuple {
    let (height, width) = label.dim();
    let frame = FramePair::new(Array3::from_elem((height, width, 3), fill), label);
    let obj_num = frame
        .label
        .iter()
        .copied()
        .filter(|&v| v != 255)
        .max()
        .map(usize::from)
        .unwrap_or(0);
    SampleTuple {
        reference: frame.clone(),
        previous: frame.clone(),
        current: vec![frame; positions - 2],
        meta: SampleMeta {
            seq_name: "synthetic".into(),
            frame_num: positions,
            obj_num,
            dense_seq: false,
        },
        labeled: vec![true; positions],
        diagnostics: SampleDiagnostics::default(),
    }
}
