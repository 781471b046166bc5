//! Compositing two sample tuples into one multi-object tuple.
//!
//! The second tuple's objects are pasted over the first one. Its ids are moved
//! into the band `[N+1, 2N]` (N = `max_obj_n`) so the two id sets cannot
//! collide. The composited ids are then one-hot expanded, pruned and
//! renumbered densely from 1. The set of surviving ids is chosen once, at
//! the reference frame, and reused for every other position so an object
//! keeps the same id across the whole tuple.

use crate::config::DatasetConfig;
use crate::types::{
    DatasetResult, FramePair, MergeReport, SampleTuple, VosDatasetError, BACKGROUND_ID, IGNORE_ID,
};
use ndarray::{s, Array2, Array3, Axis, Zip};
use rand::seq::SliceRandom;
use rand::RngCore;

#[derive(Debug, Clone)]
pub struct ClipMerger {
    pub max_obj_n: usize,
    pub min_obj_pixels: usize,
    pub ignore_in_merge: bool,
    pub background_bias: f32,
}

impl Default for ClipMerger {
    fn default() -> Self {
        Self::from_config(&DatasetConfig::default())
    }
}

/// Channels of the composited one-hot universe kept for output, in output
/// order. Channel 0 (background) is always first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    channels: Vec<u16>,
    truncated: bool,
}

impl Selection {
    fn obj_num(&self) -> usize {
        self.channels.len() - 1
    }
}

impl ClipMerger {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            max_obj_n: cfg.max_obj_n,
            min_obj_pixels: cfg.min_obj_pixels,
            ignore_in_merge: cfg.ignore_in_merge,
            background_bias: cfg.background_bias,
        }
    }

    /// Size of the one-hot universe `[0, 2N]`.
    pub fn universe(&self) -> usize {
        2 * self.max_obj_n + 1
    }

    /// Paste `second` over `first` position by position.
    ///
    /// The result keeps `first`'s meta with `obj_num` replaced by the count of
    /// surviving objects (at most `max_obj_n`). A merged position counts as
    /// labeled only when both sources were labeled.
    pub fn merge(
        &self,
        first: SampleTuple,
        second: SampleTuple,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<SampleTuple> {
        if first.positions() != second.positions() {
            return Err(VosDatasetError::ShapeMismatch {
                context: "merge positions",
                expected: vec![first.positions()],
                found: vec![second.positions()],
            });
        }
        let (frames1, mut meta, labeled1, mut diagnostics) = first.into_frames();
        let (frames2, _, labeled2, _) = second.into_frames();

        let mut selection: Option<Selection> = None;
        let mut report = MergeReport::default();
        let mut merged = Vec::with_capacity(frames1.len());

        for (f1, f2) in frames1.iter().zip(&frames2) {
            check_shapes(f1, f2)?;
            let fg2 = f2.label.mapv(|v| v != BACKGROUND_ID);
            let image = composite_image(&f1.image, &f2.image, &fg2);
            let raw = composite_ids(&f1.label, &f2.label, self.max_obj_n);
            report.max_composited_id = report
                .max_composited_id
                .max(max_object_id(&f1.label, &f2.label, self.max_obj_n));

            let one_hot = one_hot(&raw, self.universe());
            let chosen = selection.get_or_insert_with(|| self.select(&one_hot, &mut *rng));
            let reduced = one_hot.select(Axis(0), &to_indices(&chosen.channels));
            report.channel_counts.push(reduced.len_of(Axis(0)));

            let mut label = argmax_with_bias(&reduced, self.background_bias);
            if self.ignore_in_merge {
                propagate_ignore(&mut label, &f1.label, &f2.label);
            }
            merged.push(FramePair::new(image, label));
        }

        let selection = selection.ok_or_else(|| {
            VosDatasetError::Other("merge received tuples without frames".to_string())
        })?;
        report.selected_ids = selection.channels.clone();
        report.truncated = selection.truncated;
        meta.obj_num = selection.obj_num().min(self.max_obj_n);
        diagnostics.merged = Some(report);

        let labeled = labeled1
            .iter()
            .zip(&labeled2)
            .map(|(&a, &b)| a && b)
            .collect();
        SampleTuple::from_frames(merged, meta, labeled, diagnostics)
    }

    /// Keep background plus every id with more than `min_obj_pixels` pixels;
    /// when more than `max_obj_n` objects survive keep a random `max_obj_n`.
    fn select(&self, one_hot: &Array3<f32>, rng: &mut dyn RngCore) -> Selection {
        let threshold = self.min_obj_pixels as f32;
        let survivors: Vec<u16> = one_hot
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(id, plane)| *id == 0 || plane.sum() > threshold)
            .map(|(id, _)| id as u16)
            .collect();
        let obj_num = survivors.len() - 1;
        if obj_num <= self.max_obj_n {
            return Selection {
                channels: survivors,
                truncated: false,
            };
        }
        let mut order: Vec<usize> = (1..=obj_num).collect();
        order.shuffle(rng);
        order.truncate(self.max_obj_n);
        let channels = std::iter::once(survivors[0])
            .chain(order.into_iter().map(|k| survivors[k]))
            .collect();
        Selection {
            channels,
            truncated: true,
        }
    }
}

fn check_shapes(f1: &FramePair, f2: &FramePair) -> DatasetResult<()> {
    if f1.label.dim() != f2.label.dim() {
        let (h1, w1) = f1.label.dim();
        let (h2, w2) = f2.label.dim();
        return Err(VosDatasetError::ShapeMismatch {
            context: "merge label",
            expected: vec![h1, w1],
            found: vec![h2, w2],
        });
    }
    if f1.image.shape() != f2.image.shape() || f1.image.dim().0 != f1.label.dim().0 {
        return Err(VosDatasetError::ShapeMismatch {
            context: "merge image",
            expected: f1.image.shape().to_vec(),
            found: f2.image.shape().to_vec(),
        });
    }
    Ok(())
}

fn to_indices(channels: &[u16]) -> Vec<usize> {
    channels.iter().map(|&c| usize::from(c)).collect()
}

/// `image1` where `fg2` is false, `image2` where it is true.
pub(crate) fn composite_image(
    image1: &Array3<f32>,
    image2: &Array3<f32>,
    fg2: &Array2<bool>,
) -> Array3<f32> {
    let mut out = image1.clone();
    for ((r, c), &fg) in fg2.indexed_iter() {
        if fg {
            out.slice_mut(s![r, c, ..]).assign(&image2.slice(s![r, c, ..]));
        }
    }
    out
}

/// `label1 * bg2 + (label2 + max_obj_n) * fg2`, widened to avoid overflow.
pub(crate) fn composite_ids(label1: &Array2<u8>, label2: &Array2<u8>, max_obj_n: usize) -> Array2<u16> {
    let shift = max_obj_n as u16;
    Zip::from(label1).and(label2).map_collect(|&a, &b| {
        if b != BACKGROUND_ID {
            u16::from(b) + shift
        } else {
            u16::from(a)
        }
    })
}

/// Largest composited id that came from a real object rather than an ignore pixel.
fn max_object_id(label1: &Array2<u8>, label2: &Array2<u8>, max_obj_n: usize) -> u16 {
    let shift = max_obj_n as u16;
    Zip::from(label1).and(label2).fold(0u16, |acc, &a, &b| {
        let id = if b != BACKGROUND_ID {
            if b == IGNORE_ID {
                0
            } else {
                u16::from(b) + shift
            }
        } else if a == IGNORE_ID {
            0
        } else {
            u16::from(a)
        };
        acc.max(id)
    })
}

/// `(universe, H, W)` indicator planes. Ids outside the universe get no channel.
pub(crate) fn one_hot(raw: &Array2<u16>, universe: usize) -> Array3<f32> {
    let (height, width) = raw.dim();
    let mut planes = Array3::zeros((universe, height, width));
    for ((r, c), &id) in raw.indexed_iter() {
        let id = usize::from(id);
        if id < universe {
            planes[[id, r, c]] = 1.0;
        }
    }
    planes
}

/// Arg-max over channels after adding `bias` to channel 0; the first maximum wins.
pub(crate) fn argmax_with_bias(planes: &Array3<f32>, bias: f32) -> Array2<u8> {
    let (channels, height, width) = planes.dim();
    let mut out = Array2::zeros((height, width));
    for ((r, c), slot) in out.indexed_iter_mut() {
        let mut best = 0usize;
        let mut best_val = planes[[0, r, c]] + bias;
        for k in 1..channels {
            let v = planes[[k, r, c]];
            if v > best_val {
                best = k;
                best_val = v;
            }
        }
        *slot = best as u8;
    }
    out
}

/// Mark merged background pixels as ignore where either source was ignore.
pub(crate) fn propagate_ignore(merged: &mut Array2<u8>, label1: &Array2<u8>, label2: &Array2<u8>) {
    Zip::from(merged)
        .and(label1)
        .and(label2)
        .for_each(|out, &a, &b| {
            if *out == BACKGROUND_ID && (a == IGNORE_ID || b == IGNORE_ID) {
                *out = IGNORE_ID;
            }
        });
}
