mod common;

use common::{banded_label, tuple_with_label};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use vos_dataset::{ClipMerger, SampleTuple, VosDatasetError, IGNORE_ID};

fn merger(max_obj_n: usize, min_obj_pixels: usize, ignore_in_merge: bool) -> ClipMerger {
    ClipMerger {
        max_obj_n,
        min_obj_pixels,
        ignore_in_merge,
        background_bias: 0.1,
    }
}

fn ids(tuple: &SampleTuple) -> BTreeSet<u8> {
    tuple.frames().flat_map(|f| f.label.iter().copied()).collect()
}

#[test]
fn two_plus_two_objects_merge_into_four() -> anyhow::Result<()> {
    let first = tuple_with_label(banded_label(20, 24, &[(1, 0..5), (2, 5..10)]), 5, 10.0);
    let second = tuple_with_label(banded_label(20, 24, &[(1, 10..15), (2, 15..20)]), 5, 200.0);
    let mut rng = StdRng::seed_from_u64(0);
    let merged = merger(10, 100, false).merge(first, second, &mut rng)?;

    assert_eq!(merged.meta.obj_num, 4);
    assert_eq!(merged.meta.seq_name, "synthetic");
    let expected = banded_label(20, 24, &[(1, 0..5), (2, 5..10), (3, 10..15), (4, 15..20)]);
    for frame in merged.frames() {
        assert_eq!(frame.label, expected);
        assert_eq!(frame.image[[0, 0, 0]], 10.0);
        assert_eq!(frame.image[[12, 0, 0]], 200.0);
    }
    let report = merged.diagnostics.merged.expect("merge report");
    assert_eq!(report.selected_ids, vec![0, 1, 2, 11, 12]);
    assert!(!report.truncated);
    Ok(())
}

#[test]
fn composited_ids_stay_within_disjoint_band() -> anyhow::Result<()> {
    let n = 3;
    let first = tuple_with_label(banded_label(12, 12, &[(1, 0..2), (2, 2..4), (3, 4..6)]), 4, 0.0);
    let second = tuple_with_label(banded_label(12, 12, &[(1, 6..8), (3, 8..10)]), 4, 0.0);
    let mut rng = StdRng::seed_from_u64(1);
    let merged = merger(n, 0, false).merge(first, second, &mut rng)?;
    let report = merged.diagnostics.merged.expect("merge report");
    assert!(usize::from(report.max_composited_id) <= 2 * n);
    let (from_first, from_second): (Vec<u16>, Vec<u16>) = report
        .selected_ids
        .iter()
        .filter(|&&id| id != 0)
        .partition(|&&id| usize::from(id) <= n);
    assert!(from_first.iter().all(|&id| id >= 1));
    assert!(from_second.iter().all(|&id| usize::from(id) > n));
    Ok(())
}

#[test]
fn obj_num_is_capped_and_labels_stay_in_range() -> anyhow::Result<()> {
    let bands: Vec<(u8, std::ops::Range<usize>)> = (0..3u8)
        .map(|k| (k + 1, usize::from(k) * 3..usize::from(k) * 3 + 3))
        .collect();
    let first = tuple_with_label(banded_label(24, 8, &bands), 5, 0.0);
    let shifted: Vec<_> = bands.iter().map(|(id, r)| (*id, r.start + 12..r.end + 12)).collect();
    let second = tuple_with_label(banded_label(24, 8, &shifted), 5, 0.0);

    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let merged = merger(3, 0, false).merge(first.clone(), second.clone(), &mut rng)?;
        assert_eq!(merged.meta.obj_num, 3);
        let report = merged.diagnostics.merged.as_ref().expect("merge report");
        assert!(report.truncated);
        assert_eq!(report.selected_ids[0], 0);
        assert!(ids(&merged).iter().all(|&v| usize::from(v) <= 3));
        assert_eq!(report.selected_ids.len(), 4);
        assert!(report.channel_counts.iter().all(|&c| c == 4));
    }
    Ok(())
}

#[test]
fn selection_is_shared_by_every_position() -> anyhow::Result<()> {
    // The reference carries an object the later positions lack; it must keep
    // its channel everywhere.
    let mut first = tuple_with_label(banded_label(10, 20, &[(1, 0..6), (2, 6..10)]), 5, 0.0);
    for frame in first.current.iter_mut() {
        frame.label = banded_label(10, 20, &[(1, 0..10)]);
    }
    let second = tuple_with_label(Array2::zeros((10, 20)), 5, 0.0);
    let mut rng = StdRng::seed_from_u64(2);
    let merged = merger(10, 50, false).merge(first, second, &mut rng)?;
    let report = merged.diagnostics.merged.expect("merge report");
    assert_eq!(report.channel_counts, vec![3; 5]);
    assert_eq!(merged.meta.obj_num, 2);
    Ok(())
}

#[test]
fn small_objects_are_dropped_but_background_kept() -> anyhow::Result<()> {
    let first = tuple_with_label(banded_label(20, 10, &[(1, 0..12)]), 5, 0.0);
    // 5 rows × 10 columns = 50 pixels.
    let second = tuple_with_label(banded_label(20, 10, &[(1, 15..20)]), 5, 0.0);
    let mut rng = StdRng::seed_from_u64(3);
    let merged = merger(10, 100, false).merge(first, second, &mut rng)?;
    assert_eq!(merged.meta.obj_num, 1);
    let report = merged.diagnostics.merged.expect("merge report");
    assert_eq!(report.selected_ids, vec![0, 1]);
    assert_eq!(merged.reference.label[[17, 0]], 0);
    assert_eq!(merged.reference.label[[3, 0]], 1);
    assert!(merged.reference.label.iter().any(|&v| v == 0));
    Ok(())
}

#[test]
fn ignore_survives_where_merge_yields_background() -> anyhow::Result<()> {
    let mut label1 = banded_label(10, 20, &[(1, 0..8)]);
    label1[[9, 0]] = IGNORE_ID;
    let first = tuple_with_label(label1, 4, 0.0);
    let second = tuple_with_label(Array2::zeros((10, 20)), 4, 0.0);

    let mut rng = StdRng::seed_from_u64(4);
    let kept = merger(10, 10, true).merge(first.clone(), second.clone(), &mut rng)?;
    assert!(kept.frames().all(|f| f.label[[9, 0]] == IGNORE_ID));
    assert!(kept.frames().all(|f| f.label[[9, 1]] == 0));

    let dropped = merger(10, 10, false).merge(first, second, &mut rng)?;
    assert!(dropped.frames().all(|f| f.label[[9, 0]] == 0));
    Ok(())
}

#[test]
fn merged_position_is_labeled_only_when_both_are() -> anyhow::Result<()> {
    let mut first = tuple_with_label(banded_label(10, 20, &[(1, 0..8)]), 4, 0.0);
    let mut second = tuple_with_label(banded_label(10, 20, &[(1, 8..10)]), 4, 0.0);
    first.labeled[2] = false;
    second.labeled[3] = false;
    let mut rng = StdRng::seed_from_u64(5);
    let merged = merger(10, 0, false).merge(first, second, &mut rng)?;
    assert_eq!(merged.labeled, vec![true, true, false, false]);
    Ok(())
}

#[test]
fn mismatched_shapes_are_rejected() {
    let first = tuple_with_label(Array2::zeros((10, 20)), 4, 0.0);
    let second = tuple_with_label(Array2::zeros((12, 20)), 4, 0.0);
    let mut rng = StdRng::seed_from_u64(6);
    let err = merger(10, 0, false).merge(first, second, &mut rng).unwrap_err();
    assert!(matches!(err, VosDatasetError::ShapeMismatch { .. }));

    let short = tuple_with_label(Array2::zeros((10, 20)), 3, 0.0);
    let long = tuple_with_label(Array2::zeros((10, 20)), 5, 0.0);
    assert!(merger(10, 0, false).merge(short, long, &mut rng).is_err());
}
