mod common;

use common::{banded_label, clip};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use vos_dataset::{
    read_split, DatasetConfig, DirectoryLoader, FrameLoader, MemoryLoader, SequenceIndex,
    TrainingDataset, VosDatasetError,
};

/// Writes `root/{JPEGImages,Annotations}/<seq>/` with `frames` RGB images and
/// labels on every other frame.
fn write_davis_sequence(root: &Path, seq: &str, frames: u32) -> anyhow::Result<()> {
    let images = root.join("JPEGImages").join(seq);
    let labels = root.join("Annotations").join(seq);
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&labels)?;
    for i in 0..frames {
        let img = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 10, y as u8 * 20, i as u8]));
        img.save(images.join(format!("{i:05}.png")))?;
        if i % 2 == 0 {
            let label = GrayImage::from_fn(8, 6, |x, _| Luma([if x < 4 { 1 } else { 2 }]));
            label.save(labels.join(format!("{i:05}.png")))?;
        }
    }
    Ok(())
}

#[test]
fn directory_loader_reads_davis_tree() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_davis_sequence(root, "bear", 4)?;
    fs::create_dir_all(root.join("ImageSets"))?;
    fs::write(root.join("ImageSets").join("train.txt"), "bear\n\n")?;

    assert_eq!(read_split(root, "train")?, vec!["bear".to_string()]);
    let loader = DirectoryLoader::davis(root);
    let images = loader.list_images("bear")?;
    assert_eq!(images.len(), 4);
    assert_eq!(loader.list_labels("bear")?, vec!["00000.png", "00002.png"]);

    let image = loader.read_image("bear", "00003.png")?;
    assert_eq!(image.dim(), (6, 8, 3));
    assert_eq!(image[[2, 5, 0]], 50.0);
    assert_eq!(image[[2, 5, 1]], 40.0);
    assert_eq!(image[[2, 5, 2]], 3.0);

    let label = loader.read_label("bear", "00002.png")?;
    assert_eq!(label.dim(), (6, 8));
    assert_eq!(label[[0, 0]], 1);
    assert_eq!(label[[5, 7]], 2);

    assert!(matches!(
        loader.read_label("bear", "00001.png"),
        Err(VosDatasetError::MissingLabel { .. })
    ));

    let index = SequenceIndex::load(&loader, &["bear".to_string()])?;
    let seq = index.get("bear")?;
    assert!(seq.has_label(2));
    assert!(!seq.has_label(3));
    Ok(())
}

/// Writes an 8-bit palette PNG whose indices are `ids` (row-major).
fn write_palette_label(path: &Path, width: u32, height: u32, ids: &[u8]) -> anyhow::Result<()> {
    let file = fs::File::create(path)?;
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(vec![0, 0, 0, 128, 0, 0, 0, 128, 0]);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(ids)?;
    writer.finish()?;
    Ok(())
}

#[test]
fn palette_annotations_yield_their_indices() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_davis_sequence(root, "bear", 12)?;
    let ids: Vec<u8> = (0..6u32)
        .flat_map(|_| (0..8u32).map(|x| if x < 3 { 1 } else if x < 6 { 2 } else { 0 }))
        .collect();
    for i in (0..12).step_by(2) {
        write_palette_label(
            &root.join("Annotations").join("bear").join(format!("{i:05}.png")),
            8,
            6,
            &ids,
        )?;
    }

    let loader = DirectoryLoader::davis(root);
    let label = loader.read_label("bear", "00000.png")?;
    assert_eq!(label.dim(), (6, 8));
    assert_eq!(label.row(3).to_vec(), vec![1, 1, 1, 2, 2, 2, 0, 0]);

    let dataset = TrainingDataset::new(
        Arc::new(loader),
        vec!["bear".into()],
        DatasetConfig {
            seq_len: 3,
            min_fg_pixels: 10,
            dynamic_merge: false,
            seed: Some(5),
            ..DatasetConfig::default()
        },
    )?;
    let sample = dataset.get(0)?;
    assert_eq!(sample.meta.obj_num, 2);
    assert!(sample.reference.label.iter().all(|&v| v <= 2));
    Ok(())
}

#[test]
fn color_label_maps_are_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_davis_sequence(root, "cow", 2)?;
    RgbImage::new(8, 6).save(root.join("Annotations").join("cow").join("00000.png"))?;
    let loader = DirectoryLoader::davis(root);
    assert!(matches!(
        loader.read_label("cow", "00000.png"),
        Err(VosDatasetError::InvalidLabel { .. })
    ));
    Ok(())
}

#[test]
fn sequence_without_annotation_dir_is_unannotated() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_davis_sequence(root, "dog", 3)?;
    fs::remove_dir_all(root.join("Annotations").join("dog"))?;
    let loader = DirectoryLoader::davis(root);
    assert!(loader.list_labels("dog")?.is_empty());
    assert!(loader.list_images("missing").is_err());
    Ok(())
}

#[test]
fn dataset_samples_from_directory_tree() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_davis_sequence(root, "bear", 12)?;
    let cfg = DatasetConfig {
        seq_len: 3,
        min_fg_pixels: 10,
        dynamic_merge: false,
        seed: Some(0),
        ..DatasetConfig::default()
    };
    let dataset = TrainingDataset::new(
        Arc::new(DirectoryLoader::davis(root)),
        vec!["bear".into()],
        cfg,
    )?;
    for i in 0..10 {
        let sample = dataset.get(i)?;
        assert_eq!(sample.positions(), 3);
        assert_eq!(sample.reference.dims(), (6, 8));
        assert_eq!(sample.meta.obj_num, 2);
        assert!(sample.labeled[0]);
    }
    Ok(())
}

#[test]
fn reload_exposes_new_frames() -> anyhow::Result<()> {
    let loader = Arc::new(MemoryLoader::new());
    let label = |_: usize| Some(banded_label(16, 16, &[(1, 0..14)]));
    loader.insert_sequence("grow", clip(6, (16, 16), label));
    let dataset = TrainingDataset::new(
        loader.clone(),
        vec!["grow".into()],
        DatasetConfig {
            dynamic_merge: false,
            seed: Some(2),
            ..DatasetConfig::default()
        },
    )?;
    let before = dataset.index();
    assert_eq!(before.get("grow")?.images.len(), 6);

    loader.insert_sequence("grow", clip(20, (16, 16), label));
    assert_eq!(dataset.index().get("grow")?.images.len(), 6);
    dataset.reload()?;
    assert_eq!(dataset.index().get("grow")?.images.len(), 20);
    // Snapshots taken before the reload are untouched.
    assert_eq!(before.get("grow")?.images.len(), 6);
    assert_eq!(dataset.get(0)?.meta.frame_num, 20);
    Ok(())
}
