//! Frame loaders: listing and decoding sequence frames from disk or memory.

use crate::types::{DatasetResult, VosDatasetError};
use ndarray::{Array2, Array3};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Source of frame listings and pixel data for named sequences.
pub trait FrameLoader: Send + Sync {
    /// Image frame identifiers of `seq`, sorted.
    fn list_images(&self, seq: &str) -> DatasetResult<Vec<String>>;
    /// Annotated frame identifiers of `seq`, sorted.
    fn list_labels(&self, seq: &str) -> DatasetResult<Vec<String>>;
    /// H×W×3 image on the 0..255 scale.
    fn read_image(&self, seq: &str, frame_id: &str) -> DatasetResult<Array3<f32>>;
    /// H×W label map. Fails with `MissingLabel` when `frame_id` is not annotated.
    fn read_label(&self, seq: &str, frame_id: &str) -> DatasetResult<Array2<u8>>;
}

/// Part of a frame identifier before the first `.`.
pub fn frame_stem(frame_id: &str) -> &str {
    frame_id.split('.').next().unwrap_or(frame_id)
}

/// Loader over `image_root/<seq>/<frame>` and `label_root/<seq>/<frame>`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    pub image_root: PathBuf,
    pub label_root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(image_root: impl Into<PathBuf>, label_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
            label_root: label_root.into(),
        }
    }

    /// DAVIS layout: `root/JPEGImages` and `root/Annotations`.
    pub fn davis(root: &Path) -> Self {
        Self::new(root.join("JPEGImages"), root.join("Annotations"))
    }

    fn list_dir(dir: &Path) -> DatasetResult<Vec<String>> {
        let entries = fs::read_dir(dir).map_err(|e| VosDatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl FrameLoader for DirectoryLoader {
    fn list_images(&self, seq: &str) -> DatasetResult<Vec<String>> {
        Self::list_dir(&self.image_root.join(seq))
    }

    fn list_labels(&self, seq: &str) -> DatasetResult<Vec<String>> {
        let dir = self.label_root.join(seq);
        if !dir.exists() {
            tracing::debug!(sequence = seq, dir = %dir.display(), "no label directory; sequence is unannotated");
            return Ok(Vec::new());
        }
        Self::list_dir(&dir)
    }

    fn read_image(&self, seq: &str, frame_id: &str) -> DatasetResult<Array3<f32>> {
        let path = self.image_root.join(seq).join(frame_id);
        let img = image::open(&path)
            .map_err(|e| VosDatasetError::Image {
                path: path.clone(),
                source: e,
            })?
            .to_rgb8();
        let (width, height) = img.dimensions();
        let data: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();
        Array3::from_shape_vec((height as usize, width as usize, 3), data)
            .map_err(|e| VosDatasetError::Other(format!("image {}: {e}", path.display())))
    }

    fn read_label(&self, seq: &str, frame_id: &str) -> DatasetResult<Array2<u8>> {
        let path = self.label_root.join(seq).join(frame_id);
        if !path.exists() {
            return Err(VosDatasetError::MissingLabel {
                sequence: seq.to_string(),
                frame: frame_id.to_string(),
            });
        }
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png {
            decode_png_ids(&path)
        } else {
            decode_luma_ids(&path)
        }
    }
}

/// Object ids of a PNG label map. Palette files yield their raw indices, so
/// DAVIS-style annotations keep the ids they were drawn with.
fn decode_png_ids(path: &Path) -> DatasetResult<Array2<u8>> {
    let file = fs::File::open(path).map_err(|e| VosDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let png_err = |e| VosDatasetError::Png {
        path: path.to_path_buf(),
        source: e,
    };
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(png_err)?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(png_err)?;

    let supported = matches!(
        info.color_type,
        png::ColorType::Indexed | png::ColorType::Grayscale
    ) && info.bit_depth != png::BitDepth::Sixteen;
    if !supported {
        return Err(VosDatasetError::InvalidLabel {
            path: path.to_path_buf(),
            msg: format!(
                "expected indexed or 8-bit grayscale ids, found {:?} at {:?}",
                info.color_type, info.bit_depth
            ),
        });
    }
    let ids = unpack_rows(&buf, &info);
    Array2::from_shape_vec((info.height as usize, info.width as usize), ids)
        .map_err(|e| VosDatasetError::Other(format!("label {}: {e}", path.display())))
}

/// One byte per pixel from scanlines packed at 1, 2, 4 or 8 bits.
fn unpack_rows(buf: &[u8], info: &png::OutputInfo) -> Vec<u8> {
    let width = info.width as usize;
    let bits = info.bit_depth as usize;
    let mut ids = Vec::with_capacity(width * info.height as usize);
    for row in buf.chunks(info.line_size).take(info.height as usize) {
        if bits == 8 {
            ids.extend_from_slice(&row[..width]);
            continue;
        }
        let per_byte = 8 / bits;
        let mask = (1u8 << bits) - 1;
        ids.extend((0..width).map(|x| {
            let shift = 8 - bits * (x % per_byte + 1);
            (row[x / per_byte] >> shift) & mask
        }));
    }
    ids
}

/// Non-PNG label maps must already be 8-bit grayscale.
fn decode_luma_ids(path: &Path) -> DatasetResult<Array2<u8>> {
    let decoded = image::open(path).map_err(|e| VosDatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    let gray = match decoded {
        image::DynamicImage::ImageLuma8(gray) => gray,
        other => {
            return Err(VosDatasetError::InvalidLabel {
                path: path.to_path_buf(),
                msg: format!("expected 8-bit single-channel ids, found {:?}", other.color()),
            })
        }
    };
    let (width, height) = gray.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), gray.into_raw())
        .map_err(|e| VosDatasetError::Other(format!("label {}: {e}", path.display())))
}

/// Read `root/ImageSets/<split>.txt` into sequence names.
pub fn read_split(root: &Path, split: &str) -> DatasetResult<Vec<String>> {
    let path = root.join("ImageSets").join(format!("{split}.txt"));
    let raw = fs::read_to_string(&path).map_err(|e| VosDatasetError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone)]
struct MemoryFrame {
    stem: String,
    image: Array3<f32>,
    label: Option<Array2<u8>>,
}

/// In-memory loader for synthetic clips and tests. Contents can be replaced
/// at any time; datasets see the change after `reload`.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sequences: RwLock<BTreeMap<String, Vec<MemoryFrame>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sequence. Frame ids are stored as `<stem>.jpg` /
    /// `<stem>.png`; frames with `None` labels stay unannotated.
    pub fn insert_sequence(
        &self,
        name: &str,
        frames: Vec<(String, Array3<f32>, Option<Array2<u8>>)>,
    ) {
        let frames = frames
            .into_iter()
            .map(|(stem, image, label)| MemoryFrame {
                stem,
                image,
                label,
            })
            .collect();
        self.sequences.write().insert(name.to_string(), frames);
    }

    fn find<T>(
        &self,
        seq: &str,
        frame_id: &str,
        f: impl FnOnce(&MemoryFrame) -> DatasetResult<T>,
    ) -> DatasetResult<T> {
        let guard = self.sequences.read();
        let frames = guard
            .get(seq)
            .ok_or_else(|| VosDatasetError::UnknownSequence(seq.to_string()))?;
        let stem = frame_stem(frame_id);
        let frame = frames
            .iter()
            .find(|fr| fr.stem == stem)
            .ok_or_else(|| VosDatasetError::MissingFrame {
                sequence: seq.to_string(),
                stem: stem.to_string(),
            })?;
        f(frame)
    }
}

impl FrameLoader for MemoryLoader {
    fn list_images(&self, seq: &str) -> DatasetResult<Vec<String>> {
        let guard = self.sequences.read();
        let frames = guard
            .get(seq)
            .ok_or_else(|| VosDatasetError::UnknownSequence(seq.to_string()))?;
        let mut ids: Vec<String> = frames.iter().map(|f| format!("{}.jpg", f.stem)).collect();
        ids.sort();
        Ok(ids)
    }

    fn list_labels(&self, seq: &str) -> DatasetResult<Vec<String>> {
        let guard = self.sequences.read();
        let frames = guard
            .get(seq)
            .ok_or_else(|| VosDatasetError::UnknownSequence(seq.to_string()))?;
        let mut ids: Vec<String> = frames
            .iter()
            .filter(|f| f.label.is_some())
            .map(|f| format!("{}.png", f.stem))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn read_image(&self, seq: &str, frame_id: &str) -> DatasetResult<Array3<f32>> {
        self.find(seq, frame_id, |frame| Ok(frame.image.clone()))
    }

    fn read_label(&self, seq: &str, frame_id: &str) -> DatasetResult<Array2<u8>> {
        self.find(seq, frame_id, |frame| {
            frame
                .label
                .clone()
                .ok_or_else(|| VosDatasetError::MissingLabel {
                    sequence: seq.to_string(),
                    frame: frame_id.to_string(),
                })
        })
    }
}
