//! Immutable per-sequence frame listings.

use crate::loader::{frame_stem, FrameLoader};
use crate::types::{DatasetResult, VosDatasetError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Ordered frame lists of one sequence. `labels` holds the annotated subset,
/// matched to `images` by stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceEntry {
    pub name: String,
    pub images: Vec<String>,
    pub labels: Vec<String>,
    label_stems: HashMap<String, usize>,
    image_stems: HashMap<String, usize>,
}

impl SequenceEntry {
    pub fn new(name: impl Into<String>, images: Vec<String>, labels: Vec<String>) -> Self {
        let label_stems = stem_positions(&labels);
        let image_stems = stem_positions(&images);
        Self {
            name: name.into(),
            images,
            labels,
            label_stems,
            image_stems,
        }
    }

    pub fn is_annotated(&self) -> bool {
        !self.labels.is_empty()
    }

    /// Label identifier annotating image frame `image_index`, if any.
    pub fn label_for_image(&self, image_index: usize) -> Option<&str> {
        let image = self.images.get(image_index)?;
        let pos = *self.label_stems.get(frame_stem(image))?;
        Some(self.labels[pos].as_str())
    }

    pub fn has_label(&self, image_index: usize) -> bool {
        self.label_for_image(image_index).is_some()
    }

    /// Position in `images` of the frame named `stem`.
    pub fn image_position(&self, stem: &str) -> Option<usize> {
        self.image_stems.get(stem).copied()
    }

    /// Copy with both lists in reverse temporal order.
    pub fn reversed(&self) -> Self {
        let mut images = self.images.clone();
        let mut labels = self.labels.clone();
        images.reverse();
        labels.reverse();
        Self::new(self.name.clone(), images, labels)
    }
}

fn stem_positions(ids: &[String]) -> HashMap<String, usize> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| (frame_stem(id).to_string(), i))
        .collect()
}

/// Read-only mapping from sequence name to its entry. Replaced wholesale on reload.
#[derive(Debug, Clone, Default)]
pub struct SequenceIndex {
    order: Vec<String>,
    entries: BTreeMap<String, Arc<SequenceEntry>>,
}

impl SequenceIndex {
    /// List every named sequence through `loader`. Sequences without image
    /// frames are skipped.
    pub fn load(loader: &dyn FrameLoader, names: &[String]) -> DatasetResult<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let images = loader.list_images(name)?;
            if images.is_empty() {
                tracing::warn!(sequence = %name, "sequence has no frames; skipping");
                continue;
            }
            let labels = loader.list_labels(name)?;
            if labels.is_empty() {
                tracing::warn!(sequence = %name, "sequence has no annotated frames");
            }
            entries.push(SequenceEntry::new(name.clone(), images, labels));
        }
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<SequenceEntry>) -> Self {
        let mut order = Vec::with_capacity(entries.len());
        let mut map = BTreeMap::new();
        for entry in entries {
            if map.contains_key(&entry.name) {
                tracing::warn!(sequence = %entry.name, "duplicate sequence name; keeping first");
                continue;
            }
            order.push(entry.name.clone());
            map.insert(entry.name.clone(), Arc::new(entry));
        }
        Self {
            order,
            entries: map,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> DatasetResult<Arc<SequenceEntry>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| VosDatasetError::UnknownSequence(name.to_string()))
    }

    /// Entry at position `idx` in load order.
    pub fn by_position(&self, idx: usize) -> DatasetResult<Arc<SequenceEntry>> {
        let name = self
            .order
            .get(idx)
            .ok_or_else(|| VosDatasetError::Other(format!("sequence position {idx} out of range")))?;
        self.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SequenceEntry>> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }
}
