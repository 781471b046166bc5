//! Index-level quality checks run before training starts.

use crate::index::{SequenceEntry, SequenceIndex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSummary {
    pub name: String,
    pub frames: usize,
    pub labeled: usize,
}

impl SequenceSummary {
    fn from_entry(entry: &SequenceEntry) -> Self {
        let labeled = (0..entry.images.len())
            .filter(|&i| entry.has_label(i))
            .count();
        Self {
            name: entry.name.clone(),
            frames: entry.images.len(),
            labeled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub sequences: Vec<SequenceSummary>,
    pub total_frames: usize,
    pub labeled_frames: usize,
    /// Sequences without a single annotated frame.
    pub unlabeled_sequences: usize,
    /// Sequences with fewer image frames than `seq_len`.
    pub short_sequences: usize,
}

pub fn summarize_index(index: &SequenceIndex, seq_len: usize) -> IndexSummary {
    let mut summary = IndexSummary::default();
    for entry in index.iter() {
        let seq = SequenceSummary::from_entry(entry);
        summary.total_frames += seq.frames;
        summary.labeled_frames += seq.labeled;
        if seq.labeled == 0 {
            summary.unlabeled_sequences += 1;
        }
        if seq.frames < seq_len {
            summary.short_sequences += 1;
        }
        summary.sequences.push(seq);
    }
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_unlabeled: Option<usize>,
    pub max_unlabeled_ratio: Option<f32>,
    pub max_short: Option<usize>,
    pub max_short_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_f32(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_unlabeled: parse_usize("VOS_DATASET_MAX_UNLABELED"),
            max_unlabeled_ratio: parse_f32("VOS_DATASET_MAX_UNLABELED_RATIO"),
            max_short: parse_usize("VOS_DATASET_MAX_SHORT"),
            max_short_ratio: parse_f32("VOS_DATASET_MAX_SHORT_RATIO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: IndexSummary,
}

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_summary(summary: IndexSummary, thresholds: &ValidationThresholds) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    if summary.sequences.is_empty() {
        return ValidationReport {
            outcome: ValidationOutcome::Fail,
            reasons: vec!["no sequences with image frames".to_string()],
            summary,
        };
    }
    let denom = summary.sequences.len() as f32;

    apply_thresholds(
        "unlabeled sequences",
        summary.unlabeled_sequences,
        summary.unlabeled_sequences as f32 / denom,
        thresholds.max_unlabeled,
        thresholds.max_unlabeled_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "short sequences",
        summary.short_sequences,
        summary.short_sequences as f32 / denom,
        thresholds.max_short,
        thresholds.max_short_ratio,
        &mut outcome,
        &mut reasons,
    );

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}
