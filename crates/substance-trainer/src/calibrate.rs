//! Threshold calibration from the evaluation frame.
//!
//! Pure sweep over candidate cutoffs: the mapped threshold is the
//! smallest value whose Precision@mapped meets the target, which by
//! construction maximizes coverage among qualifying cutoffs. The
//! needs_review threshold is calibrated the same way against a softer
//! precision target, then clamped below the mapped threshold.

use crate::eval::EvalRow;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Sweep bounds in confidence units; thresholds outside this range are
/// not operationally useful.
const SWEEP_MIN: u32 = 60; // 0.300
const SWEEP_MAX: u32 = 198; // 0.990
const SWEEP_STEP: f32 = 0.005;

#[derive(Debug, Clone, Copy)]
pub struct CalibrationConfig {
    /// Required Precision@mapped; the production bar.
    pub target_precision: f64,
    /// Softer bar for the needs_review cutoff.
    pub review_target_precision: f64,
    /// Minimum spacing between the two thresholds.
    pub min_gap: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_precision: 0.97,
            review_target_precision: 0.80,
            min_gap: 0.05,
        }
    }
}

/// Calibrated operating point, serialized for deployment config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub mapped_threshold: f32,
    pub needs_review_threshold: f32,
    /// Precision actually achieved at the chosen mapped threshold.
    pub precision_at_mapped: f64,
    /// Fraction of rows at or above the mapped threshold.
    pub coverage_at_mapped: f64,
    pub target_precision: f64,
    /// False when no cutoff reached the target and the best available
    /// precision was taken instead.
    pub target_met: bool,
    pub rows_evaluated: usize,
}

impl CalibrationResult {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Precision and coverage of the rows at or above a cutoff.
fn operating_point(rows: &[EvalRow], threshold: f32) -> (f64, f64) {
    let selected: Vec<&EvalRow> = rows.iter().filter(|r| r.confidence >= threshold).collect();
    if selected.is_empty() {
        return (0.0, 0.0);
    }
    let correct = selected.iter().filter(|r| r.correct()).count();
    (
        correct as f64 / selected.len() as f64,
        selected.len() as f64 / rows.len() as f64,
    )
}

/// Smallest swept cutoff meeting a precision target, if any.
fn first_meeting_target(rows: &[EvalRow], target: f64) -> Option<f32> {
    (SWEEP_MIN..=SWEEP_MAX)
        .map(|step| step as f32 * SWEEP_STEP)
        .find(|&t| {
            let (precision, coverage) = operating_point(rows, t);
            coverage > 0.0 && precision >= target
        })
}

/// Cutoff with the highest precision, smallest threshold on ties.
fn best_available(rows: &[EvalRow]) -> f32 {
    let mut best = (SWEEP_MAX as f32 * SWEEP_STEP, 0.0f64);
    for step in SWEEP_MIN..=SWEEP_MAX {
        let t = step as f32 * SWEEP_STEP;
        let (precision, coverage) = operating_point(rows, t);
        if coverage > 0.0 && precision > best.1 {
            best = (t, precision);
        }
    }
    best.0
}

/// Run the sweep. Deterministic and idempotent: the same rows always
/// produce the same thresholds.
pub fn calibrate(rows: &[EvalRow], config: CalibrationConfig) -> anyhow::Result<CalibrationResult> {
    if rows.is_empty() {
        bail!("no evaluation rows to calibrate from");
    }

    let (mapped_threshold, target_met) = match first_meeting_target(rows, config.target_precision) {
        Some(t) => (t, true),
        None => {
            let fallback = best_available(rows);
            warn!(
                "No cutoff reaches precision {:.2}; falling back to {:.3}",
                config.target_precision, fallback
            );
            (fallback, false)
        }
    };

    let review = first_meeting_target(rows, config.review_target_precision)
        .unwrap_or(mapped_threshold);
    let needs_review_threshold = review.min(mapped_threshold - config.min_gap).max(0.0);

    let (precision_at_mapped, coverage_at_mapped) = operating_point(rows, mapped_threshold);
    let result = CalibrationResult {
        mapped_threshold,
        needs_review_threshold,
        precision_at_mapped,
        coverage_at_mapped,
        target_precision: config.target_precision,
        target_met,
        rows_evaluated: rows.len(),
    };
    info!(
        "Calibrated thresholds: mapped={:.3} (P={:.3}, coverage={:.3}), needs_review={:.3}",
        result.mapped_threshold,
        result.precision_at_mapped,
        result.coverage_at_mapped,
        result.needs_review_threshold
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(confidence: f32, correct: bool) -> EvalRow {
        EvalRow {
            raw_name: "x".into(),
            true_sid: "S001".into(),
            predicted_sid: if correct { "S001" } else { "S002" }.into(),
            top1: confidence,
            margin: 0.0,
            confidence,
            band: "mapped".into(),
            rank_of_true: if correct { Some(1) } else { Some(3) },
        }
    }

    /// High-confidence rows correct, low-confidence rows wrong: the
    /// sweep must settle between the two clusters.
    fn separable_rows() -> Vec<EvalRow> {
        let mut rows = Vec::new();
        for i in 0..50 {
            rows.push(row(0.85 + (i % 10) as f32 * 0.01, true));
        }
        for i in 0..50 {
            rows.push(row(0.40 + (i % 10) as f32 * 0.01, false));
        }
        rows
    }

    #[test]
    fn picks_the_smallest_cutoff_meeting_the_target() {
        let rows = separable_rows();
        let result = calibrate(&rows, CalibrationConfig::default()).unwrap();
        assert!(result.target_met);
        assert!(result.precision_at_mapped >= 0.97);
        // Every correct row sits at or above 0.85, so the chosen cutoff
        // must keep all of them: coverage is exactly the correct half.
        assert!(result.mapped_threshold <= 0.85);
        assert!((result.coverage_at_mapped - 0.5).abs() < 1e-9);
    }

    #[test]
    fn review_threshold_stays_below_mapped() {
        let rows = separable_rows();
        let result = calibrate(&rows, CalibrationConfig::default()).unwrap();
        assert!(result.needs_review_threshold < result.mapped_threshold);
        assert!(result.mapped_threshold - result.needs_review_threshold >= 0.05 - 1e-6);
    }

    #[test]
    fn calibration_is_idempotent() {
        let rows = separable_rows();
        let a = calibrate(&rows, CalibrationConfig::default()).unwrap();
        let b = calibrate(&rows, CalibrationConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unattainable_target_falls_back_to_best_precision() {
        // Every bucket is 50% correct; no cutoff can reach 0.97.
        let mut rows = Vec::new();
        for i in 0..20 {
            let c = 0.4 + (i % 10) as f32 * 0.05;
            rows.push(row(c, i % 2 == 0));
        }
        let result = calibrate(&rows, CalibrationConfig::default()).unwrap();
        assert!(!result.target_met);
        assert!(result.precision_at_mapped < 0.97);
        assert!(result.mapped_threshold > 0.0);
    }

    #[test]
    fn empty_frame_is_an_error() {
        assert!(calibrate(&[], CalibrationConfig::default()).is_err());
    }

    #[test]
    fn result_round_trips_through_json() {
        let rows = separable_rows();
        let result = calibrate(&rows, CalibrationConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.json");
        result.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let reloaded: CalibrationResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(reloaded, result);
    }
}
