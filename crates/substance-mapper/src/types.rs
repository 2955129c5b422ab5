//! Core data types for substance mapping.
//!
//! `MappingResult` is computed fresh on every call and is never cached;
//! `Certification` is the durable record of a mapping decision and its
//! correction history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the standard-substance reference table.
///
/// Loaded once at startup (or training time) and never mutated; the full
/// set forms the passage corpus of the nearest-neighbor index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardSubstance {
    /// Stable identifier of the reference entry.
    pub sid: String,
    /// Canonical substance name.
    pub name: String,
    /// High-level chemical category, when the reference table carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Confidence band assigned to a mapping result.
///
/// Ordered: `NotMapped < NeedsReview < Mapped`. The ordering matters for
/// monotonicity of the banding policy, so `PartialOrd`/`Ord` derive from
/// the variant declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    NotMapped,
    NeedsReview,
    Mapped,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::Mapped => "mapped",
            ConfidenceBand::NeedsReview => "needs_review",
            ConfidenceBand::NotMapped => "not_mapped",
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single retrieval candidate: reference entry plus its similarity to
/// the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub sid: String,
    pub name: String,
    pub similarity: f32,
}

/// Result of mapping one raw substance name against the reference corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResult {
    /// The raw input name, as received.
    pub raw_name: String,
    /// sid of the top candidate when the band is not `NotMapped`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapped_sid: Option<String>,
    /// Canonical name of the top candidate when the band is not `NotMapped`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapped_name: Option<String>,
    /// Cosine similarity of the best candidate.
    pub top1_score: f32,
    /// `max(top1 - top2, 0)`; 0 when fewer than two candidates exist.
    pub margin: f32,
    /// Weighted fusion of `top1_score` and `margin`.
    pub confidence: f32,
    pub band: ConfidenceBand,
    /// Top-k candidates in descending similarity order.
    pub candidates: Vec<Candidate>,
    /// Present when this result degraded from a per-item failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MappingResult {
    /// Degraded result for an input the system could not map: band
    /// `NotMapped`, zero confidence, no candidates. Used instead of an
    /// error so a single bad item never aborts a batch.
    pub fn degraded(raw_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            mapped_sid: None,
            mapped_name: None,
            top1_score: 0.0,
            margin: 0.0,
            confidence: 0.0,
            band: ConfidenceBand::NotMapped,
            candidates: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Aggregate outcome of mapping a whole uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMappingResult {
    pub rows: Vec<MappingResult>,
    pub mapped_count: usize,
    pub needs_review_count: usize,
    pub not_mapped_count: usize,
    pub error_count: usize,
}

impl FileMappingResult {
    pub fn from_rows(rows: Vec<MappingResult>) -> Self {
        let mut mapped = 0;
        let mut review = 0;
        let mut unmapped = 0;
        let mut errors = 0;
        for row in &rows {
            match row.band {
                ConfidenceBand::Mapped => mapped += 1,
                ConfidenceBand::NeedsReview => review += 1,
                ConfidenceBand::NotMapped => unmapped += 1,
            }
            if row.error.is_some() {
                errors += 1;
            }
        }
        Self {
            rows,
            mapped_count: mapped,
            needs_review_count: review,
            not_mapped_count: unmapped,
            error_count: errors,
        }
    }
}

/// Review lifecycle of a certification record.
///
/// `AutoMapped` and `NeedsReview` are set at creation from the confidence
/// band. A human correction moves the record to `UserReviewed`; `Approved`
/// is an optional terminal confirmation. No transition skips forward past
/// `UserReviewed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    AutoMapped,
    NeedsReview,
    UserReviewed,
    Approved,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::AutoMapped => "auto_mapped",
            MappingStatus::NeedsReview => "needs_review",
            MappingStatus::UserReviewed => "user_reviewed",
            MappingStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_mapped" => Some(MappingStatus::AutoMapped),
            "needs_review" => Some(MappingStatus::NeedsReview),
            "user_reviewed" => Some(MappingStatus::UserReviewed),
            "approved" => Some(MappingStatus::Approved),
            _ => None,
        }
    }

    /// Initial status derived from the confidence band at save time.
    pub fn from_band(band: ConfidenceBand) -> Self {
        match band {
            ConfidenceBand::Mapped => MappingStatus::AutoMapped,
            ConfidenceBand::NeedsReview | ConfidenceBand::NotMapped => MappingStatus::NeedsReview,
        }
    }

    /// Whether a human correction is allowed from this status.
    pub fn accepts_correction(&self) -> bool {
        matches!(
            self,
            MappingStatus::AutoMapped | MappingStatus::NeedsReview | MappingStatus::UserReviewed
        )
    }

    /// Whether the record may be approved from this status. Approval is
    /// only reachable after an explicit correction.
    pub fn accepts_approval(&self) -> bool {
        matches!(self, MappingStatus::UserReviewed)
    }
}

impl std::fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The original item a certification record describes, independent of the
/// mapping outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificationItem {
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
}

/// Durable record of one mapping attempt and its correction history.
///
/// The `ai_*` fields are write-once: set at creation and never touched
/// again. Human review only moves the `final_*` fields, the status and the
/// reviewer metadata, so the AI output always remains auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certification {
    pub id: Uuid,
    pub original_name: String,
    pub original_amount: Option<f64>,
    pub company_id: Option<String>,
    pub ai_mapped_sid: Option<String>,
    pub ai_mapped_name: Option<String>,
    pub ai_confidence_score: f32,
    /// Top-k candidates at mapping time, kept for review context.
    pub ai_candidates: Vec<Candidate>,
    pub final_mapped_sid: Option<String>,
    pub final_mapped_name: Option<String>,
    pub mapping_status: MappingStatus,
    pub reviewed_by: Option<String>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a reviewer supplies when correcting a certification record.
#[derive(Debug, Clone, Deserialize)]
pub struct Correction {
    pub corrected_sid: String,
    pub corrected_name: String,
    pub reviewer: String,
    #[serde(default)]
    pub correction_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_ordering_matches_confidence_ordering() {
        assert!(ConfidenceBand::NotMapped < ConfidenceBand::NeedsReview);
        assert!(ConfidenceBand::NeedsReview < ConfidenceBand::Mapped);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            MappingStatus::AutoMapped,
            MappingStatus::NeedsReview,
            MappingStatus::UserReviewed,
            MappingStatus::Approved,
        ] {
            assert_eq!(MappingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MappingStatus::parse("bogus"), None);
    }

    #[test]
    fn approval_requires_prior_review() {
        assert!(!MappingStatus::AutoMapped.accepts_approval());
        assert!(!MappingStatus::NeedsReview.accepts_approval());
        assert!(MappingStatus::UserReviewed.accepts_approval());
        assert!(!MappingStatus::Approved.accepts_approval());
    }

    #[test]
    fn approved_is_terminal_for_corrections() {
        assert!(!MappingStatus::Approved.accepts_correction());
    }

    #[test]
    fn file_aggregates_count_each_band() {
        let rows = vec![
            MappingResult::degraded("x", "boom"),
            MappingResult {
                band: ConfidenceBand::Mapped,
                error: None,
                ..MappingResult::degraded("a", "")
            },
            MappingResult {
                band: ConfidenceBand::NeedsReview,
                error: None,
                ..MappingResult::degraded("b", "")
            },
        ];
        let agg = FileMappingResult::from_rows(rows);
        assert_eq!(agg.mapped_count, 1);
        assert_eq!(agg.needs_review_count, 1);
        assert_eq!(agg.not_mapped_count, 1);
        assert_eq!(agg.error_count, 1);
    }
}
