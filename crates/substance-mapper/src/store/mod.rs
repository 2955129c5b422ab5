//! Persistence of mapping results and human corrections.
//!
//! Invariants enforced by every implementation:
//! - AI fields are write-once: set by `save_ai_result`, never updated.
//! - Corrections touch only the `final_*` fields, the status and the
//!   reviewer metadata.
//! - Status transitions: `auto_mapped | needs_review -> user_reviewed ->
//!   approved`; approval is unreachable without a prior correction.
//! - Records are never deleted; the table is the audit trail.

mod memory;
mod postgres;

pub use memory::MemoryCertificationStore;
pub use postgres::PgCertificationStore;

use crate::error::{MapperError, Result};
use crate::types::{Certification, CertificationItem, Correction, MappingResult};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait CertificationStore: Send + Sync {
    /// Persist the AI side of a mapping decision. Initial status is
    /// derived from the confidence band.
    async fn save_ai_result(
        &self,
        item: &CertificationItem,
        result: &MappingResult,
    ) -> Result<Uuid>;

    /// Apply a human correction: moves the `final_*` fields and sets the
    /// status to `user_reviewed`.
    async fn apply_correction(&self, id: Uuid, correction: &Correction) -> Result<Certification>;

    /// Terminal confirmation of a reviewed record.
    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<Certification>;

    async fn get(&self, id: Uuid) -> Result<Certification>;

    /// Records awaiting human attention, oldest first.
    async fn list_pending_review(&self, limit: i64) -> Result<Vec<Certification>>;
}

/// Shared validation for correction requests, used by all
/// implementations before touching storage.
pub(crate) fn validate_correction(correction: &Correction) -> Result<()> {
    if correction.corrected_sid.trim().is_empty() {
        return Err(MapperError::Validation("corrected_sid is required".into()));
    }
    if correction.corrected_name.trim().is_empty() {
        return Err(MapperError::Validation("corrected_name is required".into()));
    }
    if correction.reviewer.trim().is_empty() {
        return Err(MapperError::Validation("reviewer identity is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_requires_all_identity_fields() {
        let ok = Correction {
            corrected_sid: "S1".into(),
            corrected_name: "Methane".into(),
            reviewer: "analyst".into(),
            correction_reason: None,
        };
        assert!(validate_correction(&ok).is_ok());

        let missing_reviewer = Correction {
            reviewer: "  ".into(),
            ..ok.clone()
        };
        assert!(matches!(
            validate_correction(&missing_reviewer),
            Err(MapperError::Validation(_))
        ));

        let missing_sid = Correction {
            corrected_sid: String::new(),
            ..ok
        };
        assert!(validate_correction(&missing_sid).is_err());
    }
}
