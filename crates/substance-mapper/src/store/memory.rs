//! In-memory certification store.
//!
//! Backs the test suite and read-only deployments where no database is
//! reachable but the review queue still needs to function within the
//! process lifetime. Enforces the same invariants as the Postgres store.

use super::{validate_correction, CertificationStore};
use crate::error::{MapperError, Result};
use crate::types::{
    Certification, CertificationItem, Correction, MappingResult, MappingStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryCertificationStore {
    records: RwLock<HashMap<Uuid, Certification>>,
}

impl MemoryCertificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificationStore for MemoryCertificationStore {
    async fn save_ai_result(
        &self,
        item: &CertificationItem,
        result: &MappingResult,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = Certification {
            id,
            original_name: item.original_name.clone(),
            original_amount: item.original_amount,
            company_id: item.company_id.clone(),
            ai_mapped_sid: result.mapped_sid.clone(),
            ai_mapped_name: result.mapped_name.clone(),
            ai_confidence_score: result.confidence,
            ai_candidates: result.candidates.clone(),
            final_mapped_sid: result.mapped_sid.clone(),
            final_mapped_name: result.mapped_name.clone(),
            mapping_status: MappingStatus::from_band(result.band),
            reviewed_by: None,
            review_comment: None,
            created_at: now,
            updated_at: now,
        };
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn apply_correction(&self, id: Uuid, correction: &Correction) -> Result<Certification> {
        validate_correction(correction)?;
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(MapperError::NotFound(id))?;
        if !record.mapping_status.accepts_correction() {
            return Err(MapperError::InvalidTransition(format!(
                "cannot correct a record in status {}",
                record.mapping_status
            )));
        }
        record.final_mapped_sid = Some(correction.corrected_sid.clone());
        record.final_mapped_name = Some(correction.corrected_name.clone());
        record.mapping_status = MappingStatus::UserReviewed;
        record.reviewed_by = Some(correction.reviewer.clone());
        record.review_comment = correction.correction_reason.clone();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<Certification> {
        if reviewer.trim().is_empty() {
            return Err(MapperError::Validation("reviewer identity is required".into()));
        }
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(MapperError::NotFound(id))?;
        if !record.mapping_status.accepts_approval() {
            return Err(MapperError::InvalidTransition(format!(
                "cannot approve a record in status {}",
                record.mapping_status
            )));
        }
        record.mapping_status = MappingStatus::Approved;
        record.reviewed_by = Some(reviewer.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Certification> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MapperError::NotFound(id))
    }

    async fn list_pending_review(&self, limit: i64) -> Result<Vec<Certification>> {
        let records = self.records.read().await;
        let mut pending: Vec<Certification> = records
            .values()
            .filter(|r| r.mapping_status == MappingStatus::NeedsReview)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}
