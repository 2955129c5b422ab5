//! Postgres-backed certification store.
//!
//! Every call runs as a short-lived query against the pool; no
//! long-held transactions or cross-request locks. Status guards live in
//! the SQL `WHERE` clauses so concurrent reviewers cannot race a record
//! past its lifecycle.
//!
//! Expected schema (migration `substance_certification`):
//!
//! ```sql
//! CREATE TABLE substance_certification (
//!     id                  UUID PRIMARY KEY,
//!     original_name       TEXT NOT NULL,
//!     original_amount     DOUBLE PRECISION,
//!     company_id          TEXT,
//!     ai_mapped_sid       TEXT,
//!     ai_mapped_name      TEXT,
//!     ai_confidence_score REAL NOT NULL,
//!     ai_candidates       JSONB NOT NULL DEFAULT '[]',
//!     final_mapped_sid    TEXT,
//!     final_mapped_name   TEXT,
//!     mapping_status      TEXT NOT NULL,
//!     reviewed_by         TEXT,
//!     review_comment      TEXT,
//!     created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use super::{validate_correction, CertificationStore};
use crate::error::{MapperError, Result};
use crate::types::{
    Candidate, Certification, CertificationItem, Correction, MappingResult, MappingStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgCertificationStore {
    pool: PgPool,
}

impl PgCertificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row shape; status and candidates are decoded into domain types
/// explicitly rather than through runtime reflection.
#[derive(sqlx::FromRow)]
struct CertificationRow {
    id: Uuid,
    original_name: String,
    original_amount: Option<f64>,
    company_id: Option<String>,
    ai_mapped_sid: Option<String>,
    ai_mapped_name: Option<String>,
    ai_confidence_score: f32,
    ai_candidates: serde_json::Value,
    final_mapped_sid: Option<String>,
    final_mapped_name: Option<String>,
    mapping_status: String,
    reviewed_by: Option<String>,
    review_comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CertificationRow {
    fn into_domain(self) -> Result<Certification> {
        let status = MappingStatus::parse(&self.mapping_status).ok_or_else(|| {
            MapperError::Persistence(format!(
                "record {} has unknown mapping_status '{}'",
                self.id, self.mapping_status
            ))
        })?;
        let candidates: Vec<Candidate> = serde_json::from_value(self.ai_candidates)
            .map_err(|e| MapperError::Persistence(format!("bad ai_candidates json: {e}")))?;
        Ok(Certification {
            id: self.id,
            original_name: self.original_name,
            original_amount: self.original_amount,
            company_id: self.company_id,
            ai_mapped_sid: self.ai_mapped_sid,
            ai_mapped_name: self.ai_mapped_name,
            ai_confidence_score: self.ai_confidence_score,
            ai_candidates: candidates,
            final_mapped_sid: self.final_mapped_sid,
            final_mapped_name: self.final_mapped_name,
            mapping_status: status,
            reviewed_by: self.reviewed_by,
            review_comment: self.review_comment,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    id, original_name, original_amount, company_id,
    ai_mapped_sid, ai_mapped_name, ai_confidence_score, ai_candidates,
    final_mapped_sid, final_mapped_name, mapping_status,
    reviewed_by, review_comment, created_at, updated_at
"#;

#[async_trait]
impl CertificationStore for PgCertificationStore {
    async fn save_ai_result(
        &self,
        item: &CertificationItem,
        result: &MappingResult,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let status = MappingStatus::from_band(result.band);
        let candidates = serde_json::to_value(&result.candidates)
            .map_err(|e| MapperError::Persistence(format!("candidate serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO substance_certification (
                id, original_name, original_amount, company_id,
                ai_mapped_sid, ai_mapped_name, ai_confidence_score, ai_candidates,
                final_mapped_sid, final_mapped_name, mapping_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(id)
        .bind(&item.original_name)
        .bind(item.original_amount)
        .bind(&item.company_id)
        .bind(&result.mapped_sid)
        .bind(&result.mapped_name)
        .bind(result.confidence)
        .bind(&candidates)
        .bind(&result.mapped_sid)
        .bind(&result.mapped_name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn apply_correction(&self, id: Uuid, correction: &Correction) -> Result<Certification> {
        validate_correction(correction)?;

        // The status guard is in the WHERE clause: only correctable
        // records match, and ai_* columns are never referenced.
        let row: Option<CertificationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE substance_certification
            SET final_mapped_sid = $2,
                final_mapped_name = $3,
                mapping_status = 'user_reviewed',
                reviewed_by = $4,
                review_comment = $5,
                updated_at = now()
            WHERE id = $1
              AND mapping_status IN ('auto_mapped', 'needs_review', 'user_reviewed')
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&correction.corrected_sid)
        .bind(&correction.corrected_name)
        .bind(&correction.reviewer)
        .bind(&correction.correction_reason)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            None => self.explain_update_miss(id, "correct").await,
        }
    }

    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<Certification> {
        if reviewer.trim().is_empty() {
            return Err(MapperError::Validation("reviewer identity is required".into()));
        }

        let row: Option<CertificationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE substance_certification
            SET mapping_status = 'approved',
                reviewed_by = $2,
                updated_at = now()
            WHERE id = $1
              AND mapping_status = 'user_reviewed'
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reviewer)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            None => self.explain_update_miss(id, "approve").await,
        }
    }

    async fn get(&self, id: Uuid) -> Result<Certification> {
        let row: Option<CertificationRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM substance_certification WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(MapperError::NotFound(id))?.into_domain()
    }

    async fn list_pending_review(&self, limit: i64) -> Result<Vec<Certification>> {
        let rows: Vec<CertificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM substance_certification
            WHERE mapping_status = 'needs_review'
            ORDER BY created_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CertificationRow::into_domain).collect()
    }
}

impl PgCertificationStore {
    /// A guarded UPDATE matched nothing: distinguish "no such record"
    /// from "record exists but its status forbids the transition".
    async fn explain_update_miss(&self, id: Uuid, action: &str) -> Result<Certification> {
        let existing = self.get(id).await?;
        Err(MapperError::InvalidTransition(format!(
            "cannot {action} a record in status {}",
            existing.mapping_status
        )))
    }
}
