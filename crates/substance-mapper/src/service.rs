//! Mapping service: encode → search → fuse → band → persist.
//!
//! Constructed once at process start with an encoder and a built index;
//! both are immutable afterwards and shared across concurrent requests
//! without locking. The certification store is optional: with no
//! database the service keeps mapping in a read-only, no-save mode.

use crate::config::MapperConfig;
use crate::encoder::{EmbedRole, TextEncoder};
use crate::error::{MapperError, Result};
use crate::fusion;
use crate::index::SubstanceIndex;
use crate::store::CertificationStore;
use crate::tabular;
use crate::types::{
    CertificationItem, ConfidenceBand, FileMappingResult, MappingResult,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub struct MappingService {
    encoder: Arc<dyn TextEncoder>,
    index: Arc<SubstanceIndex>,
    store: Option<Arc<dyn CertificationStore>>,
    config: MapperConfig,
}

impl MappingService {
    pub fn new(
        encoder: Arc<dyn TextEncoder>,
        index: Arc<SubstanceIndex>,
        store: Option<Arc<dyn CertificationStore>>,
        config: MapperConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            encoder,
            index,
            store,
            config,
        })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn corpus_size(&self) -> usize {
        self.index.len()
    }

    pub fn encoder_id(&self) -> &str {
        self.encoder.id()
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Map a single raw substance name.
    ///
    /// Empty input is a validation error; an encoding failure degrades to
    /// a `NotMapped` result with the error attached, so callers looping
    /// over items never have to unwind.
    #[instrument(skip(self), fields(raw_name = %raw_name))]
    pub async fn map_one(&self, raw_name: &str) -> Result<MappingResult> {
        let normalized = raw_name.trim();
        if normalized.is_empty() {
            return Err(MapperError::Validation("substance name is empty".into()));
        }

        let result = self.map_inner(raw_name, normalized);
        self.persist(&result).await;
        Ok(result)
    }

    /// Map a batch of names with per-item error isolation: one failing
    /// item becomes a degraded result, the rest proceed.
    pub async fn map_batch(&self, raw_names: &[String]) -> Result<Vec<MappingResult>> {
        if raw_names.is_empty() {
            return Err(MapperError::Validation("substance_names is empty".into()));
        }
        let mut results = Vec::with_capacity(raw_names.len());
        for raw_name in raw_names {
            let normalized = raw_name.trim();
            let result = if normalized.is_empty() {
                MappingResult::degraded(raw_name.clone(), "substance name is empty")
            } else {
                self.map_inner(raw_name, normalized)
            };
            self.persist(&result).await;
            results.push(result);
        }
        Ok(results)
    }

    /// Map every row of an uploaded spreadsheet/CSV. The name column is
    /// detected heuristically; aggregates count each band.
    pub async fn map_file(&self, bytes: &[u8], filename: &str) -> Result<FileMappingResult> {
        let names = tabular::extract_names(bytes, filename)?;
        if names.is_empty() {
            return Err(MapperError::Validation(format!(
                "no substance names found in {filename}"
            )));
        }
        let rows = self.map_batch(&names).await?;
        Ok(FileMappingResult::from_rows(rows))
    }

    /// Persist a result and return the record id; surfaces persistence
    /// failures instead of degrading. Used where the caller needs the id
    /// (e.g. to hand a review link to a human).
    pub async fn map_and_save(
        &self,
        raw_name: &str,
        item: &CertificationItem,
    ) -> Result<(MappingResult, Option<Uuid>)> {
        let normalized = raw_name.trim();
        if normalized.is_empty() {
            return Err(MapperError::Validation("substance name is empty".into()));
        }
        let result = self.map_inner(raw_name, normalized);
        match &self.store {
            Some(store) => {
                let id = store.save_ai_result(item, &result).await?;
                Ok((result, Some(id)))
            }
            None => Ok((result, None)),
        }
    }

    /// The synchronous core: encode, search, fuse, band.
    fn map_inner(&self, raw_name: &str, normalized: &str) -> MappingResult {
        let lowered = normalized.to_lowercase();

        let query = match self.encoder.encode_one(&lowered, EmbedRole::Query) {
            Ok(v) => v,
            Err(e) => {
                warn!("encoding failed for '{}': {}", raw_name, e);
                return MappingResult::degraded(raw_name, e.to_string());
            }
        };

        let candidates = match self.index.search(&query, self.config.top_k) {
            Ok(c) => c,
            Err(e) => {
                warn!("search failed for '{}': {}", raw_name, e);
                return MappingResult::degraded(raw_name, e.to_string());
            }
        };

        let score = fusion::fuse(&candidates, self.config.fusion);
        let band = if candidates.is_empty() {
            ConfidenceBand::NotMapped
        } else {
            fusion::classify(score.confidence, self.config.thresholds)
        };

        let (mapped_sid, mapped_name) = match band {
            ConfidenceBand::NotMapped => (None, None),
            _ => candidates
                .first()
                .map(|c| (Some(c.sid.clone()), Some(c.name.clone())))
                .unwrap_or((None, None)),
        };

        debug!(
            "mapped '{}' -> {:?} (top1={:.4}, margin={:.4}, confidence={:.4}, band={})",
            raw_name, mapped_sid, score.top1, score.margin, score.confidence, band
        );

        MappingResult {
            raw_name: raw_name.to_string(),
            mapped_sid,
            mapped_name,
            top1_score: score.top1,
            margin: score.margin,
            confidence: score.confidence,
            band,
            candidates,
            error: None,
        }
    }

    /// Best-effort persistence: a write failure is logged and the result
    /// still reaches the caller (read-only degraded mode).
    async fn persist(&self, result: &MappingResult) {
        let Some(store) = &self.store else {
            return;
        };
        let item = CertificationItem {
            original_name: result.raw_name.clone(),
            original_amount: None,
            company_id: None,
        };
        if let Err(e) = store.save_ai_result(&item, result).await {
            warn!(
                "failed to persist mapping for '{}': {} (continuing without save)",
                result.raw_name, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandThresholds, FusionWeights};
    use crate::encoder::LexicalEncoder;
    use crate::store::{CertificationStore, MemoryCertificationStore};
    use crate::types::StandardSubstance;

    fn entry(sid: &str, name: &str) -> StandardSubstance {
        StandardSubstance {
            sid: sid.into(),
            name: name.into(),
            category: None,
        }
    }

    fn service_with(entries: Vec<StandardSubstance>) -> MappingService {
        let encoder: Arc<dyn TextEncoder> = Arc::new(LexicalEncoder::new());
        let index = Arc::new(SubstanceIndex::from_corpus(encoder.as_ref(), entries).unwrap());
        MappingService::new(encoder, index, None, MapperConfig::default()).unwrap()
    }

    fn two_salt_corpus() -> Vec<StandardSubstance> {
        vec![
            entry("A1", "Sodium Chloride"),
            entry("A2", "Sodium Sulfate"),
        ]
    }

    #[tokio::test]
    async fn exact_match_is_banded_mapped() {
        let service = service_with(two_salt_corpus());
        let result = service.map_one("sodium chloride").await.unwrap();
        assert_eq!(result.mapped_sid.as_deref(), Some("A1"));
        assert!(result.top1_score > 0.99);
        assert_eq!(result.band, ConfidenceBand::Mapped);
    }

    #[tokio::test]
    async fn nonsense_query_is_not_mapped() {
        let service = service_with(two_salt_corpus());
        let result = service.map_one("zzqqxxjjvv").await.unwrap();
        assert_eq!(result.band, ConfidenceBand::NotMapped);
        assert!(result.mapped_sid.is_none());
        assert!(result.confidence < MapperConfig::default().thresholds.needs_review);
    }

    #[tokio::test]
    async fn near_equidistant_query_confidence_tracks_top1() {
        // Two near-identical reference names: the margin collapses and
        // confidence must reduce to w1 * top1.
        let service = service_with(vec![
            entry("B1", "Chloromethane"),
            entry("B2", "Chloromethane "),
        ]);
        let result = service.map_one("chloromethane").await.unwrap();
        assert!(result.margin < 0.05);
        let expected = MapperConfig::default().fusion.top1_weight * result.top1_score
            + MapperConfig::default().fusion.margin_weight * result.margin;
        assert!((result.confidence - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn map_one_is_deterministic() {
        let service = service_with(two_salt_corpus());
        let a = service.map_one("sodium sulfate").await.unwrap();
        let b = service.map_one("sodium sulfate").await.unwrap();
        assert_eq!(a.mapped_sid, b.mapped_sid);
        assert!((a.confidence - b.confidence).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_input_is_a_validation_error() {
        let service = service_with(two_salt_corpus());
        assert!(matches!(
            service.map_one("   ").await,
            Err(MapperError::Validation(_))
        ));
    }

    /// Encoder that fails on a marker string, for batch-isolation tests.
    struct FlakyEncoder {
        inner: LexicalEncoder,
    }

    impl TextEncoder for FlakyEncoder {
        fn encode(&self, texts: &[&str], role: EmbedRole) -> crate::error::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("boom")) {
                return Err(MapperError::Encoding("simulated encoder failure".into()));
            }
            self.inner.encode(texts, role)
        }
        fn dim(&self) -> usize {
            self.inner.dim()
        }
        fn id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_batch() {
        let encoder: Arc<dyn TextEncoder> = Arc::new(FlakyEncoder {
            inner: LexicalEncoder::new(),
        });
        let index = Arc::new(
            SubstanceIndex::from_corpus(encoder.as_ref(), two_salt_corpus()).unwrap(),
        );
        let service =
            MappingService::new(encoder, index, None, MapperConfig::default()).unwrap();

        let names = vec![
            "sodium chloride".to_string(),
            "sodium sulfate".to_string(),
            "boom".to_string(),
            "sodium chloride".to_string(),
            "sodium sulfate".to_string(),
        ];
        let results = service.map_batch(&names).await.unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[2].band, ConfidenceBand::NotMapped);
        assert!(results[2].error.is_some());
        for i in [0usize, 1, 3, 4] {
            assert!(results[i].error.is_none(), "item {i} should have succeeded");
            assert!(results[i].mapped_sid.is_some());
        }
    }

    #[tokio::test]
    async fn file_mapping_aggregates_bands() {
        let service = service_with(two_salt_corpus());
        let csv = b"substance name,amount\nsodium chloride,10\nzzqqxxjjvv,5\n";
        let agg = service.map_file(csv, "upload.csv").await.unwrap();
        assert_eq!(agg.rows.len(), 2);
        assert_eq!(agg.mapped_count, 1);
        assert_eq!(agg.not_mapped_count, 1);
    }

    #[tokio::test]
    async fn unsupported_upload_extension_is_rejected() {
        let service = service_with(two_salt_corpus());
        assert!(matches!(
            service.map_file(b"whatever", "upload.pdf").await,
            Err(MapperError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn successful_mappings_are_persisted() {
        let store = Arc::new(MemoryCertificationStore::new());
        let encoder: Arc<dyn TextEncoder> = Arc::new(LexicalEncoder::new());
        let index =
            Arc::new(SubstanceIndex::from_corpus(encoder.as_ref(), two_salt_corpus()).unwrap());
        let service = MappingService::new(
            encoder,
            index,
            Some(store.clone() as Arc<dyn CertificationStore>),
            MapperConfig::default(),
        )
        .unwrap();

        let item = CertificationItem {
            original_name: "sodium chloride".into(),
            original_amount: Some(3.2),
            company_id: None,
        };
        let (result, id) = service.map_and_save("sodium chloride", &item).await.unwrap();
        assert_eq!(result.band, ConfidenceBand::Mapped);
        let record = store.get(id.unwrap()).await.unwrap();
        assert_eq!(record.ai_mapped_sid.as_deref(), Some("A1"));
        assert_eq!(record.original_amount, Some(3.2));
    }

    #[tokio::test]
    async fn empty_corpus_degrades_to_not_mapped() {
        let encoder: Arc<dyn TextEncoder> = Arc::new(LexicalEncoder::new());
        let index = Arc::new(SubstanceIndex::build(Vec::new(), Vec::new()).unwrap());
        let service =
            MappingService::new(encoder, index, None, MapperConfig::default()).unwrap();
        let result = service.map_one("methane").await.unwrap();
        assert_eq!(result.band, ConfidenceBand::NotMapped);
        assert_eq!(result.confidence, 0.0);
        assert!(result.candidates.is_empty());
    }
}
