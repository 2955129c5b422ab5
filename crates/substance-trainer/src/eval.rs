//! Evaluation on the dev split.
//!
//! Reports retrieval quality (Recall@1, Recall@5 by sid) and, through
//! the same fusion and banding the service uses, the operating metrics:
//! band distribution, Precision@mapped and mapped coverage. The
//! per-row frame is written as CSV and is the direct input to the
//! calibration stage.

use crate::dataset::LabeledPair;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use substance_mapper::fusion::{classify, fuse};
use substance_mapper::{
    BandThresholds, ConfidenceBand, EmbedRole, FusionWeights, SubstanceIndex, TextEncoder,
};
use tracing::info;

/// One dev example scored end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRow {
    pub raw_name: String,
    pub true_sid: String,
    pub predicted_sid: String,
    pub top1: f32,
    pub margin: f32,
    pub confidence: f32,
    pub band: String,
    /// 1-based rank of the true sid among retrieved candidates, if hit.
    pub rank_of_true: Option<usize>,
}

impl EvalRow {
    pub fn correct(&self) -> bool {
        self.rank_of_true == Some(1)
    }
}

/// Aggregate metrics over the dev split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub total: usize,
    pub recall_at_1: f64,
    pub recall_at_5: f64,
    pub band_counts: BTreeMap<String, usize>,
    /// Fraction of mapped-band rows whose top-1 sid is the true sid.
    pub precision_at_mapped: f64,
    /// Fraction of all rows landing in the mapped band.
    pub mapped_coverage: f64,
    pub encoder_id: String,
}

/// Score every dev pair against the index and aggregate.
pub fn evaluate(
    encoder: &dyn TextEncoder,
    index: &SubstanceIndex,
    dev: &[LabeledPair],
    weights: FusionWeights,
    thresholds: BandThresholds,
    k: usize,
) -> anyhow::Result<(EvalReport, Vec<EvalRow>)> {
    if dev.is_empty() {
        bail!("dev split is empty; re-run prepare with a nonzero dev fraction");
    }

    let names: Vec<&str> = dev.iter().map(|p| p.raw_name.as_str()).collect();
    let queries = encoder.encode(&names, EmbedRole::Query)?;

    let mut rows = Vec::with_capacity(dev.len());
    for (pair, query) in dev.iter().zip(&queries) {
        let candidates = index.search(query, k)?;
        let fused = fuse(&candidates, weights);
        let band = classify(fused.confidence, thresholds);

        let rank_of_true = candidates
            .iter()
            .position(|c| c.sid == pair.sid)
            .map(|i| i + 1);
        rows.push(EvalRow {
            raw_name: pair.raw_name.clone(),
            true_sid: pair.sid.clone(),
            predicted_sid: candidates
                .first()
                .map(|c| c.sid.clone())
                .unwrap_or_default(),
            top1: fused.top1,
            margin: fused.margin,
            confidence: fused.confidence,
            band: band.as_str().to_string(),
            rank_of_true,
        });
    }

    let total = rows.len();
    let hits_at_1 = rows.iter().filter(|r| r.correct()).count();
    let hits_at_5 = rows
        .iter()
        .filter(|r| matches!(r.rank_of_true, Some(rank) if rank <= 5))
        .count();

    let mut band_counts: BTreeMap<String, usize> = BTreeMap::new();
    for row in &rows {
        *band_counts.entry(row.band.clone()).or_default() += 1;
    }

    let mapped_band = ConfidenceBand::Mapped.as_str();
    let mapped_rows: Vec<&EvalRow> = rows.iter().filter(|r| r.band == mapped_band).collect();
    let mapped_correct = mapped_rows.iter().filter(|r| r.correct()).count();
    let precision_at_mapped = if mapped_rows.is_empty() {
        0.0
    } else {
        mapped_correct as f64 / mapped_rows.len() as f64
    };

    let report = EvalReport {
        total,
        recall_at_1: hits_at_1 as f64 / total as f64,
        recall_at_5: hits_at_5 as f64 / total as f64,
        band_counts,
        precision_at_mapped,
        mapped_coverage: mapped_rows.len() as f64 / total as f64,
        encoder_id: encoder.id().to_string(),
    };
    info!(
        "Evaluated {} rows: R@1={:.3}, R@5={:.3}, P@mapped={:.3}, coverage={:.3}",
        total,
        report.recall_at_1,
        report.recall_at_5,
        report.precision_at_mapped,
        report.mapped_coverage
    );
    Ok((report, rows))
}

/// Write the per-row frame as CSV.
pub fn write_rows_csv(path: &Path, rows: &[EvalRow]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a per-row frame back for calibration.
pub fn read_rows_csv(path: &Path) -> anyhow::Result<Vec<EvalRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use substance_mapper::{LexicalEncoder, StandardSubstance};

    fn corpus() -> Vec<StandardSubstance> {
        vec![
            StandardSubstance {
                sid: "S001".into(),
                name: "carbon dioxide".into(),
                category: Some("gas".into()),
            },
            StandardSubstance {
                sid: "S002".into(),
                name: "sodium chloride".into(),
                category: Some("salt".into()),
            },
            StandardSubstance {
                sid: "S003".into(),
                name: "methane".into(),
                category: Some("gas".into()),
            },
        ]
    }

    fn pair(name: &str, sid: &str) -> LabeledPair {
        LabeledPair {
            raw_name: name.into(),
            sid: sid.into(),
        }
    }

    #[test]
    fn exact_matches_score_perfect_recall() {
        let encoder = LexicalEncoder::new();
        let index = SubstanceIndex::from_corpus(&encoder, corpus()).unwrap();
        let dev = vec![
            pair("carbon dioxide", "S001"),
            pair("sodium chloride", "S002"),
        ];
        let (report, rows) = evaluate(
            &encoder,
            &index,
            &dev,
            FusionWeights::default(),
            BandThresholds::default(),
            5,
        )
        .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.recall_at_1, 1.0);
        assert_eq!(report.recall_at_5, 1.0);
        for row in &rows {
            assert_eq!(row.rank_of_true, Some(1));
            assert_eq!(row.predicted_sid, row.true_sid);
        }
    }

    #[test]
    fn wrong_labels_hurt_recall_but_not_coverage() {
        let encoder = LexicalEncoder::new();
        let index = SubstanceIndex::from_corpus(&encoder, corpus()).unwrap();
        // The label says methane but the text is an exact CO2 match.
        let dev = vec![pair("carbon dioxide", "S003")];
        let (report, rows) = evaluate(
            &encoder,
            &index,
            &dev,
            FusionWeights::default(),
            BandThresholds::default(),
            5,
        )
        .unwrap();
        assert_eq!(report.recall_at_1, 0.0);
        assert_eq!(rows[0].predicted_sid, "S001");
        assert!(rows[0].rank_of_true.is_some());
        assert!(rows[0].rank_of_true != Some(1));
    }

    #[test]
    fn precision_at_mapped_counts_only_the_mapped_band() {
        let encoder = LexicalEncoder::new();
        let index = SubstanceIndex::from_corpus(&encoder, corpus()).unwrap();
        let dev = vec![
            pair("carbon dioxide", "S001"),
            pair("xqzw vvkp", "S002"), // gibberish: low confidence
        ];
        let thresholds = BandThresholds {
            mapped: 0.8,
            needs_review: 0.3,
        };
        let (report, _) = evaluate(
            &encoder,
            &index,
            &dev,
            FusionWeights::default(),
            thresholds,
            5,
        )
        .unwrap();
        assert!(report.mapped_coverage <= 0.5);
        if report.mapped_coverage > 0.0 {
            assert_eq!(report.precision_at_mapped, 1.0);
        }
    }

    #[test]
    fn rows_round_trip_through_csv() {
        let encoder = LexicalEncoder::new();
        let index = SubstanceIndex::from_corpus(&encoder, corpus()).unwrap();
        let dev = vec![pair("methane", "S003")];
        let (_, rows) = evaluate(
            &encoder,
            &index,
            &dev,
            FusionWeights::default(),
            BandThresholds::default(),
            5,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval_rows.csv");
        write_rows_csv(&path, &rows).unwrap();
        let reloaded = read_rows_csv(&path).unwrap();
        assert_eq!(reloaded.len(), rows.len());
        assert_eq!(reloaded[0].true_sid, "S003");
        assert_eq!(reloaded[0].rank_of_true, Some(1));
    }
}
