//! Offline training pipeline for the substance mapper.
//!
//! Six re-runnable stages, each reading and writing file artifacts so a
//! failed run resumes from the last completed stage:
//!
//! 1. `prepare`   — load labeled pairs, drop bad rows, sid-disjoint split
//! 2. `triplets`  — anchor/positive/negative construction from the split
//! 3. `mine`      — model-based hard negatives against the reference corpus
//! 4. `finetune`  — contrastive fine-tuning of the embedding model
//! 5. `evaluate`  — Recall@k, band distribution, per-row eval frame
//! 6. `calibrate` — threshold sweep targeting Precision@mapped

pub mod calibrate;
pub mod dataset;
pub mod eval;
pub mod finetune;
pub mod mining;
pub mod triplets;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Write records as JSON lines, one per row.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Read a JSON-lines artifact back, skipping blank lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", path.display()))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
