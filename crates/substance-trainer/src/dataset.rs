//! Labeled-pair loading and the sid-disjoint train/dev split.
//!
//! The input is a CSV of historical mapping decisions: a raw substance
//! name and the standard sid a reviewer confirmed for it. Three row
//! classes come out of it:
//!
//! - mapped rows (real sid) feed training and evaluation,
//! - rows whose sid is the explicit `UNMAPPED` sentinel are kept as a
//!   deliberate "no match exists" class,
//! - rows with a missing/placeholder sid are data errors and dropped.
//!
//! The split is disjoint by sid, not by row: every synonym of a sid
//! lands on the same side, otherwise dev would leak paraphrases of the
//! training set and overstate recall.

use anyhow::{bail, Context};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Sentinel sid marking a name a reviewer judged unmappable.
pub const UNMAPPED_SID: &str = "UNMAPPED";

/// Placeholder strings that mean "no label", as opposed to the explicit
/// sentinel above.
const MISSING_MARKERS: &[&str] = &["", "null", "nan", "none", "n/a", "-"];

/// One confirmed mapping decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledPair {
    pub raw_name: String,
    pub sid: String,
}

/// Output of the `prepare` stage, serialized as a single JSON artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedDataset {
    pub train: Vec<LabeledPair>,
    pub dev: Vec<LabeledPair>,
    /// Raw names explicitly labeled as having no standard match.
    pub unmapped: Vec<String>,
    /// Rows dropped for missing or placeholder labels.
    pub dropped: usize,
    pub dev_fraction: f64,
    pub seed: u64,
}

impl PreparedDataset {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// How a single input row is used downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum RowClass {
    Mapped(LabeledPair),
    Unmapped(String),
    Dropped,
}

/// Classify one raw row. An empty name is always dropped; a missing
/// label is a data error, while the literal sentinel is a kept class.
pub fn classify_row(raw_name: &str, sid: &str) -> RowClass {
    let name = raw_name.trim();
    if name.is_empty() {
        return RowClass::Dropped;
    }
    let label = sid.trim();
    if MISSING_MARKERS.contains(&label.to_lowercase().as_str()) {
        return RowClass::Dropped;
    }
    if label.eq_ignore_ascii_case(UNMAPPED_SID) {
        return RowClass::Unmapped(name.to_string());
    }
    RowClass::Mapped(LabeledPair {
        raw_name: name.to_string(),
        sid: label.to_string(),
    })
}

/// Load labeled pairs from CSV. Column detection is case-insensitive:
/// the name column is `raw_name`/`name`/`substance_name`, the label
/// column `sid`/`standard_sid`/`label`.
pub fn load_labeled_csv(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
    };
    let name_col = find(&["raw_name", "name", "substance_name"])
        .ok_or_else(|| anyhow::anyhow!("no raw-name column in {}", path.display()))?;
    let sid_col = find(&["sid", "standard_sid", "label"])
        .ok_or_else(|| anyhow::anyhow!("no sid column in {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.get(name_col).unwrap_or("").to_string();
        let sid = record.get(sid_col).unwrap_or("").to_string();
        rows.push((name, sid));
    }
    Ok(rows)
}

/// Split mapped pairs into train and dev with no sid on both sides.
///
/// Sids are grouped, deterministically shuffled, and whole groups are
/// assigned to dev until the requested row fraction is reached.
pub fn split_by_sid(
    pairs: Vec<LabeledPair>,
    dev_fraction: f64,
    seed: u64,
) -> anyhow::Result<(Vec<LabeledPair>, Vec<LabeledPair>)> {
    if !(0.0..1.0).contains(&dev_fraction) {
        bail!("dev_fraction must be in [0, 1), got {dev_fraction}");
    }

    // BTreeMap for a stable iteration order before the seeded shuffle.
    let mut by_sid: BTreeMap<String, Vec<LabeledPair>> = BTreeMap::new();
    for pair in pairs {
        by_sid.entry(pair.sid.clone()).or_default().push(pair);
    }
    let total_rows: usize = by_sid.values().map(|v| v.len()).sum();

    let mut sids: Vec<String> = by_sid.keys().cloned().collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    sids.shuffle(&mut rng);

    let target = (total_rows as f64 * dev_fraction).round() as usize;
    let mut train = Vec::new();
    let mut dev = Vec::new();
    let mut dev_rows = 0;
    for sid in sids {
        let group = by_sid.remove(&sid).unwrap_or_default();
        if dev_rows < target {
            dev_rows += group.len();
            dev.extend(group);
        } else {
            train.extend(group);
        }
    }

    if train.is_empty() && !dev.is_empty() {
        bail!("dev_fraction {dev_fraction} left the training set empty");
    }
    Ok((train, dev))
}

/// Run the full `prepare` stage: load, classify, split, save.
pub fn prepare(
    pairs_csv: &Path,
    out_path: &Path,
    dev_fraction: f64,
    seed: u64,
) -> anyhow::Result<PreparedDataset> {
    let rows = load_labeled_csv(pairs_csv)?;
    let total = rows.len();

    let mut mapped = Vec::new();
    let mut unmapped = Vec::new();
    let mut dropped = 0;
    for (name, sid) in rows {
        match classify_row(&name, &sid) {
            RowClass::Mapped(pair) => mapped.push(pair),
            RowClass::Unmapped(name) => unmapped.push(name),
            RowClass::Dropped => dropped += 1,
        }
    }
    if mapped.is_empty() {
        bail!("{} contains no usable mapped rows", pairs_csv.display());
    }
    if dropped > 0 {
        warn!("Dropped {dropped}/{total} rows with missing labels");
    }

    let (train, dev) = split_by_sid(mapped, dev_fraction, seed)?;
    info!(
        "Prepared dataset: {} train, {} dev, {} unmapped, {} dropped",
        train.len(),
        dev.len(),
        unmapped.len(),
        dropped
    );

    let dataset = PreparedDataset {
        train,
        dev,
        unmapped,
        dropped,
        dev_fraction,
        seed,
    };
    dataset.save(out_path)?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pair(name: &str, sid: &str) -> LabeledPair {
        LabeledPair {
            raw_name: name.into(),
            sid: sid.into(),
        }
    }

    #[test]
    fn sentinel_is_kept_but_missing_labels_are_dropped() {
        assert_eq!(
            classify_row("mystery solvent", "UNMAPPED"),
            RowClass::Unmapped("mystery solvent".into())
        );
        assert_eq!(
            classify_row("mystery solvent", "unmapped"),
            RowClass::Unmapped("mystery solvent".into())
        );
        for missing in ["", "  ", "null", "NaN", "None", "n/a", "-"] {
            assert_eq!(classify_row("co2", missing), RowClass::Dropped, "{missing:?}");
        }
        assert_eq!(classify_row("", "S001"), RowClass::Dropped);
        assert_eq!(
            classify_row(" CO2 ", " S001 "),
            RowClass::Mapped(pair("CO2", "S001"))
        );
    }

    #[test]
    fn split_never_shares_a_sid_between_sides() {
        let mut pairs = Vec::new();
        for i in 0..40 {
            let sid = format!("S{:03}", i % 10);
            pairs.push(pair(&format!("name {i}"), &sid));
        }
        let (train, dev) = split_by_sid(pairs, 0.25, 7).unwrap();
        assert!(!train.is_empty() && !dev.is_empty());

        let train_sids: HashSet<_> = train.iter().map(|p| p.sid.clone()).collect();
        let dev_sids: HashSet<_> = dev.iter().map(|p| p.sid.clone()).collect();
        assert!(train_sids.is_disjoint(&dev_sids), "sid leaked across the split");
        assert_eq!(train.len() + dev.len(), 40);
    }

    #[test]
    fn split_is_deterministic_for_a_seed() {
        let pairs: Vec<_> = (0..30)
            .map(|i| pair(&format!("n{i}"), &format!("S{}", i % 6)))
            .collect();
        let a = split_by_sid(pairs.clone(), 0.3, 42).unwrap();
        let b = split_by_sid(pairs, 0.3, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_fraction_puts_everything_in_train() {
        let pairs: Vec<_> = (0..10)
            .map(|i| pair(&format!("n{i}"), &format!("S{i}")))
            .collect();
        let (train, dev) = split_by_sid(pairs, 0.0, 1).unwrap();
        assert_eq!(train.len(), 10);
        assert!(dev.is_empty());
    }

    #[test]
    fn prepare_reads_flexible_headers() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("pairs.csv");
        std::fs::write(
            &csv_path,
            "Substance_Name,Standard_SID\nCO2,S001\nmethane,S002\nunknown goo,UNMAPPED\nghost,null\nCO2 eq,S001\npropane,S003\nbutane,S004\n",
        )
        .unwrap();
        let out = dir.path().join("prepared.json");
        let dataset = prepare(&csv_path, &out, 0.0, 3).unwrap();
        assert_eq!(dataset.train.len(), 5);
        assert_eq!(dataset.unmapped, vec!["unknown goo".to_string()]);
        assert_eq!(dataset.dropped, 1);

        let reloaded = PreparedDataset::load(&out).unwrap();
        assert_eq!(reloaded.train.len(), dataset.train.len());
    }
}
