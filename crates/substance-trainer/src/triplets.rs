//! Triplet construction from the training split.
//!
//! Anchors are raw names. The positive is another confirmed synonym of
//! the same sid when one exists, else the reference name itself, else a
//! same-category reference name as a weak fallback. Each anchor gets a
//! mix of negatives: easy ones from a different category and harder
//! ones from a different sid within the same category. The genuinely
//! hard negatives come later from model-based mining.

use crate::dataset::LabeledPair;
use anyhow::bail;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use substance_mapper::StandardSubstance;
use tracing::{info, warn};

const UNKNOWN_CATEGORY: &str = "unknown";

/// One contrastive training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub anchor: String,
    pub positive: String,
    pub negative: String,
    pub anchor_sid: String,
    /// Equals `anchor_sid` except for category-fallback positives.
    pub positive_sid: String,
    pub negative_sid: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TripletConfig {
    /// Different-category negatives per anchor.
    pub easy_negatives: usize,
    /// Same-category, different-sid negatives per anchor.
    pub hard_negatives: usize,
    pub seed: u64,
}

impl Default for TripletConfig {
    fn default() -> Self {
        Self {
            easy_negatives: 2,
            hard_negatives: 1,
            seed: 42,
        }
    }
}

/// Build triplets from training pairs against the reference corpus.
pub fn build_triplets(
    train: &[LabeledPair],
    reference: &[StandardSubstance],
    config: TripletConfig,
) -> anyhow::Result<Vec<Triplet>> {
    if reference.is_empty() {
        bail!("reference corpus is empty");
    }

    let by_sid: HashMap<&str, &StandardSubstance> =
        reference.iter().map(|s| (s.sid.as_str(), s)).collect();
    let category_of = |sid: &str| -> &str {
        by_sid
            .get(sid)
            .and_then(|s| s.category.as_deref())
            .unwrap_or(UNKNOWN_CATEGORY)
    };

    // Synonym groups from the training data, in stable order.
    let mut synonyms: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut skipped = 0usize;
    for pair in train {
        if by_sid.contains_key(pair.sid.as_str()) {
            synonyms
                .entry(pair.sid.as_str())
                .or_default()
                .push(pair.raw_name.as_str());
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!("Skipped {skipped} training rows whose sid is not in the reference corpus");
    }
    if synonyms.is_empty() {
        bail!("no training row matches a reference sid");
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let mut triplets = Vec::new();

    for (&sid, names) in &synonyms {
        let reference_entry = by_sid[sid];
        let category = category_of(sid).to_string();

        let same_category: Vec<&StandardSubstance> = reference
            .iter()
            .filter(|s| s.sid != sid && category_of(&s.sid) == category)
            .collect();
        let other_category: Vec<&StandardSubstance> = reference
            .iter()
            .filter(|s| s.sid != sid && category_of(&s.sid) != category)
            .collect();

        for (i, &anchor) in names.iter().enumerate() {
            let positive =
                pick_positive(anchor, i, names, reference_entry, &same_category, &mut rng);
            let Some((positive, positive_sid)) = positive else {
                continue;
            };

            let mut negatives: Vec<&StandardSubstance> = Vec::new();
            negatives.extend(
                other_category
                    .choose_multiple(&mut rng, config.easy_negatives)
                    .copied(),
            );
            negatives.extend(
                same_category
                    .choose_multiple(&mut rng, config.hard_negatives)
                    .copied(),
            );

            for negative in negatives {
                if negative.sid == positive_sid {
                    continue;
                }
                triplets.push(Triplet {
                    anchor: anchor.to_string(),
                    positive: positive.to_string(),
                    negative: negative.name.clone(),
                    anchor_sid: sid.to_string(),
                    positive_sid: positive_sid.to_string(),
                    negative_sid: negative.sid.clone(),
                    category: category.clone(),
                });
            }
        }
    }

    if triplets.is_empty() {
        bail!("triplet construction produced nothing; corpus too small?");
    }
    info!(
        "Built {} triplets from {} sids",
        triplets.len(),
        synonyms.len()
    );
    Ok(triplets)
}

/// Prefer a different synonym of the same sid; fall back to the
/// reference name unless the anchor already is it; last resort is a
/// same-category reference name (a weak positive, but it still anchors
/// the category neighborhood).
fn pick_positive<'a>(
    anchor: &str,
    anchor_idx: usize,
    synonyms: &[&'a str],
    reference_entry: &'a StandardSubstance,
    same_category: &[&'a StandardSubstance],
    rng: &mut rand::rngs::StdRng,
) -> Option<(&'a str, &'a str)> {
    let other = synonyms
        .iter()
        .enumerate()
        .find(|(i, name)| *i != anchor_idx && !name.eq_ignore_ascii_case(anchor))
        .map(|(_, name)| *name);
    if let Some(name) = other {
        return Some((name, reference_entry.sid.as_str()));
    }
    if !reference_entry.name.eq_ignore_ascii_case(anchor) {
        return Some((reference_entry.name.as_str(), reference_entry.sid.as_str()));
    }
    same_category
        .choose(rng)
        .map(|s| (s.name.as_str(), s.sid.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substance(sid: &str, name: &str, category: &str) -> StandardSubstance {
        StandardSubstance {
            sid: sid.into(),
            name: name.into(),
            category: Some(category.into()),
        }
    }

    fn corpus() -> Vec<StandardSubstance> {
        vec![
            substance("S001", "carbon dioxide", "greenhouse_gas"),
            substance("S002", "methane", "greenhouse_gas"),
            substance("S003", "nitrous oxide", "greenhouse_gas"),
            substance("S010", "sodium chloride", "salt"),
            substance("S011", "potassium chloride", "salt"),
        ]
    }

    fn pair(name: &str, sid: &str) -> LabeledPair {
        LabeledPair {
            raw_name: name.into(),
            sid: sid.into(),
        }
    }

    #[test]
    fn positives_share_the_anchor_sid() {
        let train = vec![
            pair("CO2", "S001"),
            pair("carbon dioxide (CO2)", "S001"),
            pair("CH4", "S002"),
        ];
        let triplets = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        assert!(!triplets.is_empty());
        for t in &triplets {
            assert_ne!(t.anchor_sid, t.negative_sid);
            assert_ne!(t.anchor.to_lowercase(), t.positive.to_lowercase());
        }
        // CO2 has a sibling synonym, so its positive must come from it.
        let co2 = triplets.iter().find(|t| t.anchor == "CO2").unwrap();
        assert_eq!(co2.positive, "carbon dioxide (CO2)");
        assert_eq!(co2.positive_sid, co2.anchor_sid);
    }

    #[test]
    fn lone_synonym_falls_back_to_the_reference_name() {
        let train = vec![pair("CH4", "S002")];
        let triplets = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        for t in &triplets {
            assert_eq!(t.positive, "methane");
        }
    }

    #[test]
    fn anchor_equal_to_reference_name_gets_a_category_fallback_positive() {
        let train = vec![pair("methane", "S002"), pair("NaCl", "S010")];
        let triplets = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        let methane: Vec<_> = triplets.iter().filter(|t| t.anchor == "methane").collect();
        assert!(!methane.is_empty());
        for t in methane {
            // Weak positive from the same category, never the anchor's own sid.
            assert_ne!(t.positive_sid, t.anchor_sid);
            assert!(matches!(t.positive_sid.as_str(), "S001" | "S003"));
            assert_ne!(t.negative_sid, t.positive_sid);
        }
        let nacl = triplets.iter().find(|t| t.anchor == "NaCl").unwrap();
        assert_eq!(nacl.positive_sid, "S010");
        assert_eq!(nacl.positive, "sodium chloride");
    }

    #[test]
    fn same_category_negatives_are_present() {
        let train = vec![pair("CO2", "S001"), pair("carbon dioxide gas", "S001")];
        let config = TripletConfig {
            easy_negatives: 1,
            hard_negatives: 2,
            seed: 9,
        };
        let triplets = build_triplets(&train, &corpus(), config).unwrap();
        let hard: Vec<_> = triplets
            .iter()
            .filter(|t| matches!(t.negative_sid.as_str(), "S002" | "S003"))
            .collect();
        assert!(!hard.is_empty(), "expected same-category negatives");
    }

    #[test]
    fn construction_is_deterministic_for_a_seed() {
        let train = vec![
            pair("CO2", "S001"),
            pair("carbon dioxide eq", "S001"),
            pair("laughing gas", "S003"),
        ];
        let a = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        let b = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_sids_are_skipped_not_fatal() {
        let train = vec![pair("CO2", "S001"), pair("mystery", "S999")];
        let triplets = build_triplets(&train, &corpus(), TripletConfig::default()).unwrap();
        assert!(triplets.iter().all(|t| t.anchor_sid != "S999"));
    }
}
