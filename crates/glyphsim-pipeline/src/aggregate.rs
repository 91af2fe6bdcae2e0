//! Per-pair summaries and the run-wide score distribution.

use serde::{Deserialize, Serialize};

use crate::types::{ComparisonMode, ComparisonRecord, Provenance};

/// Number of histogram bins over `[0, 1]`.
pub const HISTOGRAM_BINS: usize = 10;

/// Record counts partitioned by combined provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceCounts {
    /// Both sides native.
    pub native: u64,
    /// At least one side fallback, none missing.
    pub fallback: u64,
    /// At least one side missing.
    pub missing: u64,
}

impl ProvenanceCounts {
    fn add(&mut self, provenance: Provenance) {
        match provenance {
            Provenance::Native => self.native += 1,
            Provenance::Fallback => self.fallback += 1,
            Provenance::Missing => self.missing += 1,
        }
    }
}

/// Aggregate over every record of one (source, target) pair.
///
/// Score fields are `None` when no record carries that score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSummary {
    /// Source text unit.
    pub source: String,
    /// Target text unit.
    pub target: String,
    /// Mean SSIM over scored records.
    pub mean_ssim: Option<f64>,
    /// Highest same-context SSIM.
    pub max_same_context_ssim: Option<f64>,
    /// Highest SSIM in either mode.
    pub max_ssim: Option<f64>,
    /// Mean fingerprint similarity over records that carry one.
    pub mean_phash: Option<f64>,
    /// Records by combined provenance.
    pub provenance: ProvenanceCounts,
    /// Same-context records.
    pub same_context: u64,
    /// Cross-context records.
    pub cross_context: u64,
    /// All records.
    pub total: u64,
    /// The records, ordered by mode, then source and target context.
    pub records: Vec<ComparisonRecord>,
}

/// Builds a [`PairSummary`] one record at a time.
#[derive(Debug, Clone, Default)]
pub struct PairAccumulator {
    records: Vec<ComparisonRecord>,
}

impl PairAccumulator {
    /// Empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Add one record.
    pub fn push(&mut self, record: ComparisonRecord) {
        self.records.push(record);
    }

    /// Finalize, or `None` when the pair has no records.
    #[must_use]
    pub fn finish(mut self, source: &str, target: &str) -> Option<PairSummary> {
        if self.records.is_empty() {
            return None;
        }
        self.records.sort_by(|a, b| {
            (a.mode, &a.source_context, &a.target_context).cmp(&(
                b.mode,
                &b.source_context,
                &b.target_context,
            ))
        });

        let mut provenance = ProvenanceCounts::default();
        let mut same_context = 0;
        let mut cross_context = 0;
        let mut ssim = Stats::default();
        let mut same_ssim = Stats::default();
        let mut phash = Stats::default();
        for record in &self.records {
            provenance.add(record.provenance());
            match record.mode {
                ComparisonMode::Same => same_context += 1,
                ComparisonMode::Cross => cross_context += 1,
            }
            if let Some(value) = record.ssim {
                ssim.add(value);
                if record.mode == ComparisonMode::Same {
                    same_ssim.add(value);
                }
            }
            if let Some(value) = record.phash {
                phash.add(value);
            }
        }

        Some(PairSummary {
            source: source.to_string(),
            target: target.to_string(),
            mean_ssim: ssim.mean(),
            max_same_context_ssim: same_ssim.max,
            max_ssim: ssim.max,
            mean_phash: phash.mean(),
            provenance,
            same_context,
            cross_context,
            total: same_context + cross_context,
            records: self.records,
        })
    }
}

#[derive(Default)]
struct Stats {
    sum: f64,
    count: u32,
    max: Option<f64>,
}

impl Stats {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Run-wide histogram of pair scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Pair summaries seen.
    pub pairs: u64,
    /// Summaries with a mean SSIM.
    pub scored_pairs: u64,
    /// Mean SSIM in ten 0.1-wide bins; negatives land in bin 0.
    pub histogram: [u64; HISTOGRAM_BINS],
    /// Cutoff for [`Distribution::high_ssim_pairs`].
    pub high_ssim_threshold: f64,
    /// Pairs whose best same-context SSIM reaches the cutoff.
    pub high_ssim_pairs: u64,
}

impl Distribution {
    /// Empty distribution with the given high-risk cutoff.
    #[must_use]
    pub const fn new(high_ssim_threshold: f64) -> Self {
        Self {
            pairs: 0,
            scored_pairs: 0,
            histogram: [0; HISTOGRAM_BINS],
            high_ssim_threshold,
            high_ssim_pairs: 0,
        }
    }

    /// Count one summary.
    pub fn add(&mut self, summary: &PairSummary) {
        self.pairs += 1;
        if let Some(mean) = summary.mean_ssim {
            self.scored_pairs += 1;
            self.histogram[bin(mean)] += 1;
        }
        if summary
            .max_same_context_ssim
            .is_some_and(|max| max >= self.high_ssim_threshold)
        {
            self.high_ssim_pairs += 1;
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bin(value: f64) -> usize {
    let scaled = (value * HISTOGRAM_BINS as f64).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as usize).min(HISTOGRAM_BINS - 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(
        mode: ComparisonMode,
        context: &str,
        ssim: Option<f64>,
        side: Provenance,
    ) -> ComparisonRecord {
        ComparisonRecord {
            source_context: context.to_string(),
            target_context: context.to_string(),
            mode,
            ssim,
            phash: ssim.map(|_| 0.75),
            source_provenance: Provenance::Native,
            target_provenance: side,
        }
    }

    #[test]
    fn empty_accumulator_has_no_summary() {
        assert!(PairAccumulator::new().finish("a", "b").is_none());
    }

    #[test]
    fn summary_statistics() {
        let mut acc = PairAccumulator::new();
        acc.push(record(ComparisonMode::Cross, "Sans", Some(0.9), Provenance::Native));
        acc.push(record(ComparisonMode::Same, "Serif", Some(0.6), Provenance::Fallback));
        acc.push(record(ComparisonMode::Same, "Mono", Some(0.4), Provenance::Native));
        acc.push(record(ComparisonMode::Same, "Bold", None, Provenance::Missing));
        let summary = acc.finish("l", "I").unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.same_context, 3);
        assert_eq!(summary.cross_context, 1);
        assert!((summary.mean_ssim.unwrap() - 0.633_333_333).abs() < 1e-6);
        assert!((summary.max_same_context_ssim.unwrap() - 0.6).abs() < 1e-12);
        assert!((summary.max_ssim.unwrap() - 0.9).abs() < 1e-12);
        assert!((summary.mean_phash.unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(
            summary.provenance,
            ProvenanceCounts {
                native: 2,
                fallback: 1,
                missing: 1
            }
        );

        let order: Vec<(ComparisonMode, &str)> = summary
            .records
            .iter()
            .map(|r| (r.mode, r.source_context.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ComparisonMode::Same, "Bold"),
                (ComparisonMode::Same, "Mono"),
                (ComparisonMode::Same, "Serif"),
                (ComparisonMode::Cross, "Sans"),
            ]
        );
    }

    #[test]
    fn missing_only_pair_has_null_scores() {
        let mut acc = PairAccumulator::new();
        acc.push(record(ComparisonMode::Same, "Serif", None, Provenance::Missing));
        let summary = acc.finish("a", "b").unwrap();
        assert!(summary.mean_ssim.is_none());
        assert!(summary.max_ssim.is_none());
        assert_eq!(summary.provenance.missing, 1);
    }

    #[test]
    fn histogram_bins() {
        assert_eq!(bin(-0.3), 0);
        assert_eq!(bin(0.0), 0);
        assert_eq!(bin(0.15), 1);
        assert_eq!(bin(0.99), 9);
        assert_eq!(bin(1.0), 9);
    }

    #[test]
    fn distribution_counts_high_risk_pairs() {
        let mut high = PairAccumulator::new();
        high.push(record(ComparisonMode::Same, "Serif", Some(0.85), Provenance::Native));
        let mut low = PairAccumulator::new();
        low.push(record(ComparisonMode::Cross, "Serif", Some(0.95), Provenance::Native));
        let mut missing = PairAccumulator::new();
        missing.push(record(ComparisonMode::Same, "Serif", None, Provenance::Missing));

        let mut dist = Distribution::new(0.7);
        for acc in [high, low, missing] {
            dist.add(&acc.finish("x", "y").unwrap());
        }
        assert_eq!(dist.pairs, 3);
        assert_eq!(dist.scored_pairs, 2);
        assert_eq!(dist.high_ssim_pairs, 1);
        assert_eq!(dist.histogram[8], 1);
        assert_eq!(dist.histogram[9], 1);
    }

    #[test]
    fn summary_json_is_camel_case() {
        let mut acc = PairAccumulator::new();
        acc.push(record(ComparisonMode::Same, "Serif", Some(1.0), Provenance::Native));
        let json = serde_json::to_value(acc.finish("a", "b").unwrap()).unwrap();
        assert!(json.get("maxSameContextSsim").is_some());
        assert_eq!(json["records"][0]["sourceProvenance"], "native");
    }
}
