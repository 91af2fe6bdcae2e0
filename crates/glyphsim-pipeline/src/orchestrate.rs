//! Pairwise scoring of one source unit against its targets.
//!
//! A unit is processed in three steps so the expensive middle step can
//! run on worker threads:
//!
//! 1. [`plan_unit`] picks comparisons (same-context and cross-context),
//!    writes provenance-only records for missing sides, and applies the
//!    fingerprint and width-ratio gates. Survivors become
//!    [`ComparisonJob`]s.
//! 2. [`score_job`] normalizes each pair together, applies the ink
//!    coverage floor, and computes SSIM.
//! 3. [`finish_unit`] folds the outcomes into per-pair summaries.
//!
//! [`score_unit_serial`] runs all three in the calling thread.

use serde::{Deserialize, Serialize};

use crate::aggregate::{PairAccumulator, PairSummary};
use crate::normalize::normalize_pair;
use crate::render::{Glyph, Render, RenderCache, RenderSet};
use crate::ssim;
use crate::types::{
    ComparisonMode, ComparisonRecord, PipelineError, Provenance, ScoringConfig, UnitCounters,
    unit_id,
};

/// One gated comparison, ready for a worker.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonJob<'a> {
    /// Index of the target in [`UnitPlan::targets`].
    pub target: usize,
    /// Same-context or cross-context.
    pub mode: ComparisonMode,
    /// Context of the source render.
    pub source_context: &'a str,
    /// Context of the target render.
    pub target_context: &'a str,
    /// Source glyph.
    pub source_glyph: &'a Glyph,
    /// Target glyph.
    pub target_glyph: &'a Glyph,
    /// Provenance of the source render.
    pub source_provenance: Provenance,
    /// Provenance of the target render.
    pub target_provenance: Provenance,
    /// Fingerprint similarity that passed the gate.
    pub phash: f64,
}

impl ComparisonJob<'_> {
    fn record(&self, ssim: f64) -> ComparisonRecord {
        ComparisonRecord {
            source_context: self.source_context.to_string(),
            target_context: self.target_context.to_string(),
            mode: self.mode,
            ssim: Some(ssim),
            phash: Some(self.phash),
            source_provenance: self.source_provenance,
            target_provenance: self.target_provenance,
        }
    }
}

/// Result of scoring one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobOutcome {
    /// The pair was normalized and scored.
    Scored {
        /// Structural similarity.
        ssim: f64,
    },
    /// A normalized side fell below the ink-coverage floor.
    BelowCoverage,
}

/// Everything needed to score and finish one unit.
#[derive(Debug)]
pub struct UnitPlan<'a> {
    /// Checkpoint key of the source.
    pub unit_id: String,
    /// Source text.
    pub source: &'a str,
    /// Targets compared against, in workload order, excluding the source.
    pub targets: Vec<&'a str>,
    /// Gated jobs for the workers.
    pub jobs: Vec<ComparisonJob<'a>>,
    unscored: Vec<(usize, ComparisonRecord)>,
    counters: UnitCounters,
}

impl UnitPlan<'_> {
    /// Counters accumulated during planning.
    #[must_use]
    pub const fn counters(&self) -> &UnitCounters {
        &self.counters
    }
}

/// Finished unit, as checkpointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitResult {
    /// Checkpoint key of the source.
    pub unit_id: String,
    /// One summary per target with at least one record.
    pub pair_summaries: Vec<PairSummary>,
    /// Bookkeeping.
    pub counters: UnitCounters,
}

static EMPTY: RenderSet = RenderSet::EMPTY;

/// Choose and gate the comparisons of `source` against `targets`.
///
/// Texts missing from `renders` are treated as having no renders.
#[must_use]
pub fn plan_unit<'a, S: AsRef<str>>(
    source: &'a str,
    targets: &'a [S],
    renders: &'a RenderCache,
    config: &ScoringConfig,
) -> UnitPlan<'a> {
    let source_set = renders.get(source).unwrap_or(&EMPTY);
    let mut plan = UnitPlan {
        unit_id: unit_id(source),
        source,
        targets: Vec::with_capacity(targets.len()),
        jobs: Vec::new(),
        unscored: Vec::new(),
        counters: UnitCounters::default(),
    };

    for target in targets.iter().map(AsRef::as_ref) {
        if target == source {
            continue;
        }
        let index = plan.targets.len();
        plan.targets.push(target);
        let target_set = renders.get(target).unwrap_or(&EMPTY);
        let gate = config.phash_gate(source, target);
        plan_same_context(&mut plan, index, source_set, target_set, gate, config);
        plan_cross_context(&mut plan, index, source_set, target_set, gate, config);
    }
    plan
}

fn plan_same_context<'a>(
    plan: &mut UnitPlan<'a>,
    index: usize,
    source_set: &'a RenderSet,
    target_set: &'a RenderSet,
    gate: f64,
    config: &ScoringConfig,
) {
    for source in source_set {
        let Some(target) = target_set.get(&source.context) else {
            continue;
        };
        match (source.usable(), target.usable()) {
            (Some(source_glyph), Some(target_glyph)) => {
                let job = ComparisonJob {
                    target: index,
                    mode: ComparisonMode::Same,
                    source_context: &source.context,
                    target_context: &target.context,
                    source_glyph,
                    target_glyph,
                    source_provenance: source.provenance,
                    target_provenance: target.provenance,
                    phash: source_glyph.fingerprint().similarity(target_glyph.fingerprint()),
                };
                push_gated(plan, job, gate, config);
            }
            _ => {
                plan.counters.missing_records += 1;
                plan.unscored.push((
                    index,
                    ComparisonRecord {
                        source_context: source.context.clone(),
                        target_context: target.context.clone(),
                        mode: ComparisonMode::Same,
                        ssim: None,
                        phash: None,
                        source_provenance: source.provenance,
                        target_provenance: target.provenance,
                    },
                ));
            }
        }
    }
}

fn plan_cross_context<'a>(
    plan: &mut UnitPlan<'a>,
    index: usize,
    source_set: &'a RenderSet,
    target_set: &'a RenderSet,
    gate: f64,
    config: &ScoringConfig,
) {
    for (source, source_glyph) in source_set.usable() {
        if target_set
            .get(&source.context)
            .and_then(Render::usable)
            .is_some()
        {
            continue;
        }
        let Some((target, target_glyph, phash)) = best_match(source_glyph, target_set) else {
            continue;
        };
        plan.counters.cross_selected += 1;
        let job = ComparisonJob {
            target: index,
            mode: ComparisonMode::Cross,
            source_context: &source.context,
            target_context: &target.context,
            source_glyph,
            target_glyph,
            source_provenance: source.provenance,
            target_provenance: target.provenance,
            phash,
        };
        push_gated(plan, job, gate, config);
    }
}

/// Usable target render with the highest fingerprint similarity; the
/// first in context order wins ties.
fn best_match<'a>(source: &Glyph, targets: &'a RenderSet) -> Option<(&'a Render, &'a Glyph, f64)> {
    let mut best: Option<(&Render, &Glyph, f64)> = None;
    for (render, glyph) in targets.usable() {
        let similarity = source.fingerprint().similarity(glyph.fingerprint());
        if best.is_none_or(|(_, _, score)| similarity > score) {
            best = Some((render, glyph, similarity));
        }
    }
    best
}

fn push_gated<'a>(
    plan: &mut UnitPlan<'a>,
    job: ComparisonJob<'a>,
    gate: f64,
    config: &ScoringConfig,
) {
    let (source_width, target_width) = (job.source_glyph.ink_width(), job.target_glyph.ink_width());
    if job.phash < gate {
        plan.counters.phash_gated += 1;
    } else if !config.width_ratio_passes(source_width, target_width) {
        plan.counters.width_gated += 1;
    } else {
        plan.jobs.push(job);
    }
}

/// Normalize the pair together and score it.
#[must_use]
pub fn score_job(job: &ComparisonJob<'_>, config: &ScoringConfig) -> JobOutcome {
    let (a, b) = normalize_pair(
        job.source_glyph.inked(),
        job.target_glyph.inked(),
        config.canonical_size,
    );
    if a.ink_coverage(config.ink_threshold) < config.min_ink_coverage
        || b.ink_coverage(config.ink_threshold) < config.min_ink_coverage
    {
        return JobOutcome::BelowCoverage;
    }
    JobOutcome::Scored {
        ssim: ssim::compute(&a, &b),
    }
}

/// Fold job outcomes (in job order) into the unit result.
///
/// # Errors
///
/// Returns [`PipelineError::IncompleteBatch`] when `outcomes` does not
/// hold exactly one entry per job.
pub fn finish_unit(
    plan: UnitPlan<'_>,
    outcomes: &[JobOutcome],
) -> Result<UnitResult, PipelineError> {
    if outcomes.len() != plan.jobs.len() {
        return Err(PipelineError::IncompleteBatch {
            expected: plan.jobs.len(),
            actual: outcomes.len(),
        });
    }

    let mut counters = plan.counters;
    counters.jobs = plan.jobs.len() as u64;
    let mut accumulators = vec![PairAccumulator::new(); plan.targets.len()];
    for (index, record) in plan.unscored {
        accumulators[index].push(record);
    }
    for (job, outcome) in plan.jobs.iter().zip(outcomes) {
        match *outcome {
            JobOutcome::Scored { ssim } => {
                counters.scored += 1;
                accumulators[job.target].push(job.record(ssim));
            }
            JobOutcome::BelowCoverage => counters.coverage_gated += 1,
        }
    }

    let pair_summaries = plan
        .targets
        .iter()
        .zip(accumulators)
        .filter_map(|(target, acc)| acc.finish(plan.source, target))
        .collect();
    log::debug!(
        "{}: {} jobs, {} scored, gated phash/width/coverage {}/{}/{}",
        plan.unit_id,
        counters.jobs,
        counters.scored,
        counters.phash_gated,
        counters.width_gated,
        counters.coverage_gated,
    );
    Ok(UnitResult {
        unit_id: plan.unit_id,
        pair_summaries,
        counters,
    })
}

/// Plan, score, and finish a unit in the calling thread.
///
/// # Errors
///
/// Propagates [`finish_unit`] errors.
pub fn score_unit_serial<S: AsRef<str>>(
    source: &str,
    targets: &[S],
    renders: &RenderCache,
    config: &ScoringConfig,
) -> Result<UnitResult, PipelineError> {
    let plan = plan_unit(source, targets, renders, config);
    let outcomes: Vec<JobOutcome> = plan.jobs.iter().map(|job| score_job(job, config)).collect();
    finish_unit(plan, &outcomes)
}
