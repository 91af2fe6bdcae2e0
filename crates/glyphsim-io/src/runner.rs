//! Parallel, resumable scoring runs.
//!
//! Units are processed strictly one after another. Within a unit the
//! gated jobs form one flat batch, split into equal chunks (one per
//! worker) on a dedicated rayon pool; each chunk returns
//! `(job index, outcome)` pairs that are written back by index, so the
//! result never depends on scheduling.
//!
//! A chunk that panics marks its unit incomplete: no checkpoint is
//! written and its summaries are left out of the output. Every other
//! unit proceeds normally.

use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use glyphsim_pipeline::{
    ComparisonJob, Distribution, FontRegistry, GlyphMetadata, JobOutcome, PipelineError,
    Rasterizer, ReferenceRenders, RenderCache, ScoringConfig, UnitCounters, finish_unit,
    load_candidates, plan_unit, render_text, score_job, select_candidates, unit_id,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::checkpoint::ProgressLog;
use crate::error::RunError;
use crate::index::read_index;
use crate::output::{ResultWriter, RunMetadata};
use crate::workload::Workload;

/// Scoring configuration plus execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Normalization, gating, and aggregation settings.
    #[serde(flatten)]
    pub scoring: ScoringConfig,

    /// Worker threads; defaults to one less than the available
    /// parallelism (at least one).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl RunConfig {
    /// Effective worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers).max(1)
    }
}

/// One less than the available parallelism, at least one.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .saturating_sub(1)
        .max(1)
}

/// Where a run keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    /// Progress log (JSON Lines).
    pub checkpoint: PathBuf,
    /// Final compressed result document.
    pub output: PathBuf,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Source units in the workload.
    pub units: usize,
    /// Units taken from the checkpoint.
    pub resumed: usize,
    /// Units scored in this run.
    pub computed: usize,
    /// Units whose batch failed; not checkpointed, not in the output.
    pub incomplete_units: Vec<String>,
    /// Pair summaries written.
    pub pairs: usize,
    /// Counters summed over every unit in the output.
    pub counters: UnitCounters,
    /// Score histogram of the output.
    pub distribution: Distribution,
}

impl RunReport {
    /// Whether every unit completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.incomplete_units.is_empty()
    }
}

/// A batch had at least one panicking chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerFailure {
    /// Chunks that panicked.
    pub failed_chunks: usize,
    /// Chunks in the batch.
    pub chunks: usize,
}

/// Fixed-size rayon pool for comparison batches and rendering.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Start a pool of `workers` threads (at least one).
    ///
    /// # Errors
    ///
    /// Returns [`RunError::ThreadPool`] if the threads cannot be spawned.
    pub fn new(workers: usize) -> Result<Self, RunError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("glyphsim-worker-{i}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Run `op` inside the pool.
    pub fn install<T, OP>(&self, op: OP) -> T
    where
        OP: FnOnce() -> T + Send,
        T: Send,
    {
        self.pool.install(op)
    }

    /// Score a batch with the shared pipeline scorer.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerFailure`] if any chunk panicked.
    pub fn score_batch(
        &self,
        jobs: &[ComparisonJob<'_>],
        config: &ScoringConfig,
    ) -> Result<Vec<JobOutcome>, WorkerFailure> {
        self.score_batch_with(jobs, |job| score_job(job, config))
    }

    /// Score a batch with `scorer`, returning outcomes in job order.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerFailure`] if any chunk panicked.
    pub fn score_batch_with<S>(
        &self,
        jobs: &[ComparisonJob<'_>],
        scorer: S,
    ) -> Result<Vec<JobOutcome>, WorkerFailure>
    where
        S: Fn(&ComparisonJob<'_>) -> JobOutcome + Sync,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_len = jobs.len().div_ceil(self.workers);
        let chunks: Vec<Option<Vec<(usize, JobOutcome)>>> = self.pool.install(|| {
            jobs.par_chunks(chunk_len)
                .enumerate()
                .map(|(chunk, slice)| {
                    catch_unwind(AssertUnwindSafe(|| {
                        slice
                            .iter()
                            .enumerate()
                            .map(|(offset, job)| (chunk * chunk_len + offset, scorer(job)))
                            .collect::<Vec<_>>()
                    }))
                    .ok()
                })
                .collect()
        });

        let failed_chunks = chunks.iter().filter(|c| c.is_none()).count();
        if failed_chunks > 0 {
            return Err(WorkerFailure {
                failed_chunks,
                chunks: chunks.len(),
            });
        }
        Ok(collect_outcomes(jobs.len(), chunks.into_iter().flatten()))
    }
}

/// Place chunk results by job index. Slots nothing wrote are dropped, so
/// the result is short and [`finish_unit`] rejects the batch.
fn collect_outcomes<I>(len: usize, chunks: I) -> Vec<JobOutcome>
where
    I: IntoIterator<Item = Vec<(usize, JobOutcome)>>,
{
    let mut slots: Vec<Option<JobOutcome>> = vec![None; len];
    for (index, outcome) in chunks.into_iter().flatten() {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(outcome);
        }
    }
    let outcomes: Vec<JobOutcome> = slots.into_iter().flatten().collect();
    if outcomes.len() != len {
        log::warn!("batch filled {} of {len} job slots", outcomes.len());
    }
    outcomes
}

/// Execute `workload`, resuming from the checkpoint at `paths`.
///
/// # Errors
///
/// Returns [`RunError`] for invalid configuration and for checkpoint,
/// index, or output failures. Failed worker batches do not abort the run;
/// see [`RunReport::incomplete_units`].
pub fn run<R, F>(
    workload: &Workload,
    rasterizer: &R,
    registry: &F,
    config: &RunConfig,
    paths: &RunPaths,
) -> Result<RunReport, RunError>
where
    R: Rasterizer + Sync + ?Sized,
    F: FontRegistry + Sync + ?Sized,
{
    run_with(workload, rasterizer, registry, config, paths, |job, scoring| {
        score_job(job, scoring)
    })
}

pub(crate) fn run_with<R, F, S>(
    workload: &Workload,
    rasterizer: &R,
    registry: &F,
    config: &RunConfig,
    paths: &RunPaths,
    scorer: S,
) -> Result<RunReport, RunError>
where
    R: Rasterizer + Sync + ?Sized,
    F: FontRegistry + Sync + ?Sized,
    S: Fn(&ComparisonJob<'_>, &ScoringConfig) -> JobOutcome + Sync,
{
    let scoring = &config.scoring;
    scoring.validate()?;
    let pool = WorkerPool::new(config.worker_count())?;
    log::info!(
        "run {:?}: {} sources, {} targets, {} workers",
        workload.name,
        workload.sources.len(),
        workload.targets.len(),
        pool.workers()
    );

    let mut progress = ProgressLog::open(&paths.checkpoint)?;

    // With every unit checkpointed only large-side selection needs renders,
    // and it needs the sources alone.
    let resume_only = workload
        .sources
        .iter()
        .all(|source| progress.get(&unit_id(source)).is_some());
    let texts = match (resume_only, workload.large_index.is_some()) {
        (false, _) => workload.texts(),
        (true, true) => workload.sources.clone(),
        (true, false) => Vec::new(),
    };
    if resume_only {
        log::info!("checkpoint covers every unit; rendering {} texts", texts.len());
    }
    let (mut references, mut renders) = if texts.is_empty() {
        (ReferenceRenders::default(), RenderCache::default())
    } else {
        let references = ReferenceRenders::build(
            rasterizer,
            registry.contexts(),
            &texts,
            &scoring.fallback_contexts,
        );
        let renders = render_parallel(&texts, rasterizer, registry, &references, scoring, &pool);
        (references, renders)
    };

    let mut targets = workload.targets.clone();
    if let Some(index_path) = &workload.large_index {
        let index = read_index(index_path)?;
        let small: Vec<GlyphMetadata> = workload
            .sources
            .iter()
            .filter_map(|source| renders.get(source).map(|set| (source, set)))
            .flat_map(|(source, set)| GlyphMetadata::from_set(source, set).collect::<Vec<_>>())
            .collect();
        let selected = select_candidates(&index, &small, scoring);
        let loaded = if resume_only {
            RenderCache::default()
        } else {
            load_candidates(&index, &selected, rasterizer, &mut references, scoring)
        };
        for &i in &selected {
            let text = &index[i].text;
            if !targets.contains(text) {
                targets.push(text.clone());
            }
        }
        for text in &targets {
            if let Some(set) = loaded.get(text)
                && !renders.contains(text)
            {
                renders.insert(text.clone(), set.clone());
            }
        }
    }

    let metadata = RunMetadata {
        workload: workload.name.clone(),
        sources: workload.sources.len(),
        targets: targets.len(),
        contexts: registry.contexts().to_vec(),
        config: scoring.clone(),
    };
    let mut writer = ResultWriter::create(&paths.output, &metadata)?;

    let mut resumed = 0;
    let mut computed = 0;
    let mut incomplete_units = Vec::new();
    let mut counters = UnitCounters::default();
    for source in &workload.sources {
        let id = unit_id(source);
        if let Some(done) = progress.get(&id) {
            for summary in &done.pair_summaries {
                writer.write_summary(summary)?;
            }
            writer.flush()?;
            counters.accumulate(&done.counters);
            resumed += 1;
            continue;
        }

        let plan = plan_unit(source, &targets, &renders, scoring);
        let outcomes = match pool.score_batch_with(&plan.jobs, |job| scorer(job, scoring)) {
            Ok(outcomes) => outcomes,
            Err(failure) => {
                log::error!(
                    "{id}: {} of {} worker chunks failed; unit left incomplete",
                    failure.failed_chunks,
                    failure.chunks
                );
                incomplete_units.push(id);
                continue;
            }
        };
        let result = match finish_unit(plan, &outcomes) {
            Ok(result) => result,
            Err(err @ PipelineError::IncompleteBatch { .. }) => {
                log::error!("{id}: {err}; unit left incomplete");
                incomplete_units.push(id);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        progress.append(&result)?;
        for summary in &result.pair_summaries {
            writer.write_summary(summary)?;
        }
        writer.flush()?;
        counters.accumulate(&result.counters);
        computed += 1;
    }

    let pairs = writer.pairs();
    let distribution = writer.finish(&incomplete_units)?;
    log::info!(
        "run {:?} done: {computed} computed, {resumed} resumed, {} incomplete, {pairs} pairs",
        workload.name,
        incomplete_units.len()
    );
    Ok(RunReport {
        units: workload.sources.len(),
        resumed,
        computed,
        incomplete_units,
        pairs,
        counters,
        distribution,
    })
}

/// Render every text in every covering context on the pool.
pub fn render_parallel<R, F>(
    texts: &[String],
    rasterizer: &R,
    registry: &F,
    references: &ReferenceRenders,
    config: &ScoringConfig,
    pool: &WorkerPool,
) -> RenderCache
where
    R: Rasterizer + Sync + ?Sized,
    F: FontRegistry + Sync + ?Sized,
{
    let sets: Vec<_> = pool.install(|| {
        texts
            .par_iter()
            .map(|text| {
                let set = render_text(text, rasterizer, registry, references, config);
                (text.clone(), set)
            })
            .collect()
    });
    log::info!("rendered {} texts", sets.len());
    sets.into_iter().collect()
}
