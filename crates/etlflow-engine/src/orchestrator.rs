//! Pipeline executor: runs steps in order, persists execution state and
//! checkpoints, and publishes progress.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use etlflow_cache::MultiLayerCache;
use etlflow_state::StateBackend;
use etlflow_transform::{apply, TransformConfig};
use etlflow_types::error::ConnectorError;
use etlflow_types::progress::{percent, ProgressEvent, ProgressStatus};
use etlflow_types::state::{
    ExecutionFailure, ExecutionId, ExecutionStats, ExecutionStatus, PipelineId,
};
use etlflow_types::wire::StepType;
use etlflow_types::Dataset;
use sha2::{Digest, Sha256};

use crate::checkpoint::{CheckpointState, CheckpointTracker};
use crate::config::types::{
    DestinationStep, PipelineConfig, SourceStep, StepConfig, TransformStep,
};
use crate::config::validator::validate_pipeline;
use crate::connector::{ExtractRequest, LoadRequest};
use crate::connectors::ConnectorRegistry;
use crate::errors::PipelineError;
use crate::execution::ExecutionOptions;
use crate::progress::{ProgressSink, TracingProgress};
use crate::resolve::{check_state_backend, create_cache, create_state_backend};
use crate::result::{CheckResult, PipelineCounts, PipelineResult, StepCheck, StepResult};

/// A step with its transform config decoded.
enum PlannedStep<'a> {
    Source(&'a SourceStep),
    Transform(&'a TransformStep, TransformConfig),
    Destination(&'a DestinationStep),
}

impl PlannedStep<'_> {
    fn order(&self) -> u32 {
        match self {
            Self::Source(s) => s.order,
            Self::Transform(s, _) => s.order,
            Self::Destination(s) => s.order,
        }
    }

    fn step_type(&self) -> StepType {
        match self {
            Self::Source(_) => StepType::Source,
            Self::Transform(..) => StepType::Transform,
            Self::Destination(_) => StepType::Destination,
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::Source(s) => &s.use_ref,
            Self::Transform(_, c) => c.kind(),
            Self::Destination(s) => &s.use_ref,
        }
    }
}

/// Decode every transform config before anything runs.
fn plan(config: &PipelineConfig) -> Result<Vec<PlannedStep<'_>>, PipelineError> {
    config
        .ordered_steps()
        .into_iter()
        .map(|step| match step {
            StepConfig::Source(s) => Ok(PlannedStep::Source(s)),
            StepConfig::Transform(t) => TransformConfig::decode(&t.transform, t.config.clone())
                .map(|c| PlannedStep::Transform(t, c))
                .map_err(|source| PipelineError::Transform {
                    step: t.order,
                    source,
                }),
            StepConfig::Destination(d) => Ok(PlannedStep::Destination(d)),
        })
        .collect()
}

/// Per-execution values shared by every step.
struct ExecutionContext<'a> {
    config: &'a PipelineConfig,
    options: &'a ExecutionOptions,
    pipeline: PipelineId,
    version: String,
    execution_id: ExecutionId,
    resumed_after: Option<u32>,
    total_steps: usize,
}

/// Mutable state threaded through the step loop.
#[derive(Default)]
struct RunState {
    current: Dataset,
    datasets: BTreeMap<String, Dataset>,
    stats: ExecutionStats,
    steps: Vec<StepResult>,
    /// Steps finished, including those restored from a checkpoint.
    done: usize,
    /// Step currently running; cleared once its bookkeeping is stored.
    active_step: Option<u32>,
    sampled: bool,
}

impl RunState {
    fn accept_source(&mut self, step: &SourceStep, rows: Dataset) {
        self.stats.rows_processed += rows.len() as u64;
        self.datasets.insert(step.dataset_name(), rows.clone());
        self.current = rows;
    }

    fn snapshot(&self) -> CheckpointState {
        CheckpointState {
            current: self.current.clone(),
            datasets: self.datasets.clone(),
            stats: self.stats,
        }
    }
}

/// Checkpoint an execution resumes from.
struct ResumePoint {
    after_step: u32,
    state: CheckpointState,
}

/// Runs pipelines against a state backend, a connector registry, an
/// optional cache, and a progress sink.
pub struct Engine {
    registry: ConnectorRegistry,
    state: Arc<dyn StateBackend>,
    cache: Option<Arc<MultiLayerCache>>,
    progress: Arc<dyn ProgressSink>,
}

impl Engine {
    /// Engine with the built-in connectors, no cache, and tracing progress.
    #[must_use]
    pub fn new(state: Arc<dyn StateBackend>) -> Self {
        Self {
            registry: ConnectorRegistry::builtin(),
            state,
            cache: None,
            progress: Arc::new(TracingProgress),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Read source steps with `cache_ttl_seconds` through `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<MultiLayerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    /// Execute `config` once.
    ///
    /// Returns `Ok` for completed and cancelled executions. A cancelled
    /// result carries the counts reached before the cancel was observed.
    ///
    /// # Errors
    ///
    /// Invalid configs fail before any execution is recorded. Step failures
    /// are recorded on the execution (message, step, rendered error chain)
    /// and returned.
    pub async fn run(
        &self,
        config: &PipelineConfig,
        options: &ExecutionOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        validate_pipeline(config, &self.registry)?;
        let plan = plan(config)?;

        let pipeline = PipelineId::new(config.pipeline.clone());
        let version = config.pipeline_version();

        let purged = self
            .state_call("purge_expired_checkpoints", |s| s.purge_expired_checkpoints())
            .await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired checkpoints");
        }

        let resume = match options.resume_from {
            Some(from) => self.load_resume_point(&pipeline, &version, from).await?,
            None => None,
        };

        let execution_id = {
            let pipeline = pipeline.clone();
            let version = version.clone();
            let resumed_from = options.resume_from;
            self.state_call("create_execution", move |s| {
                s.create_execution(&pipeline, &version, resumed_from)
            })
            .await?
        };

        let ctx = ExecutionContext {
            config,
            options,
            pipeline,
            version,
            execution_id,
            resumed_after: resume.as_ref().map(|r| r.after_step),
            total_steps: plan.len(),
        };
        let mut run = RunState::default();

        // The execution row exists from here on; every error must finalize it.
        if let Err(err) = self
            .state_call("mark_running", move |s| s.mark_running(execution_id))
            .await
        {
            return Err(self.record_failure(&ctx, &run, err).await);
        }

        tracing::info!(
            pipeline = config.pipeline,
            execution_id = execution_id.get(),
            version = %ctx.version,
            steps = plan.len(),
            resumed_from = options.resume_from.map(ExecutionId::get),
            "Starting pipeline execution"
        );
        self.emit(
            execution_id,
            0,
            ProgressStatus::Started,
            0.0,
            format!("Execution started for pipeline '{}'", config.pipeline),
        );

        if let Some(resume) = resume {
            run.current = resume.state.current;
            run.datasets = resume.state.datasets;
            run.stats = resume.state.stats;
            run.done = plan
                .iter()
                .filter(|s| s.order() <= resume.after_step)
                .count();
            run.sampled = plan.iter().any(|s| {
                matches!(s, PlannedStep::Transform(..)) && s.order() <= resume.after_step
            });
        }

        match self.execute_steps(&ctx, &plan, &mut run).await {
            Ok(()) => self.finish(&ctx, run, ExecutionStatus::Completed, start).await,
            Err(PipelineError::Cancelled) => {
                self.finish(&ctx, run, ExecutionStatus::Cancelled, start).await
            }
            Err(err) => Err(self.record_failure(&ctx, &run, err).await),
        }
    }

    /// Check every step without moving data: sources are built and
    /// connection-tested, transform configs decoded, destinations built.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline config is invalid.
    pub async fn check(&self, config: &PipelineConfig) -> anyhow::Result<CheckResult> {
        validate_pipeline(config, &self.registry)?;
        let steps = check_steps(config, &self.registry).await;
        let state_ok = match self
            .state_call("list_executions", |s| s.list_executions(None, 1))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("State backend: FAILED: {}", e);
                false
            }
        };
        Ok(CheckResult { steps, state_ok })
    }

    async fn execute_steps(
        &self,
        ctx: &ExecutionContext<'_>,
        plan: &[PlannedStep<'_>],
        run: &mut RunState,
    ) -> Result<(), PipelineError> {
        let mut tracker = CheckpointTracker::new(&ctx.config.checkpoint, run.stats.rows_processed);

        for (index, step) in plan.iter().enumerate() {
            let order = step.order();
            if ctx.resumed_after.is_some_and(|after| order <= after) {
                tracing::debug!(step = order, "Skipping step completed before checkpoint");
                continue;
            }
            self.check_cancelled(ctx).await?;

            run.active_step = Some(order);
            let step_start = Instant::now();
            let rows_in = match step {
                PlannedStep::Source(_) => 0,
                _ => run.current.len(),
            };
            let cached = match step {
                PlannedStep::Source(source) => self.run_source(ctx, source, run).await?,
                PlannedStep::Transform(transform, decoded) => {
                    run_transform(ctx, transform, decoded, run)?;
                    false
                }
                PlannedStep::Destination(destination) => {
                    self.run_destination(destination, run).await?;
                    false
                }
            };
            let duration_secs = step_start.elapsed().as_secs_f64();
            tracing::info!(
                execution_id = ctx.execution_id.get(),
                step = order,
                step_type = %step.step_type(),
                label = step.label(),
                rows_in,
                rows_out = run.current.len(),
                cached,
                duration_secs,
                "Step completed"
            );
            run.steps.push(StepResult {
                order,
                step_type: step.step_type(),
                label: step.label().to_string(),
                rows_in,
                rows_out: run.current.len(),
                duration_secs,
                cached,
            });
            run.done += 1;

            let id = ctx.execution_id;
            let stats = run.stats;
            self.state_call("update_progress", move |s| {
                s.update_progress(id, order, &stats)
            })
            .await?;

            let is_last = index + 1 == plan.len();
            if !is_last && tracker.is_due(stats.rows_processed) {
                self.save_checkpoint(ctx, &tracker, order, run).await?;
                tracker.mark_saved(stats.rows_processed);
            }
            run.active_step = None;

            self.emit(
                id,
                order,
                ProgressStatus::Running,
                percent(run.done, ctx.total_steps),
                format!("Step {order} ({}) completed", step.label()),
            );
        }
        Ok(())
    }

    async fn check_cancelled(&self, ctx: &ExecutionContext<'_>) -> Result<(), PipelineError> {
        if ctx.options.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let id = ctx.execution_id;
        let requested = self
            .state_call("get_execution", move |s| s.get_execution(id))
            .await?
            .is_some_and(|e| e.cancel_requested);
        if requested {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Extract a source step, through the cache when both the engine and
    /// the step opt in. Returns whether the rows came from the cache.
    async fn run_source(
        &self,
        ctx: &ExecutionContext<'_>,
        step: &SourceStep,
        run: &mut RunState,
    ) -> Result<bool, PipelineError> {
        let cached = match (&self.cache, step.cache_ttl_seconds) {
            (Some(cache), Some(ttl)) => Some((cache, source_cache_key(ctx, step), ttl)),
            _ => None,
        };

        if let Some((cache, key, _)) = &cached {
            if let Some(rows) = cache.get_json::<Dataset>(key).await {
                tracing::debug!(step = step.order, rows = rows.len(), "Source cache hit");
                run.accept_source(step, rows);
                return Ok(true);
            }
        }

        let rows = self.extract(ctx, step).await?;

        if let Some((cache, key, ttl)) = &cached {
            if !cache
                .set_json(key, &rows, None, Some(Duration::from_secs(*ttl)))
                .await
            {
                tracing::warn!(step = step.order, key = %key, "Extracted rows were not cached");
            }
        }
        run.accept_source(step, rows);
        Ok(false)
    }

    async fn extract(
        &self,
        ctx: &ExecutionContext<'_>,
        step: &SourceStep,
    ) -> Result<Dataset, PipelineError> {
        let mut source = self.registry.source(&step.use_ref, &step.config)?;
        if !source.connect().await? {
            return Err(ConnectorError::connection(
                "CONNECTION_REFUSED",
                format!("source '{}' refused the connection", step.use_ref),
            )
            .into());
        }

        let request = ExtractRequest {
            query: step.query.clone(),
            batch_size: ctx.config.batch_size,
            limit: ctx.options.sample_size,
        };
        let mut stream = source.extract(request).await?;
        let mut rows = Dataset::new();
        let mut batches = 0u64;
        while let Some(batch) = stream.next_batch().await? {
            batches += 1;
            tracing::debug!(
                step = step.order,
                batch = batches,
                rows = batch.len(),
                "Received batch"
            );
            rows.extend(batch);
        }
        Ok(rows)
    }

    async fn run_destination(
        &self,
        step: &DestinationStep,
        run: &mut RunState,
    ) -> Result<(), PipelineError> {
        let destination = self.registry.destination(&step.use_ref, &step.config)?;
        let request = LoadRequest {
            config: step.config.clone(),
            mode: step.mode,
            primary_key: step.primary_key.clone(),
        };
        let summary = destination.load(&run.current, &request).await?;
        tracing::debug!(
            step = step.order,
            mode = %step.mode,
            rows_loaded = summary.rows_loaded,
            load_time_seconds = summary.load_time_seconds,
            "Destination load finished"
        );
        run.stats.rows_successful += summary.rows_loaded;
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        ctx: &ExecutionContext<'_>,
        tracker: &CheckpointTracker,
        step_index: u32,
        run: &RunState,
    ) -> Result<(), PipelineError> {
        let record = tracker.record(
            &ctx.pipeline,
            ctx.execution_id,
            &ctx.version,
            step_index,
            &run.snapshot(),
        )?;
        let rows_processed = record.rows_processed;
        self.state_call("save_checkpoint", move |s| s.save_checkpoint(&record))
            .await?;
        tracing::debug!(
            execution_id = ctx.execution_id.get(),
            step = step_index,
            rows_processed,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load_resume_point(
        &self,
        pipeline: &PipelineId,
        version: &str,
        from: ExecutionId,
    ) -> Result<Option<ResumePoint>, PipelineError> {
        let prior = self
            .state_call("get_execution", move |s| s.get_execution(from))
            .await?
            .ok_or_else(|| anyhow!("Cannot resume: execution {from} not found"))?;
        if prior.pipeline != *pipeline {
            return Err(anyhow!(
                "Cannot resume: execution {from} belongs to pipeline '{}'",
                prior.pipeline
            )
            .into());
        }
        if prior.version != version {
            return Err(anyhow!(
                "Cannot resume: execution {from} ran pipeline version {}, current version is {version}",
                prior.version
            )
            .into());
        }

        let Some(checkpoint) = self
            .state_call("latest_checkpoint", move |s| s.latest_checkpoint(from))
            .await?
        else {
            tracing::warn!(
                pipeline = pipeline.as_str(),
                resume_from = from.get(),
                "No unexpired checkpoint to resume from, running every step"
            );
            return Ok(None);
        };
        if checkpoint.version != version {
            return Err(anyhow!(
                "Cannot resume: checkpoint of execution {from} has version {}, current version is {version}",
                checkpoint.version
            )
            .into());
        }
        let state = CheckpointState::decode(&checkpoint.checkpoint_data)?;
        tracing::info!(
            pipeline = pipeline.as_str(),
            resume_from = from.get(),
            after_step = checkpoint.step_index,
            rows_processed = checkpoint.rows_processed,
            "Resuming from checkpoint"
        );
        Ok(Some(ResumePoint {
            after_step: checkpoint.step_index,
            state,
        }))
    }

    async fn finish(
        &self,
        ctx: &ExecutionContext<'_>,
        run: RunState,
        status: ExecutionStatus,
        start: Instant,
    ) -> Result<PipelineResult, PipelineError> {
        let id = ctx.execution_id;
        let stats = run.stats;
        self.state_call("complete_execution", move |s| {
            s.complete_execution(id, status, &stats, None)
        })
        .await?;

        let duration_secs = start.elapsed().as_secs_f64();
        let (progress_status, message) = if status == ExecutionStatus::Completed {
            tracing::info!(
                pipeline = ctx.config.pipeline,
                execution_id = id.get(),
                rows_processed = stats.rows_processed,
                rows_successful = stats.rows_successful,
                rows_failed = stats.rows_failed,
                duration_secs,
                "Pipeline execution completed"
            );
            (ProgressStatus::Completed, "Execution completed".to_string())
        } else {
            tracing::warn!(
                pipeline = ctx.config.pipeline,
                execution_id = id.get(),
                steps_done = run.done,
                "Pipeline execution cancelled"
            );
            (
                ProgressStatus::Cancelled,
                format!("Execution cancelled after {} of {} steps", run.done, ctx.total_steps),
            )
        };
        let last_step = run.steps.last().map_or(0, |s| s.order);
        self.emit(
            id,
            last_step,
            progress_status,
            percent(run.done, ctx.total_steps),
            message,
        );

        Ok(PipelineResult {
            execution_id: id,
            pipeline: ctx.config.pipeline.clone(),
            version: ctx.version.clone(),
            status,
            counts: PipelineCounts {
                rows_processed: stats.rows_processed,
                rows_successful: stats.rows_successful,
                rows_failed: stats.rows_failed,
            },
            steps: run.steps,
            preview: ctx.options.sample_size.map(|_| run.current),
            duration_secs,
            resumed_after_step: ctx.resumed_after,
        })
    }

    /// Mark the execution failed. A failure to record is logged; the
    /// original error is always returned.
    async fn record_failure(
        &self,
        ctx: &ExecutionContext<'_>,
        run: &RunState,
        err: PipelineError,
    ) -> PipelineError {
        let id = ctx.execution_id;
        tracing::error!(
            pipeline = ctx.config.pipeline,
            execution_id = id.get(),
            step = run.active_step,
            retryable = err.is_retryable(),
            "Pipeline execution failed: {}",
            err
        );
        let failure = ExecutionFailure {
            message: err.to_string(),
            step: run.active_step,
            log: err.render_chain(),
        };
        let stats = run.stats;
        if let Err(record_err) = self
            .state_call("complete_execution", move |s| {
                s.complete_execution(id, ExecutionStatus::Failed, &stats, Some(&failure))
            })
            .await
        {
            tracing::error!(
                execution_id = id.get(),
                error = %record_err,
                "Failed to record execution failure"
            );
        }
        self.emit(
            id,
            run.active_step.unwrap_or(0),
            ProgressStatus::Failed,
            percent(run.done, ctx.total_steps),
            err.to_string(),
        );
        err
    }

    fn emit(
        &self,
        execution_id: ExecutionId,
        step_index: u32,
        status: ProgressStatus,
        progress_percent: f64,
        message: String,
    ) {
        self.progress.emit(&ProgressEvent::now(
            execution_id,
            step_index,
            status,
            progress_percent,
            message,
        ));
    }

    /// Run a state backend call on the blocking pool.
    async fn state_call<T, F>(&self, what: &'static str, call: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StateBackend) -> etlflow_state::error::Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || call(state.as_ref()))
            .await
            .map_err(|e| PipelineError::Infrastructure(anyhow!("{what} task panicked: {e}")))?
            .map_err(|e| PipelineError::Infrastructure(e.into()))
    }
}

/// Sample mode caps the dataset once, before the first transform.
fn run_transform(
    ctx: &ExecutionContext<'_>,
    step: &TransformStep,
    transform: &TransformConfig,
    run: &mut RunState,
) -> Result<(), PipelineError> {
    if let Some(limit) = ctx.options.sample_size {
        if !run.sampled {
            run.current.truncate(limit);
            run.sampled = true;
        }
    }

    let right = match transform {
        TransformConfig::Join(join) => join
            .right
            .as_ref()
            .and_then(|name| run.datasets.get(name))
            .map(Vec::as_slice),
        _ => None,
    };
    let output = apply(transform, &run.current, right).map_err(|source| {
        PipelineError::Transform {
            step: step.order,
            source,
        }
    })?;

    let invalid = output.metadata.invalid_count() as u64;
    tracing::debug!(
        step = step.order,
        transform = transform.kind(),
        original_count = output.metadata.original_count,
        result_count = output.metadata.result_count,
        invalid,
        "Transform applied"
    );
    run.stats.rows_failed += invalid;
    run.current = output.data;
    Ok(())
}

/// `etl:source:<pipeline>:<order>:<digest>` where the digest covers the
/// connector, its config, the query, and the sample limit.
fn source_cache_key(ctx: &ExecutionContext<'_>, step: &SourceStep) -> String {
    let fingerprint = serde_json::json!({
        "use": step.use_ref,
        "config": step.config,
        "query": step.query,
        "limit": ctx.options.sample_size,
    });
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.to_string().as_bytes());
    format!(
        "etl:source:{}:{}:{:x}",
        ctx.config.pipeline,
        step.order,
        hasher.finalize()
    )
}

async fn check_steps(config: &PipelineConfig, registry: &ConnectorRegistry) -> Vec<StepCheck> {
    let mut checks = Vec::new();
    for step in config.ordered_steps() {
        let (ok, message) = match step {
            StepConfig::Source(s) => match registry.source(&s.use_ref, &s.config) {
                Err(e) => (false, e.to_string()),
                Ok(source) => {
                    let status = source.test_connection().await;
                    if status.is_success() {
                        match source.schema_info().await {
                            Ok(schema) => (true, format!("{} columns", schema.columns.len())),
                            Err(e) => (false, e.to_string()),
                        }
                    } else {
                        (false, format!("connection test failed: {}", status.details))
                    }
                }
            },
            StepConfig::Transform(t) => {
                match TransformConfig::decode(&t.transform, t.config.clone()) {
                    Ok(_) => (true, "config OK".to_string()),
                    Err(e) => (false, e.to_string()),
                }
            }
            StepConfig::Destination(d) => match registry.destination(&d.use_ref, &d.config) {
                Ok(_) => (true, format!("{} mode", d.mode)),
                Err(e) => (false, e.to_string()),
            },
        };
        checks.push(StepCheck {
            order: step.order(),
            step_type: step.step_type(),
            label: step.label().to_string(),
            ok,
            message,
        });
    }
    checks
}

/// Run a pipeline with the built-in connectors, the state backend and cache
/// its config names, and tracing progress.
///
/// # Errors
///
/// Returns a [`PipelineError`] if the state backend or cache can't be
/// opened, or the execution fails.
pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &ExecutionOptions,
) -> Result<PipelineResult, PipelineError> {
    let state = create_state_backend(config)?;
    let cache = create_cache(config)?;

    let mut engine = Engine::new(state);
    if let Some(cache) = &cache {
        engine = engine.with_cache(Arc::clone(cache));
    }
    let result = engine.run(config, options).await;
    if let Some(cache) = cache {
        cache.shutdown().await;
    }
    result
}

/// Check a pipeline with the built-in connectors.
///
/// # Errors
///
/// Returns an error if the pipeline config is invalid.
pub async fn check_pipeline(config: &PipelineConfig) -> anyhow::Result<CheckResult> {
    tracing::info!(pipeline = config.pipeline, "Checking pipeline configuration");
    let registry = ConnectorRegistry::builtin();
    validate_pipeline(config, &registry)?;
    let steps = check_steps(config, &registry).await;
    let state_ok = check_state_backend(config);
    Ok(CheckResult { steps, state_ok })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use crate::connectors::MemoryDestination;
    use crate::progress::CollectingProgress;
    use etlflow_state::SqliteStateBackend;
    use etlflow_types::Value;

    fn config(yaml: &str) -> PipelineConfig {
        parse_pipeline_str(yaml).unwrap()
    }

    fn engine() -> (Engine, MemoryDestination) {
        let state = Arc::new(SqliteStateBackend::in_memory().unwrap());
        let sink = MemoryDestination::new();
        let mut registry = ConnectorRegistry::builtin();
        registry.register_memory("memory", &sink);
        (Engine::new(state).with_registry(registry), sink)
    }

    const PIPELINE: &str = r#"
version: "1.0"
pipeline: unit
steps:
  - order: 1
    type: source
    use: inline
    config:
      rows: [{id: 1, v: 10}, {id: 2, v: 20}, {id: 3, v: 30}]
  - order: 2
    type: transform
    transform: sort
    config: { columns: [{column: v, direction: desc}] }
  - order: 3
    type: destination
    use: memory
"#;

    #[tokio::test]
    async fn run_records_step_results() {
        let (engine, sink) = engine();
        let result = engine
            .run(&config(PIPELINE), &ExecutionOptions::default())
            .await
            .unwrap();
        assert!(result.is_completed());
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.steps[1].rows_in, 3);
        assert_eq!(result.steps[0].step_type, StepType::Source);
        assert!(result.preview.is_none());
        assert_eq!(sink.rows()[0]["v"], Value::Int(30));

        let exec = engine
            .state()
            .get_execution(result.execution_id)
            .unwrap()
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.current_step, Some(3));
        assert_eq!(exec.version, result.version);
    }

    #[tokio::test]
    async fn sample_mode_caps_rows_and_keeps_preview() {
        let (engine, sink) = engine();
        let options = ExecutionOptions {
            sample_size: Some(2),
            ..ExecutionOptions::default()
        };
        let result = engine.run(&config(PIPELINE), &options).await.unwrap();
        assert_eq!(result.counts.rows_processed, 2);
        assert_eq!(result.preview.as_ref().map(Vec::len), Some(2));
        assert_eq!(sink.rows().len(), 2);
    }

    #[tokio::test]
    async fn invalid_config_creates_no_execution() {
        let (engine, _) = engine();
        let yaml = PIPELINE.replace("use: memory", "use: nowhere");
        let err = engine
            .run(&config(&yaml), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
        assert!(engine.state().list_executions(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_step_checkpoints_skip_last_step() {
        let (engine, _) = engine();
        let config = config(PIPELINE);
        engine.run(&config, &ExecutionOptions::default()).await.unwrap();
        let checkpoints = engine
            .state()
            .list_checkpoints(&PipelineId::new("unit"))
            .unwrap();
        let mut steps: Vec<u32> = checkpoints.iter().map(|c| c.step_index).collect();
        steps.sort_unstable();
        assert_eq!(steps, vec![1, 2]);
    }

    #[tokio::test]
    async fn progress_events_cover_every_step() {
        let (engine, _) = engine();
        let sink = Arc::new(CollectingProgress::new());
        let engine = engine.with_progress(sink.clone());
        engine
            .run(&config(PIPELINE), &ExecutionOptions::default())
            .await
            .unwrap();
        let events = sink.events();
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Started,
                ProgressStatus::Running,
                ProgressStatus::Running,
                ProgressStatus::Running,
                ProgressStatus::Completed,
            ]
        );
        assert!((events[3].progress_percent - 100.0).abs() < f64::EPSILON);
        assert_eq!(events[3].step_index, 3);
        assert!((events[4].progress_percent - 100.0).abs() < f64::EPSILON);
        assert_eq!(events[1].step_index, 1);
    }

    #[tokio::test]
    async fn check_reports_each_step() {
        let (engine, _) = engine();
        let result = engine.check(&config(PIPELINE)).await.unwrap();
        assert!(result.all_ok(), "{result:?}");
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.steps[0].message, "2 columns");
    }

    #[test]
    fn cache_key_depends_on_limit() {
        let config = config(PIPELINE);
        let StepConfig::Source(step) = &config.steps[0] else {
            panic!("expected source");
        };
        let full = ExecutionOptions::default();
        let sampled = ExecutionOptions {
            sample_size: Some(1),
            ..ExecutionOptions::default()
        };
        let ctx = |options| ExecutionContext {
            config: &config,
            options,
            pipeline: PipelineId::new("unit"),
            version: String::new(),
            execution_id: ExecutionId::new(1),
            resumed_after: None,
            total_steps: 3,
        };
        let a = source_cache_key(&ctx(&full), step);
        let b = source_cache_key(&ctx(&sampled), step);
        assert!(a.starts_with("etl:source:unit:1:"));
        assert_ne!(a, b);
    }
}
