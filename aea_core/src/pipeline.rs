//! # Pipeline Orchestrator
//!
//! Runs the stage graph for one structure, serially and in topological
//! order. For each stage of the plan:
//!
//! 1. cancelled? record it and stop computing
//! 2. an upstream failed or was skipped? skip
//! 3. a vigent artifact exists? restore it
//! 4. otherwise compute, persist, keep the typed output
//!
//! A failing stage is recorded in the [`RunLog`] and never persisted; its
//! dependants are skipped while unrelated branches keep running.
//!
//! ```rust,no_run
//! use aea_core::config::StructureConfig;
//! use aea_core::fingerprint::Scope;
//! use aea_core::pipeline::Pipeline;
//! use std::path::Path;
//!
//! let config = StructureConfig::from_path(Path::new("S132.json"))?;
//! let run = Pipeline::new("cache").run(&config, &Scope::standalone(&config.titulo), &[])?;
//! for entry in &run.log.entries {
//!     println!("{} {:?}", entry.stage, entry.outcome);
//! }
//! # Ok::<(), aea_core::errors::CalcError>(())
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::cache::{Artifact, Cache};
use crate::calculations::{
    aee, cmc, costing, dge, dme, foundation, sph, trees, AeeResult, CmcResult, CostResult, DmeResult,
    FoundationResult, Geometry, SphResult, Stage, TreesResult,
};
use crate::catalog::cables::{default_catalog, CableCatalog};
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};
use crate::file_io::{current_user, FileLock};
use crate::fingerprint::{fingerprint_all, ExternalInputs, Scope};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Run log
// ============================================================================

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "estado", content = "detalle", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Vigent artifact restored from the cache
    Cached,
    Computed,
    Failed(CalcError),
    /// Not run because `upstream` did not succeed
    Skipped { upstream: Stage },
    Cancelled,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StageOutcome::Cached | StageOutcome::Computed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub fingerprint: Option<String>,
    pub at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub id: Uuid,
    pub scope: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub entries: Vec<RunEntry>,
}

impl RunLog {
    fn new(scope: &Scope) -> Self {
        RunLog {
            id: Uuid::new_v4(),
            scope: scope.prefix(),
            started: Utc::now(),
            finished: None,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, stage: Stage, outcome: StageOutcome, fingerprint: Option<&str>, started: Instant) {
        self.entries.push(RunEntry {
            stage,
            outcome,
            fingerprint: fingerprint.map(str::to_string),
            at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.entries.iter().find(|e| e.stage == stage).map(|e| &e.outcome)
    }

    /// Stages whose outcome matches `pred`, in run order.
    pub fn stages_where(&self, pred: impl Fn(&StageOutcome) -> bool) -> Vec<Stage> {
        self.entries.iter().filter(|e| pred(&e.outcome)).map(|e| e.stage).collect()
    }

    pub fn computed(&self) -> Vec<Stage> {
        self.stages_where(|o| matches!(o, StageOutcome::Computed))
    }

    pub fn cached(&self) -> Vec<Stage> {
        self.stages_where(|o| matches!(o, StageOutcome::Cached))
    }

    pub fn failures(&self) -> impl Iterator<Item = (Stage, &CalcError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            StageOutcome::Failed(err) => Some((e.stage, err)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.succeeded())
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Typed results of the stages that succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    pub cmc: Option<CmcResult>,
    pub dge: Option<Geometry>,
    pub dme: Option<DmeResult>,
    pub trees: Option<TreesResult>,
    pub sph: Option<SphResult>,
    pub foundation: Option<FoundationResult>,
    pub costing: Option<CostResult>,
    pub aee: Option<AeeResult>,
}

impl Outputs {
    fn restore(&mut self, artifact: &Artifact) -> CalcResult<()> {
        match artifact.stage {
            Stage::Cmc => self.cmc = Some(artifact.payload_as()?),
            Stage::Dge => self.dge = Some(artifact.payload_as()?),
            Stage::Dme => self.dme = Some(artifact.payload_as()?),
            Stage::Trees => self.trees = Some(artifact.payload_as()?),
            Stage::Sph => self.sph = Some(artifact.payload_as()?),
            Stage::Foundation => self.foundation = Some(artifact.payload_as()?),
            Stage::Costing => self.costing = Some(artifact.payload_as()?),
            Stage::Aee => self.aee = Some(artifact.payload_as()?),
        }
        Ok(())
    }
}

fn need<'a, T>(value: &'a Option<T>, stage: Stage, upstream: Stage) -> CalcResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| CalcError::missing_prerequisite(stage.code(), upstream.code()))
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Recompute stale upstreams of the requested stages. When off, only
    /// the requested stages are computed and a stale upstream is a
    /// prerequisite error.
    pub auto_recompute: bool,
    /// Directory searched for `HIPOTESIS_ACTIVA` catalogs
    pub hypothesis_dir: Option<PathBuf>,
    /// Base cable catalog; the embedded one when `None`
    pub cables: Option<CableCatalog>,
    /// Name recorded in the cache lock
    pub user: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            auto_recompute: true,
            hypothesis_dir: None,
            cables: None,
            user: current_user(),
        }
    }
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub log: RunLog,
    pub outputs: Outputs,
}

pub struct Pipeline {
    cache: Cache,
    options: PipelineOptions,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Pipeline {
            cache: Cache::new(cache_dir),
            options: PipelineOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Stages needed for `targets` in topological order; every stage when
    /// `targets` is empty.
    pub fn plan(targets: &[Stage]) -> Vec<Stage> {
        if targets.is_empty() {
            return Stage::ALL.to_vec();
        }
        Stage::ALL
            .into_iter()
            .filter(|s| targets.iter().any(|t| t == s || t.depends_on(*s)))
            .collect()
    }

    /// Run `targets` (and what they need) for one structure.
    ///
    /// Configuration, fingerprint and lock errors abort the run; stage
    /// errors are recorded in the log.
    pub fn run(&self, config: &StructureConfig, scope: &Scope, targets: &[Stage]) -> CalcResult<PipelineRun> {
        config.validate()?;
        let inputs = ExternalInputs::resolve(config, self.options.hypothesis_dir.as_deref())?;
        let fingerprints = fingerprint_all(config, scope, &inputs)?;
        let plan = Self::plan(targets);
        let requested: Vec<Stage> = if targets.is_empty() { plan.clone() } else { targets.to_vec() };
        let cables = config.cable_catalog(self.options.cables.as_ref().unwrap_or_else(|| default_catalog()));

        let _lock = FileLock::acquire_dir(self.cache.root(), self.options.user.clone())?;
        let mut log = RunLog::new(scope);
        let mut outputs = Outputs::default();
        info!(run = %log.id, scope = %log.scope, stages = plan.len(), "pipeline started");

        for stage in plan {
            let started = Instant::now();
            if self.cancel.is_cancelled() {
                log.push(stage, StageOutcome::Cancelled, None, started);
                continue;
            }
            let blocked = stage
                .upstream()
                .iter()
                .find(|u| !log.outcome(**u).is_some_and(StageOutcome::succeeded));
            if let Some(upstream) = blocked {
                debug!(stage = %stage, upstream = %upstream, "skipped");
                log.push(stage, StageOutcome::Skipped { upstream: *upstream }, None, started);
                continue;
            }

            let fp = fingerprints
                .get(&stage)
                .ok_or_else(|| CalcError::internal(format!("no fingerprint for {}", stage)))?;
            let outcome = if self.restore(stage, scope, fp, &mut outputs) {
                StageOutcome::Cached
            } else if !self.options.auto_recompute && !requested.contains(&stage) {
                let dependant = requested.iter().find(|t| t.depends_on(stage)).copied().unwrap_or(stage);
                StageOutcome::Failed(CalcError::missing_prerequisite(dependant.code(), stage.code()))
            } else {
                match self.compute(stage, config, scope, fp, &cables, &mut outputs) {
                    Ok(()) => StageOutcome::Computed,
                    Err(e) => {
                        warn!(stage = %stage, error = %e, "stage failed");
                        StageOutcome::Failed(e)
                    }
                }
            };
            log.push(stage, outcome, Some(fp), started);
        }

        log.finished = Some(Utc::now());
        info!(
            run = %log.id,
            computed = log.computed().len(),
            cached = log.cached().len(),
            failed = log.failures().count(),
            "pipeline finished"
        );
        Ok(PipelineRun { log, outputs })
    }

    fn restore(&self, stage: Stage, scope: &Scope, fp: &str, outputs: &mut Outputs) -> bool {
        let Some(artifact) = self.cache.load_exact(stage, scope, fp) else {
            debug!(stage = %stage, "cache miss");
            return false;
        };
        match outputs.restore(&artifact) {
            Ok(()) => {
                debug!(stage = %stage, "cache hit");
                true
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "cached payload unreadable, recomputing");
                false
            }
        }
    }

    fn compute(
        &self,
        stage: Stage,
        config: &StructureConfig,
        scope: &Scope,
        fp: &str,
        cables: &CableCatalog,
        out: &mut Outputs,
    ) -> CalcResult<()> {
        let span = info_span!("stage", stage = %stage);
        let _enter = span.enter();
        info!("computing {}", stage.display_name());

        match stage {
            Stage::Cmc => {
                let result = cmc::calculate(config, cables)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.cmc = Some(result);
            }
            Stage::Dge => {
                let cmc = need(&out.cmc, stage, Stage::Cmc)?;
                let result = dge::calculate(config, cmc)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.dge = Some(result);
            }
            Stage::Dme => {
                let cmc = need(&out.cmc, stage, Stage::Cmc)?;
                let geometry = need(&out.dge, stage, Stage::Dge)?;
                let hypotheses = dme::hypothesis_catalog(config, self.options.hypothesis_dir.as_deref())?;
                let result = dme::calculate(config, cmc, geometry, &hypotheses, cables)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.dme = Some(result);
            }
            Stage::Trees => {
                let geometry = need(&out.dge, stage, Stage::Dge)?;
                let dme = need(&out.dme, stage, Stage::Dme)?;
                let (result, drawings) = trees::calculate(geometry, dme, &config.arboles)?;
                self.cache.save(stage, scope, config, fp, &result, &drawings)?;
                out.trees = Some(result);
            }
            Stage::Sph => {
                let geometry = need(&out.dge, stage, Stage::Dge)?;
                let dme = need(&out.dme, stage, Stage::Dme)?;
                let catalog = config.postes.catalog()?;
                let result = sph::calculate(&config.postes, &config.costeo, geometry, dme, &catalog)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.sph = Some(result);
            }
            Stage::Foundation => {
                let dme = need(&out.dme, stage, Stage::Dme)?;
                let sph = need(&out.sph, stage, Stage::Sph)?;
                let result = foundation::calculate(&config.fundacion, dme, sph)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.foundation = Some(result);
            }
            Stage::Costing => {
                let geometry = need(&out.dge, stage, Stage::Dge)?;
                let sph = need(&out.sph, stage, Stage::Sph)?;
                let foundation = need(&out.foundation, stage, Stage::Foundation)?;
                let aee = need(&out.aee, stage, Stage::Aee)?;
                let result = costing::calculate(&config.costeo, geometry, sph, foundation, aee)?;
                self.cache.save(stage, scope, config, fp, &result, &[])?;
                out.costing = Some(result);
            }
            Stage::Aee => {
                let geometry = need(&out.dge, stage, Stage::Dge)?;
                let dme = need(&out.dme, stage, Stage::Dme)?;
                let (result, drawings) = aee::calculate(&config.aee, geometry, dme)?;
                self.cache.save(stage, scope, config, fp, &result, &drawings)?;
                out.aee = Some(result);
            }
        }
        Ok(())
    }
}
