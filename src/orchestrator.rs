//! Bootstrap orchestrator
//!
//! Walks the stage catalogue from the progress marker onward. Each stage is
//! either skipped (its predicate holds) or applied; either way the marker is
//! advanced before the next stage. A reboot-required stage that was applied
//! ends the run.

use tracing::{error, info, warn};

use crate::BootstrapError;
use crate::context::RunContext;
use crate::reboot::Rebooter;
use crate::stages::{Stage, StageOutcome};
use crate::state::{BootstrapStatus, MarkerStore, Phase, timestamp};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every remaining stage finished
    Completed { applied: usize, skipped: usize },
    /// Stopped at a reboot boundary after `stage`
    RebootRequired { stage: String },
    /// The marker already covered every stage; nothing was evaluated
    AlreadyComplete,
}

/// Predicate result for one stage, used by `check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProbe {
    pub number: usize,
    pub id: &'static str,
    pub label: &'static str,
    pub requires_reboot: bool,
    /// Covered by the progress marker
    pub recorded: bool,
    pub satisfied: bool,
}

pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    store: MarkerStore,
    rebooter: Box<dyn Rebooter>,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>, store: MarkerStore, rebooter: Box<dyn Rebooter>) -> Self {
        Self {
            stages,
            store,
            rebooter,
        }
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    /// Marker value, validated against the catalogue length
    async fn completed(&self) -> Result<usize, BootstrapError> {
        let completed = self.store.completed().await?;
        if completed > self.stages.len() {
            return Err(BootstrapError::State(format!(
                "progress marker records {completed} stages but only {} exist",
                self.stages.len()
            )));
        }
        Ok(completed)
    }

    /// Run the bootstrap from the progress marker onward
    pub async fn run(&self, ctx: &mut RunContext) -> Result<RunOutcome, BootstrapError> {
        let total = self.stages.len();
        let start = self.completed().await?;

        for stage in &self.stages {
            stage.contribute_env(ctx);
        }

        if start == total {
            info!("All {} stages already complete", total);
            return Ok(RunOutcome::AlreadyComplete);
        }
        if start > 0 {
            info!("Resuming after stage {}/{}", start, total);
        }

        let mut applied = 0;
        let mut skipped = 0;

        for (index, stage) in self.stages.iter().enumerate().skip(start) {
            let number = index + 1;
            info!("Starting stage {}/{}: {}", number, total, stage.label());
            self.set_status(Phase::Running, Some(stage.id()), index, None)
                .await;

            let outcome = match self.run_stage(stage.as_ref(), ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Stage {} failed: {}", stage.id(), e);
                    self.set_status(Phase::Error, Some(stage.id()), index, Some(e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            self.store.advance(number, stage.id()).await?;

            match outcome {
                StageOutcome::AlreadySatisfied => {
                    skipped += 1;
                    info!("Stage {}/{} already satisfied: {}", number, total, stage.label());
                }
                StageOutcome::Applied => {
                    applied += 1;
                    info!("Completed stage {}/{}: {}", number, total, stage.label());
                }
                StageOutcome::RebootRequired => {
                    info!("Completed stage {}/{}: {}", number, total, stage.label());
                    self.set_status(Phase::RebootPending, Some(stage.id()), number, None)
                        .await;
                    if let Err(e) = self.rebooter.reboot(stage.id()).await {
                        error!("Reboot after {} failed: {}", stage.id(), e);
                        self.set_status(Phase::Error, Some(stage.id()), number, Some(e.to_string()))
                            .await;
                        return Err(e);
                    }
                    return Ok(RunOutcome::RebootRequired {
                        stage: stage.id().to_string(),
                    });
                }
            }
        }

        self.set_status(Phase::Done, None, total, None).await;
        info!(
            "Bootstrap complete ({} applied, {} already satisfied)",
            applied, skipped
        );
        Ok(RunOutcome::Completed { applied, skipped })
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &RunContext,
    ) -> Result<StageOutcome, BootstrapError> {
        if stage.is_satisfied(ctx).await? {
            return Ok(StageOutcome::AlreadySatisfied);
        }

        stage.apply(ctx).await?;

        if stage.requires_reboot() {
            Ok(StageOutcome::RebootRequired)
        } else {
            Ok(StageOutcome::Applied)
        }
    }

    /// Rewind the progress marker, or clear it with `None`
    ///
    /// The new value must name a stage of this catalogue; anything higher
    /// would make every later run fail.
    pub async fn reset(&self, to: Option<usize>) -> Result<(), BootstrapError> {
        if let Some(k) = to.filter(|&k| k > self.stages.len()) {
            return Err(BootstrapError::State(format!(
                "cannot reset progress to {k}: only {} stages exist",
                self.stages.len()
            )));
        }
        self.store.reset(to).await
    }

    /// Evaluate every predicate without side effects
    pub async fn probe(&self, ctx: &mut RunContext) -> Result<Vec<StageProbe>, BootstrapError> {
        let completed = self.completed().await?;
        for stage in &self.stages {
            stage.contribute_env(ctx);
        }

        let mut probes = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            probes.push(StageProbe {
                number: index + 1,
                id: stage.id(),
                label: stage.label(),
                requires_reboot: stage.requires_reboot(),
                recorded: index < completed,
                satisfied: stage.is_satisfied(ctx).await?,
            });
        }
        Ok(probes)
    }

    /// Status is informational; failing to write it never fails the run
    async fn set_status(
        &self,
        phase: Phase,
        stage: Option<&str>,
        completed: usize,
        error: Option<String>,
    ) {
        let status = BootstrapStatus {
            status: phase,
            stage: stage.map(String::from),
            completed,
            total: self.stages.len(),
            error,
            updated_at: timestamp(),
        };
        if let Err(e) = self.store.write_status(&status).await {
            warn!("Could not write status file: {}", e);
        }
    }
}
