//! Execution scheduler - runs stages in order groups
//!
//! Stages sharing an order value form one group. Groups run in ascending
//! order and a group is fully joined before the next one starts. Within a
//! group, the [`SchedulingStrategy`] decides whether members run one at a
//! time or concurrently.

use super::engine::{emit_event, EventHandler, ExecutionEvent};
use super::stage::{Stage, StageContext, StageError, StageRegistry};
use crate::core::{RunState, StageDescriptor};
use crate::device::ConnectionError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// How members of one order group are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One member at a time, stopping at the first failure
    #[default]
    Sequential,

    /// Every member of a group at once
    Parallel,

    /// At most N members of a group at once
    LimitedParallel(usize),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Stage '{stage}' (order {order}) failed: {source}")]
    StageFailed {
        stage: String,
        order: u32,
        #[source]
        source: StageError,
    },

    #[error("Experiment result was finalized twice")]
    DoubleFinalize,

    #[error("No stage named '{stage}' is registered")]
    StageNotFound { stage: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Could not record {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stage and the descriptor it was loaded from
#[derive(Clone)]
pub struct LoadedStage {
    pub descriptor: StageDescriptor,
    pub stage: Arc<dyn Stage>,
}

/// Stages sharing one order value
#[derive(Clone)]
pub struct StageGroup {
    pub order: u32,
    pub members: Vec<LoadedStage>,
}

impl StageGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Scheduler for the stages of one run
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Load every stage once and group them by ascending order value
    pub fn plan(experiment: &[StageDescriptor], registry: &StageRegistry) -> Result<Vec<StageGroup>, RunError> {
        let mut groups: BTreeMap<u32, Vec<LoadedStage>> = BTreeMap::new();
        for descriptor in experiment {
            let stage = registry
                .load(descriptor)
                .ok_or_else(|| RunError::StageNotFound {
                    stage: descriptor.source.clone(),
                })?;
            debug!("Loaded stage {}", descriptor);
            groups.entry(descriptor.order).or_default().push(LoadedStage {
                descriptor: descriptor.clone(),
                stage,
            });
        }

        Ok(groups
            .into_iter()
            .map(|(order, members)| StageGroup { order, members })
            .collect())
    }

    /// Run every group; the first failure aborts the remaining groups
    pub async fn run(
        &self,
        groups: &[StageGroup],
        ctx: &StageContext,
        handlers: &Arc<Vec<EventHandler>>,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        for group in groups {
            info!("Starting group {} ({} stages)", group.order, group.len());
            emit_event(
                handlers,
                ExecutionEvent::GroupStarted {
                    order: group.order,
                    stages: group.len(),
                },
            );

            let outcome = match self.strategy {
                SchedulingStrategy::Sequential => Self::run_sequential(group, ctx, handlers, state).await,
                SchedulingStrategy::Parallel => Self::run_concurrent(group, None, ctx, handlers, state).await,
                SchedulingStrategy::LimitedParallel(max) => {
                    Self::run_concurrent(group, Some(max), ctx, handlers, state).await
                }
            };

            if let Err(e) = outcome {
                error!("Group {} failed: {}", group.order, e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn run_sequential(
        group: &StageGroup,
        ctx: &StageContext,
        handlers: &Arc<Vec<EventHandler>>,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        for member in &group.members {
            match run_stage(member, ctx, handlers).await {
                Ok(()) => state.stage_completed(),
                Err(e) => {
                    state.stage_failed();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn run_concurrent(
        group: &StageGroup,
        limit: Option<usize>,
        ctx: &StageContext,
        handlers: &Arc<Vec<EventHandler>>,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        let semaphore = limit.map(|max| Arc::new(Semaphore::new(max.max(1))));
        let mut tasks = JoinSet::new();

        for (index, member) in group.members.iter().cloned().enumerate() {
            let ctx = ctx.clone();
            let handlers = handlers.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (index, run_stage(&member, &ctx, &handlers).await)
            });
        }

        let mut finished = vec![false; group.len()];
        let mut failure = None;
        let mut aborted = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    finished[index] = true;
                    match outcome {
                        Ok(()) => state.stage_completed(),
                        Err(e) => {
                            state.stage_failed();
                            failure.get_or_insert(e);
                        }
                    }
                }
                Err(e) => aborted = Some(e.to_string()),
            }
        }

        if let Some(reason) = aborted {
            if let Some(member) = group
                .members
                .iter()
                .zip(&finished)
                .find_map(|(member, done)| (!done).then_some(member))
            {
                state.stage_failed();
                failure.get_or_insert(RunError::StageFailed {
                    stage: member.descriptor.source.clone(),
                    order: member.descriptor.order,
                    source: StageError::Other(format!("stage task aborted: {}", reason)),
                });
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_stage(member: &LoadedStage, ctx: &StageContext, handlers: &[EventHandler]) -> Result<(), RunError> {
    let descriptor = &member.descriptor;
    info!("Starting stage {}", descriptor);
    emit_event(
        handlers,
        ExecutionEvent::StageStarted {
            stage: descriptor.source.clone(),
            order: descriptor.order,
        },
    );

    match member.stage.run(ctx).await {
        Ok(()) => {
            info!("Stage {} completed", descriptor);
            emit_event(
                handlers,
                ExecutionEvent::StageCompleted {
                    stage: descriptor.source.clone(),
                    order: descriptor.order,
                },
            );
            Ok(())
        }
        Err(source) => {
            error!("Stage {} failed: {}", descriptor, source);
            emit_event(
                handlers,
                ExecutionEvent::StageFailed {
                    stage: descriptor.source.clone(),
                    order: descriptor.order,
                    error: source.to_string(),
                },
            );
            Err(RunError::StageFailed {
                stage: descriptor.source.clone(),
                order: descriptor.order,
                source,
            })
        }
    }
}
