//! The dispatch coordinator: the single point of authority over stage and
//! runner state.

use crate::config::SchedulerConfig;
use crate::dag::{DagBuilder, DependencyResolver, Resolution};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::queue::{MemoryStageQueue, QueueStats, StageQueue};
use crate::registry::{Registration, RunnerRegistry};
use crate::sink::EventPublisher;
use crate::status::StatusMachine;
use crate::waiters::WaitList;

use async_trait::async_trait;
use chrono::Utc;
use oxide_core::events::*;
use oxide_core::ids::{BuildId, RunnerId, StageId};
use oxide_core::ports::{EventSink, Scheduler};
use oxide_core::runner::{Runner, RunnerStatus};
use oxide_core::stage::{BuildStatus, Stage};
use oxide_core::{CallContext, CapabilityProfile, Error, Filter, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queue counts plus the coordinator's own view of pollers and runners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    #[serde(flatten)]
    pub queue: QueueStats,
    /// Requests currently suspended.
    pub pollers: usize,
    pub runners: usize,
}

/// A runner taken offline, with the stage it was holding at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedRunner {
    pub runner_id: RunnerId,
    pub orphaned_stage: Option<StageId>,
}

/// Matches pending stages to polling runners.
///
/// All queue, registry and dependency state sits behind one lock. Reads
/// (peeking for an eligible stage) share it; every mutation, including the
/// final claim, takes it exclusively. Events are handed to the publisher
/// under the lock, so they go out in the order the state changed. Pollers
/// are woken after the lock is released.
pub struct DispatchCoordinator<Q = MemoryStageQueue> {
    state: RwLock<State<Q>>,
    waiters: WaitList,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    events: Option<EventPublisher>,
    shutdown: CancellationToken,
}

impl DispatchCoordinator<MemoryStageQueue> {
    /// Coordinator over an in-memory queue.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_queue(config, MemoryStageQueue::new())
    }
}

impl<Q: StageQueue> DispatchCoordinator<Q> {
    pub fn with_queue(config: SchedulerConfig, queue: Q) -> Self {
        Self {
            state: RwLock::new(State {
                queue,
                registry: RunnerRegistry::new(),
                resolver: DependencyResolver::new(),
                machine: StatusMachine::new(),
            }),
            waiters: WaitList::new(),
            config,
            metrics: SchedulerMetrics::new(),
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish events to `sink`. Must be called within a Tokio runtime.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(EventPublisher::spawn(sink));
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Token canceled by [`DispatchCoordinator::shutdown`]. Background tasks
    /// tied to the coordinator's lifetime should watch a child of it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // === Write side ===

    /// Accept a stage and compute its initial status from its dependencies.
    pub async fn schedule(&self, ctx: &CallContext, stage: Stage) -> Result<()> {
        self.check_open(ctx)?;

        let mut fx = Effects::default();
        {
            let mut state = self.state.write().await;
            state.admit(stage, &mut fx, &self.metrics)?;
            self.emit(&mut fx);
        }
        self.wake(&fx);
        Ok(())
    }

    /// Accept a whole build at once, or none of it.
    ///
    /// Dependencies must either be inside the build or already scheduled.
    /// Stages are admitted in the order given, which is their dispatch order.
    pub async fn schedule_build(&self, ctx: &CallContext, stages: Vec<Stage>) -> Result<()> {
        self.check_open(ctx)?;
        if let Some(stage) = stages.iter().find(|s| s.id.is_empty()) {
            return Err(Error::InvalidStage(format!(
                "stage in build {} has an empty identity",
                stage.build_id
            )));
        }

        let mut fx = Effects::default();
        {
            let mut state = self.state.write().await;
            DagBuilder::new().build(&stages, |id| state.queue.contains(id))?;

            // Edges into earlier-scheduled stages can still close a cycle.
            let mut trial = state.resolver.clone();
            for stage in &stages {
                trial.insert(&stage.id, &stage.depends_on)?;
            }

            let count = stages.len();
            for stage in stages {
                state.admit(stage, &mut fx, &self.metrics)?;
            }
            info!(stages = count, "Build scheduled");
            self.emit(&mut fx);
        }
        self.wake(&fx);
        Ok(())
    }

    /// Long-poll for a stage on behalf of `runner`.
    ///
    /// Unknown or offline runners are registered with `filter` as their
    /// profile; known runners are heartbeated. Without a deadline on `ctx`
    /// the configured poll timeout applies.
    pub async fn request(
        &self,
        ctx: &CallContext,
        runner: &RunnerId,
        filter: &Filter,
    ) -> Result<Stage> {
        if ctx.is_cancelled() || self.is_shutdown() {
            return Err(Error::Canceled);
        }

        {
            let mut state = self.state.write().await;
            if let Some(event) = state.handshake(runner, filter)? {
                self.send(event);
            }
        }

        let deadline = ctx
            .deadline()
            .or_else(|| self.config.poll_timeout().map(|t| Instant::now() + t));
        let ticket = self.waiters.register(filter);
        let mut suspended = None;

        loop {
            if let Some(stage) = self.try_dispatch(runner, filter).await? {
                self.metrics.record_dispatched();
                info!(
                    stage_id = %stage.id,
                    runner_id = %runner,
                    attempt = stage.attempt,
                    "Stage dispatched"
                );
                // Claimed: nothing may await between here and the return.
                return Ok(stage);
            }

            if suspended.is_none() {
                debug!(runner_id = %runner, filter = %filter, "No eligible stage, suspending");
                suspended = Some(self.metrics.track_waiting());
            }

            tokio::select! {
                biased;
                _ = ctx.token().cancelled() => {
                    self.metrics.record_canceled();
                    debug!(runner_id = %runner, "Request canceled");
                    return Err(Error::Canceled);
                }
                _ = self.shutdown.cancelled() => {
                    self.metrics.record_canceled();
                    debug!(runner_id = %runner, "Request canceled by shutdown");
                    return Err(Error::Canceled);
                }
                _ = sleep_until(deadline) => {
                    self.metrics.record_timed_out();
                    debug!(runner_id = %runner, "Request deadline exceeded");
                    return Err(Error::DeadlineExceeded);
                }
                _ = ticket.notified() => {
                    debug!(runner_id = %runner, "Woken, retrying");
                }
            }
        }
    }

    /// Record the outcome of a running stage and resolve its dependents.
    pub async fn complete(
        &self,
        ctx: &CallContext,
        stage_id: &StageId,
        status: BuildStatus,
    ) -> Result<()> {
        check_context(ctx)?;

        let mut fx = Effects::default();
        {
            let mut state = self.state.write().await;
            state.finish(stage_id, status, &mut fx, &self.metrics)?;
            self.emit(&mut fx);
        }
        self.wake(&fx);
        Ok(())
    }

    /// Close a waiting stage as blocked, declined or skipped.
    pub async fn settle(
        &self,
        ctx: &CallContext,
        stage_id: &StageId,
        status: BuildStatus,
    ) -> Result<()> {
        check_context(ctx)?;

        let mut fx = Effects::default();
        {
            let mut state = self.state.write().await;
            let current = state.status_of(stage_id)?;
            if !matches!(
                status,
                BuildStatus::Blocked | BuildStatus::Declined | BuildStatus::Skipped
            ) {
                return Err(Error::IllegalTransition {
                    from: current,
                    to: status,
                });
            }
            state.close_waiting(stage_id, status, None, &mut fx, &self.metrics)?;
            self.emit(&mut fx);
        }
        self.wake(&fx);
        Ok(())
    }

    /// Put a running stage back at the front of the pending set.
    /// Requeueing a pending stage does nothing.
    pub async fn requeue(&self, stage_id: &StageId) -> Result<()> {
        let mut fx = Effects::default();
        {
            let mut state = self.state.write().await;
            state.requeue(stage_id, &mut fx, &self.metrics)?;
            self.emit(&mut fx);
        }
        self.wake(&fx);
        Ok(())
    }

    pub async fn register(&self, runner: &RunnerId, profile: CapabilityProfile) -> Result<()> {
        let mut state = self.state.write().await;
        let registration = state.registry.register(runner, profile.clone())?;

        info!(runner_id = %runner, profile = %profile, ?registration, "Runner registered");
        if registration != Registration::Refreshed {
            self.send(registered(runner, profile));
        }
        Ok(())
    }

    pub async fn heartbeat(&self, runner: &RunnerId) -> Result<()> {
        self.state.write().await.registry.heartbeat(runner)?;
        debug!(runner_id = %runner, "Heartbeat");
        Ok(())
    }

    /// Take a runner offline. Returns the stage it was holding, which stays
    /// `running` until it is requeued or completed.
    pub async fn mark_offline(&self, runner: &RunnerId) -> Result<Option<StageId>> {
        let mut fx = Effects::default();
        let reaped = {
            let mut state = self.state.write().await;
            let reaped = state.take_offline(runner, &mut fx)?;
            self.emit(&mut fx);
            reaped
        };
        Ok(reaped.and_then(|r| r.orphaned_stage))
    }

    /// Take offline every runner silent for longer than `threshold`.
    pub async fn reap_stale(&self, threshold: Duration) -> Result<Vec<ReapedRunner>> {
        let threshold =
            chrono::Duration::from_std(threshold).map_err(|e| Error::Config(e.to_string()))?;

        let mut fx = Effects::default();
        let mut reaped = Vec::new();
        {
            let mut state = self.state.write().await;
            for runner in state.registry.stale(threshold, Utc::now()) {
                if let Some(r) = state.take_offline(&runner, &mut fx)? {
                    warn!(
                        runner_id = %r.runner_id,
                        orphaned_stage = ?r.orphaned_stage,
                        "Runner missed heartbeats, marked offline"
                    );
                    reaped.push(r);
                }
            }
            self.emit(&mut fx);
        }
        Ok(reaped)
    }

    /// Drop a finished build's stages.
    pub async fn retire_build(&self, build: &BuildId) -> Result<usize> {
        let mut state = self.state.write().await;
        let stages: Vec<(StageId, BuildStatus)> = state
            .queue
            .build_stages(build)
            .into_iter()
            .map(|s| (s.id.clone(), s.status))
            .collect();

        if let Some((id, status)) = stages.iter().find(|(_, s)| !s.is_terminal()) {
            return Err(Error::InvalidStage(format!(
                "build {build} still has stage {id} in {status}"
            )));
        }

        for (id, _) in &stages {
            state.queue.remove(id);
            state.resolver.remove(id);
        }
        info!(build_id = %build, stages = stages.len(), "Build retired");
        Ok(stages.len())
    }

    /// Cancel every suspended request and refuse new work.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(pollers = self.waiters.len(), "Scheduler shutting down");
            self.shutdown.cancel();
        }
    }

    // === Read side ===

    pub async fn stage(&self, id: &StageId) -> Result<Stage> {
        self.state
            .read()
            .await
            .queue
            .get(id)
            .cloned()
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }

    pub async fn runner(&self, id: &RunnerId) -> Result<Runner> {
        self.state.read().await.registry.lookup(id).cloned()
    }

    pub async fn runners(&self) -> Vec<Runner> {
        self.state
            .read()
            .await
            .registry
            .list()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn build_stages(&self, build: &BuildId) -> Vec<Stage> {
        self.state
            .read()
            .await
            .queue
            .build_stages(build)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Folded status of a build, `None` if it has no stages.
    pub async fn build_status(&self, build: &BuildId) -> Option<BuildStatus> {
        let state = self.state.read().await;
        let statuses = state.queue.build_stages(build).into_iter().map(|s| s.status);
        state.machine.aggregate(statuses)
    }

    /// Place in the dispatch order, `None` unless the stage is pending.
    pub async fn position(&self, id: &StageId) -> Result<Option<usize>> {
        let state = self.state.read().await;
        if !state.queue.contains(id) {
            return Err(Error::StageNotFound(id.to_string()));
        }
        Ok(state.queue.position(id))
    }

    pub async fn queue_stats(&self) -> DispatchStats {
        let state = self.state.read().await;
        DispatchStats {
            queue: state.queue.stats(),
            pollers: self.waiters.len(),
            runners: state.registry.len(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // === Internals ===

    /// Peek under the shared lock, claim under the exclusive one. A lost
    /// race shows up as `ClaimConflict` and is retried here.
    async fn try_dispatch(&self, runner: &RunnerId, filter: &Filter) -> Result<Option<Stage>> {
        loop {
            let candidate = self
                .state
                .read()
                .await
                .queue
                .peek_eligible(filter)
                .map(|s| s.id.clone());
            let Some(stage_id) = candidate else {
                return Ok(None);
            };

            let mut state = self.state.write().await;
            match state.claim(&stage_id, runner) {
                Ok(stage) => {
                    self.send(dispatched(&stage, runner));
                    return Ok(Some(stage));
                }
                Err(Error::ClaimConflict(_) | Error::StageNotFound(_)) => {
                    self.metrics.record_claim_conflict();
                    debug!(stage_id = %stage_id, runner_id = %runner, "Lost claim race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_open(&self, ctx: &CallContext) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ShuttingDown);
        }
        check_context(ctx)
    }

    /// Hand queued events to the publisher. Call with the state lock held.
    fn emit(&self, fx: &mut Effects) {
        for event in fx.events.drain(..) {
            self.send(event);
        }
    }

    fn send(&self, event: SchedulerEvent) {
        if let Some(publisher) = &self.events {
            publisher.send(event);
        }
    }

    /// Wake pollers for newly pending stages. Call after the lock is released.
    fn wake(&self, fx: &Effects) {
        for filter in &fx.wake {
            let woken = self.waiters.wake_matching(filter);
            if woken > 0 {
                debug!(filter = %filter, woken, "Waking pollers");
            }
        }
    }
}

#[async_trait]
impl<Q: StageQueue + 'static> Scheduler for DispatchCoordinator<Q> {
    async fn schedule(&self, ctx: &CallContext, stage: Stage) -> Result<()> {
        DispatchCoordinator::schedule(self, ctx, stage).await
    }

    async fn request(
        &self,
        ctx: &CallContext,
        runner: &RunnerId,
        filter: &Filter,
    ) -> Result<Stage> {
        DispatchCoordinator::request(self, ctx, runner, filter).await
    }

    async fn complete(
        &self,
        ctx: &CallContext,
        stage: &StageId,
        status: BuildStatus,
    ) -> Result<()> {
        DispatchCoordinator::complete(self, ctx, stage, status).await
    }

    async fn requeue(&self, stage: &StageId) -> Result<()> {
        DispatchCoordinator::requeue(self, stage).await
    }

    async fn register(&self, runner: &RunnerId, profile: CapabilityProfile) -> Result<()> {
        DispatchCoordinator::register(self, runner, profile).await
    }

    async fn heartbeat(&self, runner: &RunnerId) -> Result<()> {
        DispatchCoordinator::heartbeat(self, runner).await
    }

    async fn mark_offline(&self, runner: &RunnerId) -> Result<()> {
        DispatchCoordinator::mark_offline(self, runner)
            .await
            .map(|_| ())
    }
}

/// Everything behind the coordinator's lock.
struct State<Q> {
    queue: Q,
    registry: RunnerRegistry,
    resolver: DependencyResolver,
    machine: StatusMachine,
}

/// Events to hand off under the lock and filters to wake after it.
#[derive(Default)]
struct Effects {
    events: Vec<SchedulerEvent>,
    wake: Vec<Filter>,
}

impl<Q: StageQueue> State<Q> {
    fn status_of(&self, id: &StageId) -> Result<BuildStatus> {
        self.queue
            .get(id)
            .map(|s| s.status)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }

    fn resolve(&self, deps: &[StageId]) -> Resolution {
        self.resolver
            .resolve(deps.iter().map(|d| (d, self.queue.get(d).map(|s| s.status))))
    }

    fn admit(&mut self, mut stage: Stage, fx: &mut Effects, metrics: &SchedulerMetrics) -> Result<()> {
        if stage.id.is_empty() {
            return Err(Error::InvalidStage("stage identity is empty".to_string()));
        }
        if self.queue.contains(&stage.id) {
            return Err(Error::InvalidStage(format!(
                "stage {} is already scheduled",
                stage.id
            )));
        }
        self.resolver.validate(&stage.id, &stage.depends_on)?;

        let resolution = self.resolve(&stage.depends_on);
        stage.status = match resolution {
            Resolution::Ready => BuildStatus::Pending,
            _ => BuildStatus::WaitingOnDependencies,
        };
        stage.runner_id = None;
        stage.started_at = None;
        stage.finished_at = None;
        stage.updated_at = Utc::now();

        let event = queued(&stage);
        let (id, status, filter) = (stage.id.clone(), stage.status, stage.filter.clone());
        let deps = stage.depends_on.clone();
        self.queue.enqueue(stage)?;
        if let Err(e) = self.resolver.insert(&id, &deps) {
            self.queue.remove(&id);
            return Err(e.into());
        }

        metrics.record_scheduled();
        info!(stage_id = %id, status = %status, filter = %filter, "Stage scheduled");
        fx.events.push(event);

        match resolution {
            Resolution::Ready => fx.wake.push(filter),
            Resolution::Wait => {}
            Resolution::Block { cause } => {
                self.close_waiting(&id, BuildStatus::Blocked, Some(cause), fx, metrics)?;
            }
            Resolution::Decline { cause } => {
                self.close_waiting(&id, BuildStatus::Declined, Some(cause), fx, metrics)?;
            }
        }
        Ok(())
    }

    fn handshake(&mut self, runner: &RunnerId, filter: &Filter) -> Result<Option<SchedulerEvent>> {
        if runner.is_empty() {
            return Err(Error::InvalidRunner("runner identity is empty".to_string()));
        }

        let alive = self
            .registry
            .lookup(runner)
            .is_ok_and(|r| r.status != RunnerStatus::Offline);
        if alive {
            self.registry.heartbeat(runner)?;
            self.registry.check_assignable(runner)?;
            return Ok(None);
        }

        let registration = self.registry.register(runner, filter.clone())?;
        info!(runner_id = %runner, ?registration, "Runner joined by polling");
        Ok(Some(registered(runner, filter.clone())))
    }

    fn claim(&mut self, id: &StageId, runner: &RunnerId) -> Result<Stage> {
        self.registry.check_assignable(runner)?;
        let stage = self.queue.claim(id, runner)?;
        self.registry.assign(runner, id)?;
        Ok(stage)
    }

    fn finish(
        &mut self,
        id: &StageId,
        status: BuildStatus,
        fx: &mut Effects,
        metrics: &SchedulerMetrics,
    ) -> Result<()> {
        let current = self.status_of(id)?;
        if !status.is_run_outcome() {
            return Err(Error::IllegalTransition {
                from: current,
                to: status,
            });
        }

        let stage = self.queue.transition(id, status)?;
        if let Some(runner) = &stage.runner_id {
            self.registry.release(runner, id)?;
        }

        metrics.record_completed();
        info!(
            stage_id = %id,
            status = %status,
            runner_id = ?stage.runner_id,
            duration_ms = ?stage.duration_ms(),
            "Stage completed"
        );
        fx.events
            .push(SchedulerEvent::StageCompleted(StageCompletedPayload {
                stage_id: stage.id.clone(),
                build_id: stage.build_id,
                runner_id: stage.runner_id.clone(),
                status,
                duration_ms: stage.duration_ms(),
                completed_at: Utc::now(),
            }));

        self.cascade(id, fx, metrics)
    }

    fn requeue(&mut self, id: &StageId, fx: &mut Effects, metrics: &SchedulerMetrics) -> Result<()> {
        let previous = self
            .queue
            .get(id)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))?
            .runner_id
            .clone();

        if !self.queue.requeue(id)? {
            debug!(stage_id = %id, "Stage already pending, requeue ignored");
            return Ok(());
        }
        if let Some(runner) = &previous {
            self.registry.release(runner, id)?;
        }

        let stage = self
            .queue
            .get(id)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))?;
        metrics.record_requeued();
        info!(
            stage_id = %id,
            previous_runner = ?previous,
            attempt = stage.attempt,
            "Stage requeued"
        );
        fx.events
            .push(SchedulerEvent::StageRequeued(StageRequeuedPayload {
                stage_id: stage.id.clone(),
                build_id: stage.build_id,
                previous_runner_id: previous,
                attempt: stage.attempt,
                requeued_at: Utc::now(),
            }));
        fx.wake.push(stage.filter.clone());
        Ok(())
    }

    fn take_offline(&mut self, runner: &RunnerId, fx: &mut Effects) -> Result<Option<ReapedRunner>> {
        let current = self.registry.lookup(runner)?;
        if current.status == RunnerStatus::Offline {
            return Ok(None);
        }
        let last_heartbeat_at = current.last_heartbeat_at;

        let orphaned_stage = self.registry.mark_offline(runner)?;
        info!(runner_id = %runner, orphaned_stage = ?orphaned_stage, "Runner offline");
        fx.events
            .push(SchedulerEvent::RunnerOffline(RunnerOfflinePayload {
                runner_id: runner.clone(),
                orphaned_stage_id: orphaned_stage.clone(),
                last_heartbeat_at,
                offline_at: Utc::now(),
            }));

        Ok(Some(ReapedRunner {
            runner_id: runner.clone(),
            orphaned_stage,
        }))
    }

    /// Close a waiting stage, then resolve whatever depended on it.
    fn close_waiting(
        &mut self,
        id: &StageId,
        status: BuildStatus,
        cause: Option<StageId>,
        fx: &mut Effects,
        metrics: &SchedulerMetrics,
    ) -> Result<()> {
        self.settle_one(id, status, cause, fx, metrics)?;
        self.cascade(id, fx, metrics)
    }

    fn settle_one(
        &mut self,
        id: &StageId,
        status: BuildStatus,
        cause: Option<StageId>,
        fx: &mut Effects,
        metrics: &SchedulerMetrics,
    ) -> Result<()> {
        let stage = self.queue.transition(id, status)?;
        if status == BuildStatus::Blocked {
            metrics.record_blocked();
        } else {
            metrics.record_declined();
        }

        info!(stage_id = %id, status = %status, cause = ?cause, "Stage settled");
        fx.events
            .push(SchedulerEvent::StageSettled(StageSettledPayload {
                stage_id: stage.id,
                build_id: stage.build_id,
                status,
                cause,
                settled_at: Utc::now(),
            }));
        Ok(())
    }

    /// Re-evaluate the direct dependents of a stage that just went terminal,
    /// following any that are closed in turn.
    fn cascade(&mut self, root: &StageId, fx: &mut Effects, metrics: &SchedulerMetrics) -> Result<()> {
        let mut worklist = VecDeque::from([root.clone()]);

        while let Some(done) = worklist.pop_front() {
            for dependent in self.resolver.dependents(&done) {
                let resolution = match self.queue.get(&dependent) {
                    Some(stage) if stage.status.is_waiting() => self.resolve(&stage.depends_on),
                    _ => continue,
                };

                match resolution {
                    Resolution::Wait => {}
                    Resolution::Ready => {
                        let stage = self.queue.transition(&dependent, BuildStatus::Pending)?;
                        metrics.record_promoted();
                        info!(stage_id = %dependent, after = %done, "Stage promoted to pending");
                        fx.events
                            .push(SchedulerEvent::StagePromoted(StagePromotedPayload {
                                stage_id: stage.id,
                                build_id: stage.build_id,
                                promoted_at: Utc::now(),
                            }));
                        fx.wake.push(stage.filter);
                    }
                    Resolution::Block { cause } => {
                        self.settle_one(&dependent, BuildStatus::Blocked, Some(cause), fx, metrics)?;
                        worklist.push_back(dependent);
                    }
                    Resolution::Decline { cause } => {
                        self.settle_one(&dependent, BuildStatus::Declined, Some(cause), fx, metrics)?;
                        worklist.push_back(dependent);
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_context(ctx: &CallContext) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(Error::Canceled);
    }
    if ctx.is_expired() {
        return Err(Error::DeadlineExceeded);
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn queued(stage: &Stage) -> SchedulerEvent {
    SchedulerEvent::StageQueued(StageQueuedPayload {
        stage_id: stage.id.clone(),
        build_id: stage.build_id,
        status: stage.status,
        filter: stage.filter.clone(),
        queued_at: Utc::now(),
    })
}

fn dispatched(stage: &Stage, runner: &RunnerId) -> SchedulerEvent {
    SchedulerEvent::StageDispatched(StageDispatchedPayload {
        stage_id: stage.id.clone(),
        build_id: stage.build_id,
        runner_id: runner.clone(),
        attempt: stage.attempt,
        dispatched_at: Utc::now(),
    })
}

fn registered(runner: &RunnerId, profile: CapabilityProfile) -> SchedulerEvent {
    SchedulerEvent::RunnerRegistered(RunnerRegisteredPayload {
        runner_id: runner.clone(),
        profile,
        registered_at: Utc::now(),
    })
}
