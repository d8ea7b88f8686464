//! Command handlers.

use crate::plan::BuildPlan;
use anyhow::{Result, bail};
use console::style;
use futures::future::join_all;
use oxide_core::events::SchedulerEvent;
use oxide_core::{BuildId, BuildStatus, CallContext, Error, Filter, RunnerId, Stage, StageId};
use oxide_scheduler::{
    BroadcastEventSink, DispatchCoordinator, HeartbeatReaper, MetricsSnapshot, SchedulerConfig,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

/// Validate a build plan.
pub fn validate(path: &Path) -> Result<()> {
    let plan = BuildPlan::load(path)?;
    let dag = plan.validate()?;

    println!(
        "{} Build plan \"{}\" is valid",
        style("✓").green(),
        plan.name
    );
    println!("  Stages: {}", plan.stages.len());

    for node in dag.topological_order()? {
        let after: Vec<String> = dag
            .predecessors(&node.stage_id)
            .iter()
            .map(|p| p.stage_id.to_string())
            .collect();
        if after.is_empty() {
            println!("    - {}", node.stage_id);
        } else {
            println!("    - {} (after {})", node.stage_id, after.join(", "));
        }
    }

    println!("  Runners: {}", plan.runners.len());
    for stage in plan.unmatched_stages() {
        println!(
            "{} No runner matches stage {} ({})",
            style("!").yellow(),
            stage.id,
            stage.filter
        );
    }

    Ok(())
}

#[derive(Serialize)]
struct SimulationReport<'a> {
    build: &'a str,
    build_id: BuildId,
    status: Option<BuildStatus>,
    stages: Vec<Stage>,
    stages_per_runner: HashMap<String, usize>,
    metrics: MetricsSnapshot,
}

/// Run a build plan to completion against an in-process scheduler.
pub async fn simulate(
    path: &Path,
    config_path: Option<&Path>,
    timeout_secs: u64,
    json: bool,
) -> Result<()> {
    let plan = BuildPlan::load(path)?;
    plan.validate()?;

    let unmatched: Vec<&str> = plan
        .unmatched_stages()
        .iter()
        .map(|s| s.id.as_str())
        .collect();
    if !unmatched.is_empty() {
        bail!("no runner can take stage(s): {}", unmatched.join(", "));
    }

    let config = SchedulerConfig::load(config_path)?;
    let sink = BroadcastEventSink::new(config.event_buffer);
    let mut events = sink.subscribe();
    let coordinator =
        Arc::new(DispatchCoordinator::new(config.clone()).with_event_sink(Arc::new(sink)));
    let reaper = HeartbeatReaper::new(coordinator.clone(), &config)
        .spawn(coordinator.shutdown_token());

    for runner in &plan.runners {
        coordinator
            .register(&RunnerId::new(runner.id.as_str()), runner.profile.clone())
            .await?;
    }

    let build = BuildId::new();
    coordinator
        .schedule_build(&CallContext::new(), plan.stages(build))
        .await?;
    info!(build = %plan.name, build_id = %build, "Simulation started");

    let outcomes: Arc<HashMap<StageId, (BuildStatus, u64)>> = Arc::new(
        plan.stages
            .iter()
            .map(|s| (StageId::new(s.id.as_str()), (s.outcome, s.duration_ms)))
            .collect(),
    );
    let workers: Vec<_> = plan
        .runners
        .iter()
        .map(|r| {
            tokio::spawn(run_worker(
                coordinator.clone(),
                RunnerId::new(r.id.as_str()),
                r.profile.clone(),
                outcomes.clone(),
            ))
        })
        .collect();

    let finished = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        wait_for_build(&coordinator, &build, &mut events),
    )
    .await;

    coordinator.shutdown();
    let handled = join_all(workers).await;
    if let Err(e) = reaper.await {
        warn!(error = %e, "Heartbeat reaper task failed");
    }

    let stages_per_runner = plan
        .runners
        .iter()
        .zip(handled)
        .map(|(r, n)| (r.id.clone(), n.unwrap_or_default()))
        .collect();
    let report = SimulationReport {
        build: &plan.name,
        build_id: build,
        status: coordinator.build_status(&build).await,
        stages: coordinator.build_stages(&build).await,
        stages_per_runner,
        metrics: coordinator.metrics(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if finished.is_err() {
        bail!("build did not finish within {timeout_secs}s");
    }
    Ok(())
}

/// Poll for stages until the scheduler shuts down; returns how many were run.
async fn run_worker(
    coordinator: Arc<DispatchCoordinator>,
    runner: RunnerId,
    profile: Filter,
    outcomes: Arc<HashMap<StageId, (BuildStatus, u64)>>,
) -> usize {
    let shutdown = coordinator.shutdown_token();
    let mut handled = 0;

    loop {
        let ctx = CallContext::child_of(&shutdown);
        match coordinator.request(&ctx, &runner, &profile).await {
            Ok(stage) => {
                let (outcome, duration_ms) = outcomes
                    .get(&stage.id)
                    .copied()
                    .unwrap_or((BuildStatus::Success, 0));
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;

                if let Err(e) = coordinator.complete(&ctx, &stage.id, outcome).await {
                    warn!(runner_id = %runner, stage_id = %stage.id, error = %e, "Failed to report outcome");
                }
                handled += 1;
            }
            Err(Error::DeadlineExceeded) => continue,
            Err(Error::Canceled) => break,
            Err(e) => {
                error!(runner_id = %runner, error = %e, "Runner stopped");
                break;
            }
        }
    }

    debug!(runner_id = %runner, handled, "Runner finished");
    handled
}

async fn wait_for_build(
    coordinator: &DispatchCoordinator,
    build: &BuildId,
    events: &mut broadcast::Receiver<SchedulerEvent>,
) -> Option<BuildStatus> {
    loop {
        let status = coordinator.build_status(build).await;
        if status.is_none_or(|s| s.is_terminal()) {
            return status;
        }

        match events.recv().await {
            Ok(event) => debug!(subject = %event.subject(), "Event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
            Err(RecvError::Closed) => return coordinator.build_status(build).await,
        }
    }
}

fn print_report(report: &SimulationReport<'_>) {
    let (mark, status) = match report.status {
        Some(BuildStatus::Success) => (style("✓").green(), "success".to_string()),
        Some(s) if s.is_terminal() => (style("✗").red(), s.to_string()),
        Some(s) => (style("!").yellow(), format!("{s} (unfinished)")),
        None => (style("!").yellow(), "empty".to_string()),
    };
    println!("{} Build \"{}\" {}", mark, report.build, style(status).bold());

    for stage in &report.stages {
        let status = match stage.status {
            s if s.is_success() => style(s.to_string()).green(),
            s if s.is_failed() => style(s.to_string()).red(),
            s if s.is_terminal() => style(s.to_string()).yellow(),
            s => style(s.to_string()).dim(),
        };
        let runner = stage
            .runner_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    {:<24} {:<32} {:<16} attempt {}",
            stage.id, status, runner, stage.attempt
        );
    }

    let m = &report.metrics;
    println!(
        "  Dispatched: {}  Completed: {}  Blocked: {}  Declined: {}  Claim conflicts: {}",
        m.stages_dispatched, m.stages_completed, m.stages_blocked, m.stages_declined, m.claim_conflicts
    );
}
