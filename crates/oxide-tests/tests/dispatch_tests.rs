//! End-to-end dispatch tests against an in-process scheduler.
//!
//! Run with: `cargo test -p oxide-tests --test dispatch_tests`

use futures::future::join_all;
use oxide_core::events::SchedulerEvent;
use oxide_core::{BuildId, BuildStatus, CallContext, Error, Filter, RunnerStatus};
use oxide_scheduler::{HeartbeatReaper, SchedulerConfig};
use oxide_tests::*;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::time::Duration;

fn short() -> CallContext {
    CallContext::with_timeout(Duration::from_millis(100))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_runners_race_for_one_stage() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::linux("build-1")).await.unwrap();

    let ctx_a = CallContext::new();
    let ctx_b = CallContext::new();
    let a = ctx.spawn_request("runner-a", RunnerFixture::linux(), ctx_a.clone());
    let b = ctx.spawn_request("runner-b", RunnerFixture::linux(), ctx_b.clone());

    let (ra, rb) = (&a, &b);
    let one_done = wait_for(Duration::from_secs(2), Duration::from_millis(5), || async move {
        ra.is_finished() || rb.is_finished()
    })
    .await;
    assert!(one_done);

    // the loser stays suspended
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.is_finished() ^ b.is_finished());
    assert!(wait_for_pollers(&ctx.scheduler, 1).await);

    ctx_a.cancel();
    ctx_b.cancel();
    let results = [a.await.unwrap(), b.await.unwrap()];

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1);
    assert_eq!(won[0].id, stage_id("build-1"));
    assert!(results.iter().any(|r| matches!(r, Err(Error::Canceled))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_claim_under_contention() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::any("only")).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            ctx.spawn_request(
                &format!("runner-{i}"),
                Filter::any(),
                CallContext::with_timeout(Duration::from_millis(300)),
            )
        })
        .collect();
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let claimed = results.iter().filter(|r| r.is_ok()).count();
    let timed_out = results
        .iter()
        .filter(|r| matches!(r, Err(Error::DeadlineExceeded)))
        .count();
    assert_eq!(claimed, 1);
    assert_eq!(timed_out, 7);
    assert_eq!(ctx.scheduler.metrics().stages_dispatched, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_runners_never_share_a_stage() {
    let ctx = TestContext::new();
    for i in 0..40 {
        ctx.schedule(StageFixture::any(&format!("stage-{i}"))).await.unwrap();
    }

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let scheduler = ctx.scheduler.clone();
            tokio::spawn(async move {
                let runner = runner_id(&format!("runner-{i}"));
                let mut claimed = Vec::new();
                loop {
                    match scheduler.request(&short(), &runner, &Filter::any()).await {
                        Ok(stage) => {
                            scheduler
                                .complete(&CallContext::new(), &stage.id, BuildStatus::Success)
                                .await
                                .unwrap();
                            claimed.push(stage.id);
                        }
                        Err(Error::DeadlineExceeded) => return claimed,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for claimed in join_all(workers).await {
        for id in claimed.unwrap() {
            total += 1;
            assert!(seen.insert(id.clone()), "stage {id} dispatched twice");
        }
    }
    assert_eq!(total, 40);
}

#[tokio::test]
async fn test_dependency_gating() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::linux("build-1")).await.unwrap();
    ctx.schedule(StageFixture::after("deploy-1", &["build-1"]))
        .await
        .unwrap();

    let build = ctx
        .scheduler
        .request(&short(), &runner_id("runner-a"), &RunnerFixture::linux())
        .await
        .unwrap();
    assert_eq!(build.id, stage_id("build-1"));

    // deploy-1 is not handed out while build-1 is running
    let waiting = ctx.spawn_request("runner-b", Filter::any(), CallContext::new());
    assert!(wait_for_pollers(&ctx.scheduler, 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());
    assert_eq!(
        ctx.scheduler.stage(&stage_id("deploy-1")).await.unwrap().status,
        BuildStatus::WaitingOnDependencies
    );

    ctx.scheduler
        .complete(&CallContext::new(), &stage_id("build-1"), BuildStatus::Success)
        .await
        .unwrap();

    let deploy = assert_completes_within(waiting, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deploy.id, stage_id("deploy-1"));
    assert_eq!(deploy.status, BuildStatus::Running);
}

#[tokio::test]
async fn test_failed_dependency_blocks_dependent() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::any("build-1")).await.unwrap();
    ctx.schedule(StageFixture::after("deploy-1", &["build-1"]))
        .await
        .unwrap();

    ctx.scheduler
        .request(&short(), &runner_id("runner-a"), &Filter::any())
        .await
        .unwrap();
    ctx.scheduler
        .complete(&CallContext::new(), &stage_id("build-1"), BuildStatus::Failure)
        .await
        .unwrap();

    assert_eq!(
        ctx.scheduler.stage(&stage_id("deploy-1")).await.unwrap().status,
        BuildStatus::Blocked
    );
    let next = ctx
        .scheduler
        .request(&short(), &runner_id("runner-a"), &Filter::any())
        .await;
    assert!(matches!(next, Err(Error::DeadlineExceeded)));
}

#[tokio::test]
async fn test_filters_are_respected() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::windows("win")).await.unwrap();
    ctx.schedule(StageFixture::linux("lin")).await.unwrap();

    let linux = ctx
        .scheduler
        .request(&short(), &runner_id("linux-1"), &Filter::any().with_os("linux"))
        .await
        .unwrap();
    assert_eq!(linux.id, stage_id("lin"));

    let nothing = ctx
        .scheduler
        .request(&short(), &runner_id("linux-2"), &Filter::any().with_os("linux"))
        .await;
    assert!(matches!(nothing, Err(Error::DeadlineExceeded)));

    let anything = ctx
        .scheduler
        .request(&short(), &runner_id("generic"), &Filter::any())
        .await
        .unwrap();
    assert_eq!(anything.id, stage_id("win"));
}

#[tokio::test]
async fn test_fifo_by_schedule_time() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::after("early", &["gate"])).await.unwrap();
    ctx.schedule(StageFixture::any("gate")).await.unwrap();
    ctx.schedule(StageFixture::any("late")).await.unwrap();

    let runner = runner_id("runner-a");
    let gate = ctx.scheduler.request(&short(), &runner, &Filter::any()).await.unwrap();
    assert_eq!(gate.id, stage_id("gate"));
    ctx.scheduler
        .complete(&CallContext::new(), &gate.id, BuildStatus::Success)
        .await
        .unwrap();

    // promoted after "late" was queued, but scheduled before it
    let mut order = Vec::new();
    for _ in 0..2 {
        let stage = ctx.scheduler.request(&short(), &runner, &Filter::any()).await.unwrap();
        ctx.scheduler
            .complete(&CallContext::new(), &stage.id, BuildStatus::Success)
            .await
            .unwrap();
        order.push(stage.id.to_string());
    }
    assert_eq!(order, vec!["early", "late"]);
}

#[tokio::test]
async fn test_requeue_is_idempotent() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::any("a")).await.unwrap();
    ctx.schedule(StageFixture::any("b")).await.unwrap();
    let b = stage_id("b");

    // already pending: nothing changes
    let before = ctx.scheduler.queue_stats().await;
    ctx.scheduler.requeue(&b).await.unwrap();
    ctx.scheduler.requeue(&b).await.unwrap();
    assert_eq!(ctx.scheduler.queue_stats().await, before);
    assert_eq!(ctx.scheduler.position(&b).await.unwrap(), Some(1));

    // running: once and twice look the same
    let runner = runner_id("runner-a");
    ctx.scheduler.request(&short(), &runner, &Filter::any()).await.unwrap();
    let second = ctx.scheduler.request(&short(), &runner_id("runner-b"), &Filter::any()).await.unwrap();
    assert_eq!(second.id, b);

    ctx.scheduler.requeue(&b).await.unwrap();
    let once = (
        ctx.scheduler.queue_stats().await,
        ctx.scheduler.position(&b).await.unwrap(),
        ctx.scheduler.stage(&b).await.unwrap().attempt,
    );
    ctx.scheduler.requeue(&b).await.unwrap();
    let twice = (
        ctx.scheduler.queue_stats().await,
        ctx.scheduler.position(&b).await.unwrap(),
        ctx.scheduler.stage(&b).await.unwrap().attempt,
    );
    assert_eq!(once, twice);
    assert_eq!(once.1, Some(0));
    assert_eq!(once.2, 1);

    let runner_b = ctx.scheduler.runner(&runner_id("runner-b")).await.unwrap();
    assert_eq!(runner_b.status, RunnerStatus::Idle);
}

#[tokio::test]
async fn test_requeue_wakes_poller() {
    let ctx = TestContext::new();
    ctx.schedule(StageFixture::linux("build-1")).await.unwrap();
    let first = ctx
        .scheduler
        .request(&short(), &runner_id("crashy"), &RunnerFixture::linux())
        .await
        .unwrap();

    let waiting = ctx.spawn_request("steady", RunnerFixture::linux(), CallContext::new());
    assert!(wait_for_pollers(&ctx.scheduler, 1).await);

    let orphan = ctx.scheduler.mark_offline(&runner_id("crashy")).await.unwrap();
    assert_eq!(orphan, Some(first.id.clone()));
    ctx.scheduler.requeue(&first.id).await.unwrap();

    let retried = assert_completes_within(waiting, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.id, first.id);
    assert_eq!(retried.attempt, 1);
    assert_eq!(retried.runner_id, Some(runner_id("steady")));
}

#[tokio::test]
async fn test_cancellation_leaves_nothing_claimed() {
    let ctx = TestContext::new();
    let call = CallContext::new();
    let waiting = ctx.spawn_request("runner-a", Filter::any(), call.clone());
    assert!(wait_for_pollers(&ctx.scheduler, 1).await);

    call.cancel();
    let result = assert_completes_within(waiting, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::Canceled)));
    assert_eq!(ctx.scheduler.queue_stats().await.pollers, 0);

    ctx.schedule(StageFixture::any("build-1")).await.unwrap();
    let stage = ctx
        .scheduler
        .request(&short(), &runner_id("runner-b"), &Filter::any())
        .await
        .unwrap();
    assert_eq!(stage.id, stage_id("build-1"));
    assert_eq!(ctx.scheduler.metrics().requests_canceled, 1);
}

#[tokio::test]
async fn test_deadline_is_an_explicit_error() {
    let ctx = TestContext::new();
    let started = std::time::Instant::now();
    let result = ctx
        .scheduler
        .request(
            &CallContext::with_timeout(Duration::from_millis(50)),
            &runner_id("runner-a"),
            &Filter::any(),
        )
        .await;

    assert!(matches!(result, Err(Error::DeadlineExceeded)));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(ctx.scheduler.metrics().requests_timed_out, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_suspended_requests() {
    let ctx = TestContext::new();
    let waiting = ctx.spawn_request("runner-a", Filter::any(), CallContext::new());
    assert!(wait_for_pollers(&ctx.scheduler, 1).await);

    ctx.scheduler.shutdown();
    let result = assert_completes_within(waiting, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::Canceled)));

    let late = ctx.schedule(StageFixture::any("late")).await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_pipeline_through_the_port() {
    let mut ctx = TestContext::new();
    let port = ctx.port();
    let build = BuildId::new();
    ctx.scheduler
        .schedule_build(&CallContext::new(), StageFixture::pipeline(build))
        .await
        .unwrap();

    let worker = runner_id("worker");
    let worker_profile = RunnerFixture::linux().with_kind("pipeline");
    let deployer = runner_id("deployer");
    port.register(&deployer, RunnerFixture::deployer()).await.unwrap();

    for _ in 0..3 {
        let stage = port.request(&short(), &worker, &worker_profile).await.unwrap();
        port.complete(&CallContext::new(), &stage.id, BuildStatus::Success)
            .await
            .unwrap();
    }
    assert_eq!(ctx.scheduler.build_status(&build).await, Some(BuildStatus::Pending));

    // the worker only takes pipeline work
    let nothing = port.request(&short(), &worker, &worker_profile).await;
    assert!(matches!(nothing, Err(Error::DeadlineExceeded)));

    let deploy = port
        .request(&short(), &deployer, &RunnerFixture::deployer())
        .await
        .unwrap();
    assert_eq!(deploy.id, stage_id("deploy"));
    port.complete(&CallContext::new(), &deploy.id, BuildStatus::Success)
        .await
        .unwrap();
    assert_eq!(ctx.scheduler.build_status(&build).await, Some(BuildStatus::Success));

    let promoted = ctx
        .next_event_matching(Duration::from_secs(1), |e| {
            matches!(e, SchedulerEvent::StagePromoted(p) if p.stage_id == stage_id("deploy"))
        })
        .await;
    assert!(promoted.is_some());

    assert_eq!(ctx.scheduler.retire_build(&build).await.unwrap(), 4);
}

#[tokio::test]
async fn test_reaper_recovers_orphaned_stage() {
    let config = SchedulerConfig {
        heartbeat_timeout_secs: 1,
        reap_interval_secs: 1,
        requeue_orphans: true,
        ..SchedulerConfig::default()
    };
    let ctx = TestContext::with_config(config.clone());
    ctx.schedule(StageFixture::any("build-1")).await.unwrap();
    ctx.scheduler
        .request(&short(), &runner_id("silent"), &Filter::any())
        .await
        .unwrap();

    let reaper = HeartbeatReaper::new(ctx.scheduler.clone(), &config)
        .spawn(ctx.scheduler.shutdown_token());

    assert!(wait_for_status(&ctx.scheduler, &stage_id("build-1"), BuildStatus::Pending).await);
    let silent = ctx.scheduler.runner(&runner_id("silent")).await.unwrap();
    assert_eq!(silent.status, RunnerStatus::Offline);

    ctx.scheduler.shutdown();
    assert_completes_within(reaper, Duration::from_secs(1))
        .await
        .unwrap();
}
