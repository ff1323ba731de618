//! End-to-end runs of the offload scheduler on the simulated host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use offsched_core::{HalvePlusOne, OffloadCompute, OffloadMode, PolicyMode, SchedulerConfig};
use offsched_sched::{ExitKind, OffloadScheduler, SchedContext, SchedOps, SimHost};

const MS: u64 = 1_000_000;

fn config(mode: PolicyMode, offload: OffloadMode) -> SchedulerConfig {
    let mut cfg = SchedulerConfig::default();
    cfg.policy.mode = mode;
    cfg.policy.offload = offload;
    cfg
}

fn serve(ctx: &SchedContext) {
    let ch = ctx.channel();
    while let Some(req) = ch.take_request() {
        let _ = ch.submit_response(req.respond(HalvePlusOne.compute(req.payload)));
    }
}

#[test]
fn finite_tasks_run_to_completion() {
    let host = Arc::new(SimHost::manual(1));
    let sched = OffloadScheduler::new(config(PolicyMode::Fair, OffloadMode::Off));
    let ctx = sched.init(host.clone()).unwrap();

    let keys: Vec<_> = (0..5)
        .map(|i| host.spawn(&format!("worker-{i}"), Some(50 * MS)).key)
        .collect();
    for key in &keys {
        host.wake(&sched, &ctx, *key).unwrap();
    }

    let mut rounds = 0;
    while !host.is_empty() && rounds < 100 {
        host.run_slice(&sched, &ctx, 0).unwrap();
        rounds += 1;
    }

    assert!(host.is_empty(), "tasks left after {rounds} rounds");
    let c = ctx.counters();
    // 50ms of work in 20ms slices is three runs each.
    assert_eq!(c.running, 15);
    assert_eq!(c.retired, 5);
    assert!(ctx.registry().is_empty());
    assert!(!ctx.has_exited());
}

#[test]
fn per_enqueue_round_trips_every_wakeup() {
    let host = Arc::new(SimHost::manual(2));
    let sched = OffloadScheduler::new(config(PolicyMode::Fifo, OffloadMode::PerEnqueue));
    let ctx = sched.init(host.clone()).unwrap();

    for i in 0..4 {
        let key = host.spawn(&format!("worker-{i}"), Some(30 * MS)).key;
        host.wake(&sched, &ctx, key).unwrap();
    }

    let mut rounds = 0;
    while !host.is_empty() && rounds < 200 {
        serve(&ctx);
        host.elapse(MS);
        for cpu in 0..2 {
            host.run_slice(&sched, &ctx, cpu).unwrap();
        }
        rounds += 1;
    }

    assert!(host.is_empty());
    let c = ctx.counters();
    assert_eq!(c.missed, 0);
    assert_eq!(c.errors, 0);
    assert_eq!(c.sent, c.returned);
    assert_eq!(ctx.outstanding(), 0);

    let ch = ctx.channel();
    let finalized: Vec<_> = std::iter::from_fn(|| ch.take_finalized()).collect();
    assert_eq!(finalized.len() as u64, c.returned);
    assert!(finalized.iter().all(|r| r.elapsed_ns >= MS));
}

#[test]
fn concurrent_run_keeps_counters_consistent() {
    let host = Arc::new(SimHost::new(4).with_quantum(MS));
    let sched = OffloadScheduler::new(config(PolicyMode::Fair, OffloadMode::PerEnqueue));
    let ctx = sched.init(host.clone()).unwrap();

    for i in 0..8 {
        let key = host.spawn(&format!("spinner-{i}"), None).key;
        host.wake(&sched, &ctx, key).unwrap();
    }

    let shutdown = AtomicBool::new(false);
    std::thread::scope(|s| {
        let runner = s.spawn(|| host.run(&sched, &ctx, &shutdown));
        s.spawn(|| {
            while !shutdown.load(Ordering::Relaxed) {
                serve(&ctx);
                std::thread::sleep(Duration::from_micros(200));
            }
        });

        std::thread::sleep(Duration::from_millis(200));
        shutdown.store(true, Ordering::Relaxed);
        runner.join().unwrap().unwrap();
    });

    let c = ctx.counters();
    assert!(c.sent > 0);
    assert!(c.returned + c.missed <= c.sent, "{c:?}");
    assert_eq!(c.outstanding(), c.sent - c.returned - c.missed);

    sched.exit(&ctx, ExitKind::Normal);
    assert_eq!(ctx.in_flight(), 0);
    assert_eq!(host.attached(), None);
}
