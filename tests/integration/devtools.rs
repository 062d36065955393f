//! Integration tests for the devtools mirror
//!
//! Covers connection, per-action dispatch, time travel, event ordering with
//! slow preparation, taping and the tokio pump.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{json, Value};
use stately::devtools::{ActionRecord, EventPreparer, Tape};
use stately::runtime::event_loop;
use stately::{
    install_extension, uninstall_extension, Inspector, MirrorPhase, ModuleDef, StateRuntime,
    TimeTravelFactory,
};
use tempfile::TempDir;

use super::common::fixtures::{
    counter_def, inspected_runtime, int, plain_runtime, recorded_types, test_config,
};

/// Test that deferred initialization seeds the inspector with every module
#[test]
fn test_deferred_init_seeds_all_modules() {
    let (runtime, factory) = inspected_runtime();
    runtime.register("counter", counter_def()).unwrap();
    runtime
        .register("user", ModuleDef::new().value("name", "ada"))
        .unwrap();
    assert!(factory.last().is_none());

    runtime.run_deferred();

    let inspector = factory.last().unwrap();
    assert_eq!(
        *inspector.get_state(),
        json!({ "counter": { "count": 0 }, "user": { "name": "ada" } })
    );
    assert_eq!(inspector.instance_name(), "stately");
    assert_eq!(runtime.mirror().phase(), MirrorPhase::Connected);
}

/// Test that every dispatch carries the full merged state
#[test]
fn test_dispatched_state_tracks_live_modules() {
    let (runtime, factory) = inspected_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    let user = runtime
        .register("user", ModuleDef::new().value("name", "ada"))
        .unwrap();

    counter.call("increment", &[]).unwrap();
    user.call("setName", &[json!("grace")]).unwrap();

    let inspector = factory.last().unwrap();
    assert_eq!(inspector.history_len(), 3);
    assert_eq!(
        *inspector.state_at(1).unwrap(),
        json!({ "counter": { "count": 1 }, "user": { "name": "ada" } })
    );
    assert_eq!(
        *inspector.get_state(),
        json!({ "counter": { "count": 1 }, "user": { "name": "grace" } })
    );
    assert_eq!(inspector.events()[1]["arg0"], json!("grace"));
}

/// Test that jumping back in the inspector rewrites live state
#[test]
fn test_time_travel_writes_back() {
    let (runtime, factory) = inspected_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    for _ in 0..3 {
        counter.call("increment", &[]).unwrap();
    }

    let inspector = factory.last().unwrap();
    assert!(inspector.jump_to(1));
    assert_eq!(counter.get("count").unwrap(), int(1));

    assert!(inspector.jump_to(0));
    assert_eq!(counter.get("count").unwrap(), int(0));

    // Recording continues from the restored state.
    counter.call("increment", &[]).unwrap();
    assert_eq!(counter.get("count").unwrap(), int(1));
    assert_eq!(*inspector.get_state(), json!({ "counter": { "count": 1 } }));
    assert_eq!(recorded_types(&factory).last().unwrap(), "3: counter.increment");
}

/// Test that time travel wakes reactions once per jump
#[test]
fn test_time_travel_is_one_transaction() {
    let (runtime, factory) = inspected_runtime();
    let pair = runtime
        .register("pair", ModuleDef::new().value("a", 0).value("b", 0))
        .unwrap();
    pair.call("setA", &[int(1)]).unwrap();
    pair.call("setB", &[int(1)]).unwrap();

    let runs = Rc::new(std::cell::Cell::new(0));
    let _handle = runtime.autorun({
        let pair = pair.clone();
        let runs = runs.clone();
        move || {
            let _ = pair.get("a");
            let _ = pair.get("b");
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    factory.last().unwrap().jump_to(0);
    assert_eq!(pair.snapshot(), json!({ "a": 0, "b": 0 }));
    assert_eq!(runs.get(), 2);
}

/// Test that no inspector means Disabled and everything else still works
#[test]
fn test_disabled_without_inspector() {
    let runtime = plain_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    runtime.run_deferred();
    assert_eq!(runtime.mirror().phase(), MirrorPhase::Disabled);

    counter.call("increment", &[]).unwrap();
    assert_eq!(counter.get("count").unwrap(), int(1));
    assert_eq!(runtime.mirror().pending_events(), 0);
}

/// Test that the thread's installed extension is used when nothing is injected
#[test]
fn test_installed_extension_is_discovered() {
    let extension = TimeTravelFactory::new();
    install_extension(extension.clone());

    let runtime = plain_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    counter.call("increment", &[]).unwrap();
    uninstall_extension();

    assert_eq!(runtime.mirror().phase(), MirrorPhase::Connected);
    assert_eq!(recorded_types(&extension), vec!["0: counter.increment"]);
}

/// Test that an injected factory wins over the installed extension
#[test]
fn test_injected_factory_wins() {
    let extension = TimeTravelFactory::new();
    install_extension(extension.clone());

    let (runtime, injected) = inspected_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    counter.call("increment", &[]).unwrap();
    uninstall_extension();

    assert_eq!(extension.created(), 0);
    assert_eq!(injected.created(), 1);
}

/// Preparer whose events wait for a gate when one is queued.
#[derive(Default)]
struct GatedPreparer {
    gates: RefCell<VecDeque<oneshot::Receiver<()>>>,
}

impl GatedPreparer {
    fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.borrow_mut().push_back(rx);
        tx
    }
}

impl EventPreparer for GatedPreparer {
    fn prepare(&self, record: ActionRecord) -> LocalBoxFuture<'static, Value> {
        match self.gates.borrow_mut().pop_front() {
            Some(gate) => async move {
                let _ = gate.await;
                record.to_event()
            }
            .boxed_local(),
            None => futures::future::ready(record.to_event()).boxed_local(),
        }
    }
}

/// Test that a slow event holds back later ones
#[test]
fn test_slow_preparation_keeps_call_order() {
    let factory = TimeTravelFactory::new();
    let preparer = Rc::new(GatedPreparer::default());
    let runtime = StateRuntime::builder()
        .config(test_config())
        .inspector(factory.clone())
        .preparer(preparer.clone())
        .build();
    let counter = runtime.register("counter", counter_def()).unwrap();

    let gate = preparer.gate_next();
    counter.call("increment", &[]).unwrap();
    counter.call("increment", &[]).unwrap();

    assert_eq!(runtime.mirror().pending_events(), 2);
    assert!(recorded_types(&factory).is_empty());

    gate.send(()).unwrap();
    assert_eq!(runtime.mirror().pump(), 2);
    assert_eq!(
        recorded_types(&factory),
        vec!["0: counter.increment", "1: counter.increment"]
    );
    // Each event carries the state captured when it was recorded.
    let inspector = factory.last().unwrap();
    assert_eq!(*inspector.state_at(1).unwrap(), json!({ "counter": { "count": 1 } }));
    assert_eq!(*inspector.state_at(2).unwrap(), json!({ "counter": { "count": 2 } }));
}

/// Test that a configured tape receives every dispatched event
#[test]
fn test_tape_records_events() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tapes").join("events.jsonl");

    let factory = TimeTravelFactory::new();
    let runtime = StateRuntime::builder()
        .config(test_config().with_tape_path(&path))
        .inspector(factory)
        .build();
    let counter = runtime.register("counter", counter_def()).unwrap();
    counter.call("increment", &[]).unwrap();
    counter.call("increment", &[]).unwrap();

    let tape = Tape::read_jsonl_from_path(&path).unwrap();
    assert_eq!(tape.instance_name, "stately");
    assert_eq!(
        tape.signatures(),
        vec!["0: counter.increment", "1: counter.increment"]
    );
    assert_eq!(tape.entries[1].state, json!({ "counter": { "count": 2 } }));
}

/// Future that is pending for a fixed number of polls.
struct Countdown(usize);

impl Future for Countdown {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 == 0 {
            return Poll::Ready(());
        }
        self.0 -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

struct SlowPreparer;

impl EventPreparer for SlowPreparer {
    fn prepare(&self, record: ActionRecord) -> LocalBoxFuture<'static, Value> {
        async move {
            Countdown(3).await;
            record.to_event()
        }
        .boxed_local()
    }
}

/// Test that settle drains slow preparation on a LocalSet
#[tokio::test(flavor = "current_thread")]
async fn test_settle_drains_queue() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let factory = TimeTravelFactory::new();
            let runtime = StateRuntime::builder()
                .config(test_config())
                .inspector(factory.clone())
                .preparer(Rc::new(SlowPreparer))
                .build();
            let counter = runtime.register("counter", counter_def()).unwrap();
            for _ in 0..3 {
                counter.call("increment", &[]).unwrap();
            }
            assert_eq!(runtime.mirror().pending_events(), 3);

            event_loop::settle(&runtime).await;

            assert_eq!(runtime.mirror().pending_events(), 0);
            assert_eq!(recorded_types(&factory).len(), 3);
        })
        .await;
}

/// Test that the spawned pump runs deferred initialization
#[tokio::test(flavor = "current_thread")]
async fn test_pump_runs_deferred_init() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (runtime, factory) = inspected_runtime();
            let pump = event_loop::spawn_pump(runtime.clone(), Duration::from_millis(1));
            runtime.register("counter", counter_def()).unwrap();

            tokio::time::sleep(Duration::from_millis(20)).await;
            pump.abort();

            assert_eq!(runtime.pending_deferred(), 0);
            assert_eq!(runtime.mirror().phase(), MirrorPhase::Connected);
            assert_eq!(factory.created(), 1);
        })
        .await;
}
