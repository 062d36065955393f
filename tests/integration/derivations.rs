//! Integration tests for memoized derivations and reactions

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::common::fixtures::{counter_def, inspected_runtime, int, plain_runtime, recorded_types};
use serde_json::{json, Value};
use stately::{ModuleDef, StateError};

fn doubling_def(computes: Rc<Cell<usize>>) -> ModuleDef {
    ModuleDef::new()
        .value("v", 1)
        .derivation("doubleV", move |m, _| {
            computes.set(computes.get() + 1);
            Ok(json!(m.get_as::<i64>("v")? * 2))
        })
        .method("octupleV", |m, _| {
            let a = m.call("doubleV", &[])?.as_i64().unwrap_or(0);
            let b = m.call("doubleV", &[])?.as_i64().unwrap_or(0);
            Ok(json!((a + b) * 2))
        })
}

/// Test that a derivation recomputes once per distinct input value
#[test]
fn test_memoization_law() {
    let runtime = plain_runtime();
    let computes = Rc::new(Cell::new(0));
    let module = runtime.register("calc", doubling_def(computes.clone())).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let handle = runtime.reactively(
        {
            let module = module.clone();
            move || module.call("octupleV", &[]).unwrap_or(Value::Null)
        },
        {
            let seen = seen.clone();
            move |value: &Value| seen.borrow_mut().push(value.clone())
        },
    );
    assert_eq!(computes.get(), 1);

    module.call("setV", &[int(2)]).unwrap();
    assert_eq!(computes.get(), 2);

    // Reused outside the reaction while the input is unchanged.
    assert_eq!(module.call("doubleV", &[]).unwrap(), int(4));
    assert_eq!(module.call("doubleV", &[]).unwrap(), int(4));
    assert_eq!(computes.get(), 2);

    // Writing the same value is not a change.
    module.call("setV", &[int(2)]).unwrap();
    assert_eq!(computes.get(), 2);

    assert_eq!(*seen.borrow(), vec![int(8), int(16)]);
    handle.end();
}

/// Test that each action causes exactly one reaction re-run
#[test]
fn test_one_reaction_run_per_action() {
    let (runtime, factory) = inspected_runtime();
    let module = runtime
        .register(
            "pair",
            ModuleDef::new()
                .value("a", 0)
                .value("b", 0)
                .method("bump", |m, _| {
                    let a: i64 = m.get_as("a")?;
                    let b: i64 = m.get_as("b")?;
                    m.set("a", a + 1)?;
                    m.set("b", b + 1)?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    let runs = Rc::new(Cell::new(0));
    let _handle = runtime.autorun({
        let module = module.clone();
        let runs = runs.clone();
        move || {
            let _ = module.get("a");
            let _ = module.get("b");
            runs.set(runs.get() + 1);
        }
    });

    for _ in 0..3 {
        module.call("bump", &[]).unwrap();
    }
    assert_eq!(runs.get(), 4);
    assert_eq!(recorded_types(&factory).len(), 3);
}

/// Test that derivation calls are never recorded and consume no ids
#[test]
fn test_derivations_are_not_recorded() {
    let (runtime, factory) = inspected_runtime();
    let computes = Rc::new(Cell::new(0));
    let module = runtime.register("calc", doubling_def(computes)).unwrap();

    let derived = runtime.derived({
        let module = module.clone();
        move |_| module.call("octupleV", &[])
    });
    assert_eq!(derived.get().unwrap(), int(8));
    assert_eq!(module.call("doubleV", &[]).unwrap(), int(2));

    module.call("setV", &[int(5)]).unwrap();
    assert_eq!(derived.get().unwrap(), int(40));
    assert_eq!(recorded_types(&factory), vec!["0: calc.setV"]);
}

/// Test that a declared action cannot run inside a derivation
#[test]
fn test_action_inside_derivation_is_rejected() {
    let runtime = plain_runtime();
    let module = runtime
        .register(
            "log",
            ModuleDef::new()
                .value("lines", json!([]))
                .action("clear", |m, _| {
                    m.set("lines", json!([]))?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    let derived = runtime.derived({
        let module = module.clone();
        move |_| module.call("clear", &[])
    });
    assert!(matches!(
        derived.get(),
        Err(StateError::ActionInDerivation { .. })
    ));
    assert!(module.call("clear", &[]).is_ok());
    assert!(runtime.provenance().is_empty());
}

/// Test that reassigning a method invalidates derivations that used it
#[test]
fn test_assigned_method_invalidates_derivation() {
    let runtime = plain_runtime();
    let module = runtime
        .register(
            "box",
            ModuleDef::new()
                .method("_z", |_, _| Ok(json!(123)))
                .method("z", |m, _| m.call("_z", &[]))
                .method("setZ", |m, args| {
                    let v = args.first().cloned().unwrap_or(Value::Null);
                    m.assign_method("_z", move |_, _| Ok(v.clone()))?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    let derived = runtime.derived({
        let module = module.clone();
        move |_| module.call("z", &[])
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _handle = runtime.reactively(
        {
            let derived = derived.clone();
            move || derived.get().unwrap_or(Value::Null)
        },
        {
            let seen = seen.clone();
            move |value: &Value| seen.borrow_mut().push(value.clone())
        },
    );

    module.call("setZ", &[int(321)]).unwrap();
    assert_eq!(*seen.borrow(), vec![int(123), int(321)]);
}

/// Test that memoized results are published on their module
#[test]
fn test_memoized_results_module() {
    let (runtime, factory) = inspected_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();
    let set = runtime
        .memoized(
            "stats",
            vec![(
                "parity".to_string(),
                stately::MemoizedFn::zero_arg({
                    let counter = counter.clone();
                    move || {
                        let count: i64 = counter.get_as("count")?;
                        Ok(json!(if count % 2 == 0 { "even" } else { "odd" }))
                    }
                }),
            )],
        )
        .unwrap();

    runtime.run_deferred();
    counter.call("increment", &[]).unwrap();
    runtime.run_deferred();

    assert_eq!(
        set.module().get("zeroParamResults").unwrap(),
        json!({ "parity": "odd" })
    );
    assert_eq!(
        recorded_types(&factory),
        vec!["0: stats.setResults", "1: counter.increment", "2: stats.setResults"]
    );
    // Published while `counter.increment` was in flight.
    assert_eq!(
        set.module().get("lastUpdateStack").unwrap(),
        json!(["1: counter.increment"])
    );
}
