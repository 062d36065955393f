//! Runtime and module fixtures

use std::rc::Rc;

use serde_json::{json, Value};
use stately::{Config, ModuleDef, RuntimeEnv, StateRuntime, TimeTravelFactory};

/// Config for tests: quiet diagnostics, call sites off so events compare exactly.
pub fn test_config() -> Config {
    let mut config = Config::default().with_env(RuntimeEnv::Test);
    config.devtools.capture_call_sites = false;
    config
}

/// A runtime connected to a fresh time-travel inspector factory.
pub fn inspected_runtime() -> (StateRuntime, Rc<TimeTravelFactory>) {
    let factory = TimeTravelFactory::new();
    let runtime = StateRuntime::builder()
        .config(test_config())
        .inspector(factory.clone())
        .build();
    (runtime, factory)
}

/// A runtime with no inspector reachable.
pub fn plain_runtime() -> StateRuntime {
    StateRuntime::new(test_config())
}

/// `{ count: 0, increment() }`
pub fn counter_def() -> ModuleDef {
    ModuleDef::new().value("count", 0).method("increment", |m, _| {
        let count: i64 = m.get_as("count")?;
        m.set("count", count + 1)?;
        Ok(Value::Null)
    })
}

/// Signatures of every event the last created inspector has seen.
pub fn recorded_types(factory: &TimeTravelFactory) -> Vec<String> {
    factory
        .last()
        .map(|inspector| {
            inspector
                .events()
                .iter()
                .filter_map(|event| event["type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn int(value: i64) -> Value {
    json!(value)
}
