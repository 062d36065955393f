//! Named reactive state modules with recorded actions, memoized derivations and
//! a time-travel devtools mirror.

pub mod config;
pub mod devtools;
pub mod engine;
pub mod error;
pub mod module;
pub mod runtime;
pub mod util;

pub use config::{Config, DevtoolsConfig, RuntimeEnv};
pub use devtools::{
    install_extension, uninstall_extension, ActionRecord, DevToolsMirror, Inspector,
    InspectorFactory, MirrorPhase, TimeTravelFactory, TimeTravelInspector,
};
pub use engine::{LocalEngine, ReactiveEngine};
pub use error::{Result, StateError};
pub use module::{FieldKind, MethodKind, Module, ModuleDef};
pub use runtime::{
    Derived, MemoizedFn, MemoizedSet, ReactionHandle, RuntimeBuilder, StateRuntime,
};
