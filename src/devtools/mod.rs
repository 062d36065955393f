//! Devtools mirroring: action events, the inspector contract and the mirror
//! that keeps an inspector in step with live modules.

mod event;
mod inspector;
mod mirror;
mod tape;

pub use event::{ActionEvent, ActionRecord, CallSite, EventPreparer, ImmediatePreparer};
pub use inspector::{
    extension, install_extension, uninstall_extension, HistoryEntry, Inspector, InspectorFactory,
    InspectorState, Listener, Reducer, TimeTravelFactory, TimeTravelInspector,
};
pub use mirror::{DevToolsMirror, MirrorPhase, TimeTravelHook};
pub use tape::{Tape, TapeEntry, TapeFactory, TapeInspector, TapeWriter, TAPE_SCHEMA_VERSION};
