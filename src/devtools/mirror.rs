//! Mirror of every module's state into a time-travel inspector.
//!
//! The mirror starts `Uninitialized` and resolves exactly once, to `Connected`
//! when an inspector factory is reachable and to `Disabled` otherwise. Once
//! connected it dispatches one event per recorded action, carrying only the
//! modules whose JSON fingerprint changed since the previous dispatch, and it
//! writes inspector-selected historical states back into live modules.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesOrdered, StreamExt};
use futures::task::noop_waker_ref;
use serde_json::{Map, Value};

use super::event::{ActionRecord, EventPreparer, ImmediatePreparer};
use super::inspector::{self, Inspector, InspectorFactory, InspectorState, Reducer};
use super::tape::TapeFactory;
use crate::config::{Config, RuntimeEnv};
use crate::module::Module;

/// Called with the inspector's state when it moves to a state the mirror did not dispatch.
pub type TimeTravelHook = Rc<dyn Fn(&Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorPhase {
    Uninitialized,
    Connected,
    Disabled,
}

enum Phase {
    Uninitialized,
    Connected(Rc<dyn Inspector>),
    Disabled,
}

/// Last serialized form of one module.
struct Fingerprint {
    json: String,
    value: Value,
}

struct PendingDispatch {
    event: Value,
    state: InspectorState,
}

struct MirrorState {
    phase: Phase,
    snapshots: BTreeMap<String, Fingerprint>,
    last_logged: BTreeMap<String, String>,
    /// Merge base for the next dispatch.
    latest: InspectorState,
    /// State handed to the inspector by the most recent dispatch.
    dispatched: InspectorState,
}

struct MirrorShared {
    enabled: bool,
    quiet: bool,
    instance_name: String,
    tape_path: Option<PathBuf>,
    factory: Option<Rc<dyn InspectorFactory>>,
    preparer: Rc<dyn EventPreparer>,
    state: RefCell<MirrorState>,
    queue: RefCell<FuturesOrdered<LocalBoxFuture<'static, PendingDispatch>>>,
}

/// Devtools mirror owned by a runtime.
pub struct DevToolsMirror {
    shared: Rc<MirrorShared>,
}

impl DevToolsMirror {
    pub fn new(
        config: &Config,
        factory: Option<Rc<dyn InspectorFactory>>,
        preparer: Option<Rc<dyn EventPreparer>>,
    ) -> Self {
        let empty: InspectorState = Rc::new(Value::Object(Map::new()));
        Self {
            shared: Rc::new(MirrorShared {
                enabled: config.devtools.enabled,
                quiet: config.env == RuntimeEnv::Test,
                instance_name: config.devtools.instance_name.clone(),
                tape_path: config.devtools.tape_path.clone(),
                factory,
                preparer: preparer.unwrap_or_else(|| Rc::new(ImmediatePreparer)),
                state: RefCell::new(MirrorState {
                    phase: Phase::Uninitialized,
                    snapshots: BTreeMap::new(),
                    last_logged: BTreeMap::new(),
                    latest: empty.clone(),
                    dispatched: empty,
                }),
                queue: RefCell::new(FuturesOrdered::new()),
            }),
        }
    }

    pub fn phase(&self) -> MirrorPhase {
        match self.shared.state.borrow().phase {
            Phase::Uninitialized => MirrorPhase::Uninitialized,
            Phase::Connected(_) => MirrorPhase::Connected,
            Phase::Disabled => MirrorPhase::Disabled,
        }
    }

    pub fn inspector(&self) -> Option<Rc<dyn Inspector>> {
        match &self.shared.state.borrow().phase {
            Phase::Connected(inspector) => Some(inspector.clone()),
            _ => None,
        }
    }

    /// Events recorded but not yet dispatched.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    /// State carried by the most recent dispatch (or the seeded state).
    pub fn dispatched_state(&self) -> InspectorState {
        self.shared.state.borrow().dispatched.clone()
    }

    /// Refresh the cached fingerprint of one module.
    pub fn note_module(&self, module: &Module) {
        let value = module.snapshot();
        let json = match serde_json::to_string(&value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(module = %module.name(), error = %e, "Failed to serialize module snapshot");
                return;
            }
        };
        self.shared
            .state
            .borrow_mut()
            .snapshots
            .insert(module.name().to_string(), Fingerprint { json, value });
    }

    /// Resolve the phase if it is still undecided. Safe to call any number of times.
    pub fn initialize(&self, modules: &[Module], on_time_travel: TimeTravelHook) {
        if !matches!(self.shared.state.borrow().phase, Phase::Uninitialized) {
            return;
        }

        if !self.shared.enabled {
            tracing::debug!("devtools mirroring disabled by configuration");
            self.shared.state.borrow_mut().phase = Phase::Disabled;
            return;
        }

        let Some(factory) = self.shared.factory.clone().or_else(inspector::extension) else {
            self.shared.state.borrow_mut().phase = Phase::Disabled;
            if !self.shared.quiet {
                tracing::error!("no devtools inspector installed; install one to see application state");
            }
            return;
        };
        let factory: Rc<dyn InspectorFactory> = match &self.shared.tape_path {
            Some(path) => Rc::new(TapeFactory::new(factory, path.clone())),
            None => factory,
        };

        for module in modules {
            self.note_module(module);
        }
        let initial = self.prep_for_logging();
        self.shared.state.borrow_mut().dispatched = initial.clone();

        let reducer: Reducer = {
            let shared = Rc::downgrade(&self.shared);
            Rc::new(move |current: &InspectorState, _event: &Value| match shared.upgrade() {
                Some(shared) => shared.state.borrow().dispatched.clone(),
                None => current.clone(),
            })
        };
        let inspector = factory.create(reducer, initial, &self.shared.instance_name);
        self.shared.state.borrow_mut().phase = Phase::Connected(inspector.clone());
        inspector.subscribe(listener(Rc::downgrade(&self.shared), on_time_travel));

        tracing::debug!(
            instance = %self.shared.instance_name,
            modules = modules.len(),
            "devtools mirror connected"
        );
    }

    /// Queue `record` for dispatch together with the merged state of every module
    /// whose fingerprint changed, then dispatch whatever is ready.
    pub fn record(&self, record: ActionRecord, modules: &[Module]) {
        if !matches!(self.shared.state.borrow().phase, Phase::Connected(_)) {
            return;
        }
        for module in modules {
            self.note_module(module);
        }
        let state = self.prep_for_logging();
        let prepared = self.shared.preparer.prepare(record);
        self.shared
            .queue
            .borrow_mut()
            .push_back(prepared.map(move |event| PendingDispatch { event, state }).boxed_local());
        self.pump();
    }

    /// Dispatch every prepared event at the head of the queue. A later event never
    /// overtakes an earlier one that is still preparing. Returns the number dispatched.
    pub fn pump(&self) -> usize {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut dispatched = 0;
        loop {
            let ready = {
                let Ok(mut queue) = self.shared.queue.try_borrow_mut() else {
                    break;
                };
                match queue.poll_next_unpin(&mut cx) {
                    Poll::Ready(Some(pending)) => pending,
                    _ => break,
                }
            };
            self.dispatch(ready);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch(&self, pending: PendingDispatch) {
        let inspector = {
            let mut state = self.shared.state.borrow_mut();
            let Phase::Connected(inspector) = &state.phase else {
                return;
            };
            let inspector = inspector.clone();
            state.dispatched = pending.state;
            inspector
        };
        inspector.dispatch(&pending.event);
    }

    /// Fold changed fingerprints into a fresh merge state. Always returns a new
    /// allocation so the inspector sees a change of identity.
    fn prep_for_logging(&self) -> InspectorState {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;

        let mut merged = state.latest.as_object().cloned().unwrap_or_default();
        let mut changed = 0usize;
        for (name, fingerprint) in &state.snapshots {
            if state.last_logged.get(name) != Some(&fingerprint.json) {
                merged.insert(name.clone(), fingerprint.value.clone());
                changed += 1;
            }
        }
        state.last_logged = state
            .snapshots
            .iter()
            .map(|(name, fingerprint)| (name.clone(), fingerprint.json.clone()))
            .collect();
        tracing::trace!(changed, "prepared mirrored state");

        state.latest = Rc::new(Value::Object(merged));
        state.latest.clone()
    }
}

fn listener(shared: Weak<MirrorShared>, on_time_travel: TimeTravelHook) -> inspector::Listener {
    Rc::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let (inspector, dispatched) = {
            let state = shared.state.borrow();
            match &state.phase {
                Phase::Connected(inspector) => (inspector.clone(), state.dispatched.clone()),
                _ => return,
            }
        };
        let current = inspector.get_state();
        if Rc::ptr_eq(&current, &dispatched) {
            return;
        }
        tracing::debug!("inspector moved to another state; replaying into live modules");
        on_time_travel(&current);
    })
}
