//! Inspector contract, the extension hook, and an in-process time-travel inspector.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

/// Materialized inspector state. Identity (`Rc::ptr_eq`) tells the mirror whether
/// the inspector is showing the state it dispatched or a historical one.
pub type InspectorState = Rc<Value>;

/// Computes the next state from the current one and a dispatched event.
pub type Reducer = Rc<dyn Fn(&InspectorState, &Value) -> InspectorState>;

pub type Listener = Rc<dyn Fn()>;

/// Store-like handle to an external inspector.
pub trait Inspector {
    fn dispatch(&self, event: &Value);
    fn subscribe(&self, listener: Listener);
    fn get_state(&self) -> InspectorState;
}

/// Connects a new inspector store seeded with `initial`.
pub trait InspectorFactory {
    fn create(
        &self,
        reducer: Reducer,
        initial: InspectorState,
        instance_name: &str,
    ) -> Rc<dyn Inspector>;
}

thread_local! {
    static EXTENSION: RefCell<Option<Rc<dyn InspectorFactory>>> = const { RefCell::new(None) };
}

/// Make an inspector reachable to every runtime on this thread that was not
/// given one explicitly.
pub fn install_extension(factory: Rc<dyn InspectorFactory>) {
    EXTENSION.with(|slot| *slot.borrow_mut() = Some(factory));
}

pub fn uninstall_extension() {
    EXTENSION.with(|slot| slot.borrow_mut().take());
}

/// The installed extension, if any. Absence is normal.
pub fn extension() -> Option<Rc<dyn InspectorFactory>> {
    EXTENSION.with(|slot| slot.borrow().clone())
}

/// One step of inspector history. The first entry is the seeded state.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub event: Option<Value>,
    pub state: InspectorState,
}

/// Append-only event log with jump-to-state.
pub struct TimeTravelInspector {
    instance_name: String,
    reducer: Reducer,
    current: RefCell<InspectorState>,
    history: RefCell<Vec<HistoryEntry>>,
    listeners: RefCell<Vec<Listener>>,
}

impl TimeTravelInspector {
    pub fn new(reducer: Reducer, initial: InspectorState, instance_name: &str) -> Rc<Self> {
        Rc::new(Self {
            instance_name: instance_name.to_string(),
            reducer,
            current: RefCell::new(initial.clone()),
            history: RefCell::new(vec![HistoryEntry {
                event: None,
                state: initial,
            }]),
            listeners: RefCell::new(Vec::new()),
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Entries in the log, including the seeded state.
    pub fn history_len(&self) -> usize {
        self.history.borrow().len()
    }

    /// Dispatched events in order.
    pub fn events(&self) -> Vec<Value> {
        self.history
            .borrow()
            .iter()
            .filter_map(|entry| entry.event.clone())
            .collect()
    }

    pub fn state_at(&self, index: usize) -> Option<InspectorState> {
        self.history.borrow().get(index).map(|entry| entry.state.clone())
    }

    /// Materialize the state recorded at `index` and notify subscribers.
    /// Returns false when the index is out of range.
    pub fn jump_to(&self, index: usize) -> bool {
        let Some(state) = self.state_at(index) else {
            return false;
        };
        *self.current.borrow_mut() = state;
        self.notify();
        true
    }

    fn notify(&self) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }
}

impl Inspector for TimeTravelInspector {
    fn dispatch(&self, event: &Value) {
        let current = self.current.borrow().clone();
        let next = (self.reducer)(&current, event);
        *self.current.borrow_mut() = next.clone();
        self.history.borrow_mut().push(HistoryEntry {
            event: Some(event.clone()),
            state: next,
        });
        self.notify();
    }

    fn subscribe(&self, listener: Listener) {
        self.listeners.borrow_mut().push(listener);
    }

    fn get_state(&self) -> InspectorState {
        self.current.borrow().clone()
    }
}

/// Creates [`TimeTravelInspector`]s and keeps them reachable for inspection.
#[derive(Default)]
pub struct TimeTravelFactory {
    created: RefCell<Vec<Rc<TimeTravelInspector>>>,
}

impl TimeTravelFactory {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// The most recently created inspector.
    pub fn last(&self) -> Option<Rc<TimeTravelInspector>> {
        self.created.borrow().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.created.borrow().len()
    }
}

impl InspectorFactory for TimeTravelFactory {
    fn create(
        &self,
        reducer: Reducer,
        initial: InspectorState,
        instance_name: &str,
    ) -> Rc<dyn Inspector> {
        let inspector = TimeTravelInspector::new(reducer, initial, instance_name);
        self.created.borrow_mut().push(inspector.clone());
        inspector
    }
}
