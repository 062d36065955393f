//! Reactive engine contract.
//!
//! Modules never track dependencies themselves. Every observable field lives in a
//! cell owned by a [`ReactiveEngine`], which also supplies batching transactions,
//! memoized pure computations and reactions. The engine is injected into the
//! runtime as `Rc<dyn ReactiveEngine>`, so dispatch can be exercised against a fake.
//!
//! [`LocalEngine`] is the single-threaded reference implementation used by default.

mod local;

pub use local::LocalEngine;

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::Result;

/// A memoized (or memoizable) computation over reactive state.
pub type MemoFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// Tracked half of a reaction. Every cell it reads becomes a dependency.
pub type Tracked = Box<dyn FnMut() -> Value>;

/// Effect half of a reaction, run untracked with the latest tracked value.
pub type Effect = Box<dyn FnMut(&Value)>;

/// Handle to an observable cell inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(usize);

impl CellId {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Operations the module layer consumes from a reactive engine.
pub trait ReactiveEngine {
    /// Allocate an observable cell holding `initial`.
    fn observable(&self, initial: Value) -> CellId;

    /// Read a cell, registering it as a dependency of the running derivation.
    fn read(&self, cell: CellId) -> Value;

    /// Read a cell without registering a dependency.
    fn peek(&self, cell: CellId) -> Value;

    /// Write a cell, invalidating everything that depends on it.
    fn write(&self, cell: CellId, value: Value);

    /// Run `body` as one mutation transaction. Reactions are deferred until the
    /// outermost transaction ends; a failing body aborts per the engine's rules.
    fn transaction(&self, body: &mut dyn FnMut() -> Result<Value>) -> Result<Value>;

    /// Wrap a pure computation so repeated calls with the same arguments and
    /// unchanged inputs reuse the cached result.
    fn memoize(&self, body: MemoFn) -> MemoFn;

    /// True while a memoized computation or a reaction's tracked function runs.
    fn is_inside_derivation_context(&self) -> bool;

    /// Run `tracked` now and whenever its inputs change; `effect` sees each new value.
    fn reaction(&self, tracked: Tracked, effect: Effect, fire_immediately: bool) -> Disposer;

    /// Run `body` with dependency tracking suspended.
    fn untracked(&self, body: &mut dyn FnMut() -> Result<Value>) -> Result<Value>;
}

/// Stops a reaction when disposed. Dropping a `Disposer` leaves the reaction running.
pub struct Disposer {
    dispose: Option<Box<dyn FnOnce()>>,
}

impl Disposer {
    pub fn new(dispose: impl FnOnce() + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A disposer that does nothing, for engines without live reactions.
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.dispose.is_some())
            .finish()
    }
}
