//! Single-threaded reference engine.
//!
//! Stands in for an external reactive engine: it is the default behind
//! [`ReactiveEngine`] for the demo binary and tests, and implements only what the
//! module layer consumes.
//!
//! Dependencies are pushed dirty and pulled clean: a write marks dependent memo
//! entries dirty and schedules dependent reactions, memo entries recompute lazily on
//! their next read, and scheduled reactions run once the outermost transaction ends.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::{CellId, Disposer, Effect, MemoFn, ReactiveEngine, Tracked};
use crate::error::{Result, StateError};

/// Reaction runs allowed in one flush before the engine assumes a feedback loop.
const MAX_REACTION_RUNS: usize = 100;

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cell(usize),
    Memo(NodeId),
}

#[derive(Debug)]
struct CellState {
    value: Value,
    observers: BTreeSet<NodeId>,
}

#[derive(Debug)]
enum NodeKind {
    Memo {
        cached: Option<Value>,
        dirty: bool,
        computing: bool,
        observers: BTreeSet<NodeId>,
    },
    Reaction {
        scheduled: bool,
    },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    sources: Vec<Source>,
    alive: bool,
}

#[derive(Debug, Default)]
struct Graph {
    cells: Vec<CellState>,
    nodes: Vec<Node>,
    /// `Some` frames belong to a running derivation, `None` frames are untracked.
    tracking: Vec<Option<NodeId>>,
    batch_depth: usize,
    journals: Vec<Vec<(usize, Value)>>,
    pending: VecDeque<NodeId>,
    flushing: bool,
}

impl Graph {
    fn current_derivation(&self) -> Option<NodeId> {
        self.tracking.last().copied().flatten()
    }

    fn observers_mut(&mut self, source: Source) -> Option<&mut BTreeSet<NodeId>> {
        match source {
            Source::Cell(cell) => self.cells.get_mut(cell).map(|cell| &mut cell.observers),
            Source::Memo(memo) => match self.nodes.get_mut(memo) {
                Some(Node {
                    kind: NodeKind::Memo { observers, .. },
                    ..
                }) => Some(observers),
                _ => None,
            },
        }
    }

    fn link(&mut self, source: Source, observer: NodeId) {
        let Some(node) = self.nodes.get_mut(observer) else {
            return;
        };
        if node.sources.contains(&source) {
            return;
        }
        node.sources.push(source);
        if let Some(observers) = self.observers_mut(source) {
            observers.insert(observer);
        }
    }

    fn unlink_sources(&mut self, id: NodeId) {
        let sources = match self.nodes.get_mut(id) {
            Some(node) => std::mem::take(&mut node.sources),
            None => return,
        };
        for source in sources {
            if let Some(observers) = self.observers_mut(source) {
                observers.remove(&id);
            }
        }
    }

    fn invalidate(&mut self, id: NodeId) {
        let downstream = match self.nodes.get_mut(id) {
            Some(Node {
                kind:
                    NodeKind::Memo {
                        dirty, observers, ..
                    },
                alive: true,
                ..
            }) => {
                if *dirty {
                    return;
                }
                *dirty = true;
                observers.iter().copied().collect::<Vec<_>>()
            }
            Some(Node {
                kind: NodeKind::Reaction { scheduled },
                alive: true,
                ..
            }) => {
                if !*scheduled {
                    *scheduled = true;
                    self.pending.push_back(id);
                }
                return;
            }
            _ => return,
        };
        for observer in downstream {
            self.invalidate(observer);
        }
    }

    /// Store `value` and invalidate observers. Returns false when nothing changed.
    fn store(&mut self, cell: usize, value: Value, journal: bool) -> bool {
        let Some(state) = self.cells.get_mut(cell) else {
            return false;
        };
        if state.value == value {
            return false;
        }
        let old = std::mem::replace(&mut state.value, value);
        let observers: Vec<NodeId> = state.observers.iter().copied().collect();
        if journal {
            if let Some(entries) = self.journals.last_mut() {
                if !entries.iter().any(|(written, _)| *written == cell) {
                    entries.push((cell, old));
                }
            }
        }
        for observer in observers {
            self.invalidate(observer);
        }
        true
    }
}

struct ReactionSlot {
    tracked: RefCell<Tracked>,
    effect: RefCell<Effect>,
    last: RefCell<Option<Value>>,
}

/// Pops one tracking frame when dropped.
struct FrameGuard<'a>(&'a RefCell<Graph>);

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.0.try_borrow_mut() {
            graph.tracking.pop();
        }
    }
}

/// Closes one batch level when dropped, discarding its journal on unwind.
struct BatchGuard<'a> {
    graph: &'a RefCell<Graph>,
    journal_len: usize,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            graph.journals.truncate(self.journal_len);
            graph.batch_depth = graph.batch_depth.saturating_sub(1);
        }
    }
}

struct FlushGuard<'a>(&'a RefCell<Graph>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.0.try_borrow_mut() {
            graph.flushing = false;
        }
    }
}

/// Reference [`ReactiveEngine`] for single-threaded use.
///
/// Memo entries are kept alive for the life of the engine, keyed by the JSON text
/// of their arguments. Failed evaluations are never cached.
pub struct LocalEngine {
    me: Weak<LocalEngine>,
    graph: RefCell<Graph>,
    reactions: RefCell<HashMap<NodeId, Rc<ReactionSlot>>>,
}

impl LocalEngine {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            graph: RefCell::new(Graph::default()),
            reactions: RefCell::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    fn live_reactions(&self) -> usize {
        self.reactions.borrow().len()
    }

    fn enter(&self, frame: Option<NodeId>) -> FrameGuard<'_> {
        self.graph.borrow_mut().tracking.push(frame);
        FrameGuard(&self.graph)
    }

    fn new_node(&self, kind: NodeKind) -> NodeId {
        let mut graph = self.graph.borrow_mut();
        graph.nodes.push(Node {
            kind,
            sources: Vec::new(),
            alive: true,
        });
        graph.nodes.len() - 1
    }

    fn evaluate_memo(&self, id: NodeId, body: &MemoFn, args: &[Value]) -> Result<Value> {
        {
            let mut graph = self.graph.borrow_mut();
            let cached = match graph.nodes.get(id) {
                Some(Node {
                    kind: NodeKind::Memo { computing: true, .. },
                    ..
                }) => return Err(StateError::CyclicDerivation),
                Some(Node {
                    kind:
                        NodeKind::Memo {
                            cached: Some(value),
                            dirty: false,
                            ..
                        },
                    ..
                }) => Some(value.clone()),
                _ => None,
            };
            if let Some(caller) = graph.current_derivation() {
                graph.link(Source::Memo(id), caller);
            }
            if let Some(value) = cached {
                return Ok(value);
            }
            graph.unlink_sources(id);
            if let Some(Node {
                kind: NodeKind::Memo { computing, .. },
                ..
            }) = graph.nodes.get_mut(id)
            {
                *computing = true;
            }
        }

        let result = {
            let _frame = self.enter(Some(id));
            body(args)
        };

        let mut graph = self.graph.borrow_mut();
        if let Some(Node {
            kind:
                NodeKind::Memo {
                    cached,
                    dirty,
                    computing,
                    ..
                },
            ..
        }) = graph.nodes.get_mut(id)
        {
            *computing = false;
            match &result {
                Ok(value) => {
                    *cached = Some(value.clone());
                    *dirty = false;
                }
                Err(_) => {
                    *cached = None;
                    *dirty = true;
                }
            }
        }
        result
    }

    fn run_reaction(&self, id: NodeId, slot: &ReactionSlot) {
        {
            let mut graph = self.graph.borrow_mut();
            match graph.nodes.get_mut(id) {
                Some(Node {
                    kind: NodeKind::Reaction { scheduled },
                    alive: true,
                    ..
                }) => *scheduled = false,
                _ => return,
            }
            graph.unlink_sources(id);
        }

        let value = {
            let _frame = self.enter(Some(id));
            let mut tracked = slot.tracked.borrow_mut();
            (*tracked)()
        };

        let changed = slot.last.borrow().as_ref() != Some(&value);
        *slot.last.borrow_mut() = Some(value.clone());
        if changed {
            self.run_effect(slot, &value);
        }
    }

    fn run_effect(&self, slot: &ReactionSlot, value: &Value) {
        let _frame = self.enter(None);
        let mut effect = slot.effect.borrow_mut();
        (*effect)(value);
    }

    fn flush(&self) {
        {
            let mut graph = self.graph.borrow_mut();
            if graph.batch_depth > 0 || graph.flushing || graph.pending.is_empty() {
                return;
            }
            graph.flushing = true;
        }
        let _flushing = FlushGuard(&self.graph);

        let mut runs = 0usize;
        loop {
            let next = self.graph.borrow_mut().pending.pop_front();
            let Some(id) = next else {
                break;
            };
            runs += 1;
            if runs > MAX_REACTION_RUNS {
                let mut graph = self.graph.borrow_mut();
                tracing::error!(
                    pending = graph.pending.len() + 1,
                    "reactions did not settle after {} runs; dropping pending reactions",
                    MAX_REACTION_RUNS
                );
                for pending in std::mem::take(&mut graph.pending) {
                    if let Some(Node {
                        kind: NodeKind::Reaction { scheduled },
                        ..
                    }) = graph.nodes.get_mut(pending)
                    {
                        *scheduled = false;
                    }
                }
                break;
            }
            let slot = self.reactions.borrow().get(&id).cloned();
            if let Some(slot) = slot {
                self.run_reaction(id, &slot);
            }
        }
    }

    fn dispose_reaction(&self, id: NodeId) {
        {
            let mut graph = self.graph.borrow_mut();
            graph.unlink_sources(id);
            if let Some(node) = graph.nodes.get_mut(id) {
                node.alive = false;
            }
        }
        self.reactions.borrow_mut().remove(&id);
    }
}

impl ReactiveEngine for LocalEngine {
    fn observable(&self, initial: Value) -> CellId {
        let mut graph = self.graph.borrow_mut();
        graph.cells.push(CellState {
            value: initial,
            observers: BTreeSet::new(),
        });
        CellId::from_raw(graph.cells.len() - 1)
    }

    fn read(&self, cell: CellId) -> Value {
        let mut graph = self.graph.borrow_mut();
        if let Some(observer) = graph.current_derivation() {
            graph.link(Source::Cell(cell.index()), observer);
        }
        graph
            .cells
            .get(cell.index())
            .map(|state| state.value.clone())
            .unwrap_or(Value::Null)
    }

    fn peek(&self, cell: CellId) -> Value {
        self.graph
            .borrow()
            .cells
            .get(cell.index())
            .map(|state| state.value.clone())
            .unwrap_or(Value::Null)
    }

    fn write(&self, cell: CellId, value: Value) {
        let changed = self.graph.borrow_mut().store(cell.index(), value, true);
        if changed {
            self.flush();
        }
    }

    fn transaction(&self, body: &mut dyn FnMut() -> Result<Value>) -> Result<Value> {
        let journal_len = {
            let mut graph = self.graph.borrow_mut();
            graph.batch_depth += 1;
            graph.journals.push(Vec::new());
            graph.journals.len() - 1
        };
        let batch = BatchGuard {
            graph: &self.graph,
            journal_len,
        };

        let result = {
            let _untracked = self.enter(None);
            body()
        };

        {
            let mut graph = self.graph.borrow_mut();
            let journal = graph.journals.pop().unwrap_or_default();
            if result.is_err() {
                tracing::debug!(cells = journal.len(), "rolling back failed transaction");
                for (cell, old) in journal.into_iter().rev() {
                    graph.store(cell, old, false);
                }
            } else if let Some(parent) = graph.journals.last_mut() {
                for (cell, old) in journal {
                    if !parent.iter().any(|(written, _)| *written == cell) {
                        parent.push((cell, old));
                    }
                }
            }
        }
        drop(batch);

        self.flush();
        result
    }

    fn memoize(&self, body: MemoFn) -> MemoFn {
        let engine = self.me.clone();
        let entries: RefCell<HashMap<String, NodeId>> = RefCell::new(HashMap::new());
        Rc::new(move |args: &[Value]| {
            let Some(engine) = engine.upgrade() else {
                return body(args);
            };
            let key = serde_json::to_string(args)?;
            let existing = entries.borrow().get(&key).copied();
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = engine.new_node(NodeKind::Memo {
                        cached: None,
                        dirty: true,
                        computing: false,
                        observers: BTreeSet::new(),
                    });
                    entries.borrow_mut().insert(key, id);
                    id
                }
            };
            engine.evaluate_memo(id, &body, args)
        })
    }

    fn is_inside_derivation_context(&self) -> bool {
        self.graph.borrow().current_derivation().is_some()
    }

    fn reaction(&self, tracked: Tracked, effect: Effect, fire_immediately: bool) -> Disposer {
        let id = self.new_node(NodeKind::Reaction { scheduled: false });
        let slot = Rc::new(ReactionSlot {
            tracked: RefCell::new(tracked),
            effect: RefCell::new(effect),
            last: RefCell::new(None),
        });
        self.reactions.borrow_mut().insert(id, slot.clone());

        let value = {
            let _frame = self.enter(Some(id));
            let mut tracked = slot.tracked.borrow_mut();
            (*tracked)()
        };
        *slot.last.borrow_mut() = Some(value.clone());
        if fire_immediately {
            self.run_effect(&slot, &value);
        }

        let engine = self.me.clone();
        Disposer::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.dispose_reaction(id);
            }
        })
    }

    fn untracked(&self, body: &mut dyn FnMut() -> Result<Value>) -> Result<Value> {
        let _frame = self.enter(None);
        body()
    }
}
