//! The process-scoped context every module is registered into.
//!
//! A [`StateRuntime`] owns the module registry, the provenance stack, the
//! global action counter, the deferred task queue and the devtools mirror.
//! Several runtimes can coexist (tests create one each); nothing here is a
//! true global.

mod deferred;
pub mod event_loop;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{json, Map, Value};

use self::deferred::DeferredQueue;
use crate::config::Config;
use crate::devtools::{ActionRecord, DevToolsMirror, EventPreparer, InspectorFactory};
use crate::engine::{Disposer, LocalEngine, MemoFn, ReactiveEngine};
use crate::error::{Result, StateError};
use crate::module::{add_value_setters_where_none_exist, FieldKind, Module, ModuleDef, ProvenanceStack};

#[derive(Default)]
struct Registry {
    modules: Vec<Module>,
    by_name: HashMap<String, usize>,
}

pub(crate) struct RuntimeInner {
    config: Config,
    engine: Rc<dyn ReactiveEngine>,
    registry: RefCell<Registry>,
    provenance: ProvenanceStack,
    next_action_id: Cell<u64>,
    anonymous: Cell<u64>,
    deferred: DeferredQueue,
    mirror: DevToolsMirror,
    init_scheduled: Cell<bool>,
}

/// Handle to a runtime. Clones share the same registry.
#[derive(Clone)]
pub struct StateRuntime {
    inner: Rc<RuntimeInner>,
}

/// Builds a [`StateRuntime`] with injected collaborators.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    engine: Option<Rc<dyn ReactiveEngine>>,
    inspector: Option<Rc<dyn InspectorFactory>>,
    preparer: Option<Rc<dyn EventPreparer>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Reactive engine to use instead of a fresh [`LocalEngine`].
    pub fn engine(mut self, engine: Rc<dyn ReactiveEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Inspector factory used in preference to the thread's installed extension.
    pub fn inspector(mut self, factory: Rc<dyn InspectorFactory>) -> Self {
        self.inspector = Some(factory);
        self
    }

    pub fn preparer(mut self, preparer: Rc<dyn EventPreparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    pub fn build(self) -> StateRuntime {
        let config = self.config.unwrap_or_default();
        let engine = self.engine.unwrap_or_else(|| {
            let engine: Rc<dyn ReactiveEngine> = LocalEngine::new();
            engine
        });
        let mirror = DevToolsMirror::new(&config, self.inspector, self.preparer);
        StateRuntime {
            inner: Rc::new(RuntimeInner {
                config,
                engine,
                registry: RefCell::new(Registry::default()),
                provenance: ProvenanceStack::new(),
                next_action_id: Cell::new(0),
                anonymous: Cell::new(0),
                deferred: DeferredQueue::default(),
                mirror,
                init_scheduled: Cell::new(false),
            }),
        }
    }
}

impl Default for StateRuntime {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StateRuntime {
    pub fn new(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn engine(&self) -> &Rc<dyn ReactiveEngine> {
        &self.inner.engine
    }

    pub fn provenance(&self) -> &ProvenanceStack {
        &self.inner.provenance
    }

    pub fn mirror(&self) -> &DevToolsMirror {
        &self.inner.mirror
    }

    /// Register `def` under `name`.
    ///
    /// Fails with [`StateError::DuplicateModule`] before touching any state when
    /// the name is taken. Otherwise synthesizes setters, makes every value field
    /// observable, stores the module and hands it to the mirror.
    pub fn register(&self, name: impl Into<String>, def: ModuleDef) -> Result<Module> {
        let name = name.into();
        if self.inner.registry.borrow().by_name.contains_key(&name) {
            return Err(StateError::DuplicateModule(name));
        }

        let (def, setters) = add_value_setters_where_none_exist(def);
        let module = Module::build(name.clone(), def, self.downgrade(), self.inner.engine.clone());

        {
            let mut registry = self.inner.registry.borrow_mut();
            let position = registry.modules.len();
            registry.modules.push(module.clone());
            registry.by_name.insert(name.clone(), position);
        }
        self.inner.mirror.note_module(&module);
        self.schedule_mirror_init();

        tracing::debug!(module = %name, setters = ?setters, "registered state module");
        Ok(module)
    }

    /// Register under a generated `<PREFIX#n>` name.
    pub fn register_anonymous(&self, def: ModuleDef) -> Result<Module> {
        let n = self.inner.anonymous.get() + 1;
        self.inner.anonymous.set(n);
        let name = format!("<{}#{}>", self.inner.config.anonymous_prefix, n);
        self.register(name, def)
    }

    pub fn module(&self, name: &str) -> Result<Module> {
        let registry = self.inner.registry.borrow();
        registry
            .by_name
            .get(name)
            .and_then(|&position| registry.modules.get(position))
            .cloned()
            .ok_or_else(|| StateError::UnknownModule(name.to_string()))
    }

    /// Every registered module, in registration order.
    pub fn modules(&self) -> Vec<Module> {
        self.inner.registry.borrow().modules.clone()
    }

    /// Allocate the next action id. Ids are never reused, even by failed actions.
    pub(crate) fn next_action_id(&self) -> u64 {
        let id = self.inner.next_action_id.get();
        self.inner.next_action_id.set(id + 1);
        id
    }

    fn schedule_mirror_init(&self) {
        if self.inner.init_scheduled.replace(true) {
            return;
        }
        let runtime = self.downgrade();
        self.defer(move || {
            if let Some(inner) = runtime.upgrade() {
                StateRuntime::from_inner(inner).ensure_mirror_initialized();
            }
        });
    }

    /// Connect or disable the mirror if that has not happened yet.
    pub fn ensure_mirror_initialized(&self) {
        let runtime = self.downgrade();
        let hook = Rc::new(move |state: &Value| {
            if let Some(inner) = runtime.upgrade() {
                StateRuntime::from_inner(inner).apply_time_travel(state);
            }
        });
        self.inner.mirror.initialize(&self.modules(), hook);
    }

    pub(crate) fn record_action(&self, record: ActionRecord) {
        tracing::trace!(signature = %record.signature, "recording action");
        self.inner.mirror.record(record, &self.modules());
    }

    /// Write an inspector-selected state back into live modules in one transaction.
    /// Only value fields are written; anything else in the state is skipped.
    fn apply_time_travel(&self, state: &Value) {
        let Some(entries) = state.as_object() else {
            return;
        };
        let result = self.inner.engine.transaction(&mut || {
            for (name, fields) in entries {
                let Ok(module) = self.module(name) else {
                    continue;
                };
                let Some(fields) = fields.as_object() else {
                    continue;
                };
                for (field, value) in fields {
                    if module.field_kind(field) == Some(FieldKind::Value) {
                        module.set(field, value.clone())?;
                    } else {
                        tracing::warn!(module = %name, field = %field, "Skipping non-value field during time travel");
                    }
                }
            }
            Ok(Value::Null)
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to replay inspector state");
        }
    }

    /// Queue work to run on the next [`StateRuntime::run_deferred`].
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.deferred.push(task);
    }

    /// Run the deferred tasks queued so far. Returns how many ran.
    pub fn run_deferred(&self) -> usize {
        self.inner.deferred.drain()
    }

    pub fn pending_deferred(&self) -> usize {
        self.inner.deferred.len()
    }

    /// Run `f` as one transaction without recording an action.
    pub fn run_in_action<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.inner.engine.transaction(&mut || {
            if let Some(f) = f.take() {
                out = Some(f()?);
            }
            Ok(Value::Null)
        })?;
        out.ok_or_else(|| StateError::failed("transaction body did not run"))
    }

    /// Re-run `tracked` whenever what it reads changes and pass each new value to `effect`.
    pub fn reaction(
        &self,
        tracked: impl FnMut() -> Value + 'static,
        effect: impl FnMut(&Value) + 'static,
    ) -> ReactionHandle {
        let disposer = self
            .inner
            .engine
            .reaction(Box::new(tracked), Box::new(effect), false);
        ReactionHandle::new(disposer)
    }

    /// Like [`StateRuntime::reaction`], but `and_then` also sees the first value.
    pub fn reactively(
        &self,
        tracked: impl FnMut() -> Value + 'static,
        and_then: impl FnMut(&Value) + 'static,
    ) -> ReactionHandle {
        let disposer = self
            .inner
            .engine
            .reaction(Box::new(tracked), Box::new(and_then), true);
        ReactionHandle::new(disposer)
    }

    /// Run `body` now and again whenever anything it read changes.
    pub fn autorun(&self, mut body: impl FnMut() + 'static) -> ReactionHandle {
        self.reaction(
            move || {
                body();
                Value::Null
            },
            |_: &Value| {},
        )
    }

    /// A memoized function over reactive state, outside any module.
    pub fn derived(&self, f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Derived {
        Derived {
            memo: self.inner.engine.memoize(Rc::new(f)),
        }
    }

    /// Memoize every function in `defs` and keep the results of the zero-argument
    /// ones published on a module called `name`.
    ///
    /// The module carries `zeroParamResults` (an object keyed by function name)
    /// and `lastUpdateStack` (the actions in flight when the results were last
    /// computed). A reaction recomputes the results whenever their inputs change
    /// and defers the write to the next [`StateRuntime::run_deferred`].
    pub fn memoized(
        &self,
        name: impl Into<String>,
        defs: impl IntoIterator<Item = (String, MemoizedFn)>,
    ) -> Result<MemoizedSet> {
        let name = name.into();
        let module = self.register(
            name.clone(),
            ModuleDef::new()
                .value("zeroParamResults", json!({}))
                .value("lastUpdateStack", Value::Null)
                .action("setResults", |m: &Module, args: &[Value]| {
                    m.set(
                        "zeroParamResults",
                        args.first().cloned().unwrap_or_else(|| json!({})),
                    )?;
                    m.set("lastUpdateStack", args.get(1).cloned().unwrap_or(Value::Null))?;
                    Ok(Value::Null)
                }),
        )?;

        let mut functions = BTreeMap::new();
        let mut zero_arg = Vec::new();
        for (key, def) in defs {
            let derived = match def {
                MemoizedFn::ZeroArg(f) => {
                    let derived = self.derived(move |_: &[Value]| f());
                    zero_arg.push((key.clone(), derived.clone()));
                    derived
                }
                MemoizedFn::WithArgs(f) => Derived {
                    memo: self.inner.engine.memoize(f),
                },
            };
            functions.insert(key, derived);
        }

        let tracked = {
            let runtime = self.downgrade();
            move || {
                let mut results = Map::new();
                for (key, derived) in &zero_arg {
                    let value = derived.get().unwrap_or_else(|e| {
                        tracing::warn!(function = %key, error = %e, "Memoized function failed");
                        Value::Null
                    });
                    results.insert(key.clone(), value);
                }
                let stack = runtime
                    .upgrade()
                    .map(|inner| inner.provenance.snapshot())
                    .filter(|stack| !stack.is_empty())
                    .map_or(Value::Null, |stack| json!(stack));
                json!({ "results": results, "stack": stack })
            }
        };
        let publish = {
            let runtime = self.downgrade();
            let name = name.clone();
            move |computed: &Value| {
                let Some(inner) = runtime.upgrade() else {
                    return;
                };
                let runtime = StateRuntime::from_inner(inner);
                let args = [computed["results"].clone(), computed["stack"].clone()];
                let name = name.clone();
                let target = runtime.clone();
                runtime.defer(move || {
                    let published = target
                        .module(&name)
                        .and_then(|module| module.call("setResults", &args));
                    if let Err(e) = published {
                        tracing::warn!(module = %name, error = %e, "Failed to publish memoized results");
                    }
                });
            }
        };
        let reaction = self.reactively(tracked, publish);

        Ok(MemoizedSet {
            module,
            functions,
            reaction,
        })
    }
}

impl fmt::Debug for StateRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.borrow();
        let names: Vec<&str> = registry.modules.iter().map(Module::name).collect();
        f.debug_struct("StateRuntime")
            .field("modules", &names)
            .field("mirror", &self.inner.mirror.phase())
            .finish()
    }
}

/// Stops a reaction started through the runtime.
#[derive(Debug)]
pub struct ReactionHandle {
    disposer: RefCell<Option<Disposer>>,
}

impl ReactionHandle {
    fn new(disposer: Disposer) -> Self {
        Self {
            disposer: RefCell::new(Some(disposer)),
        }
    }

    /// Stop the reaction. Later calls do nothing.
    pub fn end(&self) {
        if let Some(disposer) = self.disposer.borrow_mut().take() {
            disposer.dispose();
        }
    }
}

/// Memoized function created by [`StateRuntime::derived`].
#[derive(Clone)]
pub struct Derived {
    memo: MemoFn,
}

impl Derived {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.memo)(args)
    }

    pub fn get(&self) -> Result<Value> {
        self.call(&[])
    }
}

/// A function handed to [`StateRuntime::memoized`].
pub enum MemoizedFn {
    ZeroArg(Rc<dyn Fn() -> Result<Value>>),
    WithArgs(MemoFn),
}

impl MemoizedFn {
    pub fn zero_arg(f: impl Fn() -> Result<Value> + 'static) -> Self {
        MemoizedFn::ZeroArg(Rc::new(f))
    }

    pub fn with_args(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        MemoizedFn::WithArgs(Rc::new(f))
    }
}

/// Result of [`StateRuntime::memoized`].
pub struct MemoizedSet {
    module: Module,
    functions: BTreeMap<String, Derived>,
    reaction: ReactionHandle,
}

impl MemoizedSet {
    /// The module publishing `zeroParamResults` and `lastUpdateStack`.
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self.functions.get(name) {
            Some(derived) => derived.call(args),
            None => Err(StateError::UnknownField {
                module: self.module.name().to_string(),
                field: name.to_string(),
            }),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Stop publishing results.
    pub fn end(&self) {
        self.reaction.end();
    }
}
