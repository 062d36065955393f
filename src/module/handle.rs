//! Live, registered modules.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::rc::{Rc, Weak};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::def::{FieldDef, Getter, MethodBody, MethodKind, ModuleDef};
use super::dispatch;
use crate::devtools::CallSite;
use crate::engine::{CellId, MemoFn, ReactiveEngine};
use crate::error::{Result, StateError};
use crate::runtime::{RuntimeInner, StateRuntime};

pub(crate) enum Slot {
    Value {
        cell: CellId,
    },
    Getter {
        getter: Getter,
    },
    Method {
        kind: MethodKind,
        /// Bumped on every reassignment so derivations that called the old body
        /// recompute.
        version: CellId,
        body: RefCell<MethodBody>,
        memo: MemoFn,
    },
}

pub(crate) struct ModuleInner {
    name: String,
    runtime: Weak<RuntimeInner>,
    engine: Rc<dyn ReactiveEngine>,
    slots: Vec<(String, Slot)>,
    index: HashMap<String, usize>,
}

/// Kind of a field on a live module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Value,
    Getter,
    Method(MethodKind),
}

/// A registered module. Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct Module {
    inner: Rc<ModuleInner>,
}

impl Module {
    pub(crate) fn build(
        name: String,
        def: ModuleDef,
        runtime: Weak<RuntimeInner>,
        engine: Rc<dyn ReactiveEngine>,
    ) -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<ModuleInner>| {
            let mut slots = Vec::with_capacity(def.len());
            let mut index = HashMap::with_capacity(def.len());
            for (position, (key, field)) in def.into_fields().into_iter().enumerate() {
                let slot = match field {
                    FieldDef::Value(value) => Slot::Value {
                        cell: engine.observable(value),
                    },
                    FieldDef::Getter(getter) => Slot::Getter { getter },
                    FieldDef::Method { kind, body } => {
                        let me = me.clone();
                        let raw: MemoFn = Rc::new(move |args: &[Value]| match me.upgrade() {
                            Some(inner) => Module { inner }.invoke_body(position, args),
                            None => Ok(Value::Null),
                        });
                        Slot::Method {
                            kind,
                            version: engine.observable(Value::from(0u64)),
                            body: RefCell::new(body),
                            memo: engine.memoize(raw),
                        }
                    }
                };
                index.insert(key.clone(), position);
                slots.push((key, slot));
            }
            ModuleInner {
                name,
                runtime,
                engine: engine.clone(),
                slots,
                index,
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The runtime this module is registered with, while it is alive.
    pub fn runtime(&self) -> Option<StateRuntime> {
        self.inner.runtime.upgrade().map(StateRuntime::from_inner)
    }

    pub(crate) fn engine(&self) -> &Rc<dyn ReactiveEngine> {
        &self.inner.engine
    }

    /// Field names in definition order, synthesized setters last.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.inner.slots.iter().map(|(key, _)| key.as_str())
    }

    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.slot(field).map(|(_, slot)| match slot {
            Slot::Value { .. } => FieldKind::Value,
            Slot::Getter { .. } => FieldKind::Getter,
            Slot::Method { kind, .. } => FieldKind::Method(*kind),
        })
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.inner.index.contains_key(field)
    }

    fn slot(&self, field: &str) -> Option<(usize, &Slot)> {
        let position = *self.inner.index.get(field)?;
        self.inner
            .slots
            .get(position)
            .map(|(_, slot)| (position, slot))
    }

    fn unknown(&self, field: &str) -> StateError {
        StateError::UnknownField {
            module: self.inner.name.clone(),
            field: field.to_string(),
        }
    }

    /// Read a value or computed field. Reads inside a derivation are tracked.
    pub fn get(&self, field: &str) -> Result<Value> {
        match self.slot(field) {
            Some((_, Slot::Value { cell })) => Ok(self.inner.engine.read(*cell)),
            Some((_, Slot::Getter { getter })) => getter(self),
            Some((_, Slot::Method { .. })) => Err(StateError::NotAValue {
                module: self.inner.name.clone(),
                field: field.to_string(),
            }),
            None => Err(self.unknown(field)),
        }
    }

    /// Read a field and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(field)?)?)
    }

    /// Assign a value field directly, outside of any action record.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        match self.slot(field) {
            Some((_, Slot::Value { cell })) => {
                self.inner.engine.write(*cell, value.into());
                Ok(())
            }
            Some((_, Slot::Getter { .. })) => Err(StateError::NotAssignable {
                module: self.inner.name.clone(),
                field: field.to_string(),
            }),
            Some((_, Slot::Method { .. })) => Err(StateError::NotAValue {
                module: self.inner.name.clone(),
                field: field.to_string(),
            }),
            None => Err(self.unknown(field)),
        }
    }

    /// Invoke a method. Whether the call is recorded as an action or evaluated as
    /// a memoized derivation depends on the method kind and the calling context.
    #[track_caller]
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let call_site = CallSite::from(Location::caller());
        dispatch::invoke(self, method, args, call_site)
    }

    /// Replace the body of a method field.
    pub fn assign_method(
        &self,
        method: &str,
        body: impl Fn(&Module, &[Value]) -> Result<Value> + 'static,
    ) -> Result<()> {
        match self.slot(method) {
            Some((
                _,
                Slot::Method {
                    version,
                    body: slot,
                    ..
                },
            )) => {
                *slot.borrow_mut() = Rc::new(body);
                let next = self.inner.engine.peek(*version).as_u64().unwrap_or(0) + 1;
                self.inner.engine.write(*version, Value::from(next));
                Ok(())
            }
            Some(_) => Err(StateError::NotAMethod {
                module: self.inner.name.clone(),
                field: method.to_string(),
            }),
            None => Err(self.unknown(method)),
        }
    }

    /// JSON projection of the value fields, read without tracking.
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        for (key, slot) in &self.inner.slots {
            if let Slot::Value { cell } = slot {
                out.insert(key.clone(), self.inner.engine.peek(*cell));
            }
        }
        Value::Object(out)
    }

    pub(crate) fn method_slot(&self, method: &str) -> Result<(usize, MethodKind, MemoFn)> {
        match self.slot(method) {
            Some((position, Slot::Method { kind, memo, .. })) => {
                Ok((position, *kind, memo.clone()))
            }
            Some(_) => Err(StateError::NotAMethod {
                module: self.inner.name.clone(),
                field: method.to_string(),
            }),
            None => Err(self.unknown(method)),
        }
    }

    /// Run the current body of the method at `position`, untouched by dispatch.
    pub(crate) fn invoke_body(&self, position: usize, args: &[Value]) -> Result<Value> {
        let body = match self.inner.slots.get(position) {
            Some((_, Slot::Method { version, body, .. })) => {
                self.inner.engine.read(*version);
                body.borrow().clone()
            }
            _ => return Ok(Value::Null),
        };
        body(self, args)
    }

    pub fn ptr_eq(&self, other: &Module) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.inner.name)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
