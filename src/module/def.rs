//! Field descriptors for a module before registration.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::Module;
use crate::error::Result;

/// Body of a method field. Receives the live module and the call arguments.
pub type MethodBody = Rc<dyn Fn(&Module, &[Value]) -> Result<Value>>;

/// Body of a get-only computed field.
pub type Getter = Rc<dyn Fn(&Module) -> Result<Value>>;

/// How a method behaves when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodKind {
    /// Decided per call: a derivation when called while a derivation is
    /// evaluating, a recorded action otherwise.
    #[default]
    Auto,
    /// Always a recorded action. Calling it from a derivation is an error.
    Action,
    /// Always a memoized derivation. Never recorded.
    Derivation,
}

/// One field of a module definition.
#[derive(Clone)]
pub enum FieldDef {
    /// Plain JSON data. Gets a synthesized setter unless one is defined.
    Value(Value),
    /// A derived field with a getter and no setter.
    Getter(Getter),
    Method { kind: MethodKind, body: MethodBody },
}

impl FieldDef {
    pub fn is_method(&self) -> bool {
        matches!(self, FieldDef::Method { .. })
    }

    pub fn method_body(&self) -> Option<&MethodBody> {
        match self {
            FieldDef::Method { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDef::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldDef::Getter(_) => f.write_str("Getter(..)"),
            FieldDef::Method { kind, .. } => {
                f.debug_struct("Method").field("kind", kind).finish_non_exhaustive()
            }
        }
    }
}

/// An ordered set of named fields, turned into a live [`Module`] by registration.
///
/// Defining a key twice replaces the earlier definition in place, so field order
/// always follows first definition.
///
/// ```
/// use serde_json::{json, Value};
/// use stately::ModuleDef;
///
/// let def = ModuleDef::new()
///     .value("count", json!(0))
///     .method("increment", |m, _| {
///         let count: i64 = m.get_as("count")?;
///         m.set("count", count + 1)?;
///         Ok(Value::Null)
///     });
/// assert!(def.contains("increment"));
/// ```
#[derive(Clone, Default)]
pub struct ModuleDef {
    fields: Vec<(String, FieldDef)>,
}

impl ModuleDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a definition holding only value fields from a JSON object.
    /// Non-object input yields an empty definition.
    pub fn from_json(value: Value) -> Self {
        let mut def = Self::new();
        if let Value::Object(entries) = value {
            for (key, value) in entries {
                def.insert(key, FieldDef::Value(value));
            }
        }
        def
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name.into(), FieldDef::Value(value.into()));
        self
    }

    pub fn getter(
        mut self,
        name: impl Into<String>,
        getter: impl Fn(&Module) -> Result<Value> + 'static,
    ) -> Self {
        self.insert(name.into(), FieldDef::Getter(Rc::new(getter)));
        self
    }

    /// Add a method whose action/derivation role is decided at call time.
    pub fn method(
        self,
        name: impl Into<String>,
        body: impl Fn(&Module, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.method_of_kind(name, MethodKind::Auto, body)
    }

    pub fn action(
        self,
        name: impl Into<String>,
        body: impl Fn(&Module, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.method_of_kind(name, MethodKind::Action, body)
    }

    pub fn derivation(
        self,
        name: impl Into<String>,
        body: impl Fn(&Module, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.method_of_kind(name, MethodKind::Derivation, body)
    }

    pub fn method_of_kind(
        mut self,
        name: impl Into<String>,
        kind: MethodKind,
        body: impl Fn(&Module, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.insert(
            name.into(),
            FieldDef::Method {
                kind,
                body: Rc::new(body),
            },
        );
        self
    }

    /// Insert or replace a field, keeping the position of an existing key.
    pub fn insert(&mut self, name: String, field: FieldDef) {
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = field,
            None => self.fields.push((name, field)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, field)| field)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(key, field)| (key.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_fields(self) -> Vec<(String, FieldDef)> {
        self.fields
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
