//! Setter synthesis.
//!
//! Every non-method field `field` gets a `setField` method unless the definition
//! already carries one. Get-only computed fields get a stub that always fails.

use std::rc::Rc;

use serde_json::Value;

use super::def::{FieldDef, MethodKind, ModuleDef};
use super::Module;
use crate::error::StateError;

/// Mangled setter name for a field: `count` becomes `setCount`.
pub fn setter_name(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("set{}{}", first.to_uppercase(), chars.as_str()),
        None => "set".to_string(),
    }
}

/// For a name shaped like a setter (`setX...`), the field it would set (`x...`).
fn setter_target(name: &str) -> Option<String> {
    let rest = name.strip_prefix("set")?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(format!("{}{}", first.to_lowercase(), chars.as_str()))
}

/// Add a setter for every value or computed field lacking one.
///
/// Returns the definition with the new setters appended, plus their names in
/// definition order. Existing setters are never replaced.
pub fn add_value_setters_where_none_exist(mut def: ModuleDef) -> (ModuleDef, Vec<String>) {
    let mut additions = Vec::new();

    for (key, field) in def.iter() {
        if field.is_method() {
            continue;
        }
        let name = setter_name(key);
        if def.contains(&name) {
            continue;
        }
        // A value field that is itself named like a setter for an existing field
        // would otherwise produce `setSetX`.
        if setter_target(key).is_some_and(|target| def.contains(&target)) {
            continue;
        }
        let body: FieldDef = match field {
            FieldDef::Getter(_) => unsettable_stub(key.to_string()),
            _ => assigning_setter(key.to_string()),
        };
        additions.push((name, body));
    }

    let names = additions.iter().map(|(name, _)| name.clone()).collect();
    for (name, body) in additions {
        def.insert(name, body);
    }
    (def, names)
}

fn assigning_setter(field: String) -> FieldDef {
    FieldDef::Method {
        kind: MethodKind::Auto,
        body: Rc::new(move |module: &Module, args: &[Value]| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            module.set(&field, value)?;
            Ok(Value::Null)
        }),
    }
}

fn unsettable_stub(field: String) -> FieldDef {
    FieldDef::Method {
        kind: MethodKind::Auto,
        body: Rc::new(move |_: &Module, _: &[Value]| {
            Err(StateError::UnsettableComputed {
                field: field.clone(),
            })
        }),
    }
}
