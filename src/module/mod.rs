//! State modules: definitions, setter synthesis, live handles and call dispatch.

mod def;
pub mod dispatch;
mod handle;
mod provenance;
pub mod setters;

pub use def::{FieldDef, Getter, MethodBody, MethodKind, ModuleDef};
pub use dispatch::{classify, Dispatch};
pub use handle::{FieldKind, Module};
pub use provenance::{ProvenanceFrame, ProvenanceStack};
pub use setters::{add_value_setters_where_none_exist, setter_name};
