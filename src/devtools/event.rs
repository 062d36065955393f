//! Action records and the events dispatched to an inspector.

use std::fmt;
use std::panic::Location;

use futures::future::{self, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source location a method was called from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl From<&Location<'_>> for CallSite {
    fn from(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One completed action invocation. Built by the action wrapper, consumed by the
/// mirror, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub id: u64,
    /// `"<id>: <module>.<method>"`.
    pub signature: String,
    /// Signatures that were already running when this action started.
    pub action_stack: Vec<String>,
    pub args: Vec<Value>,
    pub call_site: Option<CallSite>,
}

/// Wire shape of an action as the inspector sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub action_stack: Vec<String>,
    pub arg0: Value,
    pub args: Vec<Value>,
    pub stack: Option<Vec<String>>,
}

impl From<&ActionRecord> for ActionEvent {
    fn from(record: &ActionRecord) -> Self {
        Self {
            kind: record.signature.clone(),
            action_stack: record.action_stack.clone(),
            arg0: record.args.first().cloned().unwrap_or(Value::Null),
            args: record.args.clone(),
            stack: record
                .call_site
                .as_ref()
                .map(|site| vec![site.to_string()]),
        }
    }
}

impl ActionRecord {
    pub fn to_event(&self) -> Value {
        serde_json::to_value(ActionEvent::from(self)).unwrap_or_else(|err| {
            tracing::warn!(signature = %self.signature, error = %err, "failed to encode action event");
            serde_json::json!({ "type": self.signature })
        })
    }
}

/// Turns a record into the event payload. Preparation may be asynchronous;
/// the mirror dispatches prepared events strictly in record order.
pub trait EventPreparer {
    fn prepare(&self, record: ActionRecord) -> LocalBoxFuture<'static, Value>;
}

/// Encodes the record synchronously.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediatePreparer;

impl EventPreparer for ImmediatePreparer {
    fn prepare(&self, record: ActionRecord) -> LocalBoxFuture<'static, Value> {
        future::ready(record.to_event()).boxed_local()
    }
}
