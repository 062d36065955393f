//! Action/derivation classification and the action wrapper.
//!
//! Every method call goes through [`invoke`]. The method's declared
//! [`MethodKind`] and the engine's derivation flag at the moment of the call
//! pick one of three outcomes:
//!
//! | kind         | inside derivation | outside derivation |
//! |--------------|-------------------|--------------------|
//! | `Auto`       | memoized          | recorded action    |
//! | `Derivation` | memoized          | memoized           |
//! | `Action`     | rejected          | recorded action    |

use serde_json::Value;

use super::def::MethodKind;
use super::Module;
use crate::devtools::{ActionRecord, CallSite};
use crate::error::{Result, StateError};

/// How a single call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Derivation,
    Action,
    Rejected,
}

pub fn classify(kind: MethodKind, inside_derivation: bool) -> Dispatch {
    match (kind, inside_derivation) {
        (MethodKind::Derivation, _) | (MethodKind::Auto, true) => Dispatch::Derivation,
        (MethodKind::Action, true) => Dispatch::Rejected,
        (MethodKind::Auto | MethodKind::Action, false) => Dispatch::Action,
    }
}

pub(crate) fn invoke(
    module: &Module,
    method: &str,
    args: &[Value],
    call_site: CallSite,
) -> Result<Value> {
    let (position, kind, memo) = module.method_slot(method)?;
    let inside_derivation = module.engine().is_inside_derivation_context();
    match classify(kind, inside_derivation) {
        Dispatch::Derivation => memo(args),
        Dispatch::Action => run_action(module, position, method, args, call_site),
        Dispatch::Rejected => Err(StateError::ActionInDerivation {
            signature: format!("{}.{}", module.name(), method),
        }),
    }
}

fn run_action(
    module: &Module,
    position: usize,
    method: &str,
    args: &[Value],
    call_site: CallSite,
) -> Result<Value> {
    let engine = module.engine().clone();
    let Some(runtime) = module.runtime() else {
        return engine.transaction(&mut || module.invoke_body(position, args));
    };

    runtime.ensure_mirror_initialized();

    let id = runtime.next_action_id();
    let signature = format!("{id}: {}.{method}", module.name());
    let action_stack = runtime.provenance().snapshot();
    tracing::trace!(%signature, depth = action_stack.len(), "dispatching action");

    let call_site = runtime
        .config()
        .devtools
        .capture_call_sites
        .then_some(call_site);
    let mut record = Some(ActionRecord {
        id,
        signature: signature.clone(),
        action_stack,
        args: args.to_vec(),
        call_site,
    });

    // Held across commit: reactions flushed by the transaction run with this
    // signature still on the stack.
    let frame = runtime.provenance().push(signature.clone());
    let result = engine.transaction(&mut || {
        let value = module.invoke_body(position, args)?;
        // Recorded before the batch closes, so actions run by reactions at
        // commit are recorded after this one.
        if let Some(record) = record.take() {
            runtime.record_action(record);
        }
        Ok(value)
    });
    drop(frame);

    if let Err(err) = &result {
        tracing::debug!(%signature, error = %err, "action failed; no event recorded");
    }
    result
}
