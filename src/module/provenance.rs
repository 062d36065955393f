//! Stack of in-flight action signatures.

use std::cell::RefCell;

/// Signatures of the actions currently executing, outermost first.
///
/// Entries are pushed through [`ProvenanceStack::push`] and popped when the
/// returned frame drops, so the stack stays balanced on early return, error and
/// unwind alike.
#[derive(Debug, Default)]
pub struct ProvenanceStack {
    frames: RefCell<Vec<String>>,
}

impl ProvenanceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, signature: String) -> ProvenanceFrame<'_> {
        self.frames.borrow_mut().push(signature);
        ProvenanceFrame { stack: self }
    }

    /// Copy of the stack as it stands now.
    pub fn snapshot(&self) -> Vec<String> {
        self.frames.borrow().clone()
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }
}

/// Pops its signature when dropped.
#[must_use = "dropping the frame pops the signature immediately"]
pub struct ProvenanceFrame<'a> {
    stack: &'a ProvenanceStack,
}

impl Drop for ProvenanceFrame<'_> {
    fn drop(&mut self) {
        if let Ok(mut frames) = self.stack.frames.try_borrow_mut() {
            frames.pop();
        }
    }
}
