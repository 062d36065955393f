//! Deferred task queue.

use std::cell::RefCell;
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

/// Tasks queued to run after the current synchronous burst of work.
#[derive(Default)]
pub(crate) struct DeferredQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl DeferredQueue {
    pub fn push(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run the tasks queued before this call. Tasks they queue wait for the next drain.
    pub fn drain(&self) -> usize {
        let batch: Vec<Task> = self.tasks.borrow_mut().drain(..).collect();
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }
}
