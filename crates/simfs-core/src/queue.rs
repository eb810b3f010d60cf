//! Cooperative scheduler (§4.1).
//!
//! The original drives its operation queue from a GLib idle source
//! (`g_idle_add`/`g_source_remove`): each queued op is serviced one step at a
//! time from the default main loop, so a slow driver round-trip never blocks
//! anything else running on it. [`Scheduler`] is the same idea shrunk to a
//! single method: "run this closure later, on whatever loop you're already
//! driving." An embedder wires it to its own reactor; [`ImmediateScheduler`]
//! is the trampoline used by tests and other synchronous callers.

/// Defer a unit of work to be run later, on the embedder's own event loop.
pub trait Scheduler {
    fn defer(&self, task: Box<dyn FnOnce()>);
}

/// Runs deferred work synchronously, in FIFO order, without recursing: a
/// tick that defers another tick just appends to this scheduler's own
/// queue, which the outermost `defer` call drains in a loop. This makes
/// `ImmediateScheduler` safe to use even for files with many blocks, where a
/// naive "call it immediately" implementation would blow the stack.
#[derive(Default)]
pub struct ImmediateScheduler {
    queue: std::cell::RefCell<std::collections::VecDeque<Box<dyn FnOnce()>>>,
    draining: std::cell::Cell<bool>,
}

impl ImmediateScheduler {
    pub fn new() -> Self {
        ImmediateScheduler::default()
    }
}

impl Scheduler for ImmediateScheduler {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        self.queue.borrow_mut().push_back(task);
        if self.draining.replace(true) {
            // A `defer` call further up this same stack is already draining;
            // our task has been enqueued for it to pick up.
            return;
        }
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        self.draining.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn runs_task_immediately() {
        let ran = Rc::new(RefCell::new(false));
        let scheduler = ImmediateScheduler::new();
        let flag = ran.clone();
        scheduler.defer(Box::new(move || *flag.borrow_mut() = true));
        assert!(*ran.borrow());
    }

    #[test]
    fn reentrant_defer_runs_in_fifo_order_without_recursion() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let scheduler = Rc::new(ImmediateScheduler::new());

        let log1 = order.clone();
        let sched2 = scheduler.clone();
        let log2 = order.clone();
        scheduler.defer(Box::new(move || {
            log1.borrow_mut().push(1);
            let log3 = log2.clone();
            sched2.defer(Box::new(move || log3.borrow_mut().push(2)));
        }));

        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn many_chained_defers_do_not_overflow_the_stack() {
        struct Ticker {
            scheduler: Rc<ImmediateScheduler>,
            remaining: Rc<std::cell::Cell<u32>>,
        }

        impl Ticker {
            fn step(self) {
                let remaining = self.remaining.get();
                if remaining == 0 {
                    return;
                }
                self.remaining.set(remaining - 1);
                let next = Ticker {
                    scheduler: self.scheduler.clone(),
                    remaining: self.remaining.clone(),
                };
                self.scheduler.defer(Box::new(move || next.step()));
            }
        }

        let scheduler = Rc::new(ImmediateScheduler::new());
        let remaining = Rc::new(std::cell::Cell::new(200_000u32));
        let ticker = Ticker {
            scheduler: scheduler.clone(),
            remaining: remaining.clone(),
        };
        ticker.step();
        assert_eq!(remaining.get(), 0);
    }
}
