use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use uc_bridge::{HostError, HostRuntime, Upcall};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    Attach,
    Dispatch(Upcall),
    Detach,
}

pub type Handler = Arc<dyn Fn(&Upcall) -> Result<i32, HostError> + Send + Sync>;

/// A host runtime that records every attach/dispatch/detach, per thread.
///
/// Dispatches go to the handler registered for the upcall's token; unknown tokens return `0`.
#[derive(Default)]
pub struct RecordingRuntime {
    ledger: Mutex<Vec<(ThreadId, RuntimeEvent)>>,
    handlers: Mutex<HashMap<u64, Handler>>,
    refuse_attach: Mutex<HashSet<ThreadId>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        token: u64,
        handler: impl Fn(&Upcall) -> Result<i32, HostError> + Send + Sync + 'static,
    ) {
        lock(&self.handlers).insert(token, Arc::new(handler));
    }

    /// Answer every dispatch for `token` with `value`.
    pub fn returning(&self, token: u64, value: i32) {
        self.on(token, move |_| Ok(value));
    }

    /// Make attaching the current thread fail until reset.
    pub fn refuse_attach(&self, refuse: bool) {
        let thread = thread::current().id();
        let mut refused = lock(&self.refuse_attach);
        if refuse {
            refused.insert(thread);
        } else {
            refused.remove(&thread);
        }
    }

    /// Every recorded event, with the thread it happened on.
    pub fn ledger(&self) -> Vec<(ThreadId, RuntimeEvent)> {
        lock(&self.ledger).clone()
    }

    /// Events whose dispatch (or surrounding attach/detach) concerns `engine`.
    ///
    /// Attach and detach carry no engine, so they are kept when they bracket a matching dispatch
    /// on the same thread.
    pub fn events_for(&self, engine: u64) -> Vec<(ThreadId, RuntimeEvent)> {
        let ledger = self.ledger();
        let mut out = Vec::new();
        for (index, (thread, event)) in ledger.iter().enumerate() {
            let matches = match event {
                RuntimeEvent::Dispatch(upcall) => upcall.engine == engine,
                RuntimeEvent::Attach => ledger[index + 1..]
                    .iter()
                    .filter(|(other, _)| other == thread)
                    .find_map(|(_, next)| match next {
                        RuntimeEvent::Dispatch(upcall) => Some(upcall.engine == engine),
                        _ => None,
                    })
                    .unwrap_or(false),
                RuntimeEvent::Detach => ledger[..index]
                    .iter()
                    .rev()
                    .filter(|(other, _)| other == thread)
                    .find_map(|(_, prev)| match prev {
                        RuntimeEvent::Dispatch(upcall) => Some(upcall.engine == engine),
                        _ => None,
                    })
                    .unwrap_or(false),
            };
            if matches {
                out.push((*thread, *event));
            }
        }
        out
    }

    /// Dispatches delivered for `engine`, in order.
    pub fn dispatches(&self, engine: u64) -> Vec<Upcall> {
        self.ledger()
            .into_iter()
            .filter_map(|(_, event)| match event {
                RuntimeEvent::Dispatch(upcall) if upcall.engine == engine => Some(upcall),
                _ => None,
            })
            .collect()
    }

    /// Events recorded on `thread`, in order.
    pub fn events_on(&self, thread: ThreadId) -> Vec<RuntimeEvent> {
        self.ledger()
            .into_iter()
            .filter(|(other, _)| *other == thread)
            .map(|(_, event)| event)
            .collect()
    }

    fn record(&self, event: RuntimeEvent) {
        lock(&self.ledger).push((thread::current().id(), event));
    }
}

impl HostRuntime for RecordingRuntime {
    fn attach_current_thread(&self) -> Result<(), HostError> {
        if lock(&self.refuse_attach).contains(&thread::current().id()) {
            return Err(HostError::Attach("attach refused".into()));
        }
        self.record(RuntimeEvent::Attach);
        Ok(())
    }

    fn detach_current_thread(&self) {
        self.record(RuntimeEvent::Detach);
    }

    fn dispatch(&self, upcall: &Upcall) -> Result<i32, HostError> {
        self.record(RuntimeEvent::Dispatch(*upcall));
        let handler = lock(&self.handlers).get(&upcall.token).cloned();
        match handler {
            Some(handler) => handler(upcall),
            None => Ok(0),
        }
    }
}

/// `true` when every attach on every thread is followed by exactly one detach, with no nesting.
pub fn attach_balanced(events: &[RuntimeEvent]) -> bool {
    let mut attached = false;
    for event in events {
        match event {
            RuntimeEvent::Attach if attached => return false,
            RuntimeEvent::Attach => attached = true,
            RuntimeEvent::Detach if !attached => return false,
            RuntimeEvent::Detach => attached = false,
            RuntimeEvent::Dispatch(_) if !attached => return false,
            RuntimeEvent::Dispatch(_) => {}
        }
    }
    !attached
}
