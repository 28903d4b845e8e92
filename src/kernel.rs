//! Kernel-facing side of the event channel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Receives event snapshots forwarded for kernel-registered listeners.
///
/// Delivery is fire-and-forget: the bridge never waits for the callback to
/// run and never observes its result.
pub trait KernelSink {
    fn invoke_function(&self, name: &str, args: Vec<JsonValue>);
}

/// Sink for sessions with no kernel channel attached.
pub struct DiscardSink;

impl KernelSink for DiscardSink {
    fn invoke_function(&self, name: &str, args: Vec<JsonValue>) {
        debug!(target: "bridge", name, count = args.len(), "discarding kernel invocation");
    }
}

type Callback = Box<dyn Fn(Vec<JsonValue>)>;

/// Name-keyed callback table backing `KernelSink` for in-process kernels.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RefCell<HashMap<String, Rc<dyn Fn(Vec<JsonValue>)>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, callback: Callback) {
        self.callbacks
            .borrow_mut()
            .insert(name.to_string(), Rc::from(callback));
    }

    pub fn unregister(&self, name: &str) {
        self.callbacks.borrow_mut().remove(name);
    }
}

impl KernelSink for CallbackRegistry {
    // The table borrow is released before the callback runs, so callbacks
    // may register or unregister listeners from inside an invocation.
    fn invoke_function(&self, name: &str, args: Vec<JsonValue>) {
        let callback = self.callbacks.borrow().get(name).cloned();
        match callback {
            Some(callback) => callback(args),
            None => warn!(target: "bridge", name, "no callback registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use serde_json::json;

    #[test]
    fn callbacks_may_edit_the_table_reentrantly() {
        let registry = Rc::new(CallbackRegistry::new());
        let fired = Rc::new(Cell::new(0u32));

        let table = Rc::clone(&registry);
        let count = Rc::clone(&fired);
        registry.register(
            "once",
            Box::new(move |_| {
                count.set(count.get() + 1);
                table.unregister("once");
            }),
        );

        registry.invoke_function("once", vec![json!({})]);
        registry.invoke_function("once", vec![json!({})]);
        assert_eq!(fired.get(), 1);
    }
}
