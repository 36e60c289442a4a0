//! Listener registry for server-to-client invocations.
//!
//! Method names match case-insensitively. Several callbacks may be
//! registered for one method; all of them run, in registration order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

type ListenerFn = dyn Fn(&[Value]) + Send + Sync;

/// Handle to a registered callback. Pass it back to
/// [`HubConnection::off`](crate::HubConnection::off) to unregister.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<ListenerFn>,
}

impl Listener {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("callback", &Arc::as_ptr(&self.callback))
            .finish()
    }
}

/// Result of dispatching one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) called: usize,
    pub(crate) panicked: usize,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    methods: Mutex<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn methods(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.methods.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn on(&self, method: &str, listener: Listener) {
        self.methods()
            .entry(method.to_lowercase())
            .or_default()
            .push(listener);
    }

    /// Removes every registration of `listener` under `method`.
    pub(crate) fn off(&self, method: &str, listener: &Listener) -> usize {
        let key = method.to_lowercase();
        let mut methods = self.methods();
        let Some(list) = methods.get_mut(&key) else {
            return 0;
        };

        let before = list.len();
        list.retain(|l| !l.same(listener));
        let removed = before - list.len();
        if list.is_empty() {
            methods.remove(&key);
        }
        removed
    }

    /// Removes all callbacks for `method`.
    pub(crate) fn off_all(&self, method: &str) -> usize {
        self.methods()
            .remove(&method.to_lowercase())
            .map_or(0, |list| list.len())
    }

    /// Calls every callback for `target` with `args`.
    ///
    /// The list is cloned first, so callbacks run without the lock held and
    /// may register or remove listeners themselves. A panicking callback is
    /// counted and the rest still run.
    pub(crate) fn dispatch(&self, target: &str, args: &[Value]) -> Delivery {
        let listeners = self
            .methods()
            .get(&target.to_lowercase())
            .cloned()
            .unwrap_or_default();

        let mut delivery = Delivery::default();
        for listener in listeners {
            delivery.called += 1;
            if catch_unwind(AssertUnwindSafe(|| (listener.callback)(args))).is_err() {
                delivery.panicked += 1;
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Listener, Arc<Mutex<Vec<Vec<Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = Listener::new(move |args| sink.lock().unwrap().push(args.to_vec()));
        (listener, seen)
    }

    #[test]
    fn dispatch_ignores_method_case() {
        let registry = ListenerRegistry::new();
        let (listener, seen) = recorder();
        registry.on("ReceiveMessage", listener);

        for target in ["receivemessage", "RECEIVEMESSAGE", "ReceiveMessage"] {
            registry.dispatch(target, &[json!("a"), json!(1)]);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], vec![json!("a"), json!(1)]);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.on("tick", Listener::new(move |_| order.lock().unwrap().push(n)));
        }

        let delivery = registry.dispatch("Tick", &[]);
        assert_eq!(delivery.called, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_registration_is_called_twice() {
        let registry = ListenerRegistry::new();
        let (listener, seen) = recorder();
        registry.on("m", listener.clone());
        registry.on("m", listener);

        registry.dispatch("m", &[]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn off_removes_every_matching_entry() {
        let registry = ListenerRegistry::new();
        let (listener, seen) = recorder();
        let (other, other_seen) = recorder();
        registry.on("m", listener.clone());
        registry.on("M", listener.clone());
        registry.on("m", other);

        assert_eq!(registry.off("m", &listener), 2);
        registry.dispatch("m", &[]);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(other_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn off_unknown_is_noop() {
        let registry = ListenerRegistry::new();
        let (listener, _) = recorder();
        assert_eq!(registry.off("missing", &listener), 0);
    }

    #[test]
    fn off_all_clears_method() {
        let registry = ListenerRegistry::new();
        registry.on("m", recorder().0);
        registry.on("m", recorder().0);
        assert_eq!(registry.off_all("M"), 2);
        assert_eq!(registry.dispatch("m", &[]).called, 0);
    }

    #[test]
    fn panicking_callback_does_not_stop_later_ones() {
        let registry = ListenerRegistry::new();
        registry.on("m", Listener::new(|_| panic!("listener failure")));
        let (listener, seen) = recorder();
        registry.on("m", listener);

        let delivery = registry.dispatch("m", &[json!(true)]);
        assert_eq!(delivery, Delivery { called: 2, panicked: 1 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn callback_can_register_listener_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();
        registry.on(
            "m",
            Listener::new(move |_| inner.on("other", Listener::new(|_| {}))),
        );

        registry.dispatch("m", &[]);
        assert_eq!(registry.dispatch("other", &[]).called, 1);
    }
}
