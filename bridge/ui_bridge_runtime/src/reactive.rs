//! Fine-grained reactivity.
//!
//! The reconciler only needs [`Subscribe`]: run a computation now, run it again
//! whenever something it read changes, and stop when the teardown runs.
//! [`Signals`] is the built-in implementation on top of `spark_signals`.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

pub use spark_signals::{Signal, effect, signal};

pub type Teardown = Box<dyn FnOnce()>;

pub trait Subscribe {
    fn subscribe(&self, compute: Box<dyn FnMut()>) -> Teardown;
}

/// Subscribes `compute` and returns its first value. Later values go to
/// `on_change`. A panicking computation is logged and the previous value
/// stays in place.
pub fn watch<T: 'static>(
    runtime: &dyn Subscribe,
    compute: impl Fn() -> T + 'static,
    mut on_change: impl FnMut(T) + 'static,
) -> (Option<T>, Teardown) {
    let initial = Rc::new(RefCell::new(None));
    let first_run = Rc::new(Cell::new(true));

    let slot = initial.clone();
    let teardown = runtime.subscribe(Box::new(move || {
        let is_first = first_run.replace(false);
        let value = match panic::catch_unwind(AssertUnwindSafe(|| compute())) {
            Ok(value) => value,
            Err(payload) => {
                error!(panic = panic_message(&*payload), "reactive computation panicked");
                return;
            }
        };

        if is_first {
            *slot.borrow_mut() = Some(value);
        } else {
            on_change(value);
        }
    }));

    let value = initial.borrow_mut().take();
    (value, teardown)
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The built-in [`Subscribe`] implementation: one `spark_signals` effect per
/// subscription, stopped by the teardown.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals;

impl Subscribe for Signals {
    fn subscribe(&self, compute: Box<dyn FnMut()>) -> Teardown {
        let stop = effect(compute);
        Box::new(stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriptions_rerun_until_torn_down() {
        let count = signal(1);
        let runs = Rc::new(Cell::new(0));

        let reader = count.clone();
        let bump = runs.clone();
        let teardown = Signals.subscribe(Box::new(move || {
            let _ = reader.get();
            bump.set(bump.get() + 1);
        }));
        assert_eq!(runs.get(), 1);

        count.set(2);
        assert_eq!(runs.get(), 2);

        teardown();
        count.set(3);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn watch_returns_initial_value_and_reports_changes() {
        let value = signal(1);
        let changes = Rc::new(RefCell::new(Vec::new()));

        let reader = value.clone();
        let log = changes.clone();
        let (initial, teardown) = watch(
            &Signals,
            move || reader.get() * 10,
            move |next| log.borrow_mut().push(next),
        );
        assert_eq!(initial, Some(10));
        assert!(changes.borrow().is_empty());

        value.set(2);
        assert_eq!(*changes.borrow(), vec![20]);

        teardown();
        value.set(3);
        assert_eq!(*changes.borrow(), vec![20]);
    }

    #[test]
    fn watch_keeps_previous_value_when_computation_panics() {
        let value = signal(1);
        let changes = Rc::new(RefCell::new(Vec::new()));

        let reader = value.clone();
        let log = changes.clone();
        let (_initial, _teardown) = watch(
            &Signals,
            move || {
                let n = reader.get();
                if n == 2 {
                    panic!("boom");
                }
                n
            },
            move |next| log.borrow_mut().push(next),
        );

        value.set(2);
        assert!(changes.borrow().is_empty());

        value.set(3);
        assert_eq!(*changes.borrow(), vec![3]);
    }
}
