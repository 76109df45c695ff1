//! Error reporting through nested reads.
//!
//! Kept in its own test binary because it installs a process-wide panic
//! hook.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rxcell_core::{Computed, ReactiveError};

thread_local! {
    static HOOK_CALLS: Cell<usize> = const { Cell::new(0) };
}

#[test]
fn nested_errors_skip_the_panic_hook_only_inside_evaluations() {
    panic::set_hook(Box::new(|_| HOOK_CALLS.with(|calls| calls.set(calls.get() + 1))));

    // A cycle two levels deep, reported through try_get.
    let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
    let outer = Computed::named("outer", {
        let slot = slot.clone();
        move || slot.borrow().as_ref().map_or(0, |inner| inner.get())
    });
    let inner = Computed::named("inner", {
        let outer = outer.clone();
        move || outer.get() + 1
    });
    *slot.borrow_mut() = Some(inner.clone());

    let err = outer.try_get().unwrap_err();
    assert!(err.is_cycle());
    assert_eq!(HOOK_CALLS.with(Cell::get), 0);
    slot.borrow_mut().take();

    // Outside any evaluation, `get` is an ordinary panic.
    let disposed = Computed::new(|| 1);
    disposed.dispose();
    let payload = panic::catch_unwind(AssertUnwindSafe(|| disposed.get())).unwrap_err();
    let _ = panic::take_hook();

    assert_eq!(HOOK_CALLS.with(Cell::get), 1);
    let message = payload.downcast_ref::<String>().cloned().unwrap_or_default();
    assert_eq!(
        message,
        ReactiveError::DisposedAccess { node: disposed.id() }.to_string()
    );
}
