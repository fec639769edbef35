//! Resolving functions and the promise resolution procedure.
//!
//! Resolving a promise is more involved than fulfilling it: the resolution value may itself be a
//! promise, or a foreign [`Thenable`], whose eventual outcome the promise then *adopts*. The
//! [`Resolve`] and [`Reject`] capabilities handed to executors (and used internally to settle
//! derived promises) implement that procedure.

use std::{cell::Cell, fmt, rc::Rc};

use crate::{error::Reason, promise::Promise, SelfResolutionError};

/// A value a promise can be resolved with.
pub enum Resolution<T, E> {
    /// A plain value. The promise is fulfilled with it directly.
    Value(T),
    /// Another promise of the same type. The promise adopts its outcome.
    Promise(Promise<T, E>),
    /// A foreign thenable. Its [`Thenable::lookup`] decides whether its outcome is adopted.
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> From<T> for Resolution<T, E> {
    #[inline]
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Value(..)"),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Result of [`Thenable::lookup`].
pub enum Lookup<T> {
    /// The value exposes a callable `then` operation and will be adopted.
    Callable,
    /// The value does not expose a callable `then` operation. The promise is fulfilled with the
    /// contained plain representation of the value instead.
    Plain(T),
}

/// A value exposing a `then` operation, which lets promises adopt its eventual outcome.
///
/// This allows interoperating with promise implementations other than [`Promise`]. [`Promise`]
/// itself implements this trait.
pub trait Thenable<T, E> {
    /// Looks up the `then` operation.
    ///
    /// This runs synchronously, while the promise is being resolved. Returning an error rejects
    /// the promise with it. The default implementation reports a callable `then`.
    fn lookup(&self) -> Result<Lookup<T>, E> {
        Ok(Lookup::Callable)
    }

    /// Registers `resolve` and `reject` to be invoked with the eventual outcome of `self`.
    ///
    /// This is called from a scheduled job, never synchronously from the resolving function. An
    /// error returned from here rejects the adopting promise, unless one of the resolving
    /// functions has already been called.
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E>;

    /// Returns `self` as a [`Promise`], if it is one.
    ///
    /// Only [`Promise`] overrides this; it lets a promise passed as a [`Resolution::Thenable`] be
    /// recognized when it is resolved with itself.
    fn as_promise(&self) -> Option<&Promise<T, E>> {
        None
    }
}

/// State shared by a [`Resolve`]/[`Reject`] pair.
struct Resolving<T, E> {
    promise: Promise<T, E>,
    already_resolved: Cell<bool>,
}

/// The resolve half of a promise's resolving functions.
///
/// Only the first call to either this or the paired [`Reject`] has any effect.
pub struct Resolve<T, E>(Rc<Resolving<T, E>>);

/// The reject half of a promise's resolving functions.
///
/// Only the first call to either this or the paired [`Resolve`] has any effect.
pub struct Reject<T, E>(Rc<Resolving<T, E>>);

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Creates a fresh pair of resolving functions for `promise`.
pub(crate) fn resolving_functions<T, E>(
    promise: &Promise<T, E>,
) -> (Resolve<T, E>, Reject<T, E>) {
    let shared = Rc::new(Resolving {
        promise: promise.clone(),
        already_resolved: Cell::new(false),
    });
    (Resolve(shared.clone()), Reject(shared))
}

impl<T: Clone + 'static, E: Reason> Resolve<T, E> {
    /// Resolves the promise.
    ///
    /// - A [`Resolution::Value`] fulfills the promise.
    /// - A [`Resolution::Promise`] makes the promise adopt the outcome of the given promise. If
    ///   that is the promise being resolved, it is rejected with a [`SelfResolutionError`]
    ///   instead.
    /// - A [`Resolution::Thenable`] is inspected with [`Thenable::lookup`] and then either adopted,
    ///   used to fulfill the promise, or causes a rejection.
    ///
    /// Adoption happens in a scheduled job, so the promise remains pending at least until the
    /// host's scheduler gets to run it.
    pub fn resolve(&self, resolution: Resolution<T, E>) {
        if self.0.already_resolved.replace(true) {
            return;
        }

        let promise = &self.0.promise;
        match resolution {
            Resolution::Value(value) => promise.fulfill(value),
            Resolution::Promise(other) => {
                if other.ptr_eq(promise) {
                    return reject_self_resolution(promise);
                }
                let target = promise.clone();
                promise
                    .host()
                    .schedule(Box::new(move || adopt(&target, &other)));
            }
            Resolution::Thenable(thenable) => {
                if matches!(thenable.as_promise(), Some(other) if other.ptr_eq(promise)) {
                    return reject_self_resolution(promise);
                }
                match thenable.lookup() {
                    Err(reason) => promise.reject_with(reason),
                    Ok(Lookup::Plain(value)) => promise.fulfill(value),
                    Ok(Lookup::Callable) => {
                        let target = promise.clone();
                        promise
                            .host()
                            .schedule(Box::new(move || adopt(&target, &*thenable)));
                    }
                }
            }
        }
    }

    /// Resolves the promise with a plain value, fulfilling it.
    #[inline]
    pub fn fulfill(&self, value: T) {
        self.resolve(Resolution::Value(value));
    }
}

impl<T, E> Resolve<T, E> {
    /// Returns whether this or the paired [`Reject`] has already been called.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.0.already_resolved.get()
    }
}

impl<T: Clone + 'static, E: Reason> Reject<T, E> {
    /// Rejects the promise with `reason`.
    pub fn reject(&self, reason: E) {
        if self.0.already_resolved.replace(true) {
            return;
        }
        self.0.promise.reject_with(reason);
    }
}

impl<T, E> Reject<T, E> {
    /// Returns whether this or the paired [`Resolve`] has already been called.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.0.already_resolved.get()
    }
}

fn reject_self_resolution<T: Clone + 'static, E: Reason>(promise: &Promise<T, E>) {
    log::debug!("promise {} resolved with itself", promise.id());
    promise.reject_with(SelfResolutionError::new().into());
}

/// Makes `promise` follow the outcome of `thenable`.
fn adopt<T: Clone + 'static, E: Reason>(promise: &Promise<T, E>, thenable: &dyn Thenable<T, E>) {
    let (resolve, reject) = resolving_functions(promise);
    if let Err(reason) = thenable.then(resolve, reject.clone()) {
        if reject.is_resolved() {
            log::debug!(
                "ignoring error from `then` of thenable adopted by promise {}",
                promise.id()
            );
        }
        reject.reject(reason);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::{
        promise::Status,
        test::{queue_host, Trail},
    };

    use super::*;

    /// A minimal promise implementation that is not a [`Promise`].
    struct Foreign {
        outcome: Option<Result<i32, String>>,
        lookup: Result<bool, String>,
        then_error: Option<String>,
        calls: Cell<usize>,
    }

    impl Foreign {
        fn new(outcome: Result<i32, String>) -> Self {
            Self {
                outcome: Some(outcome),
                lookup: Ok(true),
                then_error: None,
                calls: Cell::new(0),
            }
        }
    }

    impl Thenable<i32, String> for Foreign {
        fn lookup(&self) -> Result<Lookup<i32>, String> {
            match &self.lookup {
                Ok(true) => Ok(Lookup::Callable),
                Ok(false) => Ok(Lookup::Plain(-1)),
                Err(e) => Err(e.clone()),
            }
        }

        fn then(
            &self,
            resolve: Resolve<i32, String>,
            reject: Reject<i32, String>,
        ) -> Result<(), String> {
            self.calls.set(self.calls.get() + 1);
            match self.outcome.clone() {
                Some(Ok(value)) => resolve.fulfill(value),
                Some(Err(reason)) => reject.reject(reason),
                None => {}
            }
            match &self.then_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn only_first_call_counts() {
        let (host, queue) = queue_host();
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.fulfill(1);
        d.reject.reject("late".into());
        d.resolve.fulfill(2);
        assert!(d.resolve.is_resolved());
        assert!(d.reject.is_resolved());
        queue.run();
        assert_eq!(d.promise.settled(), Some(Ok(1)));
    }

    #[test]
    fn reject_first_wins() {
        let (host, queue) = queue_host();
        let d = crate::deferred::<i32, String>(&host);
        d.reject.reject("first".into());
        d.resolve.fulfill(1);
        queue.run();
        assert_eq!(d.promise.settled(), Some(Err("first".into())));
    }

    #[test]
    fn self_resolution_rejects() {
        let (host, queue) = queue_host();
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Promise(d.promise.clone()));
        // The rejection happens right away, not via adoption.
        assert_eq!(d.promise.status(), Status::Rejected);
        assert_eq!(queue.run(), 0);
        assert_eq!(
            d.promise.settled(),
            Some(Err(SelfResolutionError::new().into()))
        );
    }

    #[test]
    fn self_resolution_through_thenable_rejects() {
        let (host, queue) = queue_host();
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(Rc::new(d.promise.clone())));
        assert_eq!(d.promise.status(), Status::Rejected);
        assert_eq!(queue.run(), 0);
        assert_eq!(
            d.promise.settled(),
            Some(Err(SelfResolutionError::new().into()))
        );
    }

    #[test]
    fn adopting_a_promise_waits_for_it() {
        let (host, queue) = queue_host();
        let inner = crate::deferred::<i32, String>(&host);
        let outer = crate::deferred::<i32, String>(&host);
        outer.resolve.resolve(Resolution::Promise(inner.promise.clone()));
        queue.run();

        // Resolved, but not settled yet.
        assert!(outer.resolve.is_resolved());
        assert_eq!(outer.promise.status(), Status::Pending);

        // The outer promise's own resolving functions are spent.
        outer.reject.reject("ignored".into());
        inner.reject.reject("inner".into());
        queue.run();
        assert_eq!(outer.promise.settled(), Some(Err("inner".into())));
    }

    #[test]
    fn adoption_is_scheduled() {
        let (host, queue) = queue_host();
        let foreign = Rc::new(Foreign::new(Ok(7)));
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(foreign.clone()));
        assert_eq!(foreign.calls.get(), 0);

        queue.run();
        assert_eq!(foreign.calls.get(), 1);
        assert_eq!(d.promise.settled(), Some(Ok(7)));
    }

    #[test]
    fn foreign_rejection_is_adopted() {
        let (host, queue) = queue_host();
        let d = crate::deferred::<i32, String>(&host);
        d.resolve
            .resolve(Resolution::Thenable(Rc::new(Foreign::new(Err("no".into())))));
        queue.run();
        assert_eq!(d.promise.settled(), Some(Err("no".into())));
    }

    #[test]
    fn failing_lookup_rejects() {
        let (host, queue) = queue_host();
        let mut foreign = Foreign::new(Ok(7));
        foreign.lookup = Err("getter threw".into());
        let foreign = Rc::new(foreign);
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(foreign.clone()));
        assert_eq!(d.promise.settled(), Some(Err("getter threw".into())));
        queue.run();
        assert_eq!(foreign.calls.get(), 0);
    }

    #[test]
    fn non_callable_then_fulfills_with_plain_value() {
        let (host, queue) = queue_host();
        let mut foreign = Foreign::new(Ok(7));
        foreign.lookup = Ok(false);
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(Rc::new(foreign)));
        assert_eq!(d.promise.settled(), Some(Ok(-1)));
        assert_eq!(queue.run(), 0);
    }

    #[test]
    fn then_error_rejects_if_unsettled() {
        let (host, queue) = queue_host();
        let mut foreign = Foreign::new(Ok(0));
        foreign.outcome = None;
        foreign.then_error = Some("then threw".into());
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(Rc::new(foreign)));
        queue.run();
        assert_eq!(d.promise.settled(), Some(Err("then threw".into())));
    }

    #[test]
    fn then_error_after_settling_is_ignored() {
        let (host, queue) = queue_host();
        let mut foreign = Foreign::new(Ok(3));
        foreign.then_error = Some("then threw".into());
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(Rc::new(foreign)));
        queue.run();
        assert_eq!(d.promise.settled(), Some(Ok(3)));
    }

    #[test]
    fn foreign_thenable_calling_back_late() {
        // A thenable that stashes the resolving functions and calls them at a later point.
        struct Stash(RefCell<Option<Resolve<i32, String>>>);
        impl Thenable<i32, String> for Stash {
            fn then(
                &self,
                resolve: Resolve<i32, String>,
                _: Reject<i32, String>,
            ) -> Result<(), String> {
                *self.0.borrow_mut() = Some(resolve);
                Ok(())
            }
        }

        let (host, queue) = queue_host();
        let trail = Trail::new();
        let stash = Rc::new(Stash(RefCell::new(None)));
        let d = crate::deferred::<i32, String>(&host);
        d.resolve.resolve(Resolution::Thenable(stash.clone()));
        let t = trail.clone();
        let _observed = d.promise.then(
            move |v| {
                t.push(format!("fulfilled {v}"));
                Ok(Resolution::Value(()))
            },
            Err,
        );
        queue.run();
        assert!(trail.take().is_empty());

        let resolve = stash.0.borrow_mut().take();
        if let Some(resolve) = resolve {
            resolve.fulfill(42);
            resolve.fulfill(43);
        }
        queue.run();
        assert_eq!(trail.take(), ["fulfilled 42"]);
    }
}
