use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::Rc,
};

use crate::{
    error::Reason,
    host::{Host, PromiseId},
    reaction::{trigger, Reaction},
    resolve::{resolving_functions, Reject, Resolution, Resolve, Thenable},
    tracker::TrackOperation,
};

/// The value returned by reaction handlers.
///
/// `Ok` resolves the derived promise with the contained [`Resolution`], `Err` rejects it with the
/// contained reason.
pub type Outcome<T, E> = Result<Resolution<T, E>, E>;

/// The settlement status of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

enum State<T, E> {
    Pending {
        fulfill_reactions: Vec<Reaction<T>>,
        reject_reactions: Vec<Reaction<E>>,
    },
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn take_reactions(&mut self) -> Option<(Vec<Reaction<T>>, Vec<Reaction<E>>)> {
        match self {
            State::Pending {
                fulfill_reactions,
                reject_reactions,
            } => Some((mem::take(fulfill_reactions), mem::take(reject_reactions))),
            State::Fulfilled(_) | State::Rejected(_) => None,
        }
    }
}

struct Shared<T, E> {
    state: RefCell<State<T, E>>,
    /// Set once any reaction has been registered.
    handled: Cell<bool>,
    id: PromiseId,
    host: Host,
}

/// A promise whose pending reactions can be dropped without knowing its type.
pub(crate) trait Unlink {
    /// Drops all pending reactions, returning the promises derived from them.
    fn unlink(&self) -> Vec<Rc<dyn Unlink>>;
}

impl<T: 'static, E: 'static> Unlink for Shared<T, E> {
    fn unlink(&self) -> Vec<Rc<dyn Unlink>> {
        let reactions = self.state.borrow_mut().take_reactions();
        match reactions {
            Some((fulfill, reject)) => derived_promises(fulfill, reject),
            None => Vec::new(),
        }
    }
}

fn derived_promises<T, E>(
    fulfill: Vec<Reaction<T>>,
    reject: Vec<Reaction<E>>,
) -> Vec<Rc<dyn Unlink>> {
    let fulfill = fulfill.into_iter().map(Reaction::into_derived);
    let reject = reject.into_iter().map(Reaction::into_derived);
    fulfill.chain(reject).collect()
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        // Each pending reaction owns the promise derived from it. Dropping those recursively would
        // recurse once per link of an unsettled chain, so unreferenced links are emptied here.
        let Some((fulfill, reject)) = self.state.get_mut().take_reactions() else {
            return;
        };
        let mut derived = derived_promises(fulfill, reject);
        while let Some(promise) = derived.pop() {
            if Rc::strong_count(&promise) == 1 {
                derived.extend(promise.unlink());
            }
        }
    }
}

/// A value that becomes available at some later point, or fails to.
///
/// A [`Promise`] starts out *pending* and is settled exactly once, either *fulfilled* with a value
/// of type `T` or *rejected* with a reason of type `E`. Handlers registered with
/// [`Promise::then`] (and the related methods) are invoked with the outcome, but never on the call
/// stack that registered them or that settled the promise: each invocation is a job submitted to
/// the promise's [`Host`].
///
/// Cloning a [`Promise`] yields another handle to the same promise.
pub struct Promise<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    /// Returns the current settlement status.
    pub fn status(&self) -> Status {
        match &*self.shared.state.borrow() {
            State::Pending { .. } => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    /// Returns whether any handler has ever been registered on this promise.
    #[inline]
    pub fn is_handled(&self) -> bool {
        self.shared.handled.get()
    }

    #[inline]
    pub fn id(&self) -> PromiseId {
        self.shared.id
    }

    /// Returns the [`Host`] this promise was created with.
    #[inline]
    pub fn host(&self) -> &Host {
        &self.shared.host
    }

    /// Returns whether `self` and `other` are handles to the same promise.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn unlinker(&self) -> Rc<dyn Unlink>
    where
        T: 'static,
        E: 'static,
    {
        self.shared.clone()
    }

    fn pending(host: &Host) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State::Pending {
                    fulfill_reactions: Vec::new(),
                    reject_reactions: Vec::new(),
                }),
                handled: Cell::new(false),
                id: host.next_id(),
                host: host.clone(),
            }),
        }
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// Returns the outcome of the promise, or [`None`] if it is still pending.
    pub fn settled(&self) -> Option<Result<T, E>> {
        match &*self.shared.state.borrow() {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

impl<T: Clone + 'static, E: Reason> Promise<T, E> {
    /// Creates a [`Promise`] and runs `executor` to settle it.
    ///
    /// `executor` is invoked immediately, before this function returns, and is passed the
    /// promise's resolving functions. It may call them right away, or hold on to them and call
    /// them later. If `executor` returns an error before settling the promise, the promise is
    /// rejected with that error.
    pub fn new<F>(host: &Host, executor: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending(host);
        let (resolve, reject) = resolving_functions(&promise);
        if let Err(reason) = executor(resolve, reject.clone()) {
            reject.reject(reason);
        }
        promise
    }

    /// Returns a [`Promise`] resolved with `resolution`.
    ///
    /// If `resolution` already is a [`Promise`], it is returned unchanged.
    pub fn resolve(host: &Host, resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Promise(promise) => promise,
            resolution => {
                let d = deferred(host);
                d.resolve.resolve(resolution);
                d.promise
            }
        }
    }

    /// Returns a [`Promise`] rejected with `reason`.
    pub fn reject(host: &Host, reason: E) -> Self {
        let d = deferred(host);
        d.reject.reject(reason);
        d.promise
    }

    /// Registers handlers for both outcomes of this promise, and returns a promise that is
    /// resolved with the result of whichever handler runs.
    ///
    /// Exactly one of the handlers is invoked, from a job scheduled once this promise settles (or
    /// right away, if it already has). Handlers registered on the same promise run in the order
    /// they were registered.
    ///
    /// If the handler returns `Ok`, the returned promise is resolved with the contained
    /// [`Resolution`], so returning another promise makes the returned promise follow it. If the
    /// handler returns `Err`, the returned promise is rejected with the error.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        R: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        let derived = deferred(&self.shared.host);
        let promise = derived.promise.clone();
        let fulfill_reaction = Reaction::new(on_fulfilled, derived.clone());
        let reject_reaction = Reaction::new(on_rejected, derived);
        self.perform_then(fulfill_reaction, reject_reaction);
        promise
    }

    /// Registers a fulfillment handler.
    ///
    /// If this promise is rejected, the returned promise is rejected with the same reason.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
    {
        self.then(on_fulfilled, Err)
    }

    /// Registers a rejection handler.
    ///
    /// If this promise is fulfilled, the returned promise is fulfilled with the same value.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Outcome<T, E> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// Registers a handler that runs when the promise settles, regardless of the outcome.
    ///
    /// The returned promise settles like this promise, after the resolution returned by
    /// `on_finally` has been fulfilled. If `on_finally` fails, or the resolution it returns is
    /// rejected, the returned promise is rejected with that reason instead.
    pub fn finally<F>(&self, on_finally: F) -> Promise<T, E>
    where
        F: FnOnce() -> Outcome<(), E> + 'static,
    {
        let on_finally = Rc::new(Cell::new(Some(on_finally)));
        let (host, on_fulfilled) = (self.shared.host.clone(), on_finally.clone());
        let on_rejected_host = host.clone();
        self.then(
            move |value| after_finally(&host, &on_fulfilled, Ok(value)),
            move |reason| after_finally(&on_rejected_host, &on_finally, Err(reason)),
        )
    }

    fn perform_then(&self, fulfill_reaction: Reaction<T>, reject_reaction: Reaction<E>) {
        let outcome = match &mut *self.shared.state.borrow_mut() {
            State::Pending {
                fulfill_reactions,
                reject_reactions,
            } => {
                fulfill_reactions.push(fulfill_reaction);
                reject_reactions.push(reject_reaction);
                self.shared.handled.set(true);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(reason) => Err(reason.clone()),
        };

        let host = &self.shared.host;
        match outcome {
            Ok(value) => fulfill_reaction.enqueue(host, value),
            Err(reason) => {
                if !self.shared.handled.get() {
                    host.track(self.shared.id, TrackOperation::Handle);
                }
                reject_reaction.enqueue(host, reason);
            }
        }
        self.shared.handled.set(true);
    }

    /// Fulfills the promise, unless it is already settled.
    pub(crate) fn fulfill(&self, value: T) {
        let reactions = {
            let mut state = self.shared.state.borrow_mut();
            if !matches!(*state, State::Pending { .. }) {
                return;
            }
            match mem::replace(&mut *state, State::Fulfilled(value.clone())) {
                State::Pending {
                    fulfill_reactions, ..
                } => fulfill_reactions,
                State::Fulfilled(_) | State::Rejected(_) => unreachable!(),
            }
        };
        log::trace!(
            "{}: promise {} fulfilled, {} reactions",
            self.shared.host.label(),
            self.shared.id,
            reactions.len()
        );
        trigger(&self.shared.host, reactions, value);
    }

    /// Rejects the promise, unless it is already settled.
    pub(crate) fn reject_with(&self, reason: E) {
        let reactions = {
            let mut state = self.shared.state.borrow_mut();
            if !matches!(*state, State::Pending { .. }) {
                return;
            }
            match mem::replace(&mut *state, State::Rejected(reason.clone())) {
                State::Pending {
                    reject_reactions, ..
                } => reject_reactions,
                State::Fulfilled(_) | State::Rejected(_) => unreachable!(),
            }
        };
        log::trace!(
            "{}: promise {} rejected, {} reactions",
            self.shared.host.label(),
            self.shared.id,
            reactions.len()
        );
        if !self.shared.handled.get() {
            self.shared.host.track(self.shared.id, TrackOperation::Reject);
        }
        trigger(&self.shared.host, reactions, reason);
    }
}

fn after_finally<T, E, F>(
    host: &Host,
    on_finally: &Cell<Option<F>>,
    outcome: Result<T, E>,
) -> Outcome<T, E>
where
    T: Clone + 'static,
    E: Reason,
    F: FnOnce() -> Outcome<(), E>,
{
    // Only one of the two handlers registered by `finally` ever runs.
    let Some(on_finally) = on_finally.take() else {
        return outcome.map(Resolution::Value);
    };
    let done = Promise::resolve(host, on_finally()?);
    let passthrough = done.and_then(move |()| outcome.map(Resolution::Value));
    Ok(Resolution::Promise(passthrough))
}

impl<T: Clone + 'static, E: Reason> Thenable<T, E> for Promise<T, E> {
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E> {
        Promise::then(
            self,
            move |value| {
                resolve.fulfill(value);
                Ok(Resolution::Value(()))
            },
            move |reason| {
                reject.reject(reason);
                Ok(Resolution::Value(()))
            },
        );
        Ok(())
    }

    fn as_promise(&self) -> Option<&Promise<T, E>> {
        Some(self)
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .field("handled", &self.shared.handled.get())
            .finish_non_exhaustive()
    }
}

/// A pending [`Promise`] together with its resolving functions.
///
/// Created by [`deferred`].
pub struct Deferred<T, E> {
    pub promise: Promise<T, E>,
    pub resolve: Resolve<T, E>,
    pub reject: Reject<T, E>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            resolve: self.resolve.clone(),
            reject: self.reject.clone(),
        }
    }
}

/// Creates a pending [`Promise`] and returns it along with its resolving functions.
///
/// This is equivalent to calling [`Promise::new`] with an executor that stores the resolving
/// functions, and is convenient when the code settling the promise is not known at construction
/// time.
pub fn deferred<T: Clone + 'static, E: Reason>(host: &Host) -> Deferred<T, E> {
    let promise = Promise::pending(host);
    let (resolve, reject) = resolving_functions(&promise);
    Deferred {
        promise,
        resolve,
        reject,
    }
}
