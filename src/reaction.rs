//! Reaction records and the jobs that run them.

use std::rc::Rc;

use crate::{
    error::Reason,
    host::Host,
    promise::{Deferred, Outcome, Unlink},
};

/// A handler registered on a promise, bound to the resolving functions of the promise derived
/// from it.
///
/// `A` is the settlement value the handler receives: the fulfillment value for fulfill reactions
/// and the rejection reason for reject reactions. The type of the derived promise is erased.
pub(crate) struct Reaction<A> {
    run: Box<dyn FnOnce(A)>,
    derived: Rc<dyn Unlink>,
}

impl<A> Reaction<A> {
    /// Drops the handler without running it, returning the promise derived from it.
    pub(crate) fn into_derived(self) -> Rc<dyn Unlink> {
        let Self { run, derived } = self;
        drop(run);
        derived
    }
}

impl<A: 'static> Reaction<A> {
    pub(crate) fn new<U, E, H>(handler: H, derived: Deferred<U, E>) -> Self
    where
        U: Clone + 'static,
        E: Reason,
        H: FnOnce(A) -> Outcome<U, E> + 'static,
    {
        Self {
            derived: derived.promise.unlinker(),
            run: Box::new(move |argument| match handler(argument) {
                Ok(resolution) => derived.resolve.resolve(resolution),
                Err(reason) => derived.reject.reject(reason),
            }),
        }
    }

    /// Schedules a job on `host` that runs this reaction with `argument`.
    pub(crate) fn enqueue(self, host: &Host, argument: A) {
        let run = self.run;
        host.schedule(Box::new(move || run(argument)));
    }
}

/// Schedules one job per reaction, in registration order.
pub(crate) fn trigger<A: Clone + 'static>(host: &Host, reactions: Vec<Reaction<A>>, argument: A) {
    for reaction in reactions {
        reaction.enqueue(host, argument.clone());
    }
}
