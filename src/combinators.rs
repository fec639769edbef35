//! Combinators aggregating several promises into one.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{
    error::Reason,
    host::Host,
    promise::{deferred, Promise},
    resolve::Resolution,
};

/// Result slots filled in by the inputs of an aggregating combinator, in input order.
struct Slots<V> {
    values: RefCell<Vec<Option<V>>>,
    /// Number of slots not filled yet, plus one until all inputs have been registered.
    remaining: Cell<usize>,
}

impl<V> Slots<V> {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new(Vec::new()),
            remaining: Cell::new(1),
        })
    }

    /// Adds an empty slot and returns its index.
    fn reserve(&self) -> usize {
        let mut values = self.values.borrow_mut();
        values.push(None);
        self.remaining.set(self.remaining.get() + 1);
        values.len() - 1
    }

    /// Fills slot `index`, returning all values if it was the last one missing.
    fn fill(&self, index: usize, value: V) -> Option<Vec<V>> {
        self.values.borrow_mut()[index] = Some(value);
        self.release()
    }

    /// Marks one outstanding slot (or the registration phase) as done, returning all values if
    /// nothing is outstanding anymore.
    fn release(&self) -> Option<Vec<V>> {
        let remaining = self.remaining.get() - 1;
        self.remaining.set(remaining);
        if remaining != 0 {
            return None;
        }
        Some(self.values.take().into_iter().flatten().collect())
    }
}

impl<T: Clone + 'static, E: Reason> Promise<T, E> {
    /// Returns a promise that is fulfilled with the values of all inputs once every input has been
    /// fulfilled, or rejected with the first rejection reason among the inputs.
    ///
    /// Each input is converted to a promise with [`Promise::resolve`]. The resulting values are in
    /// input order, regardless of the order the inputs were fulfilled in. If there are no inputs,
    /// the returned promise is fulfilled immediately with an empty [`Vec`].
    pub fn all<I>(host: &Host, iterable: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Resolution<T, E>>,
    {
        let aggregate = deferred(host);
        let slots = Slots::new();
        for item in iterable {
            let index = slots.reserve();
            let (slots, resolve) = (slots.clone(), aggregate.resolve.clone());
            let reject = aggregate.reject.clone();
            Promise::resolve(host, item).then(
                move |value| {
                    if let Some(values) = slots.fill(index, value) {
                        resolve.fulfill(values);
                    }
                    Ok(Resolution::Value(()))
                },
                move |reason| {
                    reject.reject(reason);
                    Ok(Resolution::Value(()))
                },
            );
        }
        if let Some(values) = slots.release() {
            aggregate.resolve.fulfill(values);
        }
        aggregate.promise
    }

    /// Returns a promise that is fulfilled with the outcomes of all inputs once every input has
    /// settled.
    ///
    /// The returned promise is never rejected. Outcomes are in input order.
    pub fn all_settled<I>(host: &Host, iterable: I) -> Promise<Vec<Result<T, E>>, E>
    where
        I: IntoIterator<Item = Resolution<T, E>>,
    {
        let aggregate = deferred(host);
        let slots = Slots::new();
        for item in iterable {
            let index = slots.reserve();
            let (fulfilled, on_fulfilled) = (slots.clone(), aggregate.resolve.clone());
            let (rejected, on_rejected) = (slots.clone(), aggregate.resolve.clone());
            Promise::resolve(host, item).then(
                move |value| {
                    if let Some(outcomes) = fulfilled.fill(index, Ok(value)) {
                        on_fulfilled.fulfill(outcomes);
                    }
                    Ok(Resolution::Value(()))
                },
                move |reason| {
                    if let Some(outcomes) = rejected.fill(index, Err(reason)) {
                        on_rejected.fulfill(outcomes);
                    }
                    Ok(Resolution::Value(()))
                },
            );
        }
        if let Some(outcomes) = slots.release() {
            aggregate.resolve.fulfill(outcomes);
        }
        aggregate.promise
    }

    /// Returns a promise that settles like the first input to settle.
    ///
    /// Each input is converted to a promise with [`Promise::resolve`]. The remaining inputs still
    /// run to completion, but their outcomes are ignored. If there are no inputs, the returned
    /// promise stays pending forever.
    pub fn race<I>(host: &Host, iterable: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Resolution<T, E>>,
    {
        let aggregate = deferred(host);
        for item in iterable {
            let (resolve, reject) = (aggregate.resolve.clone(), aggregate.reject.clone());
            Promise::resolve(host, item).then(
                move |value| {
                    resolve.fulfill(value);
                    Ok(Resolution::Value(()))
                },
                move |reason| {
                    reject.reject(reason);
                    Ok(Resolution::Value(()))
                },
            );
        }
        aggregate.promise
    }
}
