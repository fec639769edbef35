//! ECMAScript-style promises for single-threaded, job-queue driven programs.
//!
//! (if you're looking for a way to communicate results between threads, this is not it; check out
//! channels or an `async` runtime instead)
//!
//! # Overview
//!
//! A [`Promise`] represents the eventual outcome of an operation: it is settled exactly once,
//! either *fulfilled* with a value or *rejected* with a reason. Code interested in the outcome
//! registers handlers via [`Promise::then`] (or [`Promise::and_then`], [`Promise::catch`] and
//! [`Promise::finally`]), each of which returns a new promise for the handler's own result, so
//! promises can be chained into pipelines.
//!
//! ## Jobs and hosts
//!
//! Handlers never run synchronously. When a promise settles, or a handler is registered on an
//! already settled promise, a job is handed to the promise's [`Host`], which forwards it to a
//! [`Scheduler`]. Jobs run in the order they were scheduled, after the code that scheduled them
//! has returned. This makes handler execution order independent of whether a promise had
//! already settled when the handler was registered.
//!
//! The bundled [`JobQueue`] is a scheduler that is drained explicitly via [`JobQueue::run`].
//!
//! ## Resolution
//!
//! Promises are *resolved* rather than fulfilled directly: resolving a promise with another
//! promise, or with any other [`Thenable`], makes it adopt that value's eventual outcome. This is
//! what lets a handler return a promise to make the chain wait for it. A promise resolved with
//! itself is rejected with a [`SelfResolutionError`].
//!
//! ## Unhandled rejections
//!
//! A promise that is rejected without any handler attached reports itself to the host's
//! [`RejectionTracker`] (a no-op by default). [`UnhandledRejections`] can be used to find such
//! promises.
//!
//! # Usage
//!
//! A promise is created with an executor that receives its resolving functions:
//!
//! ```
//! use pwomise::{Host, JobQueue, Promise, Resolution};
//!
//! let queue = JobQueue::new();
//! let host = Host::new(queue.clone());
//!
//! let doubled = Promise::<i32, String>::new(&host, |resolve, _reject| {
//!     resolve.fulfill(5);
//!     Ok(())
//! })
//! .and_then(|x| Ok(Resolution::Value(x * 2)));
//!
//! // Nothing happens until the queued jobs run.
//! assert_eq!(doubled.settled(), None);
//! queue.run();
//! assert_eq!(doubled.settled(), Some(Ok(10)));
//! ```
//!
//! Errors returned from handlers reject the derived promise, and can be recovered from further
//! down the chain:
//!
//! ```
//! use pwomise::{Host, JobQueue, Promise, Resolution};
//!
//! let queue = JobQueue::new();
//! let host = Host::new(queue.clone());
//!
//! let recovered = Promise::<i32, String>::resolve(&host, Resolution::Value(1))
//!     .and_then(|_| -> Result<Resolution<i32, String>, String> { Err("boom".into()) })
//!     .and_then(|x| Ok(Resolution::Value(x + 1))) // skipped
//!     .catch(|e| Ok(Resolution::Value(e.len() as i32)));
//!
//! queue.run();
//! assert_eq!(recovered.settled(), Some(Ok(4)));
//! ```
//!
//! [`deferred`] hands out the resolving functions directly, which is useful when the code that
//! will settle the promise is not known yet. Combined with [`Promise::all`]:
//!
//! ```
//! use pwomise::{deferred, Host, JobQueue, Promise, Resolution};
//!
//! let queue = JobQueue::new();
//! let host = Host::new(queue.clone());
//!
//! let first = deferred::<&str, String>(&host);
//! let second = deferred::<&str, String>(&host);
//! let both = Promise::all(
//!     &host,
//!     [
//!         Resolution::Promise(first.promise.clone()),
//!         Resolution::Promise(second.promise.clone()),
//!     ],
//! );
//!
//! // Fulfillment order does not affect the order of the results.
//! second.resolve.fulfill("world");
//! first.resolve.fulfill("hello");
//! queue.run();
//! assert_eq!(both.settled(), Some(Ok(vec!["hello", "world"])));
//! ```

mod combinators;
mod drop;
mod error;
mod host;
mod promise;
mod reaction;
mod resolve;
mod tracker;

pub use error::{Reason, SelfResolutionError};
pub use host::{Host, HostBuilder, Job, JobQueue, PromiseId, Scheduler};
pub use promise::{deferred, Deferred, Outcome, Promise, Status};
pub use resolve::{Lookup, Reject, Resolution, Resolve, Thenable};
pub use tracker::{NoopTracker, RejectionTracker, TrackOperation, UnhandledRejections};

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::test::{queue_host, tracked_host, Trail};

    use super::*;

    #[test]
    fn chain_through_adopted_promise() {
        let (host, queue) = queue_host();
        let inner = deferred::<i32, String>(&host);
        let inner_promise = inner.promise.clone();
        let result = Promise::<i32, String>::resolve(&host, Resolution::Value(1))
            .and_then(move |_| Ok(Resolution::Promise(inner_promise)))
            .and_then(|x| Ok(Resolution::Value(x * 10)));

        queue.run();
        assert_eq!(result.status(), Status::Pending);
        inner.resolve.fulfill(4);
        queue.run();
        assert_eq!(result.settled(), Some(Ok(40)));
    }

    #[test]
    fn resolve_of_resolved_promise_is_equivalent() {
        let (host, queue) = queue_host();
        let direct = Promise::<i32, String>::resolve(&host, Resolution::Value(1));
        let nested = Promise::resolve(
            &host,
            Resolution::Promise(Promise::<i32, String>::resolve(&host, Resolution::Value(1))),
        );
        queue.run();
        assert_eq!(direct.settled(), nested.settled());
        assert_eq!(nested.settled(), Some(Ok(1)));
    }

    #[test]
    fn interleaved_chains_run_in_lockstep() {
        let (host, queue) = queue_host();
        let trail = Trail::new();
        for name in ["a", "b"] {
            let (t1, t2) = (trail.clone(), trail.clone());
            let _ = Promise::<(), String>::resolve(&host, Resolution::Value(()))
                .and_then(move |()| {
                    t1.push(format!("{name}1"));
                    Ok(Resolution::Value(()))
                })
                .and_then(move |()| {
                    t2.push(format!("{name}2"));
                    Ok(Resolution::Value(()))
                });
        }
        queue.run();
        assert_eq!(trail.take(), ["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn custom_scheduler() {
        // A scheduler that counts the jobs it forwards to a queue.
        struct Counting {
            queue: JobQueue,
            count: std::cell::Cell<usize>,
        }
        impl Scheduler for Counting {
            fn schedule(&self, job: Job) {
                self.count.set(self.count.get() + 1);
                self.queue.schedule(job);
            }
        }

        let queue = JobQueue::new();
        let scheduler = Rc::new(Counting {
            queue: queue.clone(),
            count: Default::default(),
        });
        let host = Host::new(scheduler.clone());
        let promise = Promise::<i32, String>::resolve(&host, Resolution::Value(1))
            .and_then(|x| Ok(Resolution::Value(x + 1)));
        assert_eq!(scheduler.count.get(), 1);
        queue.run();
        assert_eq!(promise.settled(), Some(Ok(2)));
    }

    #[test]
    fn uncaught_chain_is_reported_once_at_its_end() {
        let (host, queue, tracker) = tracked_host();
        let end = Promise::<i32, String>::reject(&host, "boom".into())
            .and_then(|x| Ok(Resolution::Value(x)))
            .and_then(|x| Ok(Resolution::Value(x)));
        queue.run();
        assert_eq!(tracker.report(), [end.id()]);
    }
}
