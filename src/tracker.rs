//! Tracking of unhandled rejections.
//!
//! A promise that is rejected while nothing has registered a rejection handler on it reports
//! itself to its [`Host`][crate::Host]'s [`RejectionTracker`]. When a handler is attached to such
//! a promise later on, the report is retracted. Trackers never influence the promise itself; they
//! exist so that tooling and tests can observe rejections that would otherwise be silently lost.

use std::{cell::RefCell, rc::Rc};

use crate::host::PromiseId;

/// The event reported to a [`RejectionTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOperation {
    /// The promise was rejected without any handler attached.
    Reject,
    /// A handler was attached to a promise that was previously reported with
    /// [`TrackOperation::Reject`].
    Handle,
}

/// Receives notifications about unhandled rejections.
///
/// Promise ids are only unique within a single [`Host`][crate::Host], so a tracker should not be
/// shared between hosts.
pub trait RejectionTracker {
    fn track(&self, id: PromiseId, operation: TrackOperation);
}

impl<R: RejectionTracker + ?Sized> RejectionTracker for Rc<R> {
    fn track(&self, id: PromiseId, operation: TrackOperation) {
        (**self).track(id, operation);
    }
}

/// A [`RejectionTracker`] that ignores all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl RejectionTracker for NoopTracker {
    fn track(&self, _: PromiseId, _: TrackOperation) {}
}

/// A [`RejectionTracker`] that remembers which promises are currently rejected and unhandled.
///
/// Wrap it in an [`Rc`] to keep access to it after handing it to
/// [`HostBuilder::tracker`][crate::HostBuilder::tracker].
#[derive(Debug, Default)]
pub struct UnhandledRejections {
    /// Unhandled promises, in the order they were rejected.
    pending: RefCell<Vec<PromiseId>>,
}

impl UnhandledRejections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the promises that are currently rejected without a handler.
    pub fn unhandled(&self) -> Vec<PromiseId> {
        self.pending.borrow().clone()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Logs a warning for every currently unhandled rejection and forgets about them.
    ///
    /// This is meant to be called once the job queue has been drained, when no more handlers can
    /// be attached by already-scheduled work.
    pub fn report(&self) -> Vec<PromiseId> {
        let pending = self.pending.take();
        for id in &pending {
            log::warn!("promise {id} was rejected, but the rejection was never handled");
        }
        pending
    }
}

impl RejectionTracker for UnhandledRejections {
    fn track(&self, id: PromiseId, operation: TrackOperation) {
        let mut pending = self.pending.borrow_mut();
        match operation {
            TrackOperation::Reject => pending.push(id),
            TrackOperation::Handle => pending.retain(|&p| p != id),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{test::tracked_host, Promise, Resolution};

    #[test]
    fn unhandled_rejection_is_reported() {
        let (host, queue, tracker) = tracked_host();
        let promise = Promise::<(), String>::reject(&host, "boom".into());
        queue.run();

        assert_eq!(tracker.unhandled(), [promise.id()]);
        assert_eq!(tracker.report(), [promise.id()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn late_handler_retracts_report() {
        let (host, queue, tracker) = tracked_host();
        let promise = Promise::<(), String>::reject(&host, "boom".into());
        assert_eq!(tracker.unhandled(), [promise.id()]);

        let caught = promise.catch(|_| Ok(().into()));
        assert!(tracker.is_empty());
        queue.run();
        assert!(tracker.is_empty());
        assert!(caught.settled().is_some());
    }

    #[test]
    fn handled_before_rejection_is_not_reported() {
        let (host, queue, tracker) = tracked_host();
        let d = crate::deferred::<(), String>(&host);
        let _caught = d.promise.catch(|_| Ok(().into()));
        d.reject.reject("boom".into());
        queue.run();
        assert!(tracker.is_empty());
    }

    #[test]
    fn rejection_propagates_to_unhandled_derived_promise() {
        let (host, queue, tracker) = tracked_host();
        let promise = Promise::<i32, String>::reject(&host, "boom".into());
        let derived = promise.and_then(|x| Ok(Resolution::Value(x + 1)));
        queue.run();

        // The rejected promise is handled by the `and_then`, but the derived promise is not.
        assert_eq!(tracker.unhandled(), [derived.id()]);
    }
}
