//! The environment promises run in.
//!
//! Promises never run reaction handlers on the call stack that settled them. Instead, every
//! handler invocation is packaged as a [`Job`] and handed to a [`Scheduler`], which runs it once
//! the current synchronous work has finished. A [`Host`] bundles the scheduler with the other
//! collaborators a promise needs (a [`RejectionTracker`] and an id counter), and is passed to
//! every promise constructor.
//!
//! [`JobQueue`] is the bundled [`Scheduler`]: a FIFO queue that the owner drains explicitly by
//! calling [`JobQueue::run`]. Embedders with their own event loop can implement [`Scheduler`]
//! instead.

use std::{cell::Cell, fmt, rc::Rc};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    drop::defer,
    tracker::{NoopTracker, RejectionTracker, TrackOperation},
};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce()>;

/// Runs [`Job`]s after the current synchronous execution has finished.
///
/// Implementations must run jobs in the order they were scheduled, and must not run a job from
/// within [`Scheduler::schedule`].
pub trait Scheduler {
    fn schedule(&self, job: Job);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, job: Job) {
        (**self).schedule(job);
    }
}

/// A FIFO queue of [`Job`]s, drained by its owner.
///
/// Cloning a [`JobQueue`] yields another handle to the same queue, so one clone can be handed to a
/// [`Host`] while another one is used to run the queued jobs.
///
/// Queued jobs keep the promises they settle alive, and those keep their [`Host`] and with it the
/// queue. A queue that is no longer going to be run must be emptied with [`JobQueue::clear`] (or
/// drained with [`JobQueue::run`]), otherwise none of this is ever freed.
#[derive(Clone)]
pub struct JobQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Creates an empty [`JobQueue`].
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Runs jobs until the queue is empty, returning how many jobs were run.
    ///
    /// Jobs scheduled by running jobs are appended to the queue and run by the same call.
    ///
    /// If a job panics, the panic propagates to the caller and the remaining jobs stay queued.
    pub fn run(&self) -> usize {
        let ran = Cell::new(0);
        log::trace!("draining {} queued jobs", self.len());
        let _guard = defer(|| log::trace!("job queue drained after {} jobs", ran.get()));
        while self.run_one() {
            ran.set(ran.get() + 1);
        }
        ran.get()
    }

    /// Runs the oldest queued job, if any.
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_one(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }

    /// Drops all queued jobs without running them, returning how many were dropped.
    ///
    /// Promises waiting on the dropped jobs stay pending.
    pub fn clear(&self) -> usize {
        let dropped = self.receiver.try_iter().count();
        log::trace!("dropped {dropped} queued jobs");
        dropped
    }

    /// Returns the number of jobs waiting to be run.
    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Scheduler for JobQueue {
    fn schedule(&self, job: Job) {
        if self.sender.send(job).is_err() {
            // We hold a `Receiver`, so the channel can never be disconnected.
            unreachable!("job queue disconnected");
        }
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// Identifies a promise within its [`Host`].
///
/// Ids are handed out sequentially by each [`Host`], starting at 0. They are not unique across
/// different hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A builder object that can be used to configure and create a [`Host`].
pub struct HostBuilder {
    name: Option<String>,
    tracker: Box<dyn RejectionTracker>,
}

impl HostBuilder {
    /// Sets the name of the [`Host`], which is included in its log output.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the [`RejectionTracker`] that is notified about unhandled rejections.
    ///
    /// By default, a [`NoopTracker`] is used.
    pub fn tracker<R: RejectionTracker + 'static>(self, tracker: R) -> Self {
        Self {
            tracker: Box::new(tracker),
            ..self
        }
    }

    /// Creates a [`Host`] that submits promise jobs to `scheduler`.
    pub fn build<S: Scheduler + 'static>(self, scheduler: S) -> Host {
        if let Some(name) = &self.name {
            log::trace!("host '{name}' created");
        }
        Host(Rc::new(HostInner {
            name: self.name,
            scheduler: Box::new(scheduler),
            tracker: self.tracker,
            next_id: Cell::new(0),
        }))
    }
}

/// Shared handle to the collaborators used by promises.
///
/// Every promise keeps a handle to the [`Host`] it was created with, and promises derived from it
/// (via [`Promise::then`][crate::Promise::then] and friends) inherit it.
#[derive(Clone)]
pub struct Host(Rc<HostInner>);

struct HostInner {
    name: Option<String>,
    scheduler: Box<dyn Scheduler>,
    tracker: Box<dyn RejectionTracker>,
    next_id: Cell<u64>,
}

impl Host {
    /// Returns a builder that can be used to configure and create a [`Host`].
    #[inline]
    pub fn builder() -> HostBuilder {
        HostBuilder {
            name: None,
            tracker: Box::new(NoopTracker),
        }
    }

    /// Creates an unnamed [`Host`] using `scheduler` and a [`NoopTracker`].
    pub fn new<S: Scheduler + 'static>(scheduler: S) -> Self {
        Self::builder().build(scheduler)
    }

    /// Returns the name configured via [`HostBuilder::name`].
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub(crate) fn label(&self) -> &str {
        self.name().unwrap_or("host")
    }

    pub(crate) fn schedule(&self, job: Job) {
        self.0.scheduler.schedule(job);
    }

    pub(crate) fn track(&self, id: PromiseId, operation: TrackOperation) {
        self.0.tracker.track(id, operation);
    }

    pub(crate) fn next_id(&self) -> PromiseId {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        PromiseId(id)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.0.name)
            .field("promises", &self.0.next_id.get())
            .finish_non_exhaustive()
    }
}
