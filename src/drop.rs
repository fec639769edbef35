//! Scope guards.

/// Guard returned by [`defer`], running its callback when it goes out of scope.
///
/// The callback also runs while unwinding, so it sees the state left behind by a panicking job.
#[must_use = "`Defer` should be assigned to a variable, or it will run its callback immediately"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a guard that runs `cb` at the end of the enclosing scope.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}
