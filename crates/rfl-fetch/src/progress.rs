//! Progress reporting hooks for long fetches.

/// Receives `(done, total)` updates while a request is served.
pub trait Progress {
    fn update(&mut self, done: usize, total: usize);

    fn complete(&mut self) {}
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _done: usize, _total: usize) {}
}
