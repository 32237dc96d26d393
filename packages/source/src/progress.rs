//! Progress reporting for long-running loader steps.
//!
//! [`ProgressCallback`] keeps the loader and intersection code independent
//! of how progress is rendered. The CLI supplies `indicatif` bars.

/// Receives progress updates from a long-running step.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total expected units of work.
    fn set_total(&self, total: u64);

    /// Sets the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advances progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Updates the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Marks progress as complete with a final message.
    fn finish(&self, msg: String);

    /// Marks progress as complete and removes the indicator.
    fn finish_and_clear(&self);
}
