use super::channel::EventConsumer;
use crossbeam_channel::RecvTimeoutError;
use std::time::Duration;

pub type CancellationMessage = ();

impl EventConsumer<CancellationMessage> {
    /// True if a cancellation message (or a channel error) arrived before `timeout`
    /// elapsed; otherwise blocks for the full timeout and returns false.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        let timed_out = matches!(self.as_ref().recv_timeout(timeout), Err(RecvTimeoutError::Timeout));
        !timed_out
    }
}
