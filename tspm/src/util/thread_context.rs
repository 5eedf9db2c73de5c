use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::util::threads::spawn_named_thread;

const GRACEFUL_STOP_RETRY: u16 = 10;
const GRACEFUL_STOP_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A named background thread that has not been spawned yet. The callback receives a
/// [`CancellationMessage`] consumer it should poll (or block on) to know when to stop.
pub struct NotStartedThreadContext<F, T>
where
    F: FnOnce(EventConsumer<CancellationMessage>) -> T + Send + 'static,
    T: Send + 'static,
{
    thread_name: String,
    callback: F,
}

impl<F, T> NotStartedThreadContext<F, T>
where
    F: FnOnce(EventConsumer<CancellationMessage>) -> T + Send + 'static,
    T: Send + 'static,
{
    pub fn new<S: Into<String>>(thread_name: S, callback: F) -> Self {
        Self {
            thread_name: thread_name.into(),
            callback,
        }
    }

    pub fn start(self) -> StartedThreadContext {
        let (stop_publisher, stop_consumer) = pub_sub::<CancellationMessage>();

        StartedThreadContext::new(
            self.thread_name.clone(),
            stop_publisher,
            spawn_named_thread(&self.thread_name, move || {
                (self.callback)(stop_consumer);
            }),
        )
    }
}

pub struct StartedThreadContext {
    thread_name: String,
    stop_publisher: EventPublisher<CancellationMessage>,
    join_handle: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThreadContextStopperError {
    #[error("error sending stop signal to '{0}' thread: {1}")]
    EventPublisherError(String, String),

    #[error("error joining '{0}' thread")]
    JoinError(String),

    #[error("timeout waiting for '{0}' thread to finish")]
    StopTimeout(String),
}

impl StartedThreadContext {
    pub fn new(
        thread_name: String,
        stop_publisher: EventPublisher<CancellationMessage>,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            thread_name,
            stop_publisher,
            join_handle,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Sends a stop signal, then polls for completion up to
    /// `GRACEFUL_STOP_RETRY * GRACEFUL_STOP_RETRY_INTERVAL` before giving up.
    pub fn stop(self) -> Result<(), ThreadContextStopperError> {
        self.stop_publisher.publish(()).map_err(|err| {
            ThreadContextStopperError::EventPublisherError(self.thread_name.clone(), err.to_string())
        })?;

        for _ in 0..GRACEFUL_STOP_RETRY {
            if self.join_handle.is_finished() {
                return self.join_handle.join().map_err(|err| {
                    ThreadContextStopperError::JoinError(
                        err.downcast_ref::<&str>().unwrap_or(&"unknown error").to_string(),
                    )
                });
            }
            sleep(GRACEFUL_STOP_RETRY_INTERVAL);
        }

        Err(ThreadContextStopperError::StopTimeout(self.thread_name))
    }

    /// Sends a stop signal and blocks until the thread is joined, however long it takes.
    pub fn stop_blocking(self) -> Result<(), ThreadContextStopperError> {
        self.stop_publisher.publish(()).map_err(|err| {
            ThreadContextStopperError::EventPublisherError(self.thread_name.clone(), err.to_string())
        })?;

        self.join_handle.join().map_err(|err| {
            ThreadContextStopperError::JoinError(
                err.downcast_ref::<&str>().unwrap_or(&"unknown error").to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl StartedThreadContext {
        pub fn is_thread_finished(&self) -> bool {
            self.join_handle.is_finished()
        }
    }

    #[test]
    fn start_stop_blocking() {
        let callback = |stop_consumer: EventConsumer<CancellationMessage>| loop {
            if stop_consumer.is_cancelled(Duration::default()) {
                break;
            }
        };

        let ctx = NotStartedThreadContext::new("test-thread", callback).start();
        assert!(!ctx.is_thread_finished());
        ctx.stop_blocking().unwrap();

        let ctx = NotStartedThreadContext::new("test-thread", callback).start();
        assert!(!ctx.is_thread_finished());
        ctx.stop().unwrap();
    }

    #[test]
    fn stop_times_out_on_a_never_ending_thread() {
        let never_ending = |_: EventConsumer<CancellationMessage>| {
            sleep(Duration::from_secs(u64::MAX));
        };
        let ctx = NotStartedThreadContext::new("test-thread", never_ending).start();

        assert!(!ctx.is_thread_finished());
        assert_eq!(
            ctx.stop().unwrap_err(),
            ThreadContextStopperError::StopTimeout("test-thread".to_string())
        );
    }
}
