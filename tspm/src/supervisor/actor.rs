//! One dedicated OS thread per registered process, draining a bounded command queue so
//! that `start`/`stop`/`restart`/`scale` calls against the same `ManagedProcess` are
//! always serialized, even when the supervisor's registry lock is only briefly held for
//! the lookup. Callers still get a synchronous `Result` back via a oneshot reply channel.

use crate::process::managed_process::{ManagedProcess, ManagedProcessError};
use crate::process::restart_policy::RestartReason;
use crate::supervisor::SupervisorError;
use crate::util::threads::spawn_named_thread;
use crossbeam_channel::{bounded, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

type Reply = Sender<Result<(), ManagedProcessError>>;

enum Command {
    Start(Reply),
    Stop(RestartReason, Reply),
    Restart(RestartReason, Reply),
    Scale(u32, Reply),
}

pub struct ProcessActor {
    command_tx: Sender<Command>,
    join_handle: JoinHandle<()>,
}

impl ProcessActor {
    pub fn spawn(managed: Arc<ManagedProcess>) -> Self {
        let (command_tx, command_rx) = bounded::<Command>(16);
        let thread_name = format!("actor-{}", managed.name());

        let join_handle = spawn_named_thread(thread_name, move || {
            for command in command_rx {
                match command {
                    Command::Start(reply) => {
                        let _ = reply.send(managed.start());
                    }
                    Command::Stop(reason, reply) => {
                        let _ = reply.send(managed.stop(reason));
                    }
                    Command::Restart(reason, reply) => {
                        let _ = reply.send(managed.restart(reason));
                    }
                    Command::Scale(desired, reply) => {
                        let _ = reply.send(managed.scale(desired));
                    }
                }
            }
        });

        Self { command_tx, join_handle }
    }

    pub fn start(&self) -> Result<(), SupervisorError> {
        self.call(Command::Start)
    }

    pub fn stop(&self, reason: RestartReason) -> Result<(), SupervisorError> {
        self.call(|reply| Command::Stop(reason, reply))
    }

    pub fn restart(&self, reason: RestartReason) -> Result<(), SupervisorError> {
        self.call(|reply| Command::Restart(reason, reply))
    }

    pub fn scale(&self, desired: u32) -> Result<(), SupervisorError> {
        self.call(|reply| Command::Scale(desired, reply))
    }

    fn call(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), SupervisorError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx.send(build(reply_tx)).map_err(|_| SupervisorError::ActorUnavailable)?;
        reply_rx.recv().map_err(|_| SupervisorError::ActorUnavailable)?.map_err(SupervisorError::from)
    }

    /// Consumes the actor, closing its command channel and joining its thread. The
    /// in-flight command queue (if any) is dropped along with the sender; callers should
    /// have already stopped the managed process before shutting the actor down.
    pub fn shutdown(self) {
        let ProcessActor { command_tx, join_handle } = self;
        drop(command_tx);
        let _ = join_handle.join();
    }
}
