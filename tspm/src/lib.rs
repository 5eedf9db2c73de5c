pub mod event;
pub mod health;
pub mod lb;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod spec;
pub mod state_store;
pub mod supervisor;
pub mod util;
pub mod watcher;
pub mod webhook;
