mod crash_loop;
mod graceful_stop;
mod health_restart;
mod scale_down;
mod stable_process;
mod watch_restart;
