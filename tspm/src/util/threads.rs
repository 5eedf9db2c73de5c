use std::thread;

/// Spawns a thread with a name, panicking if the OS refuses (the only realistic cause
/// is a name containing a NUL byte, which never happens for our caller set).
pub fn spawn_named_thread<F, T, S>(name: S, f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    S: ToString,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("thread config should be valid")
}
