//! Fans stdout/stderr lines out to a log file (with size-triggered rotation) and to
//! an arbitrary sink, mirroring the teacher's own broadcaster-over-a-single-reader
//! pattern but writing real files instead of routing through `tracing`.

use crate::process::instance::LogStream;
use crate::util::threads::spawn_named_thread;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

/// Where an instance's output should land on disk.
#[derive(Debug, Clone, Default)]
pub struct LogTargets {
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub combine: bool,
    /// Bytes; 0 disables rotation.
    pub max_file_size: u64,
}

impl LogTargets {
    fn path_for(&self, stream: LogStream) -> Option<&PathBuf> {
        if self.combine {
            self.stdout_path.as_ref().or(self.stderr_path.as_ref())
        } else {
            match stream {
                LogStream::Stdout => self.stdout_path.as_ref(),
                LogStream::Stderr => self.stderr_path.as_ref(),
            }
        }
    }
}

/// Spawns a thread that reads `reader` line by line, appends each line to the
/// configured log file (rotating it first if it has grown past `max_file_size`), and
/// forwards the line to `on_line` (typically used to emit a `process:log` event).
pub fn spawn_log_pump<R>(
    reader: R,
    stream: LogStream,
    targets: LogTargets,
    on_line: Arc<dyn Fn(LogStream, String) + Send + Sync>,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let thread_name = match stream {
        LogStream::Stdout => "log-pump-stdout",
        LogStream::Stderr => "log-pump-stderr",
    };

    spawn_named_thread(thread_name, move || {
        let mut appender = targets.path_for(stream).cloned().map(LogAppender::new);
        let max_file_size = targets.max_file_size;

        for line in BufReader::new(reader).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };

            if let Some(appender) = appender.as_mut() {
                if let Err(err) = appender.append_line(&line, max_file_size) {
                    warn!(error = %err, "failed to append log line to file");
                }
            }

            on_line(stream, line);
        }
    })
}

struct LogAppender {
    path: PathBuf,
}

impl LogAppender {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append_line(&mut self, line: &str, max_file_size: u64) -> io::Result<()> {
        if max_file_size > 0 {
            if let Ok(metadata) = std::fs::metadata(&self.path) {
                if metadata.len() > max_file_size {
                    rotate(&self.path)?;
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}

/// Renames `path` to `path.N` (shifting any existing rotated files up by one), leaving
/// `path` free for the next write. Mirrors the `LogManager.rotate` boundary contract.
pub fn rotate(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut n = 1;
    loop {
        let candidate = rotated_path(path, n);
        if !candidate.exists() {
            break;
        }
        n += 1;
    }

    for i in (1..n).rev() {
        std::fs::rename(rotated_path(path, i), rotated_path(path, i + 1))?;
    }

    std::fs::rename(path, rotated_path(path, 1))
}

fn rotated_path(path: &Path, n: u32) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(format!(".{n}"));
    PathBuf::from(os_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn pumps_lines_to_file_and_sink() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("out.log");
        let (tx, rx) = mpsc::channel();

        let targets = LogTargets { stdout_path: Some(path.clone()), ..Default::default() };
        let reader = Cursor::new(b"line one\nline two\n".to_vec());
        let handle = spawn_log_pump(reader, LogStream::Stdout, targets, Arc::new(move |_stream, line| {
            tx.send(line).unwrap();
        }));
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), "line one");
        assert_eq!(rx.recv().unwrap(), "line two");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn rotate_shifts_existing_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("app.log");
        std::fs::write(&path, "current").unwrap();
        std::fs::write(rotated_path(&path, 1), "older").unwrap();

        rotate(&path).unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(rotated_path(&path, 1)).unwrap(), "current");
        assert_eq!(std::fs::read_to_string(rotated_path(&path, 2)).unwrap(), "older");
    }

    #[test]
    fn combine_routes_both_streams_to_stdout_path() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("combined.log");
        let targets = LogTargets { stdout_path: Some(path.clone()), combine: true, ..Default::default() };

        assert_eq!(targets.path_for(LogStream::Stderr), Some(&path));
    }
}
