use crate::logs::{LogSink, LogSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bounded buffer between the pipe readers and the file writer. When the
/// writer cannot keep up (slow disk), excess lines are dropped and counted
/// instead of backpressuring the child.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Handle to the routing tasks for one child process.
pub struct RouterHandle {
    writer: JoinHandle<()>,
}

impl RouterHandle {
    /// Wait for the writer to drain after both pipes have closed.
    pub async fn finished(self) {
        let _ = self.writer.await;
    }
}

/// Route a child's detached stdout/stderr pipes into `sink`. Spawns one
/// reader task per pipe and a single writer task that owns the sink; the
/// writer exits once both pipes reach EOF. The pipes arrive detached so the
/// child handle can stay behind with its owner while routing runs on its
/// own tasks.
///
/// `dropped` is incremented for every line discarded because the buffer was
/// full.
pub fn route_pipes<O, E>(
    stdout: O,
    stderr: E,
    sink: LogSink,
    dropped: Arc<AtomicU64>,
) -> RouterHandle
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<(LogSource, String)>(LOG_CHANNEL_CAPACITY);

    tokio::spawn(read_pipe(stdout, LogSource::Stdout, tx.clone(), Arc::clone(&dropped)));
    tokio::spawn(read_pipe(stderr, LogSource::Stderr, tx, dropped));

    let writer = tokio::spawn(async move {
        let mut sink = sink;
        while let Some((source, line)) = rx.recv().await {
            let _ = sink.write_line(source, &line).await;
        }
        sink.flush().await;
    });

    RouterHandle { writer }
}

/// Read lines from one child pipe and hand them to the writer. `try_send`
/// keeps this task from ever blocking on the disk: a full channel means the
/// line is dropped and counted.
async fn read_pipe<R>(
    pipe: R,
    source: LogSource,
    tx: mpsc::Sender<(LogSource, String)>,
    dropped: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.try_send((source, line)).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            // EOF or the pipe broke with the process
            Ok(None) | Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::SinkPaths;
    use std::process::Stdio;
    use tempfile::TempDir;
    use tokio::process::Command;

    async fn sink_in(dir: &TempDir, combined: bool) -> (LogSink, SinkPaths) {
        let paths = SinkPaths {
            out: dir.path().join("out.log"),
            err: dir.path().join("err.log"),
            combined: combined.then(|| dir.path().join("combined.log")),
        };
        let sink = LogSink::open("test", &paths, false).await;
        (sink, paths)
    }

    #[tokio::test]
    async fn test_routes_stdout_and_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let (sink, paths) = sink_in(&temp_dir, true).await;

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("echo one; echo two >&2; echo three")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let dropped = Arc::new(AtomicU64::new(0));
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let handle = route_pipes(stdout, stderr, sink, Arc::clone(&dropped));

        let _ = child.wait().await;
        handle.finished().await;

        let out = std::fs::read_to_string(&paths.out).unwrap();
        let err = std::fs::read_to_string(&paths.err).unwrap();
        let combined = std::fs::read_to_string(paths.combined.as_ref().unwrap()).unwrap();

        assert_eq!(out, "one\nthree\n");
        assert_eq!(err, "two\n");
        assert!(combined.contains("one"));
        assert!(combined.contains("two"));
        assert!(combined.contains("three"));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_writer_drains_before_exit() {
        let temp_dir = TempDir::new().unwrap();
        let (sink, paths) = sink_in(&temp_dir, false).await;

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("for i in $(seq 1 50); do echo line-$i; done")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let dropped = Arc::new(AtomicU64::new(0));
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let handle = route_pipes(stdout, stderr, sink, dropped);

        let _ = child.wait().await;
        handle.finished().await;

        let out = std::fs::read_to_string(&paths.out).unwrap();
        assert_eq!(out.lines().count(), 50);
        assert!(out.ends_with("line-50\n"));
    }
}
