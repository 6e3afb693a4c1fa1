use crate::config::AppSpec;
use crate::error::{Result, WardenError};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Which child pipe a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

/// Resolved log destinations for one instance slot.
#[derive(Debug, Clone)]
pub struct SinkPaths {
    pub out: PathBuf,
    pub err: PathBuf,
    /// Interleaved copy of both streams, when configured
    pub combined: Option<PathBuf>,
}

impl SinkPaths {
    /// Resolve destinations from the spec, falling back to per-slot files
    /// under `log_dir` when the spec leaves them unset.
    pub fn resolve(spec: &AppSpec, slot: &str, log_dir: &Path) -> Self {
        let out = spec
            .out_file
            .clone()
            .unwrap_or_else(|| log_dir.join(format!("{}-out.log", slot)));
        let err = spec
            .error_file
            .clone()
            .unwrap_or_else(|| log_dir.join(format!("{}-err.log", slot)));
        let combined = if spec.merge_logs {
            spec.log_file.clone()
        } else {
            None
        };

        Self { out, err, combined }
    }
}

/// Append-mode log files for one instance. A destination that cannot be
/// opened is reported once and degrades to discarding that stream; it never
/// takes the instance down.
pub struct LogSink {
    out: Option<File>,
    err: Option<File>,
    combined: Option<File>,
    timestamps: bool,
}

impl LogSink {
    pub async fn open(slot: &str, paths: &SinkPaths, timestamps: bool) -> Self {
        let out = Self::open_destination(slot, &paths.out).await;
        let err = Self::open_destination(slot, &paths.err).await;
        let combined = match &paths.combined {
            Some(path) => Self::open_destination(slot, path).await,
            None => None,
        };

        Self {
            out,
            err,
            combined,
            timestamps,
        }
    }

    async fn open_destination(slot: &str, path: &Path) -> Option<File> {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let err = WardenError::LogWrite(path.display().to_string(), e.to_string());
                warn!(instance = slot, "{}; discarding output for this stream", err);
                return None;
            }
        }

        match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                let err = WardenError::LogWrite(path.display().to_string(), e.to_string());
                warn!(instance = slot, "{}; discarding output for this stream", err);
                None
            }
        }
    }

    /// Write one line to its designated file and, if configured, to the
    /// combined file. Write failures silently drop the handle so the stream
    /// degrades to discard rather than erroring on every line.
    pub async fn write_line(&mut self, source: LogSource, line: &str) -> Result<()> {
        let entry = self.format_entry(line);

        let file = match source {
            LogSource::Stdout => &mut self.out,
            LogSource::Stderr => &mut self.err,
        };

        if let Some(f) = file {
            if f.write_all(entry.as_bytes()).await.is_err() {
                *file = None;
            }
        }

        if let Some(f) = &mut self.combined {
            if f.write_all(entry.as_bytes()).await.is_err() {
                self.combined = None;
            }
        }

        Ok(())
    }

    fn format_entry(&self, line: &str) -> String {
        let mut entry = String::with_capacity(line.len() + 32);
        if self.timestamps {
            entry.push('[');
            entry.push_str(&Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string());
            entry.push_str("] ");
        }
        entry.push_str(line);
        if !line.ends_with('\n') {
            entry.push('\n');
        }
        entry
    }

    /// Flush all open destinations.
    pub async fn flush(&mut self) {
        for file in [&mut self.out, &mut self.err, &mut self.combined]
            .into_iter()
            .flatten()
        {
            let _ = file.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffSettings, RestartMode};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_spec() -> AppSpec {
        AppSpec {
            name: "web".to_string(),
            command: "/bin/true".to_string(),
            args: vec![],
            cwd: None,
            env: BTreeMap::new(),
            instances: 1,
            restart: RestartMode::Always,
            backoff: BackoffSettings::default(),
            max_memory: None,
            out_file: None,
            error_file: None,
            log_file: None,
            merge_logs: true,
            time: false,
            stop_signal: "SIGTERM".to_string(),
            stop_timeout_secs: 2,
        }
    }

    #[test]
    fn test_resolve_default_paths() {
        let spec = test_spec();
        let paths = SinkPaths::resolve(&spec, "web-0", Path::new("/var/log/warden"));

        assert_eq!(paths.out, PathBuf::from("/var/log/warden/web-0-out.log"));
        assert_eq!(paths.err, PathBuf::from("/var/log/warden/web-0-err.log"));
        assert!(paths.combined.is_none());
    }

    #[test]
    fn test_resolve_explicit_paths() {
        let mut spec = test_spec();
        spec.out_file = Some(PathBuf::from("/tmp/out.log"));
        spec.error_file = Some(PathBuf::from("/tmp/error.log"));
        spec.log_file = Some(PathBuf::from("/tmp/combined.log"));

        let paths = SinkPaths::resolve(&spec, "web", Path::new("/var/log/warden"));
        assert_eq!(paths.out, PathBuf::from("/tmp/out.log"));
        assert_eq!(paths.combined, Some(PathBuf::from("/tmp/combined.log")));
    }

    #[test]
    fn test_merge_logs_disabled_drops_combined() {
        let mut spec = test_spec();
        spec.log_file = Some(PathBuf::from("/tmp/combined.log"));
        spec.merge_logs = false;

        let paths = SinkPaths::resolve(&spec, "web", Path::new("/tmp"));
        assert!(paths.combined.is_none());
    }

    #[tokio::test]
    async fn test_write_lines_to_streams_and_combined() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SinkPaths {
            out: temp_dir.path().join("out.log"),
            err: temp_dir.path().join("err.log"),
            combined: Some(temp_dir.path().join("combined.log")),
        };

        let mut sink = LogSink::open("web", &paths, false).await;
        sink.write_line(LogSource::Stdout, "hello").await.unwrap();
        sink.write_line(LogSource::Stderr, "oops").await.unwrap();
        sink.flush().await;

        let out = std::fs::read_to_string(&paths.out).unwrap();
        let err = std::fs::read_to_string(&paths.err).unwrap();
        let combined = std::fs::read_to_string(paths.combined.as_ref().unwrap()).unwrap();

        assert_eq!(out, "hello\n");
        assert_eq!(err, "oops\n");
        assert_eq!(combined, "hello\noops\n");
    }

    #[tokio::test]
    async fn test_timestamp_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SinkPaths {
            out: temp_dir.path().join("out.log"),
            err: temp_dir.path().join("err.log"),
            combined: None,
        };

        let mut sink = LogSink::open("web", &paths, true).await;
        sink.write_line(LogSource::Stdout, "stamped").await.unwrap();
        sink.flush().await;

        let out = std::fs::read_to_string(&paths.out).unwrap();
        assert!(out.starts_with('['));
        assert!(out.contains("] stamped"));
    }

    #[tokio::test]
    async fn test_unopenable_destination_degrades_to_discard() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SinkPaths {
            // A directory cannot be opened for append
            out: temp_dir.path().to_path_buf(),
            err: temp_dir.path().join("err.log"),
            combined: None,
        };

        let mut sink = LogSink::open("web", &paths, false).await;
        // Discarded without error
        sink.write_line(LogSource::Stdout, "lost").await.unwrap();
        sink.write_line(LogSource::Stderr, "kept").await.unwrap();
        sink.flush().await;

        let err = std::fs::read_to_string(&paths.err).unwrap();
        assert_eq!(err, "kept\n");
    }
}
