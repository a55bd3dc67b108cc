//! Structured logging setup
//!
//! Initializes the global tracing subscriber from [`LoggingConfig`]:
//! JSON or text formatting, env-filter level control, stdout or a
//! size-rotated log file behind a non-blocking writer.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Holds the non-blocking writer guard for the lifetime of the process
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the logging system based on configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => {
                let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
                (non_blocking, Some(guard))
            }
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;

                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent).context("Failed to create log directory")?;
                }

                let appender = SizeRotatingWriter::new(
                    log_file.clone(),
                    config.max_file_size,
                    config.max_backups,
                );
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (non_blocking, Some(guard))
            }
            other => anyhow::bail!("Invalid logging output: {}", other),
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true)
                .boxed(),
            "text" => fmt::layer().with_writer(writer).with_target(true).boxed(),
            other => anyhow::bail!("Invalid logging format: {}", other),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger { _guard: guard })
    }
}

/// File writer that rotates `file -> file.1 -> file.2 ...` once the active
/// file would exceed `max_size` bytes
pub struct SizeRotatingWriter {
    path: PathBuf,
    max_size: usize,
    max_backups: usize,
    file: Mutex<Option<std::fs::File>>,
    written: AtomicUsize,
}

impl SizeRotatingWriter {
    pub fn new(path: PathBuf, max_size: usize, max_backups: usize) -> Self {
        Self {
            path,
            max_size,
            max_backups,
            file: Mutex::new(None),
            written: AtomicUsize::new(0),
        }
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self) -> std::io::Result<()> {
        *self.file.lock().unwrap() = None;

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                let to = self.backup_path(i + 1);
                let _ = std::fs::remove_file(&to);
                std::fs::rename(&from, &to)?;
            }
        }
        if self.path.exists() {
            let first = self.backup_path(1);
            let _ = std::fs::remove_file(&first);
            std::fs::rename(&self.path, &first)?;
        }

        self.written.store(0, Ordering::SeqCst);
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written.load(Ordering::SeqCst) + buf.len() > self.max_size {
            self.rotate()?;
        }

        let mut guard = self.file.lock().unwrap();
        if guard.is_none() {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.written
                .store(file.metadata()?.len() as usize, Ordering::SeqCst);
            *guard = Some(file);
        }

        let written = guard.as_mut().unwrap().write(buf)?;
        self.written.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.lock().unwrap().as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_paths() {
        let writer = SizeRotatingWriter::new(PathBuf::from("/tmp/logs/bridge.log"), 1024, 5);
        assert_eq!(
            writer.backup_path(1),
            PathBuf::from("/tmp/logs/bridge.log.1")
        );
        assert_eq!(
            writer.backup_path(3),
            PathBuf::from("/tmp/logs/bridge.log.3")
        );
    }

    #[test]
    fn test_rotation_on_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bridge.log");
        let mut writer = SizeRotatingWriter::new(path.clone(), 16, 2);

        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();
        // Exceeds the 16 byte cap, forcing a rotation
        writer.write_all(b"abcdefghij").unwrap();
        writer.flush().unwrap();

        assert!(path.exists());
        assert!(path.with_extension("log.1").exists());
    }
}
