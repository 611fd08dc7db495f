// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process logging.
//!
//! Structured events go through `tracing`. Raw diagnostics captured from
//! subprocesses (describe output, pod logs, result tables) go to a
//! [`LogWriter`] instead, so they land in the `.log` file verbatim.

use crate::shared::{ConfigError, Result, TesterError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber once, after the config is validated.
pub fn init_tracing(level: &str, outputs: &[String], color: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level).map_err(|e| {
        ConfigError::InvalidField(format!("log_level {:?}: {}", level, e))
    })?;

    let mut writer: Option<BoxMakeWriter> = None;
    for output in outputs {
        let next = match output.as_str() {
            "stderr" => BoxMakeWriter::new(std::io::stderr),
            "stdout" => BoxMakeWriter::new(std::io::stdout),
            path => BoxMakeWriter::new(Arc::new(open_append(Path::new(path))?)),
        };
        writer = Some(match writer {
            Some(prev) => BoxMakeWriter::new(prev.and(next)),
            None => next,
        });
    }
    let writer = writer.unwrap_or_else(|| BoxMakeWriter::new(std::io::stderr));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(color)
        .with_target(false)
        .try_init()
        .map_err(|e| TesterError::Config(ConfigError::InvalidField(format!("logger: {}", e))))
}

/// First `.log` entry of `log_outputs`.
pub fn log_file_path(outputs: &[String]) -> Option<PathBuf> {
    outputs
        .iter()
        .find(|o| Path::new(o).extension().map(|e| e == "log").unwrap_or(false))
        .map(PathBuf::from)
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

enum Sink {
    File(File),
    Memory(Vec<u8>),
    Discard,
}

/// Cloneable handle over the diagnostics log.
#[derive(Clone)]
pub struct LogWriter {
    sink: Arc<Mutex<Sink>>,
}

impl LogWriter {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_sink(Sink::File(open_append(path)?)))
    }

    /// In-memory writer, readable back through [`LogWriter::contents`].
    pub fn memory() -> Self {
        Self::from_sink(Sink::Memory(Vec::new()))
    }

    pub fn discard() -> Self {
        Self::from_sink(Sink::Discard)
    }

    fn from_sink(sink: Sink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub fn write_str(&self, text: &str) {
        let mut guard = match self.sink.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let res = match &mut *guard {
            Sink::File(f) => f.write_all(text.as_bytes()).and_then(|_| f.flush()),
            Sink::Memory(buf) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
            Sink::Discard => Ok(()),
        };
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to write diagnostics log");
        }
    }

    /// Titled block, used for command snapshots.
    pub fn section(&self, title: &str, body: &str) {
        self.write_str(&format!("\n\n'{}' output:\n\n{}\n\n", title, body.trim_end()));
    }

    /// Everything written so far, for in-memory writers. Empty otherwise.
    pub fn contents(&self) -> String {
        match self.sink.lock() {
            Ok(g) => match &*g {
                Sink::Memory(buf) => String::from_utf8_lossy(buf).into_owned(),
                _ => String::new(),
            },
            Err(_) => String::new(),
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_writer_is_shared_between_clones() {
        let w = LogWriter::memory();
        let w2 = w.clone();
        w2.section("kubectl describe deployment", "Name: metrics-server\n");
        assert!(w.contents().contains("'kubectl describe deployment' output:"));
        assert!(w.contents().contains("Name: metrics-server"));
    }

    #[test]
    fn test_file_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.log");
        let w = LogWriter::open(&path).unwrap();
        w.write_str("first\n");
        w.write_str("second\n");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_log_file_path_picks_first_log_entry() {
        let outputs = vec![
            "stderr".to_string(),
            "/tmp/a.log".to_string(),
            "/tmp/b.log".to_string(),
        ];
        assert_eq!(log_file_path(&outputs), Some(PathBuf::from("/tmp/a.log")));
        assert_eq!(log_file_path(&["stdout".to_string()]), None);
    }
}
