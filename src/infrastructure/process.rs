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

use crate::shared::{CancelScope, Result, TesterError};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Output of a finished subprocess, stdout and stderr combined.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

pub fn render_command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for a in args {
        line.push(' ');
        line.push_str(a);
    }
    line
}

/// Run `program` to completion, bounded by `timeout` and the cancel scope.
///
/// A non-zero exit status is reported in the returned [`CommandOutput`], not
/// as an error, so callers decide whether the output still counts.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancelScope,
) -> Result<CommandOutput> {
    let line = render_command_line(program, args);
    debug!(command = %line, timeout = ?timeout, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TesterError::command(&line, e.to_string()))?;

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TesterError::Cancelled),
        res = tokio::time::timeout(timeout, child.wait_with_output()) => match res {
            Ok(out) => out.map_err(|e| TesterError::command(&line, e.to_string()))?,
            Err(_) => {
                return Err(TesterError::command(
                    &line,
                    format!("timed out after {:?}", timeout),
                ))
            }
        },
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    Ok(CommandOutput {
        success: output.status.success(),
        output: text,
    })
}

/// Like [`run_command`] but a non-zero exit is an error carrying the output.
pub async fn run_checked(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancelScope,
) -> Result<String> {
    let out = run_command(program, args, timeout, cancel).await?;
    if out.success {
        Ok(out.output)
    } else {
        Err(TesterError::command(
            render_command_line(program, args),
            out.output.trim().to_string(),
        ))
    }
}
