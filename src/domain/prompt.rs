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

use crate::infrastructure::constants::PROMPT_CANCEL_ITEM;
use crate::shared::{Result, TesterError};
use async_trait::async_trait;
use colored::Colorize;
use std::io::{BufRead, Write};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Cancel,
}

/// Binary confirmation gate.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn ask(&self, question: &str, action: &str) -> Result<Decision>;
}

pub fn pipeline_question(action: &str) -> String {
    format!("Ready to {:?} resources, should we continue?", action)
}

pub fn tester_question(action: &str, namespace: &str) -> String {
    format!(
        "Ready to {:?} resources for the namespace {:?}, should we continue?",
        action, namespace
    )
}

/// Ask through `prompt` if one is set. `Cancel` becomes [`TesterError::Cancelled`].
pub async fn gate(prompt: Option<&dyn Prompt>, question: &str, action: &str) -> Result<()> {
    let Some(prompt) = prompt else {
        return Ok(());
    };
    match prompt.ask(question, action).await? {
        Decision::Proceed => Ok(()),
        Decision::Cancel => {
            info!(action = %action, "cancelled by user");
            Err(TesterError::Cancelled)
        }
    }
}

/// Reads the answer from standard input.
pub struct StdinPrompt;

fn parse_answer(line: &str) -> Decision {
    match line.trim().to_lowercase().as_str() {
        "1" | "y" | "yes" => Decision::Proceed,
        _ => Decision::Cancel,
    }
}

#[async_trait]
impl Prompt for StdinPrompt {
    async fn ask(&self, question: &str, action: &str) -> Result<Decision> {
        let question = question.to_string();
        let yes = format!("Yes, let's {:?}!", action);
        tokio::task::spawn_blocking(move || -> Result<Decision> {
            let mut out = std::io::stdout();
            writeln!(out, "{}", question.bold())?;
            writeln!(out, "  0) {}", PROMPT_CANCEL_ITEM)?;
            writeln!(out, "  1) {}", yes)?;
            write!(out, "{} ", "select [0/1]:".cyan())?;
            out.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(parse_answer(&line))
        })
        .await
        .map_err(|e| TesterError::command("prompt", e.to_string()))?
    }
}

/// Always answers the same way.
pub struct FixedPrompt(pub Decision);

#[async_trait]
impl Prompt for FixedPrompt {
    async fn ask(&self, _question: &str, _action: &str) -> Result<Decision> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_questions() {
        assert_eq!(
            pipeline_question("apply"),
            "Ready to \"apply\" resources, should we continue?"
        );
        assert_eq!(
            tester_question("delete", "kube-system"),
            "Ready to \"delete\" resources for the namespace \"kube-system\", should we continue?"
        );
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("1\n"), Decision::Proceed);
        assert_eq!(parse_answer("Yes"), Decision::Proceed);
        assert_eq!(parse_answer("0"), Decision::Cancel);
        assert_eq!(parse_answer(""), Decision::Cancel);
    }

    #[tokio::test]
    async fn test_gate() {
        assert!(gate(None, "q", "apply").await.is_ok());
        let yes = FixedPrompt(Decision::Proceed);
        assert!(gate(Some(&yes), "q", "apply").await.is_ok());
        let no = FixedPrompt(Decision::Cancel);
        assert!(matches!(
            gate(Some(&no), "q", "apply").await,
            Err(TesterError::Cancelled)
        ));
    }
}
