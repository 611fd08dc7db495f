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

//! Ordered execution of every enabled tester.
//!
//! `apply` walks forward and stops at the first failure without rolling
//! back; teardown is always an explicit `delete`. `delete` walks backwards,
//! runs every enabled tester, and aggregates failures.

use crate::domain::config::Config;
use crate::domain::prompt::{gate, pipeline_question, Prompt};
use crate::domain::tester::Tester;
use crate::infrastructure::kubernetes::KubeClient;
use crate::shared::{CancelScope, FailureClass, Precondition, Result, TesterError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Disabled in the config.
    Skipped,
    /// Enabled but never reached.
    NotRun,
    Applied,
    Deleted,
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::NotRun => "not run",
            Outcome::Applied => "applied",
            Outcome::Deleted => "deleted",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// One row of the run summary.
#[derive(Debug, Clone)]
pub struct TesterOutcome {
    pub order: usize,
    pub name: String,
    pub enabled: bool,
    pub outcome: Outcome,
    pub took: std::time::Duration,
}

pub struct Pipeline {
    testers: Vec<Box<dyn Tester>>,
    client: Arc<dyn KubeClient>,
    prompt: Option<Arc<dyn Prompt>>,
    cancel: Option<CancelScope>,
    outcomes: Vec<TesterOutcome>,
}

impl Pipeline {
    /// `testers` must already be in apply order; it is never reordered.
    pub fn new(
        testers: Vec<Box<dyn Tester>>,
        client: Arc<dyn KubeClient>,
        prompt: Option<Arc<dyn Prompt>>,
    ) -> Self {
        let outcomes = Self::fresh_outcomes(&testers);
        Self {
            testers,
            client,
            prompt,
            cancel: None,
            outcomes,
        }
    }

    /// The scope the testers share. `delete` switches it to teardown so a
    /// stop signal received during `apply` does not abort the deletes.
    pub fn with_cancel(mut self, cancel: CancelScope) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn fresh_outcomes(testers: &[Box<dyn Tester>]) -> Vec<TesterOutcome> {
        testers
            .iter()
            .enumerate()
            .map(|(i, t)| TesterOutcome {
                order: i + 1,
                name: t.name().to_string(),
                enabled: t.enabled(),
                outcome: if t.enabled() {
                    Outcome::NotRun
                } else {
                    Outcome::Skipped
                },
                took: std::time::Duration::ZERO,
            })
            .collect()
    }

    pub fn apply_order(&self) -> Vec<&str> {
        self.testers
            .iter()
            .filter(|t| t.enabled())
            .map(|t| t.name())
            .collect()
    }

    pub fn delete_order(&self) -> Vec<&str> {
        let mut order = self.apply_order();
        order.reverse();
        order
    }

    pub fn outcomes(&self) -> &[TesterOutcome] {
        &self.outcomes
    }

    pub async fn apply(&mut self, config: &mut Config) -> Result<()> {
        self.outcomes = Self::fresh_outcomes(&self.testers);
        gate(self.prompt.as_deref(), &pipeline_question("apply"), "apply").await?;

        let required = config.minimum_nodes;
        match self.client.list_nodes().await {
            Ok(nodes) => {
                if required > 0 && nodes.len() < required {
                    return Err(Precondition::InsufficientNodes {
                        required,
                        actual: nodes.len(),
                    }
                    .into());
                }
                info!(nodes = nodes.len(), minimum = required, "node check passed");
                config.total_nodes = nodes.len();
                sync_or_warn(config);
            }
            Err(e) if required == 0 => {
                warn!(error = %e, "failed to list nodes; node check disabled");
            }
            Err(e) => return Err(e),
        }

        for (idx, tester) in self.testers.iter_mut().enumerate() {
            if !tester.enabled() {
                info!(tester = %tester.name(), "skipping disabled tester");
                continue;
            }
            info!(tester = %tester.name(), order = idx + 1, "applying");
            let started = Instant::now();
            let res = tester.apply().await;
            self.outcomes[idx].took = started.elapsed();
            match res {
                Ok(()) => {
                    self.outcomes[idx].outcome = Outcome::Applied;
                    tester.write_back(config);
                    sync_or_warn(config);
                    info!(tester = %tester.name(), took = ?started.elapsed(), "applied");
                }
                Err(e) => {
                    warn!(tester = %tester.name(), error = %e, "apply failed");
                    self.outcomes[idx].outcome = Outcome::Failed(e.to_string());
                    tester.write_back(config);
                    sync_or_warn(config);
                    return Err(TesterError::apply_failed(tester.name(), e));
                }
            }
        }
        Ok(())
    }

    /// Best effort: every enabled tester's `delete` runs even if an earlier
    /// one failed. Failures come back as one `PartialTeardown`.
    pub async fn delete(&mut self, config: &mut Config) -> Result<()> {
        self.outcomes = Self::fresh_outcomes(&self.testers);
        if let Some(cancel) = &self.cancel {
            cancel.teardown();
        }
        gate(self.prompt.as_deref(), &pipeline_question("delete"), "delete").await?;

        let mut errors = Vec::new();
        let mut succeeded = 0usize;
        for (idx, tester) in self.testers.iter_mut().enumerate().rev() {
            if !tester.enabled() {
                continue;
            }
            info!(tester = %tester.name(), "deleting");
            let started = Instant::now();
            let res = tester.delete().await;
            self.outcomes[idx].took = started.elapsed();
            tester.write_back(config);
            match res {
                Ok(()) => {
                    succeeded += 1;
                    self.outcomes[idx].outcome = Outcome::Deleted;
                    info!(tester = %tester.name(), "deleted");
                }
                Err(e) => {
                    warn!(tester = %tester.name(), error = %e, "delete failed");
                    self.outcomes[idx].outcome = Outcome::Failed(e.to_string());
                    errors.push(TesterError::delete_failed(tester.name(), e).to_string());
                }
            }
        }
        sync_or_warn(config);

        if errors.is_empty() {
            return Ok(());
        }
        let class = if succeeded > 0 {
            FailureClass::Partial
        } else {
            FailureClass::Total
        };
        Err(TesterError::PartialTeardown { errors, class })
    }
}

fn sync_or_warn(config: &mut Config) {
    if config.config_path.is_empty() {
        return;
    }
    if let Err(e) = config.sync() {
        warn!(path = %config.config_path, error = %e, "failed to sync config file");
    }
}
