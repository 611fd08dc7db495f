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

use crate::domain::config::Config;
use crate::domain::prompt::{gate, pipeline_question, tester_question, Prompt};
use crate::infrastructure::elb::LoadBalancers;
use crate::infrastructure::helm::Helm;
use crate::infrastructure::kubectl::{Kubectl, KubectlObserver};
use crate::infrastructure::kubernetes::{KubeClient, NamespaceDeletion, Poller};
use crate::infrastructure::logging::LogWriter;
use crate::shared::{CancelScope, Precondition, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One add-on's install-and-verify unit.
#[async_trait]
pub trait Tester: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    async fn apply(&mut self) -> Result<()>;

    async fn delete(&mut self) -> Result<()>;

    /// Copy fields discovered while running (ELB ARN, latency summaries, ...)
    /// back into the root config before it is synced.
    fn write_back(&self, _config: &mut Config) {}
}

/// Collaborators shared by every tester of one run.
#[derive(Clone)]
pub struct TesterContext {
    pub client: Arc<dyn KubeClient>,
    pub kubectl: Arc<dyn Kubectl>,
    pub helm: Arc<dyn Helm>,
    pub load_balancers: Arc<dyn LoadBalancers>,
    pub http: reqwest::Client,
    pub log_writer: LogWriter,
    pub cancel: CancelScope,
    /// Only set when a tester runs on its own; the pipeline asks once up front.
    pub prompt: Option<Arc<dyn Prompt>>,
    pub client_timeout: Duration,
    pub kubeconfig_path: String,
    pub kubeconfig_context: String,
    pub kubectl_path: String,
}

impl TesterContext {
    pub fn poller(&self) -> Poller {
        Poller::new(self.cancel.clone())
    }

    pub fn observer(&self) -> KubectlObserver {
        KubectlObserver::new(self.kubectl.clone(), self.log_writer.clone())
    }

    pub fn with_prompt(mut self, prompt: Option<Arc<dyn Prompt>>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Per-tester confirmation, a no-op inside the pipeline.
    pub async fn confirm(&self, action: &str, namespace: &str) -> Result<()> {
        gate(
            self.prompt.as_deref(),
            &tester_question(action, namespace),
            action,
        )
        .await
    }

    /// Same as [`TesterContext::confirm`] for add-ons that own no namespace.
    pub async fn confirm_cluster(&self, action: &str) -> Result<()> {
        gate(self.prompt.as_deref(), &pipeline_question(action), action).await
    }

    /// Fails with `InsufficientNodes` when fewer than `minimum` nodes exist.
    pub async fn check_minimum_nodes(&self, minimum: usize) -> Result<usize> {
        let nodes = self.client.list_nodes().await?;
        if nodes.len() < minimum {
            return Err(Precondition::InsufficientNodes {
                required: minimum,
                actual: nodes.len(),
            }
            .into());
        }
        Ok(nodes.len())
    }

    /// Delete `namespace` with the default 10s/15m budget and force-delete fallback.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        info!(namespace = %namespace, "deleting namespace");
        self.client
            .delete_namespace_and_wait(namespace, &NamespaceDeletion::default())
            .await
    }
}

/// Run every step, keep going on failure, and join the errors with ", ".
pub fn join_errors(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::shared::TesterError::Multiple(errors))
    }
}
