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

//! metrics-server: install the aggregated metrics API into `kube-system` and
//! check that `kubectl top node` reports memory.

use crate::domain::config::schema::{FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{kubectl_until, record};
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, DEPLOYMENT_INITIAL_WAIT, DEPLOYMENT_POLL_INTERVAL,
    DEPLOYMENT_WAIT_TIMEOUT, HTML_CHECK_TIMEOUT,
};
use crate::infrastructure::kubectl::{apply_manifest, args};
use crate::infrastructure::kubernetes::{ObjectKind, ResourceKind, WaitSpec};
use crate::shared::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "metrics-server";

const MANIFEST: &str = include_str!("manifests/metrics-server.yaml");
const DEPLOYMENT_NAME: &str = "metrics-server";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsServerConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: "kube-system".to_string(),
        }
    }
}

impl AddOnConfig for MetricsServerConfig {
    const SCHEMA: &'static [FieldSchema] = &[ENABLE, MINIMUM_NODES, NAMESPACE];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)
    }
}

pub struct MetricsServerTester {
    cfg: MetricsServerConfig,
    ctx: TesterContext,
}

impl MetricsServerTester {
    pub fn new(cfg: MetricsServerConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    async fn check_deployment(&self) -> Result<()> {
        let spec = WaitSpec::new(ResourceKind::Deployment, &self.cfg.namespace, DEPLOYMENT_NAME)
            .desired(1)
            .intervals(DEPLOYMENT_INITIAL_WAIT, DEPLOYMENT_POLL_INTERVAL)
            .timeout(DEPLOYMENT_WAIT_TIMEOUT)
            .tolerate_missing();
        let observer =
            self.ctx
                .observer()
                .describe(&self.cfg.namespace, "deployment", DEPLOYMENT_NAME);
        self.ctx
            .poller()
            .wait_for_deployment(self.ctx.client.as_ref(), &spec, Some(&observer))
            .await?;
        Ok(())
    }

    /// `kubectl top node` only works once metrics have been scraped.
    async fn check_metrics(&self) -> Result<()> {
        let logs = self.ctx.observer().command(&[
            "--namespace",
            &self.cfg.namespace,
            "logs",
            "--selector=k8s-app=metrics-server",
            "--all-containers=true",
            "--timestamps",
        ]);
        kubectl_until(
            &self.ctx,
            &args(&["top", "node"]),
            "MEMORY",
            HTML_CHECK_TIMEOUT,
            Duration::from_secs(5),
            Some(&logs),
        )
        .await?;
        info!("metrics-server is serving node metrics");
        Ok(())
    }
}

#[async_trait]
impl Tester for MetricsServerTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;

        apply_manifest(
            self.ctx.kubectl.as_ref(),
            &self.ctx.poller(),
            &self.ctx.log_writer,
            "apply metrics-server",
            MANIFEST,
        )
        .await?;
        self.check_deployment().await?;
        self.check_metrics().await
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        record(
            &mut errors,
            "failed to delete metrics-server Deployment",
            self.ctx
                .client
                .delete_object(ObjectKind::Deployment, &self.cfg.namespace, DEPLOYMENT_NAME)
                .await,
        );
        join_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_kube_system() {
        let mut cfg = MetricsServerConfig::default();
        assert_eq!(cfg.namespace, "kube-system");
        cfg.minimum_nodes = 0;
        let scope = ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        };
        cfg.validate_and_set_defaults(&scope).unwrap();
        assert_eq!(cfg.minimum_nodes, DEFAULT_MINIMUM_NODES);
    }

    #[test]
    fn test_manifest_targets_kube_system() {
        assert!(MANIFEST.contains("name: metrics-server\n  namespace: kube-system"));
        assert!(MANIFEST.contains("apiregistration.k8s.io/v1\n"));
    }
}
