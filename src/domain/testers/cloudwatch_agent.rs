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

//! CloudWatch agent for Container Insights, installed as a DaemonSet.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::record;
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, DELETE_CALL_TIMEOUT, DEPLOYMENT_POLL_INTERVAL, DEPLOYMENT_WAIT_TIMEOUT,
};
use crate::infrastructure::kubectl::{apply_manifest, delete_manifest};
use crate::infrastructure::kubernetes::{ResourceKind, WaitSpec};
use crate::infrastructure::templating::{render, Vars};
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NAME: &str = "cloudwatch-agent";

const MANIFEST_TEMPLATE: &str = include_str!("manifests/cloudwatch-agent.yaml");
const DAEMONSET_NAME: &str = "amazon-cloudwatch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudwatchAgentConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,
    pub region: String,
    /// Copied from the root config during validation.
    pub cluster_name: String,
}

impl Default for CloudwatchAgentConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: "amazon-cloudwatch".to_string(),
            region: "us-west-2".to_string(),
            cluster_name: String::new(),
        }
    }
}

impl AddOnConfig for CloudwatchAgentConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("region", FieldKind::Str, "AWS region the agent reports to"),
        FieldSchema::read_only("cluster_name", FieldKind::Str, "cluster name from the root config"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.region.is_empty() {
            return Err(ConfigError::MissingRequired(format!("add_on {} region", scope.add_on)).into());
        }
        self.cluster_name = scope.cluster_name.to_string();
        Ok(())
    }
}

pub struct CloudwatchAgentTester {
    cfg: CloudwatchAgentConfig,
    ctx: TesterContext,
}

impl CloudwatchAgentTester {
    pub fn new(cfg: CloudwatchAgentConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn manifest(&self) -> Result<String> {
        let vars = Vars::new()
            .set("namespace", &self.cfg.namespace)
            .set("region", &self.cfg.region)
            .set("cluster_name", &self.cfg.cluster_name);
        render(MANIFEST_TEMPLATE, &vars)
    }
}

#[async_trait]
impl Tester for CloudwatchAgentTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;

        let manifest = self.manifest()?;
        apply_manifest(
            self.ctx.kubectl.as_ref(),
            &self.ctx.poller(),
            &self.ctx.log_writer,
            "apply cloudwatch-agent",
            &manifest,
        )
        .await?;

        let spec = WaitSpec::new(ResourceKind::DaemonSet, &self.cfg.namespace, DAEMONSET_NAME)
            .intervals(Duration::from_secs(10), DEPLOYMENT_POLL_INTERVAL)
            .timeout(DEPLOYMENT_WAIT_TIMEOUT)
            .tolerate_missing();
        let observer = self
            .ctx
            .observer()
            .describe(&self.cfg.namespace, "daemonset", DAEMONSET_NAME);
        self.ctx
            .poller()
            .wait_for_daemonset(self.ctx.client.as_ref(), &spec, Some(&observer))
            .await?;
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        match self.manifest() {
            Ok(manifest) => record(
                &mut errors,
                "failed to delete cloudwatch-agent manifest",
                delete_manifest(
                    self.ctx.kubectl.as_ref(),
                    &self.ctx.log_writer,
                    &manifest,
                    DELETE_CALL_TIMEOUT,
                )
                .await,
            ),
            Err(e) => errors.push(e.to_string()),
        }
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(&self.cfg.namespace).await,
        );
        join_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_copies_cluster_name() {
        let mut cfg = CloudwatchAgentConfig::default();
        let scope = ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        };
        cfg.validate_and_set_defaults(&scope).unwrap();
        assert_eq!(cfg.cluster_name, "demo");

        cfg.region.clear();
        assert!(cfg.validate_and_set_defaults(&scope).is_err());
    }

    #[test]
    fn test_manifest_renders_every_placeholder() {
        let mut cfg = CloudwatchAgentConfig::default();
        cfg.cluster_name = "demo".to_string();
        let out = render(
            MANIFEST_TEMPLATE,
            &Vars::new()
                .set("namespace", &cfg.namespace)
                .set("region", &cfg.region)
                .set("cluster_name", &cfg.cluster_name),
        )
        .unwrap();
        assert!(!out.contains("{{"));
        assert!(out.contains("\"cluster_name\": \"demo\""));
        assert!(out.contains("\"region\": \"us-west-2\""));
        assert!(out.contains("image: amazon/cloudwatch-agent:1.245315.0"));
    }
}
