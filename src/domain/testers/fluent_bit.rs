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

//! fluent-bit DaemonSet tailing `/var/log/suite` on every node.
//!
//! After the DaemonSet is ready, a curl pod hits the built-in HTTP server
//! through the Service, and a second pod writes a line into the tailed
//! directory so the node-local fluent-bit pod echoes it to stdout.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{default_namespace, record, wait_pod_logs};
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, DELETE_CALL_TIMEOUT, DEPLOYMENT_POLL_INTERVAL, DEPLOYMENT_WAIT_TIMEOUT,
};
use crate::infrastructure::kubectl::{apply_manifest, delete_manifest};
use crate::infrastructure::kubernetes::{ObjectKind, ResourceKind, WaitSpec};
use crate::infrastructure::templating::{render, Vars};
use crate::shared::{Result, TesterError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const NAME: &str = "fluent-bit";

const MANIFEST_TEMPLATE: &str = include_str!("manifests/fluent-bit.yaml");
const DAEMONSET_NAME: &str = "fluent-bit";
const HTTP_CLIENT_POD: &str = "http-client";
const LOGGING_POD: &str = "fake-logger-pod";
const CURL_IMAGE: &str = "byrnedo/alpine-curl";
const SUITE_LOG_DIR: &str = "/var/log/suite";
const LOG_LINE: &str = "fluent-bit-test";
const POD_WAIT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FluentBitConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,
    pub image: String,
}

impl Default for FluentBitConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            image: "fluent/fluent-bit:1.5".to_string(),
        }
    }
}

impl AddOnConfig for FluentBitConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("image", FieldKind::Str, "fluent-bit container image"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.image.is_empty() {
            self.image = FluentBitConfig::default().image;
        }
        Ok(())
    }
}

fn curl_pod(name: &str, command: &str, mount_suite_dir: bool) -> Pod {
    let (volumes, mounts) = if mount_suite_dir {
        (
            Some(vec![Volume {
                name: "varlog".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: SUITE_LOG_DIR.to_string(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: "varlog".to_string(),
                mount_path: SUITE_LOG_DIR.to_string(),
                ..Default::default()
            }]),
        )
    } else {
        (None, None)
    };
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: name.to_string(),
                image: Some(CURL_IMAGE.to_string()),
                command: Some(vec!["/bin/sh".to_string()]),
                args: Some(vec!["-c".to_string(), command.to_string()]),
                volume_mounts: mounts,
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            volumes,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of the fluent-bit pod scheduled on the same host as `target`.
fn colocated_fluent_bit_pod(pods: &[Pod], target: &str) -> Option<String> {
    let host_ip = |p: &Pod| p.status.as_ref().and_then(|s| s.host_ip.clone());
    let target_ip = pods
        .iter()
        .find(|p| p.metadata.name.as_deref() == Some(target))
        .and_then(host_ip)?;
    pods.iter()
        .filter(|p| {
            p.metadata
                .name
                .as_deref()
                .is_some_and(|n| n.starts_with(DAEMONSET_NAME))
        })
        .find(|p| host_ip(p).as_deref() == Some(target_ip.as_str()))
        .and_then(|p| p.metadata.name.clone())
}

pub struct FluentBitTester {
    cfg: FluentBitConfig,
    ctx: TesterContext,
}

impl FluentBitTester {
    pub fn new(cfg: FluentBitConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn manifest(&self) -> Result<String> {
        render(
            MANIFEST_TEMPLATE,
            &Vars::new()
                .set("namespace", &self.cfg.namespace)
                .set("image", &self.cfg.image),
        )
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        match self.ctx.client.create_pod(&self.cfg.namespace, pod).await {
            Err(e) if e.is_already_exists() => Ok(()),
            other => other,
        }
    }

    async fn check_http_server(&self) -> Result<()> {
        let pod = curl_pod(
            HTTP_CLIENT_POD,
            &format!("curl -s http://{}.{}", DAEMONSET_NAME, self.cfg.namespace),
            false,
        );
        self.create_pod(&pod).await?;
        let logs = wait_pod_logs(&self.ctx, &self.cfg.namespace, HTTP_CLIENT_POD, POD_WAIT_TIMEOUT)
            .await?;
        if !logs.contains("\"fluent-bit\"") {
            return Err(TesterError::assertion(format!(
                "unexpected fluent-bit HTTP response: {}",
                logs.trim()
            )));
        }
        info!(namespace = %self.cfg.namespace, "fluent-bit HTTP server answered");
        Ok(())
    }

    /// Best effort: the tail plugin may not have flushed yet.
    async fn check_log_collection(&self) -> Result<()> {
        let pod = curl_pod(
            LOGGING_POD,
            &format!("echo '{}' >> {}/date.log", LOG_LINE, SUITE_LOG_DIR),
            true,
        );
        self.create_pod(&pod).await?;
        wait_pod_logs(&self.ctx, &self.cfg.namespace, LOGGING_POD, POD_WAIT_TIMEOUT).await?;
        self.ctx.poller().sleep(Duration::from_secs(10)).await?;

        let pods = self.ctx.client.list_pods(&self.cfg.namespace, None).await?;
        let Some(fluent_pod) = colocated_fluent_bit_pod(&pods, LOGGING_POD) else {
            warn!(namespace = %self.cfg.namespace, "no fluent-bit pod found on the logging pod's node");
            return Ok(());
        };
        let logs = self
            .ctx
            .client
            .pod_logs(&self.cfg.namespace, &fluent_pod, Some(200))
            .await?;
        self.ctx
            .log_writer
            .section(&format!("Pod '{}/{}' logs", self.cfg.namespace, fluent_pod), &logs);
        if logs.contains(LOG_LINE) {
            info!(pod = %fluent_pod, "fluent-bit collected the test log line");
        } else {
            warn!(pod = %fluent_pod, "fluent-bit has not collected the test log line yet");
        }
        Ok(())
    }
}

#[async_trait]
impl Tester for FluentBitTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;
        self.ctx.client.create_namespace(&self.cfg.namespace).await?;

        let manifest = self.manifest()?;
        apply_manifest(
            self.ctx.kubectl.as_ref(),
            &self.ctx.poller(),
            &self.ctx.log_writer,
            "apply fluent-bit",
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

        self.check_http_server().await?;
        self.check_log_collection().await
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let ns = &self.cfg.namespace;
        let mut errors = Vec::new();
        for pod in [HTTP_CLIENT_POD, LOGGING_POD] {
            record(
                &mut errors,
                &format!("failed to delete Pod {}", pod),
                self.ctx.client.delete_object(ObjectKind::Pod, ns, pod).await,
            );
        }
        match self.manifest() {
            Ok(manifest) => record(
                &mut errors,
                "failed to delete fluent-bit manifest",
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
            self.ctx.delete_namespace(ns).await,
        );
        join_errors(errors)
    }
}
