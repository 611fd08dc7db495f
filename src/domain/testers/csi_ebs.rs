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

//! EBS CSI driver from its Helm chart, then an online volume resize.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{default_namespace, record};
use crate::infrastructure::constants::{DEFAULT_MINIMUM_NODES, HELM_INSTALL_TIMEOUT};
use crate::infrastructure::helm::HelmRelease;
use crate::infrastructure::kubernetes::{Check, ObjectKind, WaitSpec};
use crate::shared::{ConfigError, Result, TesterError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "csi-ebs";

const CHART_REPO_NAME: &str = "aws-ebs-csi-driver";
const CHART_NAME: &str = "aws-ebs-csi-driver";
const CHART_NAMESPACE: &str = "kube-system";
const STORAGE_CLASS: &str = "ebs-sc";
const PROVISIONER: &str = "ebs.csi.aws.com";
const PVC_NAME: &str = "ebs-claim";
const INITIAL_SIZE: &str = "4Gi";
const RESIZED_SIZE: &str = "6Gi";
const BOUND_WAIT: Duration = Duration::from_secs(3 * 60);
const RESIZE_WAIT: Duration = Duration::from_secs(8 * 60);
const RESIZE_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsiEbsConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    /// Namespace of the test claim. The driver itself goes into kube-system.
    pub namespace: String,
    pub helm_chart_repo_url: String,
}

impl Default for CsiEbsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            helm_chart_repo_url: "https://kubernetes-sigs.github.io/aws-ebs-csi-driver".to_string(),
        }
    }
}

impl AddOnConfig for CsiEbsConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("helm_chart_repo_url", FieldKind::Str, "aws-ebs-csi-driver chart repository"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.helm_chart_repo_url.is_empty() {
            return Err(ConfigError::MissingRequired(format!(
                "add_on {} helm_chart_repo_url",
                scope.add_on
            ))
            .into());
        }
        Ok(())
    }
}

/// Bytes in a Kubernetes quantity such as `6Gi`, `500M` or `1073741824`.
pub fn quantity_bytes(q: &str) -> Option<u64> {
    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    let q = q.trim();
    for (suffix, mult) in SUFFIXES {
        if let Some(num) = q.strip_suffix(suffix) {
            return num.parse::<u64>().ok().and_then(|n| n.checked_mul(*mult));
        }
    }
    q.parse::<u64>().ok()
}

fn storage_class() -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(STORAGE_CLASS.to_string()),
            ..Default::default()
        },
        provisioner: PROVISIONER.to_string(),
        allow_volume_expansion: Some(true),
        volume_binding_mode: Some("Immediate".to_string()),
        ..Default::default()
    }
}

fn claim(namespace: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(PVC_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(STORAGE_CLASS.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(INITIAL_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct CsiEbsTester {
    cfg: CsiEbsConfig,
    ctx: TesterContext,
}

impl CsiEbsTester {
    pub fn new(cfg: CsiEbsConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn release(&self) -> HelmRelease {
        let observer = self
            .ctx
            .observer()
            .get_all(CHART_NAMESPACE)
            .describe(CHART_NAMESPACE, "daemonset.apps", "ebs-csi-node")
            .describe(CHART_NAMESPACE, "deployment.apps", "ebs-csi-controller")
            .command(&[
                "--namespace",
                CHART_NAMESPACE,
                "logs",
                "--selector=app=ebs-csi-node",
                "--all-containers=true",
                "--timestamps",
            ]);
        HelmRelease::new(
            CHART_NAMESPACE,
            CHART_REPO_NAME,
            &self.cfg.helm_chart_repo_url,
            CHART_NAME,
            CHART_NAME,
        )
        .values(json!({
            "enableVolumeScheduling": true,
            "enableVolumeResizing": true,
            "enableVolumeSnapshot": true,
        }))
        .timeout(HELM_INSTALL_TIMEOUT)
        .observer(Arc::new(observer))
    }

    /// Returns the bound volume's name.
    async fn wait_bound(&self) -> Result<String> {
        let spec = WaitSpec::custom(
            &format!("PVC '{}/{}' bound", self.cfg.namespace, PVC_NAME),
            BOUND_WAIT,
            Duration::from_secs(5),
        )
        .tolerate_missing();
        let client = self.ctx.client.as_ref();
        let ns = self.cfg.namespace.as_str();
        self.ctx
            .poller()
            .wait(&spec, None, || async move {
                let pvc = client.get_pvc(ns, PVC_NAME).await?;
                let phase = pvc.status.as_ref().and_then(|s| s.phase.clone());
                let volume = pvc.spec.as_ref().and_then(|s| s.volume_name.clone());
                match (phase.as_deref(), volume) {
                    (Some("Bound"), Some(v)) if !v.is_empty() => Ok(Check::Done(v)),
                    (phase, _) => Ok(Check::Pending(format!(
                        "phase {}",
                        phase.unwrap_or("Unknown")
                    ))),
                }
            })
            .await
    }

    async fn wait_resized(&self, volume: &str) -> Result<()> {
        let want = quantity_bytes(RESIZED_SIZE)
            .ok_or_else(|| TesterError::assertion("bad resize quantity"))?;
        let spec = WaitSpec::custom(
            &format!("PersistentVolume '{}' resize to {}", volume, RESIZED_SIZE),
            RESIZE_WAIT,
            RESIZE_POLL_INTERVAL,
        );
        let client = self.ctx.client.as_ref();
        self.ctx
            .poller()
            .wait(&spec, None, || async move {
                let pv = client.get_pv(volume).await?;
                let capacity = pv
                    .spec
                    .as_ref()
                    .and_then(|s| s.capacity.as_ref())
                    .and_then(|c| c.get("storage"))
                    .map(|q| q.0.clone())
                    .unwrap_or_default();
                match quantity_bytes(&capacity) {
                    Some(have) if have >= want => Ok(Check::Done(())),
                    _ => Ok(Check::Pending(format!("capacity {:?}", capacity))),
                }
            })
            .await
    }
}

#[async_trait]
impl Tester for CsiEbsTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;

        self.ctx
            .helm
            .add_update(CHART_REPO_NAME, &self.cfg.helm_chart_repo_url)
            .await?;
        self.ctx.helm.install(&self.release()).await?;

        self.ctx.client.create_namespace(&self.cfg.namespace).await?;
        self.ctx.client.apply_storage_class(&storage_class()).await?;
        match self
            .ctx
            .client
            .create_pvc(&self.cfg.namespace, &claim(&self.cfg.namespace))
            .await
        {
            Err(e) if e.is_already_exists() => {}
            other => other?,
        }

        let volume = self.wait_bound().await?;
        info!(pvc = PVC_NAME, volume = %volume, "claim bound; resizing");
        self.ctx
            .client
            .resize_pvc(&self.cfg.namespace, PVC_NAME, RESIZED_SIZE)
            .await?;
        self.wait_resized(&volume).await?;

        self.ctx.log_writer.write_str("\n[PASSED] PVC ReSize\n");
        info!(pvc = PVC_NAME, size = RESIZED_SIZE, "[PASSED] PVC ReSize");
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let ns = &self.cfg.namespace;
        let mut errors = Vec::new();
        record(
            &mut errors,
            "failed to delete PVC",
            self.ctx
                .client
                .delete_object(ObjectKind::PersistentVolumeClaim, ns, PVC_NAME)
                .await,
        );
        record(
            &mut errors,
            "failed to delete StorageClass",
            self.ctx
                .client
                .delete_object(ObjectKind::StorageClass, "", STORAGE_CLASS)
                .await,
        );
        record(
            &mut errors,
            "failed to uninstall aws-ebs-csi-driver chart",
            self.ctx.helm.uninstall(&self.release()).await,
        );
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(ns).await,
        );
        join_errors(errors)
    }
}
