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

//! Kubernetes Dashboard plus the `eks-admin` service account whose token
//! logs into it. The login page is fetched through `kubectl proxy`.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{fetch_until, record};
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, DELETE_CALL_TIMEOUT, DEPLOYMENT_INITIAL_WAIT, DEPLOYMENT_POLL_INTERVAL,
    DEPLOYMENT_WAIT_TIMEOUT,
};
use crate::infrastructure::kubectl::{apply_manifest, delete_manifest};
use crate::infrastructure::kubernetes::{Check, ResourceKind, WaitSpec};
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "kubernetes-dashboard";

const DASHBOARD_MANIFEST: &str = include_str!("manifests/kubernetes-dashboard.yaml");
const EKS_ADMIN_MANIFEST: &str = include_str!("manifests/eks-admin.yaml");
const DEPLOYMENT_NAME: &str = "kubernetes-dashboard";
const DASHBOARD_NAMESPACE: &str = "kubernetes-dashboard";
const TOKEN_NAMESPACE: &str = "kube-system";
const TOKEN_SECRET_PREFIX: &str = "eks-admin";
const LOGIN_PAGE_MARKER: &str = "The Kubernetes Authors";
const TOKEN_WAIT: Duration = Duration::from_secs(60);
const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(15);
const PROXY_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KubernetesDashboardConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    /// Fixed by the upstream manifest.
    pub namespace: String,
    pub proxy_port: u16,
    /// Login URL through `kubectl proxy`, set after apply.
    pub url: String,
}

impl Default for KubernetesDashboardConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: DASHBOARD_NAMESPACE.to_string(),
            proxy_port: 8001,
            url: String::new(),
        }
    }
}

impl AddOnConfig for KubernetesDashboardConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("proxy_port", FieldKind::UInt, "local port for kubectl proxy"),
        FieldSchema::read_only("url", FieldKind::Str, "dashboard login URL through the proxy"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.namespace != DASHBOARD_NAMESPACE {
            return Err(ConfigError::Contradiction(format!(
                "add_on {} namespace must be {:?}, got {:?}",
                scope.add_on, DASHBOARD_NAMESPACE, self.namespace
            ))
            .into());
        }
        if self.proxy_port == 0 {
            self.proxy_port = 8001;
        }
        Ok(())
    }
}

pub fn login_url(port: u16) -> String {
    format!(
        "http://localhost:{}/api/v1/namespaces/kubernetes-dashboard/services/https:kubernetes-dashboard:/proxy/#/login",
        port
    )
}

/// Token of the first `eks-admin*` secret that has one.
fn find_token(secrets: &[Secret]) -> Option<String> {
    secrets
        .iter()
        .filter(|s| {
            s.metadata
                .name
                .as_deref()
                .is_some_and(|n| n.starts_with(TOKEN_SECRET_PREFIX))
        })
        .filter_map(|s| s.data.as_ref()?.get("token"))
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        .find(|t| !t.is_empty())
}

pub struct KubernetesDashboardTester {
    cfg: KubernetesDashboardConfig,
    ctx: TesterContext,
}

impl KubernetesDashboardTester {
    pub fn new(cfg: KubernetesDashboardConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    async fn apply_yaml(&self, operation: &str, manifest: &str) -> Result<()> {
        apply_manifest(
            self.ctx.kubectl.as_ref(),
            &self.ctx.poller(),
            &self.ctx.log_writer,
            operation,
            manifest,
        )
        .await
    }

    async fn fetch_token(&self) -> Result<String> {
        let spec = WaitSpec::custom("eks-admin token", TOKEN_WAIT, TOKEN_POLL_INTERVAL);
        let client = self.ctx.client.as_ref();
        self.ctx
            .poller()
            .wait(&spec, None, || async move {
                let secrets = client.list_secrets(TOKEN_NAMESPACE).await?;
                Ok(match find_token(&secrets) {
                    Some(token) => Check::Done(token),
                    None => Check::Pending(format!("{} secrets, no eks-admin token", secrets.len())),
                })
            })
            .await
    }

    async fn check_proxy(&mut self) -> Result<()> {
        let proxy = self.ctx.kubectl.proxy(self.cfg.proxy_port).await?;
        let url = login_url(proxy.port);
        let res = fetch_until(
            &self.ctx,
            &url,
            LOGIN_PAGE_MARKER,
            PROXY_WAIT,
            Duration::from_secs(5),
        )
        .await;
        proxy.stop().await;
        res?;

        self.ctx
            .log_writer
            .write_str(&format!("\nKubernetes Dashboard URL:\n{}\n\n", url));
        info!(url = %url, "dashboard login page is served");
        self.cfg.url = url;
        Ok(())
    }
}

#[async_trait]
impl Tester for KubernetesDashboardTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;

        self.apply_yaml("apply kubernetes-dashboard", DASHBOARD_MANIFEST)
            .await?;

        let spec = WaitSpec::new(ResourceKind::Deployment, &self.cfg.namespace, DEPLOYMENT_NAME)
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

        self.apply_yaml("apply eks-admin", EKS_ADMIN_MANIFEST).await?;
        let token = self.fetch_token().await?;
        self.ctx.log_writer.write_str(&format!(
            "\n\n\nKubernetes Dashboard Token:\n{}\n\n\n",
            token
        ));

        self.check_proxy().await
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        for (what, manifest) in [
            ("failed to delete eks-admin manifest", EKS_ADMIN_MANIFEST),
            ("failed to delete dashboard manifest", DASHBOARD_MANIFEST),
        ] {
            record(
                &mut errors,
                what,
                delete_manifest(
                    self.ctx.kubectl.as_ref(),
                    &self.ctx.log_writer,
                    manifest,
                    DELETE_CALL_TIMEOUT,
                )
                .await,
            );
        }
        join_errors(errors)
    }

    fn write_back(&self, config: &mut crate::domain::config::Config) {
        config.add_on_kubernetes_dashboard.url = self.cfg.url.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(name: &str, token: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: token.map(|t| {
                BTreeMap::from([("token".to_string(), ByteString(t.as_bytes().to_vec()))])
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_token() {
        let secrets = vec![
            secret("default-token-abcde", Some("nope")),
            secret("eks-admin-token", None),
            secret("eks-admin-token-xyz12", Some("abc.def")),
        ];
        assert_eq!(find_token(&secrets).as_deref(), Some("abc.def"));
        assert_eq!(find_token(&secrets[..2]), None);
    }

    #[test]
    fn test_namespace_is_fixed() {
        let scope = ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        };
        let mut cfg = KubernetesDashboardConfig::default();
        cfg.validate_and_set_defaults(&scope).unwrap();
        cfg.namespace = "elsewhere".to_string();
        assert!(cfg.validate_and_set_defaults(&scope).is_err());
    }

    #[test]
    fn test_login_url() {
        assert!(login_url(8001).starts_with("http://localhost:8001/api/v1/namespaces/kubernetes-dashboard/"));
        assert!(DASHBOARD_MANIFEST.contains("name: kubernetes-dashboard"));
    }
}
