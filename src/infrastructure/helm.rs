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

use crate::infrastructure::constants::{HELM_QUERY_INTERVAL, KUBECTL_READ_TIMEOUT};
use crate::infrastructure::kubernetes::Observer;
use crate::infrastructure::logging::LogWriter;
use crate::infrastructure::process::{render_command_line, run_checked};
use crate::shared::{CancelScope, Result, TesterError};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One chart release.
#[derive(Clone)]
pub struct HelmRelease {
    pub namespace: String,
    pub repo_name: String,
    pub chart_repo_url: String,
    pub chart_name: String,
    pub release_name: String,
    pub values: serde_json::Value,
    pub timeout: Duration,
    pub query_interval: Duration,
    /// Runs every `query_interval` while the install is in flight.
    pub observer: Option<Arc<dyn Observer>>,
}

impl HelmRelease {
    pub fn new(namespace: &str, repo_name: &str, repo_url: &str, chart: &str, release: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            repo_name: repo_name.to_string(),
            chart_repo_url: repo_url.to_string(),
            chart_name: chart.to_string(),
            release_name: release.to_string(),
            values: serde_json::Value::Null,
            timeout: Duration::from_secs(15 * 60),
            query_interval: HELM_QUERY_INTERVAL,
            observer: None,
        }
    }

    pub fn values(mut self, values: serde_json::Value) -> Self {
        self.values = values;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[async_trait]
pub trait Helm: Send + Sync {
    async fn add_update(&self, repo_name: &str, repo_url: &str) -> Result<()>;

    async fn install(&self, release: &HelmRelease) -> Result<()>;

    /// Uninstall from the install-time namespace. A release found only in a
    /// different namespace is reported as an error and left in place.
    async fn uninstall(&self, release: &HelmRelease) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ListedRelease {
    name: String,
    namespace: String,
}

pub struct HelmCli {
    binary: String,
    kubeconfig_path: String,
    context: String,
    log_writer: LogWriter,
    cancel: CancelScope,
}

impl HelmCli {
    pub fn new(kubeconfig_path: &str, context: &str, log_writer: LogWriter, cancel: CancelScope) -> Self {
        Self {
            binary: "helm".to_string(),
            kubeconfig_path: kubeconfig_path.to_string(),
            context: context.to_string(),
            log_writer,
            cancel,
        }
    }

    fn with_globals(&self, mut args: Vec<String>) -> Vec<String> {
        if !self.kubeconfig_path.is_empty() {
            args.push(format!("--kubeconfig={}", self.kubeconfig_path));
        }
        if !self.context.is_empty() {
            args.push(format!("--kube-context={}", self.context));
        }
        args
    }

    async fn helm(&self, args: Vec<String>, timeout: Duration) -> Result<String> {
        let args = self.with_globals(args);
        let out = run_checked(&self.binary, &args, timeout, &self.cancel).await?;
        self.log_writer
            .section(&render_command_line(&self.binary, &args), &out);
        Ok(out)
    }

    async fn find_release_namespaces(&self, release: &str) -> Result<Vec<String>> {
        let out = self
            .helm(
                vec![
                    "list".to_string(),
                    "--all-namespaces".to_string(),
                    "--filter".to_string(),
                    format!("^{}$", release),
                    "--output".to_string(),
                    "json".to_string(),
                ],
                KUBECTL_READ_TIMEOUT,
            )
            .await?;
        let listed: Vec<ListedRelease> = serde_json::from_str(out.trim())?;
        Ok(listed
            .into_iter()
            .filter(|r| r.name == release)
            .map(|r| r.namespace)
            .collect())
    }
}

pub fn install_args(release: &HelmRelease, values_path: &str) -> Vec<String> {
    let chart = if release.repo_name.is_empty() {
        release.chart_name.clone()
    } else {
        format!("{}/{}", release.repo_name, release.chart_name)
    };
    vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.release_name.clone(),
        chart,
        "--namespace".to_string(),
        release.namespace.clone(),
        "--create-namespace".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        crate::shared::duration::format_duration(release.timeout),
        "--values".to_string(),
        values_path.to_string(),
    ]
}

#[async_trait]
impl Helm for HelmCli {
    async fn add_update(&self, repo_name: &str, repo_url: &str) -> Result<()> {
        info!(repo = %repo_name, url = %repo_url, "adding helm repo");
        self.helm(
            vec![
                "repo".to_string(),
                "add".to_string(),
                repo_name.to_string(),
                repo_url.to_string(),
                "--force-update".to_string(),
            ],
            KUBECTL_READ_TIMEOUT * 4,
        )
        .await?;
        self.helm(vec!["repo".to_string(), "update".to_string()], KUBECTL_READ_TIMEOUT * 8)
            .await?;
        Ok(())
    }

    async fn install(&self, release: &HelmRelease) -> Result<()> {
        info!(
            namespace = %release.namespace,
            chart = %release.chart_name,
            release = %release.release_name,
            "installing chart"
        );
        let mut values = tempfile::Builder::new()
            .prefix("helm-values-")
            .suffix(".yaml")
            .tempfile()?;
        let rendered = if release.values.is_null() {
            String::new()
        } else {
            serde_yaml::to_string(&release.values)?
        };
        values.write_all(rendered.as_bytes())?;
        values.flush()?;

        let args = install_args(release, &values.path().to_string_lossy());
        let install = self.helm(args, release.timeout + Duration::from_secs(60));
        tokio::pin!(install);

        let mut ticker = tokio::time::interval(release.query_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                res = &mut install => {
                    res?;
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(obs) = &release.observer {
                        if let Err(e) = obs.observe().await {
                            warn!(release = %release.release_name, error = %e, "helm query failed");
                        }
                    }
                }
            }
        }
        info!(release = %release.release_name, namespace = %release.namespace, "installed chart");
        Ok(())
    }

    async fn uninstall(&self, release: &HelmRelease) -> Result<()> {
        info!(namespace = %release.namespace, release = %release.release_name, "uninstalling chart");
        let namespaces = self.find_release_namespaces(&release.release_name).await?;
        if namespaces.is_empty() {
            info!(release = %release.release_name, "release not found; nothing to uninstall");
            return Ok(());
        }
        if !namespaces.iter().any(|ns| ns == &release.namespace) {
            warn!(
                release = %release.release_name,
                expected = %release.namespace,
                found = ?namespaces,
                "release namespace differs from install namespace"
            );
            return Err(TesterError::assertion(format!(
                "release '{}' installed in namespace(s) {:?}, not '{}'; left in place",
                release.release_name, namespaces, release.namespace
            )));
        }
        let res = self
            .helm(
                vec![
                    "uninstall".to_string(),
                    release.release_name.clone(),
                    "--namespace".to_string(),
                    release.namespace.clone(),
                    "--wait".to_string(),
                    "--timeout".to_string(),
                    crate::shared::duration::format_duration(release.timeout),
                ],
                release.timeout + Duration::from_secs(60),
            )
            .await;
        match res {
            Err(TesterError::Command { reason, .. }) if reason.contains("not found") => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_args() {
        let release = HelmRelease::new(
            "kube-system",
            "aws-ebs-csi-driver",
            "https://kubernetes-sigs.github.io/aws-ebs-csi-driver",
            "aws-ebs-csi-driver",
            "aws-ebs-csi-driver",
        );
        let a = install_args(&release, "/tmp/v.yaml");
        assert_eq!(a[0], "upgrade");
        assert_eq!(a[2], "aws-ebs-csi-driver");
        assert_eq!(a[3], "aws-ebs-csi-driver/aws-ebs-csi-driver");
        assert!(a.windows(2).any(|w| w[0] == "--namespace" && w[1] == "kube-system"));
        assert!(a.windows(2).any(|w| w[0] == "--timeout" && w[1] == "15m0s"));
    }

    #[test]
    fn test_parse_release_listing() {
        let listed: Vec<ListedRelease> =
            serde_json::from_str(r#"[{"name":"wordpress","namespace":"wp","revision":"1"}]"#).unwrap();
        assert_eq!(listed[0].name, "wordpress");
        assert_eq!(listed[0].namespace, "wp");
    }
}
