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

//! Root configuration: load, environment overlay, validation, and sync.

pub mod schema;

use crate::domain::registry::REGISTRY;
use crate::domain::testers::{
    cloudwatch_agent::CloudwatchAgentConfig, clusterloader::ClusterloaderConfig,
    conformance::ConformanceConfig, csi_ebs::CsiEbsConfig, fluent_bit::FluentBitConfig,
    jobs_echo::JobsEchoConfig, jobs_pi::JobsPiConfig,
    kubernetes_dashboard::KubernetesDashboardConfig, metrics_server::MetricsServerConfig,
    nlb_hello_world::NlbHelloWorldConfig, stress::StressConfig, wordpress::WordpressConfig,
};
use crate::infrastructure::constants::{
    CONFIG_FILE_SUFFIX, DEFAULT_CLIENTS, DEFAULT_CLIENT_BURST, DEFAULT_CLIENT_QPS,
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_MINIMUM_NODES, ENV_PREFIX,
};
use crate::infrastructure::kubectl::{default_kubectl_download_url, default_kubectl_path};
use crate::infrastructure::logging::log_file_path;
use crate::shared::duration::format_duration;
use crate::shared::{ConfigError, Result};
use schema::{overlay_env, FieldKind, FieldSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// What an add-on's validation gets to see of its surroundings.
#[derive(Debug, Clone, Copy)]
pub struct ValidationScope<'a> {
    /// Registry name, e.g. `cron-jobs-echo`.
    pub add_on: &'a str,
    pub cluster_name: &'a str,
}

/// Typed configuration of one add-on.
pub trait AddOnConfig: Serialize + DeserializeOwned + Default + Clone + Send + Sync {
    const SCHEMA: &'static [FieldSchema];

    fn enable(&self) -> bool;

    /// Fill defaults and check the enabled add-on is runnable.
    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()>;
}

/// Object-safe view over any [`AddOnConfig`], used by the registry table.
pub trait AddOnSection: Send + Sync {
    fn schema(&self) -> &'static [FieldSchema];
    fn enabled(&self) -> bool;
    fn overlay_env(&mut self, prefix: &str, env: &BTreeMap<String, String>) -> Result<Vec<String>>;
    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()>;
}

impl<T: AddOnConfig> AddOnSection for T {
    fn schema(&self) -> &'static [FieldSchema] {
        T::SCHEMA
    }

    fn enabled(&self) -> bool {
        self.enable()
    }

    fn overlay_env(&mut self, prefix: &str, env: &BTreeMap<String, String>) -> Result<Vec<String>> {
        overlay_env(self, prefix, T::SCHEMA, env)
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        AddOnConfig::validate_and_set_defaults(self, scope)
    }
}

/// Shared checks for the `namespace` / `minimum_nodes` pair every add-on carries.
pub fn validate_common(name: &str, namespace: &str, minimum_nodes: &mut usize) -> Result<()> {
    if namespace.is_empty() {
        return Err(ConfigError::MissingRequired(format!("add_on {} namespace", name)).into());
    }
    if *minimum_nodes == 0 {
        *minimum_nodes = DEFAULT_MINIMUM_NODES;
    }
    Ok(())
}

pub const ROOT_SCHEMA: &[FieldSchema] = &[
    FieldSchema::new("prompt", FieldKind::Bool, "ask before applying or deleting"),
    FieldSchema::new("cluster_name", FieldKind::Str, "cluster name, lower-case"),
    FieldSchema::new("config_path", FieldKind::Str, "path of this configuration file"),
    FieldSchema::new("log_color", FieldKind::Bool, "colored log output"),
    FieldSchema::new("log_level", FieldKind::Str, "log level filter"),
    FieldSchema::new("log_outputs", FieldKind::StrList, "stderr, stdout, or file paths"),
    FieldSchema::new("kubectl_download_url", FieldKind::Str, "kubectl download URL"),
    FieldSchema::new("kubectl_path", FieldKind::Str, "kubectl binary path"),
    FieldSchema::new("kubeconfig_path", FieldKind::Str, "kubeconfig path"),
    FieldSchema::new("kubeconfig_context", FieldKind::Str, "kubeconfig context"),
    FieldSchema::new("clients", FieldKind::Int, "number of API clients"),
    FieldSchema::new("client_qps", FieldKind::Float, "client QPS"),
    FieldSchema::new("client_burst", FieldKind::Int, "client burst"),
    FieldSchema::new("client_timeout", FieldKind::Duration, "client request timeout"),
    FieldSchema::read_only("client_timeout_string", FieldKind::Str, "client_timeout as text"),
    FieldSchema::new("minimum_nodes", FieldKind::UInt, "minimum nodes; 0 disables the check"),
    FieldSchema::read_only("total_nodes", FieldKind::UInt, "node count seen by apply"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub prompt: bool,
    pub cluster_name: String,
    pub config_path: String,

    pub log_color: bool,
    pub log_level: String,
    pub log_outputs: Vec<String>,

    pub kubectl_download_url: String,
    pub kubectl_path: String,
    pub kubeconfig_path: String,
    pub kubeconfig_context: String,

    pub clients: i32,
    pub client_qps: f32,
    pub client_burst: i32,
    #[serde(with = "crate::shared::duration::text")]
    pub client_timeout: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_timeout_string: String,

    pub minimum_nodes: usize,
    pub total_nodes: usize,

    pub add_on_cloudwatch_agent: CloudwatchAgentConfig,
    pub add_on_metrics_server: MetricsServerConfig,
    pub add_on_fluent_bit: FluentBitConfig,
    pub add_on_conformance: ConformanceConfig,
    pub add_on_csi_ebs: CsiEbsConfig,
    pub add_on_kubernetes_dashboard: KubernetesDashboardConfig,
    pub add_on_nlb_hello_world: NlbHelloWorldConfig,
    pub add_on_wordpress: WordpressConfig,
    pub add_on_jobs_pi: JobsPiConfig,
    pub add_on_jobs_echo: JobsEchoConfig,
    #[serde(default = "JobsEchoConfig::cron_job")]
    pub add_on_cron_jobs_echo: JobsEchoConfig,
    pub add_on_clusterloader: ClusterloaderConfig,
    pub add_on_stress: StressConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: true,
            cluster_name: String::new(),
            config_path: String::new(),
            log_color: true,
            log_level: "info".to_string(),
            log_outputs: vec!["stderr".to_string()],
            kubectl_download_url: default_kubectl_download_url(),
            kubectl_path: default_kubectl_path(),
            kubeconfig_path: String::new(),
            kubeconfig_context: String::new(),
            clients: DEFAULT_CLIENTS as i32,
            client_qps: DEFAULT_CLIENT_QPS,
            client_burst: DEFAULT_CLIENT_BURST as i32,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            client_timeout_string: String::new(),
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            total_nodes: 0,
            add_on_cloudwatch_agent: CloudwatchAgentConfig::default(),
            add_on_metrics_server: MetricsServerConfig::default(),
            add_on_fluent_bit: FluentBitConfig::default(),
            add_on_conformance: ConformanceConfig::default(),
            add_on_csi_ebs: CsiEbsConfig::default(),
            add_on_kubernetes_dashboard: KubernetesDashboardConfig::default(),
            add_on_nlb_hello_world: NlbHelloWorldConfig::default(),
            add_on_wordpress: WordpressConfig::default(),
            add_on_jobs_pi: JobsPiConfig::default(),
            add_on_jobs_echo: JobsEchoConfig::job(),
            add_on_cron_jobs_echo: JobsEchoConfig::cron_job(),
            add_on_clusterloader: ClusterloaderConfig::default(),
            add_on_stress: StressConfig::default(),
        }
    }
}

impl Config {
    /// Read and parse `path`. Unknown keys are rejected. `config_path` is
    /// rewritten to the absolute path and the file re-synced; a failed
    /// re-sync is only a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()).into())
            }
            Err(e) => return Err(ConfigError::IoFailure(format!("{}: {}", path.display(), e)).into()),
        };
        let mut cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| ConfigError::Malformed(format!("{}: {}", path.display(), e)))?;
        cfg.config_path = absolute(path)?.display().to_string();

        if let Err(e) = cfg.sync() {
            warn!(path = %cfg.config_path, error = %e, "failed to sync config file");
        }
        Ok(cfg)
    }

    /// Write the config to `config_path` (write temp, then rename), mode 0600.
    pub fn sync(&mut self) -> Result<()> {
        if self.config_path.is_empty() {
            return Err(ConfigError::IoFailure("empty config path".to_string()).into());
        }
        self.config_path = absolute(Path::new(&self.config_path))?.display().to_string();
        if !self.kubeconfig_path.is_empty() {
            self.kubeconfig_path = absolute(Path::new(&self.kubeconfig_path))?
                .display()
                .to_string();
        }

        let text = serde_yaml::to_string(self)?;
        let target = PathBuf::from(&self.config_path);
        let dir = target
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(io_failure(&dir))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_failure(&dir))?;
        tmp.write_all(text.as_bytes()).map_err(io_failure(&target))?;
        tmp.flush().map_err(io_failure(&target))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(io_failure(&target))?;
        }
        tmp.persist(&target)
            .map_err(|e| ConfigError::IoFailure(format!("{}: {}", target.display(), e.error)))?;
        Ok(())
    }

    /// Copy the config file to `<stem>.backup.yaml` next to it.
    pub fn backup(&self) -> Result<PathBuf> {
        let src = PathBuf::from(&self.config_path);
        let backup = backup_path(&src);
        std::fs::copy(&src, &backup).map_err(io_failure(&backup))?;
        info!(path = %backup.display(), "backed up config file");
        Ok(backup)
    }

    /// Overlay `K8S_TESTER_*` variables from `env`. A variable matching no
    /// root or add-on field is an `UnknownField` error.
    pub fn update_from_environment(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        let mut consumed: BTreeSet<String> =
            overlay_env(self, ENV_PREFIX, ROOT_SCHEMA, env)?.into_iter().collect();
        for add_on in REGISTRY.iter() {
            let prefix = add_on.env_prefix();
            consumed.extend((add_on.section_mut)(self).overlay_env(&prefix, env)?);
        }

        let unknown: Vec<&String> = env
            .iter()
            .filter(|(k, v)| k.starts_with(ENV_PREFIX) && !v.is_empty() && !consumed.contains(*k))
            .map(|(k, _)| k)
            .collect();
        if let Some(first) = unknown.first() {
            return Err(ConfigError::UnknownField((*first).clone()).into());
        }
        Ok(())
    }

    /// Process environment as a map, for [`Config::update_from_environment`].
    pub fn process_env() -> BTreeMap<String, String> {
        std::env::vars().collect()
    }

    /// Validate the root and every enabled add-on, filling defaults. The file
    /// is synced afterwards whether or not validation passed.
    pub fn validate_and_set_defaults(&mut self) -> Result<()> {
        let res = self.validate_inner();
        if let Err(e) = self.sync() {
            warn!(path = %self.config_path, error = %e, "failed to sync config file");
        }
        res
    }

    fn validate_inner(&mut self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::MissingRequired("cluster_name".to_string()).into());
        }
        if self.cluster_name != self.cluster_name.to_lowercase() {
            return Err(ConfigError::InvalidField(format!(
                "cluster_name {:?} must be in lower-case",
                self.cluster_name
            ))
            .into());
        }

        if self.clients == 0 {
            self.clients = DEFAULT_CLIENTS as i32;
        }
        if self.client_qps == 0.0 {
            self.client_qps = DEFAULT_CLIENT_QPS;
        }
        if self.client_burst == 0 {
            self.client_burst = DEFAULT_CLIENT_BURST as i32;
        }
        if self.client_timeout.is_zero() {
            self.client_timeout = DEFAULT_CLIENT_TIMEOUT;
        }
        self.client_timeout_string = format_duration(self.client_timeout);

        if self.config_path.is_empty() {
            let dir = std::env::current_dir()
                .unwrap_or_else(|_| std::env::temp_dir().join(&self.cluster_name));
            self.config_path = dir
                .join(format!("{}{}", self.cluster_name, CONFIG_FILE_SUFFIX))
                .display()
                .to_string();
        }
        self.config_path = absolute(Path::new(&self.config_path))?.display().to_string();

        if self.log_outputs.len() == 1
            && (self.log_outputs[0] == "stderr" || self.log_outputs[0] == "stdout")
        {
            self.log_outputs
                .push(format!("{}.log", self.config_path.replace(".yaml", "")));
        }
        if log_file_path(&self.log_outputs).is_none() {
            return Err(ConfigError::MissingRequired(format!(
                "*.log file in log_outputs {:?}",
                self.log_outputs
            ))
            .into());
        }

        let cluster_name = self.cluster_name.clone();
        for add_on in REGISTRY.iter() {
            let scope = ValidationScope {
                add_on: add_on.name,
                cluster_name: &cluster_name,
            };
            let section = (add_on.section_mut)(self);
            if section.enabled() {
                section.validate_and_set_defaults(&scope)?;
            }
        }
        Ok(())
    }

    /// Names of enabled add-ons in canonical order.
    pub fn enabled_add_ons(&self) -> Vec<&'static str> {
        REGISTRY
            .iter()
            .filter(|a| (a.section)(self).enabled())
            .map(|a| a.name)
            .collect()
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        log_file_path(&self.log_outputs)
    }
}

fn io_failure(path: &Path) -> impl Fn(std::io::Error) -> crate::shared::TesterError + '_ {
    move |e| ConfigError::IoFailure(format!("{}: {}", path.display(), e)).into()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(io_failure(path))?;
    Ok(cwd.join(path))
}

/// `/a/b/c.yaml` becomes `/a/b/c.backup.yaml`.
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.backup.yaml", stem))
}
