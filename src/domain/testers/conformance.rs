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

//! Kubernetes conformance through sonobuoy.
//!
//! The sonobuoy binary is fetched on demand. A run is started, its e2e pod is
//! located, and `sonobuoy status` is polled on a shrinking interval until the
//! plugins complete. Results are retrieved, checked, and the e2e log and
//! junit report are copied to the configured paths.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{default_namespace, random_suffix, record};
use crate::infrastructure::constants::DEFAULT_MINIMUM_NODES;
use crate::infrastructure::installer::{ensure_binary_from_tar_gz, host_os_arch, unpack_tar_gz};
use crate::infrastructure::kubectl::args;
use crate::infrastructure::kubernetes::{Check, WaitSpec};
use crate::infrastructure::process::{render_command_line, run_checked, run_command};
use crate::shared::duration::format_duration;
use crate::shared::{ConfigError, Result, TesterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const NAME: &str = "conformance";

const SONOBUOY_VERSION: &str = "0.52.0";
const RUN_MODES: &[&str] = &["certified-conformance", "non-disruptive-conformance", "quick"];
const E2E_POD_PREFIX: &str = "sonobuoy-e2e-job-";
const E2E_POD_WAIT: Duration = Duration::from_secs(10 * 60);
const E2E_POD_POLL_INTERVAL: Duration = Duration::from_secs(10);
const STATUS_INITIAL_INTERVAL: Duration = Duration::from_secs(15 * 60);
const STATUS_MIN_INTERVAL: Duration = Duration::from_secs(2 * 60);
const STATUS_INTERVAL_DECAY: f64 = 0.7;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const HELP_TIMEOUT: Duration = Duration::from_secs(15);
const RETRIEVE_WAIT: Duration = Duration::from_secs(3 * 60);
const RETRIEVE_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const LOG_TAIL_LINES: usize = 30;

pub fn default_sonobuoy_path() -> String {
    format!("/tmp/sonobuoy-{}", SONOBUOY_VERSION)
}

pub fn default_sonobuoy_download_url() -> String {
    let (os, arch) = host_os_arch();
    // No darwin/arm64 build is published for this release.
    let arch = if os == "darwin" { "amd64" } else { arch };
    format!(
        "https://github.com/vmware-tanzu/sonobuoy/releases/download/v{v}/sonobuoy_{v}_{os}_{arch}.tar.gz",
        v = SONOBUOY_VERSION,
        os = os,
        arch = arch
    )
}

fn temp_path(suffix: &str) -> String {
    std::env::temp_dir()
        .join(format!("sonobuoy_results_{}{}", random_suffix(10), suffix))
        .display()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConformanceConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,

    pub sonobuoy_path: String,
    pub sonobuoy_download_url: String,

    #[serde(with = "crate::shared::duration::text")]
    pub sonobuoy_run_timeout: Duration,
    pub sonobuoy_run_timeout_string: String,
    #[serde(with = "crate::shared::duration::text")]
    pub sonobuoy_delete_timeout: Duration,
    pub sonobuoy_delete_timeout_string: String,

    pub sonobuoy_run_mode: String,
    pub sonobuoy_run_e2e_focus: String,
    pub sonobuoy_run_e2e_skip: String,
    pub sonobuoy_run_kube_conformance_image: String,
    pub sonobuoy_run_e2e_repo_config: String,
    pub sonobuoy_run_image: String,
    pub sonobuoy_run_systemd_logs_image: String,

    pub sonobuoy_results_tar_gz_path: String,
    pub sonobuoy_results_e2e_log_path: String,
    pub sonobuoy_results_junit_xml_path: String,
    pub sonobuoy_results_output_dir: String,
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        let run_timeout = Duration::from_secs(5 * 60 * 60);
        let delete_timeout = Duration::from_secs(5 * 60);
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            sonobuoy_path: default_sonobuoy_path(),
            sonobuoy_download_url: default_sonobuoy_download_url(),
            sonobuoy_run_timeout: run_timeout,
            sonobuoy_run_timeout_string: format_duration(run_timeout),
            sonobuoy_delete_timeout: delete_timeout,
            sonobuoy_delete_timeout_string: format_duration(delete_timeout),
            sonobuoy_run_mode: RUN_MODES[0].to_string(),
            sonobuoy_run_e2e_focus: String::new(),
            sonobuoy_run_e2e_skip: String::new(),
            sonobuoy_run_kube_conformance_image: "k8s.gcr.io/conformance:v1.21.0".to_string(),
            sonobuoy_run_e2e_repo_config: String::new(),
            sonobuoy_run_image: String::new(),
            sonobuoy_run_systemd_logs_image: String::new(),
            sonobuoy_results_tar_gz_path: temp_path(".tar.gz"),
            sonobuoy_results_e2e_log_path: temp_path(".e2e.log"),
            sonobuoy_results_junit_xml_path: temp_path(".xml"),
            sonobuoy_results_output_dir: std::env::temp_dir()
                .join(format!("sonobuoy-output-{}", random_suffix(10)))
                .display()
                .to_string(),
        }
    }
}

impl AddOnConfig for ConformanceConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("sonobuoy_path", FieldKind::Str, "sonobuoy binary path"),
        FieldSchema::new("sonobuoy_download_url", FieldKind::Str, "sonobuoy release tar.gz URL"),
        FieldSchema::new("sonobuoy_run_timeout", FieldKind::Duration, "budget for the whole run"),
        FieldSchema::read_only("sonobuoy_run_timeout_string", FieldKind::Str, "sonobuoy_run_timeout as text"),
        FieldSchema::new("sonobuoy_delete_timeout", FieldKind::Duration, "budget for 'sonobuoy delete'"),
        FieldSchema::read_only(
            "sonobuoy_delete_timeout_string",
            FieldKind::Str,
            "sonobuoy_delete_timeout as text",
        ),
        FieldSchema::new(
            "sonobuoy_run_mode",
            FieldKind::Str,
            "certified-conformance, non-disruptive-conformance or quick",
        ),
        FieldSchema::new("sonobuoy_run_e2e_focus", FieldKind::Str, "e2e focus regex"),
        FieldSchema::new("sonobuoy_run_e2e_skip", FieldKind::Str, "e2e skip regex"),
        FieldSchema::new(
            "sonobuoy_run_kube_conformance_image",
            FieldKind::Str,
            "conformance test image",
        ),
        FieldSchema::new("sonobuoy_run_e2e_repo_config", FieldKind::Str, "e2e image repository override file"),
        FieldSchema::new("sonobuoy_run_image", FieldKind::Str, "sonobuoy aggregator image"),
        FieldSchema::new("sonobuoy_run_systemd_logs_image", FieldKind::Str, "systemd-logs plugin image"),
        FieldSchema::new("sonobuoy_results_tar_gz_path", FieldKind::Str, "where to keep the results archive"),
        FieldSchema::new("sonobuoy_results_e2e_log_path", FieldKind::Str, "where to copy e2e.log"),
        FieldSchema::new("sonobuoy_results_junit_xml_path", FieldKind::Str, "where to copy the junit report"),
        FieldSchema::new("sonobuoy_results_output_dir", FieldKind::Str, "where the results archive is unpacked"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        let defaults = Self::default();

        if self.sonobuoy_path.is_empty() {
            self.sonobuoy_path = defaults.sonobuoy_path;
        }
        if self.sonobuoy_download_url.is_empty() {
            self.sonobuoy_download_url = defaults.sonobuoy_download_url;
        }
        if self.sonobuoy_run_timeout.is_zero() {
            self.sonobuoy_run_timeout = defaults.sonobuoy_run_timeout;
        }
        self.sonobuoy_run_timeout_string = format_duration(self.sonobuoy_run_timeout);
        if self.sonobuoy_delete_timeout.is_zero() {
            self.sonobuoy_delete_timeout = defaults.sonobuoy_delete_timeout;
        }
        self.sonobuoy_delete_timeout_string = format_duration(self.sonobuoy_delete_timeout);

        if self.sonobuoy_run_mode.is_empty() {
            self.sonobuoy_run_mode = defaults.sonobuoy_run_mode;
        }
        if !RUN_MODES.contains(&self.sonobuoy_run_mode.as_str()) {
            return Err(ConfigError::InvalidField(format!(
                "unknown sonobuoy_run_mode {:?}",
                self.sonobuoy_run_mode
            ))
            .into());
        }
        if self.sonobuoy_run_kube_conformance_image.is_empty() {
            self.sonobuoy_run_kube_conformance_image = defaults.sonobuoy_run_kube_conformance_image;
        }
        if self.sonobuoy_results_output_dir.is_empty() {
            self.sonobuoy_results_output_dir = defaults.sonobuoy_results_output_dir;
        }

        for (field, value, suffix) in [
            ("sonobuoy_results_tar_gz_path", &self.sonobuoy_results_tar_gz_path, ".tar.gz"),
            ("sonobuoy_results_e2e_log_path", &self.sonobuoy_results_e2e_log_path, ".e2e.log"),
            ("sonobuoy_results_junit_xml_path", &self.sonobuoy_results_junit_xml_path, ".xml"),
        ] {
            if !value.ends_with(suffix) {
                return Err(ConfigError::InvalidField(format!(
                    "{} {:?} missing {}",
                    field, value, suffix
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// What one `sonobuoy status` output says about the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

pub fn parse_status(out: &str) -> RunStatus {
    if out.contains("Sonobuoy has completed. ") || out.contains("Sonobuoy plugins have completed. ") {
        RunStatus::Completed
    } else if out.contains("Sonobuoy has failed. ") || out.contains("Sonobuoy is in unknown state") {
        RunStatus::Failed
    } else {
        RunStatus::Running
    }
}

/// Next status poll interval: 70% of the last, never under two minutes.
pub fn next_interval(current: Duration) -> Duration {
    current.mul_f64(STATUS_INTERVAL_DECAY).max(STATUS_MIN_INTERVAL)
}

/// Last `n` lines and the total line count.
fn tail_lines(text: &str, n: usize) -> (String, usize) {
    let lines: Vec<&str> = text.trim().lines().collect();
    let total = lines.len();
    let start = total.saturating_sub(n);
    (lines[start..].join("\n"), total)
}

/// Paths of e2e.log and the junit report inside an unpacked results archive.
fn result_files(output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let global = output_dir.join("plugins").join("e2e").join("results").join("global");
    let log = global.join("e2e.log");
    let xml = global.join("junit_01.xml");
    for p in [&log, &xml] {
        if !p.exists() {
            return Err(TesterError::assertion(format!(
                "result dir {:?} does not have {:?}",
                output_dir.display().to_string(),
                p.display().to_string()
            )));
        }
    }
    Ok((log, xml))
}

/// `--kubeconfig` and `--namespace` flags shared by every subcommand.
fn scope_flags(cfg: &ConformanceConfig, kubeconfig_path: &str) -> Vec<String> {
    let mut flags = Vec::new();
    if !kubeconfig_path.is_empty() {
        flags.push(format!("--kubeconfig={}", kubeconfig_path));
    }
    flags.push(format!("--namespace={}", cfg.namespace));
    flags
}

fn verbose(sub: &str) -> Vec<String> {
    args(&["--logtostderr", "--alsologtostderr", "--v=3", sub])
}

fn run_args(cfg: &ConformanceConfig, kubeconfig_path: &str) -> Vec<String> {
    let mut a = verbose("run");
    a.extend(scope_flags(cfg, kubeconfig_path));
    a.push(format!("--mode={}", cfg.sonobuoy_run_mode));
    a.push(format!(
        "--kube-conformance-image={}",
        cfg.sonobuoy_run_kube_conformance_image
    ));
    a.push("--show-default-podspec=true".to_string());
    a.push(format!("--timeout={}", cfg.sonobuoy_run_timeout.as_secs()));
    for (flag, value) in [
        ("--e2e-repo-config", &cfg.sonobuoy_run_e2e_repo_config),
        ("--sonobuoy-image", &cfg.sonobuoy_run_image),
        ("--systemd-logs-image", &cfg.sonobuoy_run_systemd_logs_image),
        ("--e2e-focus", &cfg.sonobuoy_run_e2e_focus),
        ("--e2e-skip", &cfg.sonobuoy_run_e2e_skip),
    ] {
        if !value.is_empty() {
            a.push(format!("{}={}", flag, value));
        }
    }
    a
}

pub struct ConformanceTester {
    cfg: ConformanceConfig,
    ctx: TesterContext,
}

impl ConformanceTester {
    pub fn new(cfg: ConformanceConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn scope_flags(&self) -> Vec<String> {
        scope_flags(&self.cfg, &self.ctx.kubeconfig_path)
    }

    /// Run sonobuoy and copy the output to the log writer. Failures are
    /// logged and the output returned anyway.
    async fn sonobuoy(&self, sub_args: &[String], timeout: Duration) -> Result<String> {
        let line = render_command_line(&self.cfg.sonobuoy_path, sub_args);
        match run_command(&self.cfg.sonobuoy_path, sub_args, timeout, &self.ctx.cancel).await {
            Ok(out) => {
                if !out.success {
                    warn!(command = %line, "sonobuoy exited with an error");
                }
                self.ctx.log_writer.section(&line, out.output.trim());
                Ok(out.output)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(command = %line, error = %e, "sonobuoy command failed");
                Ok(String::new())
            }
        }
    }

    async fn install(&self) -> Result<()> {
        let path = Path::new(&self.cfg.sonobuoy_path);
        ensure_binary_from_tar_gz(path, &self.cfg.sonobuoy_download_url, "sonobuoy", &self.ctx.cancel).await?;
        for check in [args(&["help"]), args(&["run", "--help"]), args(&["version"])] {
            let out = run_checked(&self.cfg.sonobuoy_path, &check, HELP_TIMEOUT, &self.ctx.cancel).await?;
            self.ctx.log_writer.section(
                &render_command_line(&self.cfg.sonobuoy_path, &check),
                out.trim(),
            );
        }
        Ok(())
    }

    async fn delete_run(&self) -> Result<()> {
        let mut a = verbose("delete");
        a.extend(self.scope_flags());
        a.push("--wait".to_string());
        info!(timeout = %self.cfg.sonobuoy_delete_timeout_string, "deleting sonobuoy");
        self.sonobuoy(&a, self.cfg.sonobuoy_delete_timeout).await?;
        Ok(())
    }

    async fn start_run(&self) -> Result<()> {
        info!(
            mode = %self.cfg.sonobuoy_run_mode,
            timeout = %self.cfg.sonobuoy_run_timeout_string,
            "running sonobuoy"
        );
        // Only launches the run; progress is tracked through `status`.
        self.sonobuoy(&run_args(&self.cfg, &self.ctx.kubeconfig_path), COMMAND_TIMEOUT).await?;
        Ok(())
    }

    async fn find_e2e_pod(&self) -> Result<String> {
        let spec = WaitSpec::custom(
            &format!("pod/{}* in {}", E2E_POD_PREFIX, self.cfg.namespace),
            E2E_POD_WAIT,
            E2E_POD_POLL_INTERVAL,
        );
        let client = self.ctx.client.as_ref();
        let ns = self.cfg.namespace.as_str();
        self.ctx
            .poller()
            .wait(&spec, None, || async move {
                let pods = match client.list_pods(ns, None).await {
                    Ok(pods) => pods,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => return Ok(Check::Pending(format!("failed to list pods ({})", e))),
                };
                Ok(pods
                    .iter()
                    .filter_map(|p| p.metadata.name.clone())
                    .find(|n| n.starts_with(E2E_POD_PREFIX))
                    .map(Check::Done)
                    .unwrap_or_else(|| Check::Pending(format!("{} pods, no e2e job pod", pods.len()))))
            })
            .await
    }

    /// Log tail, alternating between `sonobuoy logs` and the e2e container.
    async fn log_tail(&self, round: usize, pod: &str) -> Result<()> {
        let (line, out) = if round % 2 == 1 {
            let mut a = verbose("logs");
            a.extend(self.scope_flags());
            let line = render_command_line(&self.cfg.sonobuoy_path, &a);
            let out = match run_command(&self.cfg.sonobuoy_path, &a, COMMAND_TIMEOUT, &self.ctx.cancel).await {
                Ok(out) => out.output,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e.to_string(),
            };
            (line, out)
        } else {
            let a = args(&[
                "--namespace",
                &self.cfg.namespace,
                "logs",
                &format!("pod/{}", pod),
                "e2e",
                &format!("--tail={}", LOG_TAIL_LINES),
            ]);
            let line = self.ctx.kubectl.command_line(&a);
            let out = match self.ctx.kubectl.run(&a, COMMAND_TIMEOUT).await {
                Ok(out) => out,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e.to_string(),
            };
            (line, out)
        };
        let (tail, total) = tail_lines(&out, LOG_TAIL_LINES);
        self.ctx.log_writer.section(
            &format!("{} (total lines {}, last {} lines)", line, total, LOG_TAIL_LINES),
            &tail,
        );
        Ok(())
    }

    async fn wait_for_run(&self, pod: &str) -> Result<()> {
        let mut status_args = verbose("status");
        status_args.extend(self.scope_flags());
        status_args.push("--show-all".to_string());

        let timeout = self.cfg.sonobuoy_run_timeout;
        let deadline = Instant::now() + timeout;
        let poller = self.ctx.poller();
        let mut interval = STATUS_INITIAL_INTERVAL;
        let mut round = 0;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(TesterError::deadline(
                    format!("sonobuoy run (exceeded {})", format_duration(timeout)),
                    "running",
                ));
            }
            round += 1;
            info!(
                interval = %format_duration(interval),
                time_left = %format_duration(left),
                "waiting for sonobuoy run"
            );
            poller.sleep(interval.min(left)).await?;

            self.log_tail(round, pod).await?;
            let out = self.sonobuoy(&status_args, COMMAND_TIMEOUT).await?;
            match parse_status(&out) {
                RunStatus::Completed => {
                    info!(rounds = round, "sonobuoy run completed");
                    return Ok(());
                }
                RunStatus::Failed => {
                    return Err(TesterError::assertion("sonobuoy run failed"));
                }
                RunStatus::Running => {}
            }
            interval = next_interval(interval);
        }
    }

    /// `sonobuoy retrieve` prints the path of the archive it wrote.
    async fn retrieve(&self) -> Result<()> {
        let mut a = args(&["retrieve"]);
        a.extend(self.scope_flags());
        a.push(std::env::temp_dir().display().to_string());
        let line = render_command_line(&self.cfg.sonobuoy_path, &a);

        let _ = std::fs::remove_file(&self.cfg.sonobuoy_results_tar_gz_path);
        let spec = WaitSpec::custom(&line, RETRIEVE_WAIT, RETRIEVE_RETRY_INTERVAL);
        let retrieved = self
            .ctx
            .poller()
            .wait(&spec, None, || async {
                match run_checked(&self.cfg.sonobuoy_path, &a, COMMAND_TIMEOUT, &self.ctx.cancel).await {
                    Ok(out) => Ok(Check::Done(out.trim().to_string())),
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) => Ok(Check::Pending(e.to_string())),
                }
            })
            .await?;
        self.ctx.log_writer.section(&line, &retrieved);
        let archive = retrieved
            .lines()
            .map(str::trim)
            .rev()
            .find(|l| l.ends_with(".tar.gz"))
            .unwrap_or(retrieved.as_str())
            .to_string();
        std::fs::copy(&archive, &self.cfg.sonobuoy_results_tar_gz_path)?;
        info!(path = %self.cfg.sonobuoy_results_tar_gz_path, "retrieved sonobuoy results");
        Ok(())
    }

    async fn check_results(&self) -> Result<()> {
        let tar_gz = &self.cfg.sonobuoy_results_tar_gz_path;
        let results_args = args(&["results", tar_gz]);
        let read = run_checked(&self.cfg.sonobuoy_path, &results_args, COMMAND_TIMEOUT, &self.ctx.cancel)
            .await
            .and_then(|out| {
                self.ctx.log_writer.section(
                    &render_command_line(&self.cfg.sonobuoy_path, &results_args),
                    out.trim(),
                );
                if out.contains("Plugin: e2e\nStatus: passed") {
                    Ok(())
                } else {
                    Err(TesterError::assertion(
                        "sonobuoy tests failed (expected 'Status: passed')",
                    ))
                }
            });
        if let Err(e) = &read {
            if e.is_cancelled() {
                return read;
            }
            warn!(error = %e, "reading sonobuoy results failed");
        }

        let output_dir = PathBuf::from(&self.cfg.sonobuoy_results_output_dir);
        let unpacked = std::fs::create_dir_all(&output_dir)
            .map_err(TesterError::from)
            .and_then(|_| Ok(std::fs::read(tar_gz)?))
            .and_then(|bytes| unpack_tar_gz(&bytes, &output_dir))
            .and_then(|_| result_files(&output_dir));

        let (log, xml) = match (read, unpacked) {
            (Ok(()), Ok(files)) => files,
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => return Err(e),
            (Err(re), Err(ue)) => {
                return Err(TesterError::Multiple(vec![
                    format!("read results error [{}]", re),
                    format!("untar error [{}]", ue),
                ]))
            }
        };
        std::fs::copy(&log, &self.cfg.sonobuoy_results_e2e_log_path)?;
        std::fs::copy(&xml, &self.cfg.sonobuoy_results_junit_xml_path)?;
        info!(
            e2e_log = %self.cfg.sonobuoy_results_e2e_log_path,
            junit = %self.cfg.sonobuoy_results_junit_xml_path,
            "[PASSED] sonobuoy conformance"
        );
        Ok(())
    }
}

#[async_trait]
impl Tester for ConformanceTester {
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

        self.install().await?;
        self.delete_run().await?;
        self.start_run().await?;
        let pod = self.find_e2e_pod().await?;
        info!(pod = %pod, "found sonobuoy e2e pod");
        self.wait_for_run(&pod).await?;
        self.retrieve().await?;
        self.check_results().await
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        self.install().await?;
        self.delete_run().await?;

        let mut errors = Vec::new();
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(&self.cfg.namespace).await,
        );
        join_errors(errors)
    }
}
