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

//! clusterloader2 load tests.
//!
//! Each run appends to one test log. A background task copies the log tail to
//! the log writer every 10 seconds while runs are in flight. Afterwards the
//! report directory is folded into the test log, pod startup latencies are
//! merged, and the directory is archived.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES};
use crate::domain::config::{AddOnConfig, Config, ValidationScope};
use crate::domain::tester::{Tester, TesterContext};
use crate::domain::testers::random_suffix;
use crate::infrastructure::constants::DEFAULT_MINIMUM_NODES;
use crate::infrastructure::installer::{ensure_binary, host_os_arch, pack_dir_tar_gz};
use crate::infrastructure::kubectl::args;
use crate::infrastructure::logging::LogWriter;
use crate::infrastructure::process::{render_command_line, run_command};
use crate::infrastructure::templating::{render, Vars};
use crate::shared::duration::format_duration;
use crate::shared::{CancelScope, ConfigError, Result, TesterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const NAME: &str = "clusterloader";

const CLUSTERLOADER_VERSION: &str = "v1.6.1";
const PER_RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RUN_GAP: Duration = Duration::from_secs(5);
const STREAM_INTERVAL: Duration = Duration::from_secs(10);
const STREAM_EXIT_WAIT: Duration = Duration::from_secs(3 * 60);
const TAIL_LINES: usize = 15;
const SUCCESS_MARKER: &str = "Status: Success";
const FINISHED_MARKER: &str = "] Test Finished";
/// Metrics gathering needs SSH to the control plane, which EKS does not offer.
const SKIPPABLE_ERROR: &str = "action gather failed for SchedulingMetrics";
const POD_STARTUP_PREFIX: &str = "PodStartupLatency_";

const TEST_OVERRIDES_TEMPLATE: &str = "NODES_PER_NAMESPACE: {{ nodes_per_namespace }}
PODS_PER_NODE: {{ pods_per_node }}
BIG_GROUP_SIZE: {{ big_group_size }}
MEDIUM_GROUP_SIZE: {{ medium_group_size }}
SMALL_GROUP_SIZE: {{ small_group_size }}
SMALL_STATEFUL_SETS_PER_NAMESPACE: {{ small_stateful_sets_per_namespace }}
MEDIUM_STATEFUL_SETS_PER_NAMESPACE: {{ medium_stateful_sets_per_namespace }}
CL2_USE_HOST_NETWORK_PODS: {{ cl2_use_host_network_pods }}
CL2_LOAD_TEST_THROUGHPUT: {{ cl2_load_test_throughput }}
CL2_ENABLE_PVS: {{ cl2_enable_pvs }}
CL2_SCHEDULER_THROUGHPUT_THRESHOLD: {{ cl2_scheduler_throughput_threshold }}
PROMETHEUS_SCRAPE_KUBE_PROXY: {{ prometheus_scrape_kube_proxy }}
ENABLE_SYSTEM_POD_METRICS: {{ enable_system_pod_metrics }}
";

pub fn default_clusterloader_path() -> String {
    format!("/tmp/clusterloader2-{}", CLUSTERLOADER_VERSION)
}

pub fn default_clusterloader_download_url() -> String {
    let (os, arch) = host_os_arch();
    format!(
        "https://github.com/aws/aws-k8s-tester/releases/download/{v}/clusterloader2-{v}-{os}-{arch}",
        v = CLUSTERLOADER_VERSION,
        os = os,
        arch = arch
    )
}

/// Values substituted into clusterloader2's `--testoverrides` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestOverride {
    pub path: String,

    pub nodes_per_namespace: i64,
    pub pods_per_node: i64,

    pub big_group_size: i64,
    pub medium_group_size: i64,
    pub small_group_size: i64,

    pub small_stateful_sets_per_namespace: i64,
    pub medium_stateful_sets_per_namespace: i64,

    pub cl2_use_host_network_pods: bool,
    pub cl2_load_test_throughput: i64,
    pub cl2_enable_pvs: bool,
    pub cl2_scheduler_throughput_threshold: i64,
    pub prometheus_scrape_kube_proxy: bool,
    pub enable_system_pod_metrics: bool,
}

impl Default for TestOverride {
    fn default() -> Self {
        Self {
            path: String::new(),
            nodes_per_namespace: 10,
            pods_per_node: 10,
            big_group_size: 25,
            medium_group_size: 10,
            small_group_size: 5,
            small_stateful_sets_per_namespace: 0,
            medium_stateful_sets_per_namespace: 0,
            cl2_use_host_network_pods: false,
            cl2_load_test_throughput: 20,
            cl2_enable_pvs: false,
            cl2_scheduler_throughput_threshold: 100,
            prometheus_scrape_kube_proxy: false,
            enable_system_pod_metrics: false,
        }
    }
}

impl TestOverride {
    pub fn render(&self) -> Result<String> {
        let vars = Vars::new()
            .set("nodes_per_namespace", self.nodes_per_namespace)
            .set("pods_per_node", self.pods_per_node)
            .set("big_group_size", self.big_group_size)
            .set("medium_group_size", self.medium_group_size)
            .set("small_group_size", self.small_group_size)
            .set("small_stateful_sets_per_namespace", self.small_stateful_sets_per_namespace)
            .set("medium_stateful_sets_per_namespace", self.medium_stateful_sets_per_namespace)
            .set("cl2_use_host_network_pods", self.cl2_use_host_network_pods)
            .set("cl2_load_test_throughput", self.cl2_load_test_throughput)
            .set("cl2_enable_pvs", self.cl2_enable_pvs)
            .set("cl2_scheduler_throughput_threshold", self.cl2_scheduler_throughput_threshold)
            .set("prometheus_scrape_kube_proxy", self.prometheus_scrape_kube_proxy)
            .set("enable_system_pod_metrics", self.enable_system_pod_metrics);
        render(TEST_OVERRIDES_TEMPLATE, &vars)
    }

    fn sync(&self) -> Result<()> {
        let text = self.render()?;
        std::fs::write(&self.path, text)?;
        info!(path = %self.path, "wrote test override file");
        Ok(())
    }
}

/// clusterloader2 measurement output, e.g. `PodStartupLatency_*.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfData {
    pub version: String,
    #[serde(rename = "dataItems", default)]
    pub data_items: Vec<DataItem>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub data: BTreeMap<String, f64>,
    pub unit: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Merge runs item by item; items with equal labels are averaged pairwise in
/// run order.
pub fn merge_perf_data(datas: &[PerfData]) -> PerfData {
    match datas {
        [] => return PerfData::default(),
        [one] => return one.clone(),
        _ => {}
    }
    let mut merged = PerfData::default();
    let mut items: BTreeMap<BTreeMap<String, String>, DataItem> = BTreeMap::new();
    for d in datas {
        merged.version = d.version.clone();
        merged
            .labels
            .extend(d.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        for cur in &d.data_items {
            let mut next = cur.clone();
            if let Some(prev) = items.get(&cur.labels) {
                for (k, v) in &prev.data {
                    let e = next.data.entry(k.clone()).or_insert(0.0);
                    *e = (*e + v) / 2.0;
                }
            }
            items.insert(cur.labels.clone(), next);
        }
    }
    merged.data_items = items.into_values().collect();
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterloaderConfig {
    pub enable: bool,
    pub minimum_nodes: usize,

    pub clusterloader_path: String,
    pub clusterloader_download_url: String,
    pub provider: String,

    pub runs: usize,
    #[serde(with = "crate::shared::duration::text")]
    pub run_timeout: Duration,
    pub run_timeout_string: String,

    pub test_config_path: String,
    pub run_from_cluster: bool,
    pub nodes: usize,
    pub enable_exec_service: bool,

    pub test_override: TestOverride,

    pub test_report_dir: String,
    pub test_report_dir_tar_gz_path: String,
    pub test_log_path: String,
    pub pod_startup_latency: PerfData,
    pub pod_startup_latency_path: String,
}

impl Default for ClusterloaderConfig {
    fn default() -> Self {
        let run_timeout = Duration::from_secs(30 * 60);
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            clusterloader_path: default_clusterloader_path(),
            clusterloader_download_url: default_clusterloader_download_url(),
            provider: "eks".to_string(),
            runs: 2,
            run_timeout,
            run_timeout_string: format_duration(run_timeout),
            test_config_path: String::new(),
            run_from_cluster: false,
            nodes: 10,
            enable_exec_service: false,
            test_override: TestOverride::default(),
            test_report_dir: String::new(),
            test_report_dir_tar_gz_path: String::new(),
            test_log_path: String::new(),
            pod_startup_latency: PerfData::default(),
            pod_startup_latency_path: String::new(),
        }
    }
}

impl AddOnConfig for ClusterloaderConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        FieldSchema::new("clusterloader_path", FieldKind::Str, "clusterloader2 binary path"),
        FieldSchema::new("clusterloader_download_url", FieldKind::Str, "clusterloader2 download URL"),
        FieldSchema::new("provider", FieldKind::Str, "clusterloader2 --provider"),
        FieldSchema::new("runs", FieldKind::UInt, "number of test runs"),
        FieldSchema::new("run_timeout", FieldKind::Duration, "budget for all runs"),
        FieldSchema::read_only("run_timeout_string", FieldKind::Str, "run_timeout as text"),
        FieldSchema::new("test_config_path", FieldKind::Str, "clusterloader2 --testconfig file"),
        FieldSchema::new("run_from_cluster", FieldKind::Bool, "run with in-cluster credentials"),
        FieldSchema::new("nodes", FieldKind::UInt, "clusterloader2 --nodes"),
        FieldSchema::new("enable_exec_service", FieldKind::Bool, "clusterloader2 --enable-exec-service"),
        FieldSchema::new("test_override", FieldKind::Map, "values for the --testoverrides file"),
        FieldSchema::read_only("test_report_dir", FieldKind::Str, "clusterloader2 --report-dir"),
        FieldSchema::read_only("test_report_dir_tar_gz_path", FieldKind::Str, "archived report directory"),
        FieldSchema::read_only("test_log_path", FieldKind::Str, "combined clusterloader2 output"),
        FieldSchema::read_only("pod_startup_latency", FieldKind::Map, "merged pod startup latency"),
        FieldSchema::read_only("pod_startup_latency_path", FieldKind::Str, "merged pod startup latency JSON"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        if self.minimum_nodes == 0 {
            self.minimum_nodes = DEFAULT_MINIMUM_NODES;
        }
        if self.clusterloader_path.is_empty() {
            self.clusterloader_path = default_clusterloader_path();
        }
        if self.clusterloader_download_url.is_empty() {
            self.clusterloader_download_url = default_clusterloader_download_url();
        }
        if self.runs == 0 {
            return Err(ConfigError::InvalidField(format!(
                "add_on {} runs must be positive",
                scope.add_on
            ))
            .into());
        }
        if self.run_timeout.is_zero() {
            self.run_timeout = Duration::from_secs(30 * 60);
        }
        self.run_timeout_string = format_duration(self.run_timeout);

        if self.test_config_path.is_empty() || !Path::new(&self.test_config_path).exists() {
            return Err(ConfigError::MissingRequired(format!(
                "add_on {} test_config_path {:?} does not exist",
                scope.add_on, self.test_config_path
            ))
            .into());
        }
        if self.nodes == 0 {
            self.nodes = self.minimum_nodes;
        }

        let id = random_suffix(16);
        let tmp = std::env::temp_dir();
        if self.test_report_dir.is_empty() {
            self.test_report_dir = tmp
                .join(format!("clusterloader-test-report-dir-{}", id))
                .display()
                .to_string();
        }
        if self.test_report_dir_tar_gz_path.is_empty() {
            self.test_report_dir_tar_gz_path = tmp
                .join(format!("clusterloader-test-report-dir-{}.tar.gz", id))
                .display()
                .to_string();
        }
        if !self.test_report_dir_tar_gz_path.ends_with(".tar.gz") {
            return Err(ConfigError::InvalidField(format!(
                "test_report_dir_tar_gz_path {:?} requires .tar.gz suffix",
                self.test_report_dir_tar_gz_path
            ))
            .into());
        }
        let report_dir = PathBuf::from(&self.test_report_dir);
        if self.test_log_path.is_empty() {
            self.test_log_path = report_dir
                .join(format!("clusterloader-test-log-{}.log", id))
                .display()
                .to_string();
        }
        if self.pod_startup_latency_path.is_empty() {
            self.pod_startup_latency_path = report_dir
                .join(format!("clusterloader-pod-startup-latency-{}.json", id))
                .display()
                .to_string();
        }
        if self.test_override.path.is_empty() {
            self.test_override.path = report_dir
                .join(format!("clusterloader-test-overrides-{}.yaml", id))
                .display()
                .to_string();
        }
        Ok(())
    }
}

fn tail(text: &str, n: usize) -> (String, usize) {
    let lines: Vec<&str> = text.trim().lines().collect();
    let total = lines.len();
    (lines[total.saturating_sub(n)..].join("\n"), total)
}

/// A failed run still counts when its log tail reports success or only the
/// metrics error EKS always produces.
pub fn run_failure_tolerable(log_tail: &str) -> bool {
    log_tail.contains(SUCCESS_MARKER) || log_tail.contains(SKIPPABLE_ERROR)
}

pub fn count_finished(log: &str) -> usize {
    log.matches(FINISHED_MARKER).count()
}

/// Every regular file under `dir`, depth first, in name order.
fn report_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for e in entries {
        let path = e.path();
        if e.file_type()?.is_dir() {
            out.extend(report_files(&path)?);
        } else {
            out.push(path);
        }
    }
    Ok(out)
}

/// Copy the last lines of the test log to the log writer until `done` fires.
fn stream_test_log(
    path: PathBuf,
    log_writer: LogWriter,
    cancel: CancelScope,
    done: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(STREAM_INTERVAL) => {}
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let (out, total) = tail(&text, TAIL_LINES);
                    info!(total_lines = total, "checked clusterloader output");
                    log_writer.section(&path.display().to_string(), &out);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read clusterloader output"),
            }
        }
        info!("exiting clusterloader output checks");
    })
}

pub struct ClusterloaderTester {
    cfg: ClusterloaderConfig,
    ctx: TesterContext,
}

impl ClusterloaderTester {
    pub fn new(cfg: ClusterloaderConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn cl2_args(&self) -> Vec<String> {
        let mut a = args(&["--logtostderr", "--alsologtostderr"]);
        a.push(format!("--enable-exec-service={}", self.cfg.enable_exec_service));
        a.push(format!("--testconfig={}", self.cfg.test_config_path));
        a.push(format!("--testoverrides={}", self.cfg.test_override.path));
        a.push(format!("--report-dir={}", self.cfg.test_report_dir));
        a.push(format!("--nodes={}", self.cfg.nodes));
        a.push(format!("--provider={}", self.cfg.provider));
        if self.cfg.run_from_cluster {
            a.push("--run-from-cluster=true".to_string());
        } else if !self.ctx.kubeconfig_path.is_empty() {
            a.push(format!("--kubeconfig={}", self.ctx.kubeconfig_path));
        }
        a
    }

    async fn install(&self) -> Result<()> {
        let path = Path::new(&self.cfg.clusterloader_path);
        ensure_binary(path, &self.cfg.clusterloader_download_url, &self.ctx.cancel).await?;
        let help = args(&["--help"]);
        let out = run_command(
            &self.cfg.clusterloader_path,
            &help,
            Duration::from_secs(15),
            &self.ctx.cancel,
        )
        .await?;
        let line = render_command_line(&self.cfg.clusterloader_path, &help);
        self.ctx.log_writer.section(&line, out.output.trim());
        // `--help` exits non-zero, so only the usage text is checked.
        if !out.output.contains("--alsologtostderr") {
            return Err(TesterError::command(line, "unexpected --help output"));
        }
        Ok(())
    }

    /// One clusterloader2 invocation with its output appended to the test log.
    async fn run_once(&self, index: usize, cl2_args: &[String], timeout: Duration) -> Result<()> {
        let line = render_command_line(&self.cfg.clusterloader_path, cl2_args);
        info!(index, command = %line, "running clusterloader2");
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.test_log_path)?;
        let mut child = tokio::process::Command::new(&self.cfg.clusterloader_path)
            .args(cl2_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TesterError::command(&line, e.to_string()))?;

        let status = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return Err(TesterError::Cancelled),
            res = tokio::time::timeout(timeout, child.wait()) => match res {
                Ok(status) => status.map_err(|e| TesterError::command(&line, e.to_string()))?,
                Err(_) => return Err(TesterError::command(&line, format!("timed out after {}", format_duration(timeout)))),
            },
        };
        if status.success() {
            Ok(())
        } else {
            Err(TesterError::command(&line, status.to_string()))
        }
    }

    /// Runs until `runs` are done, one fails for real, or the budget is spent.
    async fn run_all(&self) -> Result<()> {
        let cl2_args = self.cl2_args();
        let poller = self.ctx.poller();
        let deadline = Instant::now() + self.cfg.run_timeout;
        let started = Instant::now();

        for i in 0..self.cfg.runs {
            poller.sleep(RUN_GAP).await?;
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(TesterError::deadline(
                    format!("clusterloader runs (exceeded {})", self.cfg.run_timeout_string),
                    format!("{} of {} runs started", i, self.cfg.runs),
                ));
            }
            match self.run_once(i, &cl2_args, PER_RUN_TIMEOUT.min(left)).await {
                Ok(()) => info!(current_run = i, total_runs = self.cfg.runs, "completed clusterloader run"),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "checking clusterloader error from log file");
                    let text = std::fs::read_to_string(&self.cfg.test_log_path)
                        .map_err(|_| TesterError::command("clusterloader2", e.to_string()))?;
                    let (log_tail, _) = tail(&text, TAIL_LINES);
                    if !run_failure_tolerable(&log_tail) {
                        return Err(e);
                    }
                    warn!(current_run = i, "clusterloader exited with an error but its log reports success; continuing");
                }
            }
        }
        info!(
            took = %format_duration(started.elapsed()),
            total_runs = self.cfg.runs,
            "successfully ran clusterloader"
        );
        Ok(())
    }

    /// Append every report file to the test log and collect pod startup latencies.
    fn fold_reports(&self) -> Result<Vec<PerfData>> {
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.test_log_path)?;
        let log_path = PathBuf::from(&self.cfg.test_log_path);
        let mut latencies = Vec::new();
        for path in report_files(Path::new(&self.cfg.test_report_dir))? {
            if path == log_path {
                continue;
            }
            info!(path = %path.display(), "found report");
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let body = std::fs::read(&path)?;
            if name.starts_with(POD_STARTUP_PREFIX) {
                latencies.push(serde_json::from_slice::<PerfData>(&body)?);
            }
            write!(log, "\n\n\nreport output from {:?}:\n\n", path.display().to_string())?;
            log.write_all(&body)?;
        }
        Ok(latencies)
    }

    fn collect_results(&mut self) -> Result<usize> {
        let text = std::fs::read_to_string(&self.cfg.test_log_path)?;
        let finished = count_finished(&text);

        let latencies = self.fold_reports()?;
        self.cfg.pod_startup_latency = merge_perf_data(&latencies);
        std::fs::write(
            &self.cfg.pod_startup_latency_path,
            serde_json::to_vec(&self.cfg.pod_startup_latency)?,
        )?;

        let tar_gz = Path::new(&self.cfg.test_report_dir_tar_gz_path);
        if tar_gz.exists() {
            std::fs::remove_file(tar_gz)?;
        }
        pack_dir_tar_gz(Path::new(&self.cfg.test_report_dir), tar_gz)?;
        let size = std::fs::metadata(tar_gz).map(|m| m.len()).unwrap_or(0);
        info!(
            report_dir = %self.cfg.test_report_dir,
            path = %self.cfg.test_report_dir_tar_gz_path,
            size,
            "tar-gzipped report dir"
        );
        Ok(finished)
    }
}

#[async_trait]
impl Tester for ClusterloaderTester {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm_cluster("apply").await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;

        self.install().await?;
        std::fs::create_dir_all(&self.cfg.test_report_dir)?;
        self.cfg.test_override.sync()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.test_log_path)?;

        let done = CancellationToken::new();
        let streamer = stream_test_log(
            PathBuf::from(&self.cfg.test_log_path),
            self.ctx.log_writer.clone(),
            self.ctx.cancel.clone(),
            done.clone(),
        );
        let run_res = self.run_all().await;
        done.cancel();
        if tokio::time::timeout(STREAM_EXIT_WAIT, streamer).await.is_err() {
            warn!("took too long to confirm exit of clusterloader output checks");
        }
        if let Err(e) = &run_res {
            if e.is_cancelled() {
                return run_res;
            }
        }

        let finished = self.collect_results()?;
        if finished == self.cfg.runs {
            if let Err(e) = run_res {
                info!(finished, error = %e, "completed expected test runs; ignoring run error");
            }
            return Ok(());
        }
        let incomplete = format!(
            "failed to complete expected test runs [expected {}, completed {}]",
            self.cfg.runs, finished
        );
        warn!(finished, expected = self.cfg.runs, "{}", incomplete);
        Err(match run_res {
            Ok(()) => TesterError::assertion(incomplete),
            Err(e) => TesterError::assertion(format!("{} (run error: {})", incomplete, e)),
        })
    }

    /// Nothing to tear down; clusterloader2 cleans up its own namespaces.
    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm_cluster("delete").await
    }

    fn write_back(&self, config: &mut Config) {
        let out = &mut config.add_on_clusterloader;
        out.pod_startup_latency = self.cfg.pod_startup_latency.clone();
        out.test_report_dir = self.cfg.test_report_dir.clone();
        out.test_report_dir_tar_gz_path = self.cfg.test_report_dir_tar_gz_path.clone();
        out.test_log_path = self.cfg.test_log_path.clone();
        out.pod_startup_latency_path = self.cfg.pod_startup_latency_path.clone();
        out.test_override.path = self.cfg.test_override.path.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ValidationScope<'static> {
        ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        }
    }

    #[test]
    fn test_runs_and_test_config_required() {
        let dir = tempfile::tempdir().unwrap();
        let test_config = dir.path().join("config.yaml");
        std::fs::write(&test_config, "name: load\n").unwrap();

        let mut cfg = ClusterloaderConfig::default();
        assert!(cfg.validate_and_set_defaults(&scope()).is_err());

        cfg.test_config_path = test_config.display().to_string();
        cfg.runs = 0;
        assert!(cfg.validate_and_set_defaults(&scope()).is_err());

        cfg.runs = 1;
        cfg.validate_and_set_defaults(&scope()).unwrap();
        assert!(cfg.test_report_dir_tar_gz_path.ends_with(".tar.gz"));
        assert!(cfg.test_log_path.starts_with(&cfg.test_report_dir));
        assert!(cfg.test_override.path.ends_with(".yaml"));
        assert_eq!(cfg.run_timeout_string, "30m0s");
    }

    #[test]
    fn test_override_render() {
        let text = TestOverride::default().render().unwrap();
        assert!(text.starts_with("NODES_PER_NAMESPACE: 10\nPODS_PER_NODE: 10\n"));
        assert!(text.contains("CL2_ENABLE_PVS: false\n"));
        assert!(text.contains("CL2_SCHEDULER_THROUGHPUT_THRESHOLD: 100\n"));
    }

    #[test]
    fn test_log_markers() {
        let log = "\
I0610 clusterloader.go:228] Test Finished
I0610 clusterloader.go:229]   Test: ./testing/load/config.yaml
I0610 clusterloader.go:230]   Status: Success
I0611 clusterloader.go:228] Test Finished
I0611 clusterloader.go:230]   Status: Fail
";
        assert_eq!(count_finished(log), 2);
        assert!(run_failure_tolerable(log));
        assert!(run_failure_tolerable(
            "Errors: [measurement call TestMetrics - action gather failed for SchedulingMetrics measurement]"
        ));
        assert!(!run_failure_tolerable("F0620 1 tests have failed!"));
    }

    #[test]
    fn test_merge_perf_data_averages_matching_labels() {
        let item = |perc50: f64, metric: &str| DataItem {
            data: BTreeMap::from([("Perc50".to_string(), perc50)]),
            unit: "ms".to_string(),
            labels: BTreeMap::from([("Metric".to_string(), metric.to_string())]),
        };
        let a = PerfData {
            version: "v1".to_string(),
            data_items: vec![item(100.0, "pod_startup"), item(10.0, "create_to_schedule")],
            labels: BTreeMap::new(),
        };
        let b = PerfData {
            version: "v1".to_string(),
            data_items: vec![item(300.0, "pod_startup")],
            labels: BTreeMap::from([("group".to_string(), "load".to_string())]),
        };
        let m = merge_perf_data(&[a.clone(), b]);
        assert_eq!(m.data_items.len(), 2);
        let startup = m
            .data_items
            .iter()
            .find(|d| d.labels["Metric"] == "pod_startup")
            .unwrap();
        assert_eq!(startup.data["Perc50"], 200.0);
        assert_eq!(m.labels["group"], "load");
        assert_eq!(merge_perf_data(&[a.clone()]), a);
        assert_eq!(merge_perf_data(&[]), PerfData::default());
    }

    #[test]
    fn test_perf_data_parses_clusterloader_json() {
        let raw = r#"{"version":"1.0","dataItems":[{"data":{"Perc50":1.5,"Perc99":9.0},"unit":"ms","labels":{"Metric":"pod_startup"}}]}"#;
        let p: PerfData = serde_json::from_str(raw).unwrap();
        assert_eq!(p.data_items[0].data["Perc99"], 9.0);
    }

    #[test]
    fn test_report_files_walks_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b").join("c.xml"), "<x/>").unwrap();
        let files = report_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));
        assert!(files[1].ends_with("b/c.xml"));
    }
}
