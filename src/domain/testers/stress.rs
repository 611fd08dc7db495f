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

//! Synthetic API server load built from Pod objects.
//!
//! Writes cycle through ten Pod names: each round issues `update_concurrency`
//! concurrent get-then-update requests (create on NotFound). A second worker
//! lists Pods with `list_limit` until the run ends. Both stop when
//! `run_timeout` elapses or the run is cancelled.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, Config, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{default_namespace, random_suffix, record};
use crate::infrastructure::constants::DEFAULT_MINIMUM_NODES;
use crate::shared::duration::format_duration;
use crate::shared::{ConfigError, Result, TesterError};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const NAME: &str = "stress";

const IMAGE: &str = "busybox";
const KEY_SPACE: usize = 10;
const RESULT_WAIT: Duration = Duration::from_secs(3 * 60);
const CONFLICT_RETRIES: usize = 5;

pub fn default_object_key_prefix() -> String {
    format!("pod{}", random_suffix(7))
}

/// Client-side latency percentiles in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySummary {
    pub test_id: String,
    pub success_total: u64,
    pub failure_total: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub p9999_ms: f64,
}

/// Entry at `len * p` of a sorted slice; zero when empty.
pub fn pick(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = (sorted.len() as f64 * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl LatencySummary {
    pub fn from_samples(test_id: &str, mut samples: Samples) -> Self {
        samples.latencies.sort_unstable();
        let l = &samples.latencies;
        Self {
            test_id: test_id.to_string(),
            success_total: samples.success,
            failure_total: samples.failure,
            p50_ms: ms(pick(l, 0.5)),
            p90_ms: ms(pick(l, 0.9)),
            p99_ms: ms(pick(l, 0.99)),
            p999_ms: ms(pick(l, 0.999)),
            p9999_ms: ms(pick(l, 0.9999)),
        }
    }

    pub fn table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("PERCENTILE").set_alignment(CellAlignment::Left),
                Cell::new("LATENCY").set_alignment(CellAlignment::Right),
            ]);
        for (label, v) in [
            ("p50", self.p50_ms),
            ("p90", self.p90_ms),
            ("p99", self.p99_ms),
            ("p99.9", self.p999_ms),
            ("p99.99", self.p9999_ms),
        ] {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(format!("{:.3} ms", v)).set_alignment(CellAlignment::Right),
            ]);
        }
        table.add_row(vec![
            Cell::new("success"),
            Cell::new(self.success_total).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new("failure"),
            Cell::new(self.failure_total).set_alignment(CellAlignment::Right),
        ]);
        table.to_string()
    }
}

/// Raw observations of one request class.
#[derive(Debug, Default)]
pub struct Samples {
    latencies: Vec<Duration>,
    success: u64,
    failure: u64,
}

impl Samples {
    /// `outcome` is `None` for requests that neither count as success nor failure.
    fn observe(&mut self, took: Duration, outcome: Option<bool>) {
        self.latencies.push(took);
        match outcome {
            Some(true) => self.success += 1,
            Some(false) => self.failure += 1,
            None => {}
        }
    }
}

#[derive(Default)]
struct Recorder {
    writes: Mutex<Samples>,
    gets: Mutex<Samples>,
}

impl Recorder {
    fn observe(slot: &Mutex<Samples>, took: Duration, outcome: Option<bool>) {
        slot.lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(took, outcome);
    }

    fn into_parts(self) -> (Samples, Samples) {
        (
            self.writes.into_inner().unwrap_or_else(|e| e.into_inner()),
            self.gets.into_inner().unwrap_or_else(|e| e.into_inner()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,

    #[serde(with = "crate::shared::duration::text")]
    pub run_timeout: Duration,
    pub run_timeout_string: String,

    pub object_key_prefix: String,
    /// Writes to issue; negative keeps writing until the run ends.
    pub objects: i64,
    pub object_size: usize,
    pub update_concurrency: usize,
    /// Page size for list calls; negative disables them.
    pub list_limit: i64,

    pub latency_summary_writes: LatencySummary,
    pub latency_summary_gets: LatencySummary,
    pub latency_summary_range_gets: LatencySummary,
}

impl Default for StressConfig {
    fn default() -> Self {
        let run_timeout = Duration::from_secs(60);
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            run_timeout,
            run_timeout_string: format_duration(run_timeout),
            object_key_prefix: default_object_key_prefix(),
            objects: -1,
            object_size: 10 * 1024,
            update_concurrency: 10,
            list_limit: 1000,
            latency_summary_writes: LatencySummary::default(),
            latency_summary_gets: LatencySummary::default(),
            latency_summary_range_gets: LatencySummary::default(),
        }
    }
}

impl AddOnConfig for StressConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("run_timeout", FieldKind::Duration, "how long to generate load"),
        FieldSchema::read_only("run_timeout_string", FieldKind::Str, "run_timeout as text"),
        FieldSchema::new("object_key_prefix", FieldKind::Str, "Pod name prefix"),
        FieldSchema::new("objects", FieldKind::Int, "writes to issue, negative for unbounded"),
        FieldSchema::new("object_size", FieldKind::UInt, "bytes per object"),
        FieldSchema::new("update_concurrency", FieldKind::UInt, "concurrent writers per round"),
        FieldSchema::new("list_limit", FieldKind::Int, "list page size, negative disables lists"),
        FieldSchema::read_only("latency_summary_writes", FieldKind::Map, "create and update latency"),
        FieldSchema::read_only("latency_summary_gets", FieldKind::Map, "get latency"),
        FieldSchema::read_only("latency_summary_range_gets", FieldKind::Map, "list latency"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.run_timeout.is_zero() {
            self.run_timeout = Duration::from_secs(60);
        }
        self.run_timeout_string = format_duration(self.run_timeout);
        if self.object_key_prefix.is_empty() {
            self.object_key_prefix = default_object_key_prefix();
        }
        if self.object_size == 0 {
            return Err(ConfigError::InvalidField(format!(
                "add_on {} object_size must be positive",
                scope.add_on
            ))
            .into());
        }
        if self.update_concurrency == 0 {
            self.update_concurrency = 10;
        }
        Ok(())
    }
}

fn pod(namespace: &str, name: &str, body: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("name".to_string(), name.to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("OnFailure".to_string()),
            containers: vec![Container {
                name: name.to_string(),
                image: Some(IMAGE.to_string()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-ec".to_string(),
                    format!("echo -n '{}' >> /config/output.txt", body),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "config".to_string(),
                    mount_path: "/config".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "config".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Flip between no annotations and a single marker, so every update changes the object.
fn toggle_annotations(pod: &mut Pod) {
    pod.metadata.annotations = match pod.metadata.annotations {
        None => Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
        Some(_) => None,
    };
}

fn is_conflict(e: &TesterError) -> bool {
    matches!(e.root(), TesterError::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "Conflict")
}

/// Limit one API call to `timeout`.
async fn bounded<T>(timeout: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, op).await {
        Ok(res) => res,
        Err(_) => Err(TesterError::Transient(format!(
            "request timed out after {}",
            format_duration(timeout)
        ))),
    }
}

pub struct StressTester {
    cfg: StressConfig,
    ctx: TesterContext,
}

impl StressTester {
    pub fn new(cfg: StressConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn should_continue(&self, i: i64) -> bool {
        self.cfg.objects < 0 || i < self.cfg.objects
    }

    /// Get `name`, then update it; create it when missing.
    async fn update_once(&self, name: &str, body: &str, rec: &Recorder) -> Result<()> {
        let ns = &self.cfg.namespace;
        let timeout = self.ctx.client_timeout;

        let start = Instant::now();
        let got = bounded(timeout, self.ctx.client.get_pod(ns, name)).await;
        let took = start.elapsed();
        let mut current = match got {
            Ok(p) => {
                Recorder::observe(&rec.gets, took, Some(true));
                p
            }
            Err(e) if e.is_not_found_or_gone() => {
                Recorder::observe(&rec.gets, took, None);
                let start = Instant::now();
                let res = bounded(timeout, self.ctx.client.create_pod(ns, &pod(ns, name, body))).await;
                let took = start.elapsed();
                match res {
                    Ok(()) => Recorder::observe(&rec.writes, took, Some(true)),
                    Err(e) if e.is_already_exists() => Recorder::observe(&rec.writes, took, None),
                    Err(e) => {
                        Recorder::observe(&rec.writes, took, Some(false));
                        warn!(namespace = %ns, error = %e, "create pod failed");
                    }
                }
                return Ok(());
            }
            Err(e) => {
                Recorder::observe(&rec.gets, took, Some(false));
                warn!(namespace = %ns, error = %e, "get pod failed");
                return Err(e);
            }
        };

        toggle_annotations(&mut current);
        let start = Instant::now();
        let res = bounded(timeout, self.ctx.client.replace_pod(ns, &current)).await;
        Recorder::observe(&rec.writes, start.elapsed(), Some(res.is_ok()));
        res
    }

    /// One update, retried while the server reports a write conflict.
    fn update_retrying<'a>(
        &'a self,
        name: String,
        body: Arc<str>,
        rec: &'a Recorder,
        backoff: &'a ExponentialBuilder,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            (|| self.update_once(&name, &body, rec))
                .retry(backoff)
                .when(|e: &TesterError| is_conflict(e))
                .await
        })
    }

    async fn run_updates(&self, done: &CancellationToken) -> (Samples, Samples) {
        info!(
            objects = self.cfg.objects,
            object_size = self.cfg.object_size,
            concurrency = self.cfg.update_concurrency,
            "updating"
        );
        let body: Arc<str> = random_suffix(self.cfg.object_size).into();
        let rec = Recorder::default();
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_times(CONFLICT_RETRIES);

        let mut i: i64 = 0;
        while self.should_continue(i) {
            if done.is_cancelled() || self.ctx.cancel.is_cancelled() {
                info!(iteration = i, "updates done");
                break;
            }
            let name = format!("{}{}", self.cfg.object_key_prefix, i as usize % KEY_SPACE);
            let round = (0..self.cfg.update_concurrency)
                .map(|_| self.update_retrying(name.clone(), body.clone(), &rec, &backoff));
            let failed = join_all(round).await.into_iter().filter(|r| r.is_err()).count();
            if i % 20 == 0 {
                info!(iteration = i, failed, namespace = %self.cfg.namespace, "update round finished");
            }
            i += 1;
        }
        rec.into_parts()
    }

    async fn run_range_gets(&self, done: &CancellationToken) -> Samples {
        let mut samples = Samples::default();
        if self.cfg.list_limit < 0 {
            info!(list_limit = self.cfg.list_limit, "skipping range gets");
            return samples;
        }
        info!(list_limit = self.cfg.list_limit, "listing for range gets");
        let limit = u32::try_from(self.cfg.list_limit).ok().filter(|l| *l > 0);

        let mut i: u64 = 0;
        while !done.is_cancelled() && !self.ctx.cancel.is_cancelled() {
            let start = Instant::now();
            let res = bounded(
                self.ctx.client_timeout,
                self.ctx.client.list_pods(&self.cfg.namespace, limit),
            )
            .await;
            samples.observe(start.elapsed(), Some(res.is_ok()));
            match res {
                Ok(pods) if i % 20 == 0 => {
                    info!(iteration = i, pods = pods.len(), namespace = %self.cfg.namespace, "listed pods")
                }
                Ok(_) => {}
                Err(e) => warn!(namespace = %self.cfg.namespace, error = %e, "list pods failed"),
            }
            i += 1;
            // Yield so a fast fake or cached response never starves the writers.
            tokio::task::yield_now().await;
        }
        samples
    }

    /// Runs both workers until the timeout, cancellation, or the write budget.
    async fn generate_load(&self) -> Result<(Samples, Samples, Samples)> {
        let done = CancellationToken::new();
        let timer = async {
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.run_timeout) => {
                    info!("run timeout, signaled workers");
                }
                _ = self.ctx.cancel.cancelled() => {
                    warn!("all stopped");
                }
                _ = done.cancelled() => {}
            }
            done.cancel();
        };
        let updates = async {
            let out = self.run_updates(&done).await;
            // A bounded write budget ends the run early.
            if self.cfg.objects >= 0 {
                done.cancel();
            }
            out
        };
        let collect = async {
            let (res, ()) = tokio::join!(
                async { tokio::join!(updates, self.run_range_gets(&done)) },
                timer
            );
            res
        };

        info!(timeout = %self.cfg.run_timeout_string, "waiting for test run timeout");
        let ((writes, gets), range_gets) =
            match tokio::time::timeout(self.cfg.run_timeout + RESULT_WAIT, collect).await {
                Ok(r) => r,
                Err(_) => {
                    warn!("took too long to receive results");
                    return Err(TesterError::deadline(
                        "stress results",
                        format!("workers still running after {}", format_duration(RESULT_WAIT)),
                    ));
                }
            };
        if self.ctx.cancel.is_cancelled() {
            return Err(TesterError::Cancelled);
        }
        Ok((writes, gets, range_gets))
    }
}

#[async_trait]
impl Tester for StressTester {
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

        let (writes, gets, range_gets) = self.generate_load().await?;
        info!(
            writes = writes.latencies.len(),
            gets = gets.latencies.len(),
            range_gets = range_gets.latencies.len(),
            "sorting latency results"
        );

        let test_id = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        self.cfg.latency_summary_writes = LatencySummary::from_samples(&test_id, writes);
        self.cfg.latency_summary_gets = LatencySummary::from_samples(&test_id, gets);
        self.cfg.latency_summary_range_gets = LatencySummary::from_samples(&test_id, range_gets);

        for (title, s) in [
            ("LatencySummaryWrites", &self.cfg.latency_summary_writes),
            ("LatencySummaryGets", &self.cfg.latency_summary_gets),
            ("LatencySummaryRangeGets", &self.cfg.latency_summary_range_gets),
        ] {
            self.ctx
                .log_writer
                .write_str(&format!("\n\n{}:\n{}\n", title, s.table()));
        }
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;
        let mut errors = Vec::new();
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(&self.cfg.namespace).await,
        );
        join_errors(errors)
    }

    fn write_back(&self, config: &mut Config) {
        let out = &mut config.add_on_stress;
        out.latency_summary_writes = self.cfg.latency_summary_writes.clone();
        out.latency_summary_gets = self.cfg.latency_summary_gets.clone();
        out.latency_summary_range_gets = self.cfg.latency_summary_range_gets.clone();
    }
}
