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

//! Bounded, cancellable readiness polling.
//!
//! Tick schedule: the first tick fires immediately, the second after
//! `interval_initial`, every later one after `interval_steady`. Each tick
//! runs the observer (if any) and then the predicate. The wait ends on
//! success, on a non-retryable error, when the budget runs out
//! (`DeadlineExceeded` carrying the last observed state), or when either
//! cancellation channel fires (`Cancelled`).

use super::client::KubeClient;
use crate::infrastructure::constants::LABEL_JOB_NAME;
use crate::shared::{CancelScope, Result, TesterError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Outcome of one predicate evaluation.
#[derive(Debug)]
pub enum Check<T> {
    Done(T),
    /// Not there yet; the string describes the observed state.
    Pending(String),
}

/// Per-tick diagnostic side effect. Failures are logged, never fatal.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    DaemonSet,
    Job,
    CronJob,
    Custom,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Custom => "condition",
        };
        f.write_str(s)
    }
}

/// What to wait for and how long.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub desired: i32,
    pub timeout: Duration,
    pub interval_initial: Duration,
    pub interval_steady: Duration,
    /// Keep polling while the object does not exist yet.
    pub tolerate_missing: bool,
}

impl WaitSpec {
    pub fn new(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            desired: 1,
            timeout: Duration::from_secs(7 * 60),
            interval_initial: Duration::from_secs(60),
            interval_steady: Duration::from_secs(20),
            tolerate_missing: false,
        }
    }

    pub fn custom(operation: &str, timeout: Duration, interval: Duration) -> Self {
        Self {
            kind: ResourceKind::Custom,
            namespace: String::new(),
            name: operation.to_string(),
            desired: 1,
            timeout,
            interval_initial: interval,
            interval_steady: interval,
            tolerate_missing: false,
        }
    }

    pub fn desired(mut self, desired: i32) -> Self {
        self.desired = desired;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn intervals(mut self, initial: Duration, steady: Duration) -> Self {
        self.interval_initial = initial;
        self.interval_steady = steady;
        self
    }

    pub fn tolerate_missing(mut self) -> Self {
        self.tolerate_missing = true;
        self
    }

    fn operation(&self) -> String {
        if self.namespace.is_empty() {
            format!("{} '{}'", self.kind, self.name)
        } else {
            format!("{} '{}/{}'", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Poller {
    cancel: CancelScope,
}

impl Poller {
    pub fn new(cancel: CancelScope) -> Self {
        Self { cancel }
    }

    /// Cancellable sleep. Returns `Cancelled` if either channel fires first.
    pub async fn sleep(&self, d: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.ctx.cancelled() => Err(TesterError::Cancelled),
            _ = self.cancel.stopped() => Err(TesterError::Cancelled),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }

    /// Poll `check` until it reports [`Check::Done`].
    pub async fn wait<T, F, Fut>(
        &self,
        spec: &WaitSpec,
        observer: Option<&dyn Observer>,
        mut check: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Check<T>>>,
    {
        let operation = spec.operation();
        info!(
            operation = %operation,
            desired = spec.desired,
            timeout = ?spec.timeout,
            interval_initial = ?spec.interval_initial,
            interval_steady = ?spec.interval_steady,
            "waiting"
        );

        let deadline = Instant::now() + spec.timeout;
        let mut next_tick = Instant::now();
        let mut ticks: u64 = 0;
        let mut last_state = String::from("not observed");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.ctx.cancelled() => {
                    warn!(operation = %operation, "wait cancelled by context");
                    return Err(TesterError::Cancelled);
                }
                _ = self.cancel.stopped() => {
                    warn!(operation = %operation, "wait aborted by stop signal");
                    return Err(TesterError::Cancelled);
                }
                _ = sleep_until(deadline) => {
                    return Err(TesterError::deadline(operation.clone(), last_state.clone()));
                }
                _ = sleep_until(next_tick) => {}
            }
            ticks += 1;

            let tick = async {
                if let Some(obs) = observer {
                    if let Err(e) = obs.observe().await {
                        warn!(operation = %operation, error = %e, "observer failed");
                    }
                }
                check().await
            };
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TesterError::Cancelled),
                _ = sleep_until(deadline) => {
                    return Err(TesterError::deadline(operation.clone(), last_state.clone()));
                }
                r = tick => r,
            };

            match result {
                Ok(Check::Done(v)) => {
                    info!(operation = %operation, ticks, "wait complete");
                    return Ok(v);
                }
                Ok(Check::Pending(state)) => {
                    debug!(operation = %operation, state = %state, "not ready");
                    last_state = state;
                }
                Err(e) if spec.tolerate_missing && e.is_not_found_or_gone() => {
                    debug!(operation = %operation, "object not found yet");
                    last_state = "not found".to_string();
                }
                Err(e) if e.is_retryable() => {
                    warn!(operation = %operation, error = %e, "retryable error while polling");
                    last_state = e.to_string();
                }
                Err(e) => return Err(e),
            }

            let interval = if ticks == 1 {
                spec.interval_initial
            } else {
                spec.interval_steady
            };
            next_tick = Instant::now() + interval;
        }
    }

    pub async fn wait_for_deployment(
        &self,
        client: &dyn KubeClient,
        spec: &WaitSpec,
        observer: Option<&dyn Observer>,
    ) -> Result<Deployment> {
        self.wait(spec, observer, || async move {
            let dp = client.get_deployment(&spec.namespace, &spec.name).await?;
            deployment_ready(dp, spec.desired)
        })
        .await
    }

    pub async fn wait_for_daemonset(
        &self,
        client: &dyn KubeClient,
        spec: &WaitSpec,
        observer: Option<&dyn Observer>,
    ) -> Result<DaemonSet> {
        self.wait(spec, observer, || async move {
            let ds = client.get_daemonset(&spec.namespace, &spec.name).await?;
            Ok(daemonset_ready(ds))
        })
        .await
    }

    /// Counts succeeded pods spawned by the Job (or by the CronJob's jobs).
    pub async fn wait_for_job_pods(
        &self,
        client: &dyn KubeClient,
        spec: &WaitSpec,
        observer: Option<&dyn Observer>,
    ) -> Result<Vec<Pod>> {
        let cron = spec.kind == ResourceKind::CronJob;
        self.wait(spec, observer, || async move {
            if !cron {
                let job = client.get_job(&spec.namespace, &spec.name).await?;
                if let Some(reason) = job_failed(&job) {
                    return Err(TesterError::assertion(format!(
                        "Job '{}' failed: {}",
                        spec.name, reason
                    )));
                }
            }
            let pods = client.list_pods(&spec.namespace, None).await?;
            let succeeded = count_succeeded_job_pods(&pods, &spec.name, cron);
            if succeeded >= spec.desired as usize {
                Ok(Check::Done(pods))
            } else {
                Ok(Check::Pending(format!(
                    "{} of {} pods succeeded ({} pods listed)",
                    succeeded,
                    spec.desired,
                    pods.len()
                )))
            }
        })
        .await
    }
}

/// Ready when both ready and updated replicas reach `desired`.
/// A true `ReplicaFailure` condition fails the wait.
pub fn deployment_ready(dp: Deployment, desired: i32) -> Result<Check<Deployment>> {
    let name = dp.metadata.name.clone().unwrap_or_default();
    let status = dp.status.clone().unwrap_or_default();
    if let Some(conds) = &status.conditions {
        if let Some(c) = conds
            .iter()
            .find(|c| c.type_ == "ReplicaFailure" && c.status == "True")
        {
            return Err(TesterError::assertion(format!(
                "Deployment '{}' ReplicaFailure: {}",
                name,
                c.message.clone().unwrap_or_default()
            )));
        }
    }
    let ready = status.ready_replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    // Replicas above `desired` still count as ready.
    if ready >= desired && updated >= desired {
        Ok(Check::Done(dp))
    } else {
        Ok(Check::Pending(format!(
            "ready {}/{}, updated {}/{}",
            ready, desired, updated, desired
        )))
    }
}

/// Ready when every scheduled pod is ready.
pub fn daemonset_ready(ds: DaemonSet) -> Check<DaemonSet> {
    let status = ds.status.clone().unwrap_or_default();
    let desired = status.desired_number_scheduled;
    if desired > 0 && status.number_ready == desired {
        Check::Done(ds)
    } else {
        Check::Pending(format!("ready {}/{}", status.number_ready, desired))
    }
}

/// Reason of a true `Failed` condition, if the Job has one.
pub fn job_failed(job: &Job) -> Option<String> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
                .map(|c| c.reason.clone().unwrap_or_else(|| "Failed".to_string()))
        })
}

/// Pods belong to the job through the `job-name` label; CronJob pods are
/// matched by name prefix since each run gets its own job name.
pub fn count_succeeded_job_pods(pods: &[Pod], job_name: &str, by_prefix: bool) -> usize {
    pods.iter()
        .filter(|p| {
            let label = p
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_JOB_NAME))
                .map(|v| v == job_name)
                .unwrap_or(false);
            let prefix = by_prefix
                && p.metadata
                    .name
                    .as_deref()
                    .map(|n| n.starts_with(job_name))
                    .unwrap_or(false);
            label || prefix
        })
        .filter(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|ph| ph == "Succeeded")
                .unwrap_or(false)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        events: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Observer for Recorder {
        async fn observe(&self) -> Result<()> {
            self.events.lock().unwrap().push("observe");
            if self.fail {
                return Err(TesterError::command("kubectl describe", "exit 1"));
            }
            Ok(())
        }
    }

    fn spec(timeout: Duration) -> WaitSpec {
        WaitSpec::new(ResourceKind::Deployment, "default", "app")
            .timeout(timeout)
            .intervals(Duration::from_secs(60), Duration::from_secs(20))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_then_initial_then_steady() {
        let poller = Poller::new(CancelScope::new());
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let t = times.clone();
        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(600)), None, || {
                let t = t.clone();
                async move {
                    let mut v = t.lock().unwrap();
                    v.push(start.elapsed());
                    if v.len() == 3 {
                        Ok(Check::Done(()))
                    } else {
                        Ok(Check::Pending("waiting".into()))
                    }
                }
            })
            .await;
        assert!(res.is_ok());
        let v = times.lock().unwrap();
        assert_eq!(v[0], Duration::ZERO);
        assert_eq!(v[1], Duration::from_secs(60));
        assert_eq!(v[2], Duration::from_secs(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_runs_before_predicate() {
        let poller = Poller::new(CancelScope::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let obs = Recorder {
            events: events.clone(),
            fail: false,
        };
        let e = events.clone();
        let res: Result<u32> = poller
            .wait(&spec(Duration::from_secs(600)), Some(&obs), || {
                let e = e.clone();
                async move {
                    e.lock().unwrap().push("check");
                    Ok(Check::Done(7))
                }
            })
            .await;
        assert_eq!(res.unwrap(), 7);
        assert_eq!(*events.lock().unwrap(), vec!["observe", "check"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_failure_does_not_fail_wait() {
        let poller = Poller::new(CancelScope::new());
        let obs = Recorder {
            events: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };
        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(600)), Some(&obs), || async {
                Ok(Check::Done(()))
            })
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_carries_last_state() {
        let poller = Poller::new(CancelScope::new());
        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(7 * 60)), None, || async {
                Ok(Check::Pending("ready 0/1, updated 0/1".into()))
            })
            .await;
        match res.unwrap_err() {
            TesterError::DeadlineExceeded { last_state, .. } => {
                assert_eq!(last_state, "ready 0/1, updated 0/1")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_tick_never_observes() {
        let scope = CancelScope::new();
        scope.stop();
        let poller = Poller::new(scope);
        let events = Arc::new(Mutex::new(Vec::new()));
        let obs = Recorder {
            events: events.clone(),
            fail: false,
        };
        let calls = AtomicUsize::new(0);
        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(600)), Some(&obs), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Check::Done(())) }
            })
            .await;
        assert!(res.unwrap_err().is_cancelled());
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_wait_returns_cancelled() {
        let scope = CancelScope::new();
        let poller = Poller::new(scope.clone());
        let stopper = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            stopper.stop();
        });
        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(600)), None, || async {
                Ok(Check::Pending("pending".into()))
            })
            .await;
        assert!(res.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_object_tolerated_only_when_asked() {
        let poller = Poller::new(CancelScope::new());
        let n = AtomicUsize::new(0);
        let res: Result<()> = poller
            .wait(
                &spec(Duration::from_secs(600)).tolerate_missing(),
                None,
                || {
                    let i = n.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if i < 2 {
                            Err(TesterError::not_found("Deployment", "app", "default"))
                        } else {
                            Ok(Check::Done(()))
                        }
                    }
                },
            )
            .await;
        assert!(res.is_ok());

        let res: Result<()> = poller
            .wait(&spec(Duration::from_secs(600)), None, || async {
                Err(TesterError::not_found("Deployment", "app", "default"))
            })
            .await;
        assert!(res.unwrap_err().is_not_found_or_gone());
    }

    fn deployment(ready: i32, updated: i32, failure: bool) -> Deployment {
        let conditions = failure.then(|| {
            vec![DeploymentCondition {
                type_: "ReplicaFailure".to_string(),
                status: "True".to_string(),
                message: Some("quota exceeded".to_string()),
                ..Default::default()
            }]
        });
        Deployment {
            metadata: ObjectMeta {
                name: Some("metrics-server".to_string()),
                ..Default::default()
            },
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                updated_replicas: Some(updated),
                conditions,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_deployment_predicate() {
        assert!(matches!(
            deployment_ready(deployment(1, 1, false), 1).unwrap(),
            Check::Done(_)
        ));
        assert!(matches!(
            deployment_ready(deployment(1, 0, false), 1).unwrap(),
            Check::Pending(_)
        ));
        assert!(deployment_ready(deployment(0, 0, true), 1).is_err());
    }

    #[test]
    fn test_deployment_scaled_past_desired_is_ready() {
        assert!(matches!(
            deployment_ready(deployment(3, 3, false), 2).unwrap(),
            Check::Done(_)
        ));
    }

    fn pod(name: &str, job: Option<&str>, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: job.map(|j| {
                    [(LABEL_JOB_NAME.to_string(), j.to_string())]
                        .into_iter()
                        .collect()
                }),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_pod_counting() {
        let pods = vec![
            pod("job-pi-a", Some("job-pi"), "Succeeded"),
            pod("job-pi-b", Some("job-pi"), "Running"),
            pod("other-x", Some("other"), "Succeeded"),
            pod("cronjob-echo-1593205200-2t2tv", Some("cronjob-echo-1593205200"), "Succeeded"),
        ];
        assert_eq!(count_succeeded_job_pods(&pods, "job-pi", false), 1);
        assert_eq!(count_succeeded_job_pods(&pods, "cronjob-echo", true), 1);
        assert_eq!(count_succeeded_job_pods(&pods, "cronjob-echo", false), 0);
    }
}
