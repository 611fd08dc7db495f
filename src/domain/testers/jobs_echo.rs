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

//! Busybox pods that each write `echo_size` random bytes, run either as a
//! plain Job (`jobs-echo`) or on a CronJob schedule (`cron-jobs-echo`).

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::jobs_pi::{pod_phases, wait_budget};
use crate::domain::testers::{default_namespace, random_suffix, record};
use crate::infrastructure::constants::{DEFAULT_MINIMUM_NODES, JOB_WAIT_CAP};
use crate::infrastructure::kubernetes::{ObjectKind, ResourceKind, WaitSpec};
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "jobs-echo";
pub const CRON_NAME: &str = "cron-jobs-echo";

const JOB_NAME: &str = "job-echo";
const IMAGE: &str = "busybox";
const CRON_EXTRA_WAIT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Job,
    CronJob,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Job => f.write_str("Job"),
            JobType::CronJob => f.write_str("CronJob"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsEchoConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,

    pub job_type: JobType,
    pub completes: i32,
    pub parallels: i32,
    /// Bytes echoed by each pod. Lands in the object, so keep it well below
    /// the 256 KiB annotation limit.
    pub echo_size: i32,

    pub schedule: String,
    pub successful_jobs_history_limit: i32,
    pub failed_jobs_history_limit: i32,
}

impl JobsEchoConfig {
    pub fn job() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            job_type: JobType::Job,
            completes: 10,
            parallels: 10,
            echo_size: 100 * 1024,
            schedule: "*/10 * * * *".to_string(),
            successful_jobs_history_limit: 3,
            failed_jobs_history_limit: 1,
        }
    }

    pub fn cron_job() -> Self {
        Self {
            namespace: default_namespace(CRON_NAME),
            job_type: JobType::CronJob,
            ..Self::job()
        }
    }
}

impl Default for JobsEchoConfig {
    fn default() -> Self {
        Self::job()
    }
}

impl AddOnConfig for JobsEchoConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::read_only("job_type", FieldKind::Str, "Job or CronJob, fixed by the add-on name"),
        FieldSchema::new("completes", FieldKind::Int, "desired number of successful pods"),
        FieldSchema::new("parallels", FieldKind::Int, "pods running at once"),
        FieldSchema::new("echo_size", FieldKind::Int, "bytes written by each pod"),
        FieldSchema::new("schedule", FieldKind::Str, "CronJob schedule"),
        FieldSchema::new(
            "successful_jobs_history_limit",
            FieldKind::Int,
            "finished CronJob runs to keep",
        ),
        FieldSchema::new(
            "failed_jobs_history_limit",
            FieldKind::Int,
            "failed CronJob runs to keep",
        ),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        self.job_type = if scope.add_on == CRON_NAME {
            JobType::CronJob
        } else {
            JobType::Job
        };

        let defaults = Self::job();
        if self.completes == 0 {
            self.completes = defaults.completes;
        }
        if self.parallels == 0 {
            self.parallels = defaults.parallels;
        }
        if self.echo_size == 0 {
            self.echo_size = defaults.echo_size;
        }
        if self.schedule.is_empty() {
            self.schedule = defaults.schedule;
        }
        if self.successful_jobs_history_limit == 0 {
            self.successful_jobs_history_limit = defaults.successful_jobs_history_limit;
        }
        if self.failed_jobs_history_limit == 0 {
            self.failed_jobs_history_limit = defaults.failed_jobs_history_limit;
        }
        if self.completes < 0 || self.parallels < 0 || self.echo_size < 0 {
            return Err(ConfigError::InvalidField(format!(
                "add_on {} completes, parallels and echo_size must not be negative",
                scope.add_on
            ))
            .into());
        }
        Ok(())
    }
}

fn pod_template(echo_size: usize) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            restart_policy: Some("OnFailure".to_string()),
            containers: vec![Container {
                name: JOB_NAME.to_string(),
                image: Some(IMAGE.to_string()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-ec".to_string(),
                    format!("echo -n '{}' >> /config/output.txt", random_suffix(echo_size)),
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
    }
}

fn job_spec(cfg: &JobsEchoConfig) -> JobSpec {
    JobSpec {
        completions: Some(cfg.completes),
        parallelism: Some(cfg.parallels),
        template: pod_template(cfg.echo_size.max(0) as usize),
        ..Default::default()
    }
}

fn meta(cfg: &JobsEchoConfig) -> ObjectMeta {
    ObjectMeta {
        name: Some(JOB_NAME.to_string()),
        namespace: Some(cfg.namespace.clone()),
        ..Default::default()
    }
}

fn job(cfg: &JobsEchoConfig) -> Job {
    Job {
        metadata: meta(cfg),
        spec: Some(job_spec(cfg)),
        ..Default::default()
    }
}

fn cron_job(cfg: &JobsEchoConfig) -> CronJob {
    CronJob {
        metadata: meta(cfg),
        spec: Some(CronJobSpec {
            schedule: cfg.schedule.clone(),
            successful_jobs_history_limit: Some(cfg.successful_jobs_history_limit),
            failed_jobs_history_limit: Some(cfg.failed_jobs_history_limit),
            concurrency_policy: Some("Replace".to_string()),
            job_template: JobTemplateSpec {
                metadata: Some(meta(cfg)),
                spec: Some(job_spec(cfg)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// CronJob runs get ten more minutes for the schedule to fire.
fn echo_wait_budget(job_type: JobType, completes: i32) -> Duration {
    match job_type {
        JobType::Job => wait_budget(completes),
        JobType::CronJob => (wait_budget(completes) + CRON_EXTRA_WAIT).min(JOB_WAIT_CAP),
    }
}

pub struct JobsEchoTester {
    cfg: JobsEchoConfig,
    ctx: TesterContext,
}

impl JobsEchoTester {
    pub fn new(cfg: JobsEchoConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    async fn create(&self) -> Result<()> {
        let ns = &self.cfg.namespace;
        let res = match self.cfg.job_type {
            JobType::Job => {
                info!(
                    name = JOB_NAME,
                    completes = self.cfg.completes,
                    parallels = self.cfg.parallels,
                    echo_size = self.cfg.echo_size,
                    "creating Job"
                );
                self.ctx.client.create_job(ns, &job(&self.cfg)).await
            }
            JobType::CronJob => {
                info!(
                    name = JOB_NAME,
                    completes = self.cfg.completes,
                    parallels = self.cfg.parallels,
                    schedule = %self.cfg.schedule,
                    "creating CronJob"
                );
                self.ctx.client.create_cronjob(ns, &cron_job(&self.cfg)).await
            }
        };
        match res {
            Err(e) if e.is_already_exists() => {
                info!(name = JOB_NAME, job_type = %self.cfg.job_type, "already exists");
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Tester for JobsEchoTester {
    fn name(&self) -> &str {
        match self.cfg.job_type {
            JobType::Job => NAME,
            JobType::CronJob => CRON_NAME,
        }
    }

    fn enabled(&self) -> bool {
        self.cfg.enable
    }

    async fn apply(&mut self) -> Result<()> {
        self.ctx.confirm("apply", &self.cfg.namespace).await?;
        self.ctx.check_minimum_nodes(self.cfg.minimum_nodes).await?;
        self.ctx.client.create_namespace(&self.cfg.namespace).await?;
        self.create().await?;

        let (kind, initial) = match self.cfg.job_type {
            JobType::Job => (ResourceKind::Job, Duration::from_secs(60)),
            JobType::CronJob => (ResourceKind::CronJob, Duration::from_secs(3 * 60)),
        };
        let spec = WaitSpec::new(kind, &self.cfg.namespace, JOB_NAME)
            .desired(self.cfg.completes)
            .intervals(initial, Duration::from_secs(5))
            .timeout(echo_wait_budget(self.cfg.job_type, self.cfg.completes))
            .tolerate_missing();
        let pods = self
            .ctx
            .poller()
            .wait_for_job_pods(self.ctx.client.as_ref(), &spec, None)
            .await?;
        self.ctx
            .log_writer
            .write_str(&pod_phases(&self.cfg.job_type.to_string(), &pods));
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let kind = match self.cfg.job_type {
            JobType::Job => ObjectKind::Job,
            JobType::CronJob => ObjectKind::CronJob,
        };
        let mut errors = Vec::new();
        record(
            &mut errors,
            &format!("failed to delete {}", self.cfg.job_type),
            self.ctx
                .client
                .delete_object(kind, &self.cfg.namespace, JOB_NAME)
                .await,
        );
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

    fn scope(add_on: &str) -> ValidationScope<'_> {
        ValidationScope {
            add_on,
            cluster_name: "demo",
        }
    }

    #[test]
    fn test_job_type_follows_add_on_name() {
        let mut cfg = JobsEchoConfig::job();
        cfg.validate_and_set_defaults(&scope(CRON_NAME)).unwrap();
        assert_eq!(cfg.job_type, JobType::CronJob);
        cfg.validate_and_set_defaults(&scope(NAME)).unwrap();
        assert_eq!(cfg.job_type, JobType::Job);
    }

    #[test]
    fn test_zero_fields_take_defaults() {
        let mut cfg = JobsEchoConfig::cron_job();
        cfg.completes = 0;
        cfg.schedule.clear();
        cfg.validate_and_set_defaults(&scope(CRON_NAME)).unwrap();
        assert_eq!(cfg.completes, 10);
        assert_eq!(cfg.schedule, "*/10 * * * *");
        assert!(cfg.namespace.starts_with("cron-jobs-echo-"));
    }

    #[test]
    fn test_cron_job_object() {
        let mut cfg = JobsEchoConfig::cron_job();
        cfg.echo_size = 16;
        let cj = cron_job(&cfg);
        let spec = cj.spec.unwrap();
        assert_eq!(spec.schedule, "*/10 * * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Replace"));
        assert_eq!(spec.successful_jobs_history_limit, Some(3));
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        let cmd = pod.containers[0].command.clone().unwrap();
        assert_eq!(cmd[2].len(), "echo -n '' >> /config/output.txt".len() + 16);
    }

    #[test]
    fn test_cron_budget_adds_ten_minutes() {
        assert_eq!(
            echo_wait_budget(JobType::CronJob, 1),
            Duration::from_secs(20 * 60)
        );
        assert_eq!(echo_wait_budget(JobType::Job, 1), Duration::from_secs(10 * 60));
        assert_eq!(echo_wait_budget(JobType::CronJob, 1000), JOB_WAIT_CAP);
    }

    #[test]
    fn test_job_type_serializes_as_name() {
        let yaml = serde_yaml::to_string(&JobType::CronJob).unwrap();
        assert_eq!(yaml.trim(), "CronJob");
    }
}
