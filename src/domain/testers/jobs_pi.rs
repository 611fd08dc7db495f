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

//! A batch Job computing π to 2000 digits, `completes` times.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{default_namespace, record};
use crate::infrastructure::constants::{DEFAULT_MINIMUM_NODES, JOB_WAIT_CAP};
use crate::infrastructure::kubernetes::{ObjectKind, ResourceKind, WaitSpec};
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "jobs-pi";

const JOB_NAME: &str = "job-pi";
const IMAGE: &str = "perl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsPiConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,
    pub completes: i32,
    pub parallels: i32,
}

impl Default for JobsPiConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            completes: 10,
            parallels: 10,
        }
    }
}

impl AddOnConfig for JobsPiConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("completes", FieldKind::Int, "desired number of successful pods"),
        FieldSchema::new("parallels", FieldKind::Int, "pods running at once"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.completes <= 0 || self.parallels <= 0 {
            return Err(ConfigError::InvalidField(format!(
                "add_on {} completes and parallels must be positive, got {}/{}",
                scope.add_on, self.completes, self.parallels
            ))
            .into());
        }
        Ok(())
    }
}

/// Five minutes plus five per completion, never more than [`JOB_WAIT_CAP`].
pub fn wait_budget(completes: i32) -> Duration {
    let per = Duration::from_secs(5 * 60);
    (per + per * completes.max(0) as u32).min(JOB_WAIT_CAP)
}

fn job(cfg: &JobsPiConfig) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(JOB_NAME.to_string()),
            namespace: Some(cfg.namespace.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: Some(cfg.completes),
            parallelism: Some(cfg.parallels),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: JOB_NAME.to_string(),
                        image: Some(IMAGE.to_string()),
                        image_pull_policy: Some("Always".to_string()),
                        command: Some(
                            ["perl", "-Mbignum=bpi", "-wle", "print bpi(2000)"]
                                .iter()
                                .map(|s| s.to_string())
                                .collect(),
                        ),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Phase of each pod, one per line, for the log writer.
pub(crate) fn pod_phases(kind: &str, pods: &[Pod]) -> String {
    let mut out = String::from("\n");
    for p in pods {
        out.push_str(&format!(
            "{} Pod {:?}: {:?}\n",
            kind,
            p.metadata.name.as_deref().unwrap_or_default(),
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown")
        ));
    }
    out.push('\n');
    out
}

pub struct JobsPiTester {
    cfg: JobsPiConfig,
    ctx: TesterContext,
}

impl JobsPiTester {
    pub fn new(cfg: JobsPiConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }
}

#[async_trait]
impl Tester for JobsPiTester {
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

        info!(
            name = JOB_NAME,
            completes = self.cfg.completes,
            parallels = self.cfg.parallels,
            "creating Job"
        );
        match self
            .ctx
            .client
            .create_job(&self.cfg.namespace, &job(&self.cfg))
            .await
        {
            Err(e) if e.is_already_exists() => info!(name = JOB_NAME, "Job already exists"),
            other => other?,
        }

        let spec = WaitSpec::new(ResourceKind::Job, &self.cfg.namespace, JOB_NAME)
            .desired(self.cfg.completes)
            .intervals(Duration::from_secs(60), Duration::from_secs(5))
            .timeout(wait_budget(self.cfg.completes))
            .tolerate_missing();
        let pods = self
            .ctx
            .poller()
            .wait_for_job_pods(self.ctx.client.as_ref(), &spec, None)
            .await?;
        self.ctx.log_writer.write_str(&pod_phases("Job", &pods));
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        record(
            &mut errors,
            "failed to delete Job",
            self.ctx
                .client
                .delete_object(ObjectKind::Job, &self.cfg.namespace, JOB_NAME)
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
