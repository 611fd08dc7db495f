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

//! "Hello World" behind an AWS network load balancer.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, Config, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{
    app_labels, default_namespace, delete_load_balancer, elb_target, fetch_until, object_meta,
    record,
};
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, DEPLOYMENT_INITIAL_WAIT, DEPLOYMENT_POLL_INTERVAL,
    DEPLOYMENT_WAIT_TIMEOUT, HTML_CHECK_TIMEOUT, INGRESS_POLL_INTERVAL, INGRESS_WAIT_TIMEOUT,
};
use crate::infrastructure::kubernetes::{ObjectKind, ResourceKind, WaitSpec};
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "nlb-hello-world";

const APP_NAME: &str = "hello-world";
const APP_IMAGE: &str = "dockercloud/hello-world";
const DEPLOYMENT_NAME: &str = "hello-world-deployment";
const SERVICE_NAME: &str = "hello-world-service";
const HELLO_MARKER: &str = "<h1>Hello world!</h1>";
const NLB_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-type";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NlbHelloWorldConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,

    pub partition: String,
    pub region: String,
    pub account_id: String,

    pub deployment_node_selector: BTreeMap<String, String>,
    pub deployment_replicas: i32,

    pub elb_name: String,
    pub elb_arn: String,
    pub elb_url: String,
}

impl Default for NlbHelloWorldConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            partition: "aws".to_string(),
            region: "us-west-2".to_string(),
            account_id: String::new(),
            deployment_node_selector: BTreeMap::new(),
            deployment_replicas: 2,
            elb_name: String::new(),
            elb_arn: String::new(),
            elb_url: String::new(),
        }
    }
}

impl AddOnConfig for NlbHelloWorldConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("partition", FieldKind::Str, "AWS partition"),
        FieldSchema::new("region", FieldKind::Str, "AWS region"),
        FieldSchema::read_only("account_id", FieldKind::Str, "AWS account id"),
        FieldSchema::new("deployment_node_selector", FieldKind::Map, "node selector for the Deployment"),
        FieldSchema::new("deployment_replicas", FieldKind::Int, "Deployment replicas"),
        FieldSchema::read_only("elb_name", FieldKind::Str, "ELB name"),
        FieldSchema::read_only("elb_arn", FieldKind::Str, "ELB ARN"),
        FieldSchema::read_only("elb_url", FieldKind::Str, "ELB URL"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.deployment_replicas <= 0 {
            self.deployment_replicas = 2;
        }
        if self.region.is_empty() {
            return Err(ConfigError::MissingRequired(format!("add_on {} region", scope.add_on)).into());
        }
        if self.partition.is_empty() {
            self.partition = "aws".to_string();
        }
        Ok(())
    }
}

fn deployment(cfg: &NlbHelloWorldConfig) -> Deployment {
    let node_selector = if cfg.deployment_node_selector.is_empty() {
        None
    } else {
        Some(cfg.deployment_node_selector.clone())
    };
    Deployment {
        metadata: object_meta(&cfg.namespace, DEPLOYMENT_NAME, APP_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(cfg.deployment_replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(APP_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(APP_NAME)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Always".to_string()),
                    containers: vec![Container {
                        name: APP_NAME.to_string(),
                        image: Some(APP_IMAGE.to_string()),
                        image_pull_policy: Some("Always".to_string()),
                        ports: Some(vec![ContainerPort {
                            protocol: Some("TCP".to_string()),
                            container_port: 80,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    node_selector,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(cfg: &NlbHelloWorldConfig) -> Service {
    let mut metadata = object_meta(&cfg.namespace, SERVICE_NAME, APP_NAME);
    metadata.annotations = Some(BTreeMap::from([(
        NLB_ANNOTATION.to_string(),
        "nlb".to_string(),
    )]));
    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(app_labels(APP_NAME)),
            type_: Some("LoadBalancer".to_string()),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(80)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Seven minutes plus one per replica.
fn deployment_wait(replicas: i32) -> Duration {
    DEPLOYMENT_WAIT_TIMEOUT + Duration::from_secs(60) * replicas.max(0) as u32
}

pub struct NlbHelloWorldTester {
    cfg: NlbHelloWorldConfig,
    ctx: TesterContext,
}

impl NlbHelloWorldTester {
    pub fn new(cfg: NlbHelloWorldConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    async fn resolve_elb(&mut self) -> Result<()> {
        let target = elb_target(
            &self.ctx,
            &self.cfg.partition,
            &self.cfg.region,
            &mut self.cfg.account_id,
        )
        .await;
        let lb = self
            .ctx
            .client
            .wait_for_service_ingress(&self.cfg.namespace, SERVICE_NAME, &target, INGRESS_WAIT_TIMEOUT)
            .await?;
        info!(elb_name = %lb.name, elb_arn = %lb.arn, elb_url = %lb.url, "found NLB");
        self.cfg.elb_name = lb.name;
        self.cfg.elb_arn = lb.arn;
        self.cfg.elb_url = lb.url;
        Ok(())
    }
}

#[async_trait]
impl Tester for NlbHelloWorldTester {
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

        self.ctx
            .client
            .apply_deployment(&self.cfg.namespace, &deployment(&self.cfg))
            .await?;
        let spec = WaitSpec::new(ResourceKind::Deployment, &self.cfg.namespace, DEPLOYMENT_NAME)
            .desired(self.cfg.deployment_replicas)
            .intervals(DEPLOYMENT_INITIAL_WAIT, DEPLOYMENT_POLL_INTERVAL)
            .timeout(deployment_wait(self.cfg.deployment_replicas));
        let observer =
            self.ctx
                .observer()
                .describe(&self.cfg.namespace, "deployment", DEPLOYMENT_NAME);
        self.ctx
            .poller()
            .wait_for_deployment(self.ctx.client.as_ref(), &spec, Some(&observer))
            .await?;

        self.ctx
            .client
            .apply_service(&self.cfg.namespace, &service(&self.cfg))
            .await?;
        self.resolve_elb().await?;

        fetch_until(
            &self.ctx,
            &self.cfg.elb_url,
            HELLO_MARKER,
            HTML_CHECK_TIMEOUT,
            INGRESS_POLL_INTERVAL,
        )
        .await?;
        info!(url = %self.cfg.elb_url, "NLB hello-world is serving");
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        // The ARN is only discoverable while the Service still exists.
        if self.cfg.elb_arn.is_empty() {
            match self.resolve_elb().await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => info!(error = %e, "no ELB found for the Service; maybe already deleted"),
            }
        }

        let ns = self.cfg.namespace.clone();
        record(
            &mut errors,
            "failed to delete Service",
            self.ctx.client.delete_object(ObjectKind::Service, &ns, SERVICE_NAME).await,
        );
        record(
            &mut errors,
            "failed to delete Deployment",
            self.ctx
                .client
                .delete_object(ObjectKind::Deployment, &ns, DEPLOYMENT_NAME)
                .await,
        );
        record(
            &mut errors,
            "failed to delete ELB",
            delete_load_balancer(&self.ctx, &self.cfg.elb_arn).await,
        );
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(&ns).await,
        );
        join_errors(errors)
    }

    fn write_back(&self, config: &mut Config) {
        let out = &mut config.add_on_nlb_hello_world;
        out.account_id = self.cfg.account_id.clone();
        out.elb_name = self.cfg.elb_name.clone();
        out.elb_arn = self.cfg.elb_arn.clone();
        out.elb_url = self.cfg.elb_url.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_wait_grows_with_replicas() {
        assert_eq!(deployment_wait(2), Duration::from_secs(9 * 60));
        assert_eq!(deployment_wait(0), DEPLOYMENT_WAIT_TIMEOUT);
    }

    #[test]
    fn test_service_is_an_nlb() {
        let svc = service(&NlbHelloWorldConfig::default());
        let annotations = svc.metadata.annotations.unwrap();
        assert_eq!(annotations.get(NLB_ANNOTATION).map(String::as_str), Some("nlb"));
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("LoadBalancer"));
    }

    #[test]
    fn test_node_selector_only_when_set() {
        let mut cfg = NlbHelloWorldConfig::default();
        let spec = deployment(&cfg).spec.unwrap().template.spec.unwrap();
        assert!(spec.node_selector.is_none());

        cfg.deployment_node_selector
            .insert("kubernetes.io/arch".to_string(), "arm64".to_string());
        let spec = deployment(&cfg).spec.unwrap().template.spec.unwrap();
        assert_eq!(spec.node_selector.unwrap().len(), 1);
    }

    #[test]
    fn test_validation_defaults_replicas() {
        let mut cfg = NlbHelloWorldConfig::default();
        cfg.deployment_replicas = 0;
        cfg.validate_and_set_defaults(&ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        })
        .unwrap();
        assert_eq!(cfg.deployment_replicas, 2);
    }
}
