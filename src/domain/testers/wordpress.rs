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

//! WordPress from the bitnami chart, exposed through an NLB.

use crate::domain::config::schema::{FieldKind, FieldSchema, ENABLE, MINIMUM_NODES, NAMESPACE};
use crate::domain::config::{validate_common, AddOnConfig, Config, ValidationScope};
use crate::domain::tester::{join_errors, Tester, TesterContext};
use crate::domain::testers::{
    default_namespace, delete_load_balancer, elb_target, fetch_until, record,
};
use crate::infrastructure::constants::{
    DEFAULT_MINIMUM_NODES, HELM_INSTALL_TIMEOUT, HTML_CHECK_TIMEOUT, INGRESS_POLL_INTERVAL,
    INGRESS_WAIT_TIMEOUT,
};
use crate::infrastructure::helm::HelmRelease;
use crate::shared::{ConfigError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "wordpress";

const CHART_REPO_NAME: &str = "bitnami";
const CHART_REPO_URL: &str = "https://charts.bitnami.com/bitnami";
const CHART_NAME: &str = "wordpress";
const SERVICE_NAME: &str = "wordpress";
const FIRST_POST_MARKER: &str = "<p>Welcome to WordPress. This is your first post";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WordpressConfig {
    pub enable: bool,
    pub minimum_nodes: usize,
    pub namespace: String,

    pub partition: String,
    pub region: String,
    pub account_id: String,

    pub user_name: String,
    pub password: String,

    pub elb_name: String,
    pub elb_arn: String,
    pub elb_url: String,
}

impl Default for WordpressConfig {
    fn default() -> Self {
        Self {
            enable: false,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            namespace: default_namespace(NAME),
            partition: "aws".to_string(),
            region: "us-west-2".to_string(),
            account_id: String::new(),
            user_name: "foo".to_string(),
            password: "bar".to_string(),
            elb_name: String::new(),
            elb_arn: String::new(),
            elb_url: String::new(),
        }
    }
}

impl AddOnConfig for WordpressConfig {
    const SCHEMA: &'static [FieldSchema] = &[
        ENABLE,
        MINIMUM_NODES,
        NAMESPACE,
        FieldSchema::new("partition", FieldKind::Str, "AWS partition"),
        FieldSchema::new("region", FieldKind::Str, "AWS region"),
        FieldSchema::read_only("account_id", FieldKind::Str, "AWS account id"),
        FieldSchema::new("user_name", FieldKind::Str, "WordPress admin user"),
        FieldSchema::new("password", FieldKind::Str, "WordPress admin password"),
        FieldSchema::read_only("elb_name", FieldKind::Str, "ELB name"),
        FieldSchema::read_only("elb_arn", FieldKind::Str, "ELB ARN"),
        FieldSchema::read_only("elb_url", FieldKind::Str, "ELB URL"),
    ];

    fn enable(&self) -> bool {
        self.enable
    }

    fn validate_and_set_defaults(&mut self, scope: &ValidationScope<'_>) -> Result<()> {
        validate_common(scope.add_on, &self.namespace, &mut self.minimum_nodes)?;
        if self.user_name.is_empty() || self.password.is_empty() {
            return Err(ConfigError::MissingRequired(format!(
                "add_on {} user_name and password",
                scope.add_on
            ))
            .into());
        }
        if self.partition.is_empty() {
            self.partition = "aws".to_string();
        }
        Ok(())
    }
}

/// Chart values: persistence on gp2 for both WordPress and MariaDB.
fn chart_values(cfg: &WordpressConfig) -> serde_json::Value {
    json!({
        "wordpressUsername": cfg.user_name,
        "wordpressPassword": cfg.password,
        "persistence": {
            "enabled": true,
            "storageClassName": "gp2",
        },
        "mariadb": {
            "enabled": true,
            "rootUser": {
                "password": cfg.password,
                "forcePassword": false,
            },
            "db": {
                "name": "wordpress",
                "user": cfg.user_name,
                "password": cfg.password,
            },
            "master": {
                "persistence": {
                    "enabled": true,
                    "storageClassName": "gp2",
                },
            },
        },
    })
}

pub struct WordpressTester {
    cfg: WordpressConfig,
    ctx: TesterContext,
}

impl WordpressTester {
    pub fn new(cfg: WordpressConfig, ctx: TesterContext) -> Self {
        Self { cfg, ctx }
    }

    fn release(&self) -> HelmRelease {
        HelmRelease::new(
            &self.cfg.namespace,
            CHART_REPO_NAME,
            CHART_REPO_URL,
            CHART_NAME,
            CHART_NAME,
        )
        .values(chart_values(&self.cfg))
        .timeout(HELM_INSTALL_TIMEOUT)
        .observer(Arc::new(self.ctx.observer().get_all(&self.cfg.namespace)))
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
        self.cfg.elb_name = lb.name;
        self.cfg.elb_arn = lb.arn;
        self.cfg.elb_url = lb.url;
        Ok(())
    }

    fn log_summary(&self) {
        self.ctx.log_writer.write_str(&format!(
            "\nNLB wordpress ARN: {}\nNLB wordpress name: {}\nNLB wordpress URL: {}\nWordPress UserName: {}\nWordPress Password: {} characters\n\n",
            self.cfg.elb_arn,
            self.cfg.elb_name,
            self.cfg.elb_url,
            self.cfg.user_name,
            self.cfg.password.len()
        ));
    }
}

#[async_trait]
impl Tester for WordpressTester {
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
            .helm
            .add_update(CHART_REPO_NAME, CHART_REPO_URL)
            .await?;
        self.ctx.helm.install(&self.release()).await?;

        self.resolve_elb().await?;
        let res = fetch_until(
            &self.ctx,
            &self.cfg.elb_url,
            FIRST_POST_MARKER,
            HTML_CHECK_TIMEOUT,
            INGRESS_POLL_INTERVAL,
        )
        .await;
        self.log_summary();
        res?;
        info!(url = %self.cfg.elb_url, "wordpress is serving");
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.confirm("delete", &self.cfg.namespace).await?;

        let mut errors = Vec::new();
        if self.cfg.elb_arn.is_empty() {
            match self.resolve_elb().await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => info!(error = %e, "no ELB found for wordpress; maybe already deleted"),
            }
        }
        record(
            &mut errors,
            "failed to delete ELB",
            delete_load_balancer(&self.ctx, &self.cfg.elb_arn).await,
        );
        record(
            &mut errors,
            "failed to uninstall wordpress chart",
            self.ctx.helm.uninstall(&self.release()).await,
        );
        record(
            &mut errors,
            "failed to delete namespace",
            self.ctx.delete_namespace(&self.cfg.namespace).await,
        );
        join_errors(errors)
    }

    fn write_back(&self, config: &mut Config) {
        let out = &mut config.add_on_wordpress;
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
    fn test_chart_values_carry_credentials() {
        let cfg = WordpressConfig::default();
        let v = chart_values(&cfg);
        assert_eq!(v["wordpressUsername"], "foo");
        assert_eq!(v["mariadb"]["db"]["password"], "bar");
        assert_eq!(v["persistence"]["storageClassName"], "gp2");
    }

    #[test]
    fn test_credentials_required() {
        let scope = ValidationScope {
            add_on: NAME,
            cluster_name: "demo",
        };
        let mut cfg = WordpressConfig::default();
        cfg.validate_and_set_defaults(&scope).unwrap();
        cfg.password.clear();
        assert!(cfg.validate_and_set_defaults(&scope).is_err());
    }
}
