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

//! The add-on table. Position in [`REGISTRY`] is the apply order; delete
//! walks it backwards. Observability goes first so later add-ons' logs are
//! captured, workload generators go last.

use crate::domain::config::schema::{add_on_env_prefix, FieldSchema};
use crate::domain::config::{AddOnConfig, AddOnSection, Config};
use crate::domain::tester::{Tester, TesterContext};
use crate::domain::testers::jobs_echo::JobType;
use crate::domain::testers::{
    cloudwatch_agent::{self, CloudwatchAgentConfig, CloudwatchAgentTester},
    clusterloader::{self, ClusterloaderConfig, ClusterloaderTester},
    conformance::{self, ConformanceConfig, ConformanceTester},
    csi_ebs::{self, CsiEbsConfig, CsiEbsTester},
    fluent_bit::{self, FluentBitConfig, FluentBitTester},
    jobs_echo::{self, JobsEchoConfig, JobsEchoTester},
    jobs_pi::{self, JobsPiConfig, JobsPiTester},
    kubernetes_dashboard::{self, KubernetesDashboardConfig, KubernetesDashboardTester},
    metrics_server::{self, MetricsServerConfig, MetricsServerTester},
    nlb_hello_world::{self, NlbHelloWorldConfig, NlbHelloWorldTester},
    stress::{self, StressConfig, StressTester},
    wordpress::{self, WordpressConfig, WordpressTester},
};
use crate::infrastructure::constants::ENV_PREFIX;

pub struct AddOn {
    pub name: &'static str,
    pub schema: &'static [FieldSchema],
    pub section: fn(&Config) -> &dyn AddOnSection,
    pub section_mut: fn(&mut Config) -> &mut dyn AddOnSection,
    pub build: fn(&Config, &TesterContext) -> Box<dyn Tester>,
}

impl AddOn {
    /// e.g. `K8S_TESTER_ADD_ON_METRICS_SERVER_`.
    pub fn env_prefix(&self) -> String {
        add_on_env_prefix(ENV_PREFIX, self.name)
    }
}

pub static REGISTRY: [AddOn; 13] = [
    AddOn {
        name: cloudwatch_agent::NAME,
        schema: CloudwatchAgentConfig::SCHEMA,
        section: |c| &c.add_on_cloudwatch_agent,
        section_mut: |c| &mut c.add_on_cloudwatch_agent,
        build: |c, ctx| {
            Box::new(CloudwatchAgentTester::new(
                c.add_on_cloudwatch_agent.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: metrics_server::NAME,
        schema: MetricsServerConfig::SCHEMA,
        section: |c| &c.add_on_metrics_server,
        section_mut: |c| &mut c.add_on_metrics_server,
        build: |c, ctx| {
            Box::new(MetricsServerTester::new(
                c.add_on_metrics_server.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: fluent_bit::NAME,
        schema: FluentBitConfig::SCHEMA,
        section: |c| &c.add_on_fluent_bit,
        section_mut: |c| &mut c.add_on_fluent_bit,
        build: |c, ctx| Box::new(FluentBitTester::new(c.add_on_fluent_bit.clone(), ctx.clone())),
    },
    AddOn {
        name: conformance::NAME,
        schema: ConformanceConfig::SCHEMA,
        section: |c| &c.add_on_conformance,
        section_mut: |c| &mut c.add_on_conformance,
        build: |c, ctx| {
            Box::new(ConformanceTester::new(
                c.add_on_conformance.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: csi_ebs::NAME,
        schema: CsiEbsConfig::SCHEMA,
        section: |c| &c.add_on_csi_ebs,
        section_mut: |c| &mut c.add_on_csi_ebs,
        build: |c, ctx| Box::new(CsiEbsTester::new(c.add_on_csi_ebs.clone(), ctx.clone())),
    },
    AddOn {
        name: kubernetes_dashboard::NAME,
        schema: KubernetesDashboardConfig::SCHEMA,
        section: |c| &c.add_on_kubernetes_dashboard,
        section_mut: |c| &mut c.add_on_kubernetes_dashboard,
        build: |c, ctx| {
            Box::new(KubernetesDashboardTester::new(
                c.add_on_kubernetes_dashboard.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: nlb_hello_world::NAME,
        schema: NlbHelloWorldConfig::SCHEMA,
        section: |c| &c.add_on_nlb_hello_world,
        section_mut: |c| &mut c.add_on_nlb_hello_world,
        build: |c, ctx| {
            Box::new(NlbHelloWorldTester::new(
                c.add_on_nlb_hello_world.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: wordpress::NAME,
        schema: WordpressConfig::SCHEMA,
        section: |c| &c.add_on_wordpress,
        section_mut: |c| &mut c.add_on_wordpress,
        build: |c, ctx| Box::new(WordpressTester::new(c.add_on_wordpress.clone(), ctx.clone())),
    },
    AddOn {
        name: jobs_pi::NAME,
        schema: JobsPiConfig::SCHEMA,
        section: |c| &c.add_on_jobs_pi,
        section_mut: |c| &mut c.add_on_jobs_pi,
        build: |c, ctx| Box::new(JobsPiTester::new(c.add_on_jobs_pi.clone(), ctx.clone())),
    },
    AddOn {
        name: jobs_echo::NAME,
        schema: JobsEchoConfig::SCHEMA,
        section: |c| &c.add_on_jobs_echo,
        section_mut: |c| &mut c.add_on_jobs_echo,
        build: |c, ctx| {
            let mut cfg = c.add_on_jobs_echo.clone();
            cfg.job_type = JobType::Job;
            Box::new(JobsEchoTester::new(cfg, ctx.clone()))
        },
    },
    AddOn {
        name: jobs_echo::CRON_NAME,
        schema: JobsEchoConfig::SCHEMA,
        section: |c| &c.add_on_cron_jobs_echo,
        section_mut: |c| &mut c.add_on_cron_jobs_echo,
        build: |c, ctx| {
            let mut cfg = c.add_on_cron_jobs_echo.clone();
            cfg.job_type = JobType::CronJob;
            Box::new(JobsEchoTester::new(cfg, ctx.clone()))
        },
    },
    AddOn {
        name: clusterloader::NAME,
        schema: ClusterloaderConfig::SCHEMA,
        section: |c| &c.add_on_clusterloader,
        section_mut: |c| &mut c.add_on_clusterloader,
        build: |c, ctx| {
            Box::new(ClusterloaderTester::new(
                c.add_on_clusterloader.clone(),
                ctx.clone(),
            ))
        },
    },
    AddOn {
        name: stress::NAME,
        schema: StressConfig::SCHEMA,
        section: |c| &c.add_on_stress,
        section_mut: |c| &mut c.add_on_stress,
        build: |c, ctx| Box::new(StressTester::new(c.add_on_stress.clone(), ctx.clone())),
    },
];

pub fn find(name: &str) -> Option<&'static AddOn> {
    REGISTRY.iter().find(|a| a.name == name)
}

pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|a| a.name).collect()
}

/// Every registered tester in apply order, enabled or not.
pub fn build_all(config: &Config, ctx: &TesterContext) -> Vec<Box<dyn Tester>> {
    REGISTRY.iter().map(|a| (a.build)(config, ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        assert_eq!(
            names(),
            vec![
                "cloudwatch-agent",
                "metrics-server",
                "fluent-bit",
                "conformance",
                "csi-ebs",
                "kubernetes-dashboard",
                "nlb-hello-world",
                "wordpress",
                "jobs-pi",
                "jobs-echo",
                "cron-jobs-echo",
                "clusterloader",
                "stress",
            ]
        );
    }

    #[test]
    fn test_names_are_unique_and_prefixes_derived() {
        let mut seen = std::collections::BTreeSet::new();
        for a in REGISTRY.iter() {
            assert!(seen.insert(a.name), "duplicate {}", a.name);
        }
        assert_eq!(
            find("cron-jobs-echo").map(|a| a.env_prefix()),
            Some("K8S_TESTER_ADD_ON_CRON_JOBS_ECHO_".to_string())
        );
        assert!(find("php-apache").is_none());
    }

    #[test]
    fn test_sections_point_at_their_own_fields() {
        let mut cfg = Config::default();
        cfg.add_on_cron_jobs_echo.enable = true;
        for a in REGISTRY.iter() {
            assert_eq!((a.section)(&cfg).enabled(), a.name == "cron-jobs-echo");
            assert_eq!((a.section)(&cfg).schema(), a.schema);
        }
    }
}
