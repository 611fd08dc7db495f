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

use k8s_openapi::api::core::v1::Service;

/// Where the load balancer lives, needed to build its ARN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElbTarget {
    pub partition: String,
    pub region: String,
    pub account_id: String,
}

/// A network load balancer fronting a `LoadBalancer` Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRef {
    pub hostname: String,
    pub name: String,
    pub arn: String,
    pub url: String,
}

impl LoadBalancerRef {
    /// `a1b2-c3.elb.us-west-2.amazonaws.com` is named `a1b2`; its ARN ends
    /// in `net/a1b2/c3`.
    pub fn from_hostname(hostname: &str, target: &ElbTarget) -> Self {
        let name = hostname.split('-').next().unwrap_or_default().to_string();
        let label = hostname.split('.').next().unwrap_or_default().replace('-', "/");
        let partition = if target.partition.is_empty() {
            "aws"
        } else {
            target.partition.as_str()
        };
        let arn = format!(
            "arn:{}:elasticloadbalancing:{}:{}:loadbalancer/net/{}",
            partition, target.region, target.account_id, label
        );
        Self {
            hostname: hostname.to_string(),
            name,
            arn,
            url: format!("http://{}", hostname),
        }
    }
}

/// First ingress hostname of the Service, if assigned.
pub fn ingress_hostname(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ing| ing.first())
        .and_then(|i| i.hostname.clone())
        .filter(|h| !h.is_empty())
}
