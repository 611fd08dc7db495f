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

//! One module per add-on, plus the helpers they share.

pub mod cloudwatch_agent;
pub mod clusterloader;
pub mod conformance;
pub mod csi_ebs;
pub mod fluent_bit;
pub mod jobs_echo;
pub mod jobs_pi;
pub mod kubernetes_dashboard;
pub mod metrics_server;
pub mod nlb_hello_world;
pub mod stress;
pub mod wordpress;

use crate::domain::tester::TesterContext;
use crate::infrastructure::constants::LABEL_APP_NAME;
use crate::infrastructure::kubernetes::{Check, ElbTarget, Observer, WaitSpec};
use crate::shared::{Result, TesterError};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// `<add-on>-<10 random lower-case chars>`, so repeated runs do not collide.
pub fn default_namespace(add_on: &str) -> String {
    format!("{}-{}", add_on, random_suffix(10))
}

pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_APP_NAME.to_string(), app.to_string())])
}

pub fn object_meta(namespace: &str, name: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(app_labels(app)),
        ..Default::default()
    }
}

/// GET `url` until the body contains `marker`. Every body read is copied to
/// the log writer; transport errors are retried until the budget runs out.
pub async fn fetch_until(
    ctx: &TesterContext,
    url: &str,
    marker: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<String> {
    let spec = WaitSpec::custom(&format!("GET {}", url), timeout, interval);
    ctx.poller()
        .wait(&spec, None, || async {
            let body = match ctx.http.get(url).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => body,
                    Err(e) => return Ok(Check::Pending(e.to_string())),
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "HTTP request failed; retrying");
                    return Ok(Check::Pending(e.to_string()));
                }
            };
            ctx.log_writer.section(&format!("GET {}", url), &body);
            if body.contains(marker) {
                Ok(Check::Done(body))
            } else {
                Ok(Check::Pending(format!("response does not contain {:?}", marker)))
            }
        })
        .await
}

/// Run kubectl until its output contains `marker`.
pub async fn kubectl_until(
    ctx: &TesterContext,
    args: &[String],
    marker: &str,
    timeout: Duration,
    interval: Duration,
    observer: Option<&dyn Observer>,
) -> Result<String> {
    let line = ctx.kubectl.command_line(args);
    let spec = WaitSpec::custom(&line, timeout, interval);
    ctx.poller()
        .wait(&spec, observer, || async {
            match ctx.kubectl.run(args, ctx.client_timeout).await {
                Ok(out) => {
                    ctx.log_writer.section(&line, &out);
                    if out.contains(marker) {
                        Ok(Check::Done(out))
                    } else {
                        Ok(Check::Pending(format!("output does not contain {:?}", marker)))
                    }
                }
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    warn!(command = %line, error = %e, "kubectl failed; retrying");
                    Ok(Check::Pending(e.to_string()))
                }
            }
        })
        .await
}

/// Wait for a pod to terminate and return its logs. A failed pod is an error.
pub async fn wait_pod_logs(
    ctx: &TesterContext,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<String> {
    let spec = WaitSpec::custom(
        &format!("Pod '{}/{}' completion", namespace, name),
        timeout,
        Duration::from_secs(5),
    )
    .tolerate_missing();
    let phase = ctx
        .poller()
        .wait(&spec, None, || async {
            let pod: Pod = ctx.client.get_pod(namespace, name).await?;
            let phase = pod
                .status
                .and_then(|s| s.phase)
                .unwrap_or_else(|| "Unknown".to_string());
            match phase.as_str() {
                "Succeeded" | "Failed" => Ok(Check::Done(phase)),
                other => Ok(Check::Pending(format!("phase {}", other))),
            }
        })
        .await?;
    let logs = ctx.client.pod_logs(namespace, name, None).await?;
    ctx.log_writer
        .section(&format!("Pod '{}/{}' logs", namespace, name), &logs);
    if phase == "Failed" {
        return Err(TesterError::assertion(format!(
            "Pod '{}/{}' failed",
            namespace, name
        )));
    }
    info!(namespace = %namespace, pod = %name, "pod completed");
    Ok(logs)
}

/// Where the add-on's load balancer lives. A missing account id is looked up
/// through the load-balancer collaborator and stored back into `account_id`.
pub async fn elb_target(
    ctx: &TesterContext,
    partition: &str,
    region: &str,
    account_id: &mut String,
) -> ElbTarget {
    if account_id.is_empty() {
        match ctx.load_balancers.account_id().await {
            Ok(id) => *account_id = id,
            Err(e) => warn!(error = %e, "failed to look up AWS account id; ELB ARN will be incomplete"),
        }
    }
    ElbTarget {
        partition: partition.to_string(),
        region: region.to_string(),
        account_id: account_id.clone(),
    }
}

/// Delete the ELB behind a `LoadBalancer` Service. An unknown ARN is skipped.
pub async fn delete_load_balancer(ctx: &TesterContext, arn: &str) -> Result<()> {
    if arn.is_empty() {
        info!("no ELB ARN recorded; skipping ELB deletion");
        return Ok(());
    }
    ctx.load_balancers.delete(arn).await
}

/// Keep a failed teardown step as `"<what> (<error>)"`. NotFound counts as done.
pub fn record(errors: &mut Vec<String>, what: &str, res: Result<()>) {
    match res {
        Ok(()) => {}
        Err(e) if e.is_not_found_or_gone() => {}
        Err(e) => {
            warn!(step = %what, error = %e, "delete step failed");
            errors.push(format!("{} ({})", what, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace_is_lower_case_and_unique() {
        let a = default_namespace("fluent-bit");
        let b = default_namespace("fluent-bit");
        assert!(a.starts_with("fluent-bit-"));
        assert_eq!(a.len(), "fluent-bit-".len() + 10);
        assert_eq!(a, a.to_lowercase());
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_skips_not_found() {
        let mut errors = Vec::new();
        record(&mut errors, "a", Ok(()));
        record(
            &mut errors,
            "b",
            Err(TesterError::not_found("Pod", "ns", "x")),
        );
        record(&mut errors, "c", Err(TesterError::assertion("boom")));
        assert_eq!(errors, vec!["c (Assertion failed: boom)".to_string()]);
    }
}
