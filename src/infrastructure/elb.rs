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

use crate::infrastructure::constants::DELETE_CALL_TIMEOUT;
use crate::infrastructure::process::run_command;
use crate::shared::{CancelScope, Result, TesterError};
use async_trait::async_trait;
use tracing::{info, warn};

/// Cloud-side load balancer operations.
#[async_trait]
pub trait LoadBalancers: Send + Sync {
    /// Delete by ARN. An already-deleted load balancer is not an error.
    async fn delete(&self, arn: &str) -> Result<()>;

    /// Account of the current credentials, needed to derive ELB ARNs.
    async fn account_id(&self) -> Result<String>;
}

/// Shells out to the `aws` CLI.
pub struct AwsCliLoadBalancers {
    region: String,
    cancel: CancelScope,
}

impl AwsCliLoadBalancers {
    pub fn new(region: &str, cancel: CancelScope) -> Self {
        Self {
            region: region.to_string(),
            cancel,
        }
    }
}

fn already_gone(output: &str) -> bool {
    output.contains("LoadBalancerNotFound") || output.contains("not found")
}

#[async_trait]
impl LoadBalancers for AwsCliLoadBalancers {
    async fn delete(&self, arn: &str) -> Result<()> {
        if arn.is_empty() {
            return Err(TesterError::assertion("empty ELB ARN"));
        }
        let mut args = vec![
            "elbv2".to_string(),
            "delete-load-balancer".to_string(),
            "--load-balancer-arn".to_string(),
            arn.to_string(),
        ];
        if !self.region.is_empty() {
            args.push("--region".to_string());
            args.push(self.region.clone());
        }
        info!(arn = %arn, "deleting load balancer");
        let out = run_command("aws", &args, DELETE_CALL_TIMEOUT, &self.cancel).await?;
        if out.success {
            info!(arn = %arn, "deleted load balancer");
            return Ok(());
        }
        if already_gone(&out.output) {
            warn!(arn = %arn, "load balancer already deleted");
            return Ok(());
        }
        Err(TesterError::command("aws elbv2 delete-load-balancer", out.output.trim()))
    }

    async fn account_id(&self) -> Result<String> {
        let args: Vec<String> = ["sts", "get-caller-identity", "--query", "Account", "--output", "text"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = run_command("aws", &args, DELETE_CALL_TIMEOUT, &self.cancel).await?;
        let account = out.output.trim().to_string();
        if !out.success || account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(TesterError::command("aws sts get-caller-identity", account));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_gone() {
        assert!(already_gone(
            "An error occurred (LoadBalancerNotFound) when calling the DeleteLoadBalancer operation"
        ));
        assert!(!already_gone("AccessDenied"));
    }

    #[tokio::test]
    async fn test_empty_arn_rejected() {
        let lb = AwsCliLoadBalancers::new("us-west-2", CancelScope::new());
        assert!(matches!(lb.delete("").await, Err(TesterError::Assertion(_))));
    }
}
