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

use std::time::Duration;

/// Environment variable prefix for the root configuration
pub const ENV_PREFIX: &str = "K8S_TESTER_";
/// Config file suffix appended to the cluster name
pub const CONFIG_FILE_SUFFIX: &str = ".k8s-tester.yaml";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "k8s-addon-tester";

/// Client defaults
pub const DEFAULT_CLIENTS: u32 = 2;
pub const DEFAULT_CLIENT_QPS: f32 = 10.0;
pub const DEFAULT_CLIENT_BURST: u32 = 20;
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MINIMUM_NODES: usize = 1;

/// kubectl
pub const DEFAULT_KUBECTL_VERSION: &str = "v1.21.1";
pub const KUBECTL_READ_TIMEOUT: Duration = Duration::from_secs(15);
pub const KUBECTL_APPLY_WAIT: Duration = Duration::from_secs(5 * 60);
pub const KUBECTL_APPLY_TICK: Duration = Duration::from_secs(5);

/// Namespace deletion
pub const NAMESPACE_DELETION_INTERVAL: Duration = Duration::from_secs(10);
pub const NAMESPACE_DELETION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Readiness polling
pub const DEPLOYMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(7 * 60);
pub const DEPLOYMENT_INITIAL_WAIT: Duration = Duration::from_secs(60);
pub const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(20);
pub const JOB_WAIT_CAP: Duration = Duration::from_secs(3 * 60 * 60);

/// Service ingress
pub const INGRESS_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const INGRESS_WAIT_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const HTML_CHECK_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Helm
pub const HELM_INSTALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const HELM_QUERY_INTERVAL: Duration = Duration::from_secs(30);

/// API retries: 100ms initial, factor 3, six steps
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const RETRY_FACTOR: f32 = 3.0;
pub const RETRY_STEPS: usize = 6;

/// Object deletion
pub const DELETE_GRACE_PERIOD_SECONDS: u32 = 0;
pub const DELETE_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Labels
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_JOB_NAME: &str = "job-name";

/// Prompt choices
pub const PROMPT_CANCEL_ITEM: &str = "No, cancel it!";
