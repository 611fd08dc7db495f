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

//! Namespace teardown: delete, wait for it to disappear, and strip
//! finalizers from whatever keeps it terminating.

use crate::infrastructure::constants::{NAMESPACE_DELETION_INTERVAL, NAMESPACE_DELETION_TIMEOUT};
use crate::shared::{Result, TesterError};
use std::time::Duration;
use tracing::{info, warn};

/// Namespace deletion budget.
#[derive(Debug, Clone)]
pub struct NamespaceDeletion {
    pub interval: Duration,
    pub timeout: Duration,
    /// Strip finalizers from everything left in the namespace once the
    /// first timeout expires, then wait one more timeout.
    pub force: bool,
}

impl Default for NamespaceDeletion {
    fn default() -> Self {
        Self {
            interval: NAMESPACE_DELETION_INTERVAL,
            timeout: NAMESPACE_DELETION_TIMEOUT,
            force: true,
        }
    }
}

/// The API calls namespace teardown is built from.
#[async_trait::async_trait]
pub trait NamespaceOps: Send + Sync {
    /// Issue the delete. A namespace that is already gone is not an error.
    async fn request_delete(&self, name: &str) -> Result<()>;

    /// Poll until the namespace is gone; `DeadlineExceeded` after `opts.timeout`.
    async fn wait_gone(&self, name: &str, opts: &NamespaceDeletion) -> Result<()>;

    /// Clear finalizers on the objects inside and on the namespace itself.
    async fn force_cleanup(&self, name: &str) -> Result<()>;

    /// `kind/name` of every object still in the namespace.
    async fn residual_objects(&self, name: &str) -> Vec<String>;
}

/// Delete `name` and wait for it. When the wait times out and `opts.force`
/// is set, strip finalizers and wait once more; a namespace that survives
/// that is `ForceDeleteIncomplete` with the objects still inside.
pub async fn delete_namespace<O>(ops: &O, name: &str, opts: &NamespaceDeletion) -> Result<()>
where
    O: NamespaceOps + ?Sized,
{
    ops.request_delete(name).await?;
    info!(namespace = %name, "deleting namespace");

    match ops.wait_gone(name, opts).await {
        Ok(()) => {
            info!(namespace = %name, "deleted namespace");
            Ok(())
        }
        Err(TesterError::DeadlineExceeded { .. }) if opts.force => {
            warn!(namespace = %name, "namespace stuck terminating; stripping finalizers");
            ops.force_cleanup(name).await?;
            match ops.wait_gone(name, opts).await {
                Ok(()) => {
                    info!(namespace = %name, "deleted namespace after stripping finalizers");
                    Ok(())
                }
                Err(TesterError::DeadlineExceeded { .. }) => Err(TesterError::ForceDeleteIncomplete {
                    namespace: name.to_string(),
                    residual: ops.residual_objects(name).await,
                }),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// A namespace store where `stuck` namespaces only disappear after
    /// `force_cleanup`, and `pinned` ones never do.
    #[derive(Default)]
    struct Namespaces {
        live: Mutex<BTreeMap<String, Vec<String>>>,
        stuck: Vec<String>,
        pinned: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl Namespaces {
        fn with(name: &str, objects: &[&str]) -> Self {
            let live = BTreeMap::from([(
                name.to_string(),
                objects.iter().map(|o| o.to_string()).collect(),
            )]);
            Self {
                live: Mutex::new(live),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl NamespaceOps for Namespaces {
        async fn request_delete(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", name));
            let mut live = self.live.lock().unwrap();
            if !self.stuck.iter().any(|s| s == name) && !self.pinned.iter().any(|s| s == name) {
                live.remove(name);
            }
            Ok(())
        }

        async fn wait_gone(&self, name: &str, _opts: &NamespaceDeletion) -> Result<()> {
            self.calls.lock().unwrap().push(format!("wait {}", name));
            if self.live.lock().unwrap().contains_key(name) {
                return Err(TesterError::deadline(
                    format!("namespace '{}' deletion", name),
                    "namespace phase Terminating",
                ));
            }
            Ok(())
        }

        async fn force_cleanup(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("force {}", name));
            if !self.pinned.iter().any(|s| s == name) {
                self.live.lock().unwrap().remove(name);
            }
            Ok(())
        }

        async fn residual_objects(&self, name: &str) -> Vec<String> {
            self.live.lock().unwrap().get(name).cloned().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_second_delete_ends_in_the_same_state() {
        let ops = Namespaces::with("demo", &[]);
        let opts = NamespaceDeletion::default();

        delete_namespace(&ops, "demo", &opts).await.unwrap();
        delete_namespace(&ops, "demo", &opts).await.unwrap();

        assert!(ops.live.lock().unwrap().is_empty());
        assert_eq!(ops.calls(), vec!["delete demo", "wait demo", "delete demo", "wait demo"]);
    }

    #[tokio::test]
    async fn test_stuck_namespace_is_force_cleaned() {
        let ops = Namespaces {
            stuck: vec!["demo".to_string()],
            ..Namespaces::with("demo", &["pod/x"])
        };
        delete_namespace(&ops, "demo", &NamespaceDeletion::default())
            .await
            .unwrap();
        assert_eq!(
            ops.calls(),
            vec!["delete demo", "wait demo", "force demo", "wait demo"]
        );
    }

    #[tokio::test]
    async fn test_force_delete_incomplete_lists_residuals() {
        let ops = Namespaces {
            pinned: vec!["demo".to_string()],
            ..Namespaces::with("demo", &["pod/x", "persistentvolumeclaim/data"])
        };
        let err = delete_namespace(&ops, "demo", &NamespaceDeletion::default())
            .await
            .unwrap_err();
        match err {
            TesterError::ForceDeleteIncomplete { namespace, residual } => {
                assert_eq!(namespace, "demo");
                assert_eq!(residual, vec!["pod/x", "persistentvolumeclaim/data"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_force_reports_the_deadline() {
        let ops = Namespaces {
            stuck: vec!["demo".to_string()],
            ..Namespaces::with("demo", &[])
        };
        let opts = NamespaceDeletion {
            force: false,
            ..Default::default()
        };
        let err = delete_namespace(&ops, "demo", &opts).await.unwrap_err();
        assert!(matches!(err, TesterError::DeadlineExceeded { .. }));
        assert!(!ops.calls().contains(&"force demo".to_string()));
    }
}
