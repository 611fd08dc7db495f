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

use super::ingress::{ingress_hostname, ElbTarget, LoadBalancerRef};
use super::namespace::{delete_namespace, NamespaceDeletion, NamespaceOps};
use super::poller::{Check, Poller, WaitSpec};
use crate::infrastructure::constants::{
    DELETE_GRACE_PERIOD_SECONDS, FIELD_MANAGER, INGRESS_POLL_INTERVAL, RETRY_FACTOR,
    RETRY_INITIAL_DELAY, RETRY_STEPS,
};
use crate::shared::{CancelScope, ConfigError, Result, TesterError};
use backon::{ExponentialBuilder, Retryable};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
    ServiceAccount,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Objects the façade knows how to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Deployment,
    Service,
    Job,
    CronJob,
    Pod,
    PersistentVolumeClaim,
    StorageClass,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Shared Kubernetes access for every tester.
#[async_trait::async_trait]
pub trait KubeClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Idempotent; an existing namespace is not an error.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete and block until the namespace is gone. A missing namespace is success.
    async fn delete_namespace_and_wait(&self, name: &str, opts: &NamespaceDeletion) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<DaemonSet>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume>;

    async fn list_pods(&self, namespace: &str, limit: Option<u32>) -> Result<Vec<Pod>>;

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>>;

    async fn pod_logs(&self, namespace: &str, name: &str, tail_lines: Option<i64>) -> Result<String>;

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<()>;

    async fn apply_storage_class(&self, class: &StorageClass) -> Result<()>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()>;

    async fn create_cronjob(&self, namespace: &str, cronjob: &CronJob) -> Result<()>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()>;

    /// Patch `spec.resources.requests.storage`, e.g. `6Gi`.
    async fn resize_pvc(&self, namespace: &str, name: &str, storage: &str) -> Result<()>;

    /// Foreground propagation with a zero grace period. NotFound and Gone are success.
    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()>;

    /// Wait for `status.loadBalancer.ingress[0].hostname` to appear and resolve.
    async fn wait_for_service_ingress(
        &self,
        namespace: &str,
        name: &str,
        target: &ElbTarget,
        timeout: Duration,
    ) -> Result<LoadBalancerRef>;
}

pub fn retry_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(RETRY_INITIAL_DELAY)
        .with_factor(RETRY_FACTOR)
        .with_max_times(RETRY_STEPS)
        .with_jitter()
}

/// Retry `op` on retryable API errors.
pub async fn with_retry<T, F, Fut>(operation: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    op.retry(&retry_backoff())
        .when(|e: &TesterError| e.is_retryable())
        .notify(|e: &TesterError, d: Duration| {
            warn!(operation = %operation, error = %e, delay = ?d, "retrying API call");
        })
        .await
}

/// Whether `host` resolves to at least one address.
async fn resolves(host: &str) -> bool {
    match tokio::net::lookup_host((host, 80)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    }
}

fn not_found_ok(res: Result<()>) -> Result<()> {
    match res {
        Err(e) if e.is_not_found_or_gone() => Ok(()),
        other => other,
    }
}

pub struct KubeClientImpl {
    client: Client,
    poller: Poller,
}

impl KubeClientImpl {
    pub fn new(client: Client, cancel: CancelScope) -> Self {
        Self {
            client,
            poller: Poller::new(cancel),
        }
    }

    pub async fn new_with_config(
        kubeconfig_path: Option<String>,
        context: Option<String>,
        timeout: Duration,
        cancel: CancelScope,
    ) -> Result<Self> {
        use kube::config::{KubeConfigOptions, Kubeconfig};

        let kubeconfig = match kubeconfig_path {
            Some(path) => Kubeconfig::read_from(&path).map_err(|e| {
                ConfigError::InvalidField(format!("failed to load kubeconfig {}: {}", path, e))
            })?,
            None => Kubeconfig::read()
                .map_err(|e| ConfigError::InvalidField(format!("failed to load kubeconfig: {}", e)))?,
        };

        let config_options = KubeConfigOptions {
            context,
            cluster: None,
            user: None,
        };

        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &config_options)
            .await
            .map_err(|e| {
                ConfigError::InvalidField(format!("failed to create Kubernetes config: {}", e))
            })?;
        config.read_timeout = Some(timeout);
        config.write_timeout = Some(timeout);

        let client = Client::try_from(config)?;
        Ok(Self::new(client, cancel))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_namespaced<K>(&self, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        with_retry("get", || async { Ok(api.get(name).await?) }).await
    }

    async fn create_namespaced<K>(&self, namespace: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        api.create(&PostParams::default(), obj).await?;
        info!(namespace = %namespace, name = %obj.name_any(), "created object");
        Ok(())
    }

    /// Create on first apply, server-side apply afterwards.
    async fn apply_namespaced<K>(&self, namespace: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        let name = obj.meta().name.clone().ok_or_else(|| {
            TesterError::Config(ConfigError::MissingRequired("metadata.name".to_string()))
        })?;

        match api.get(&name).await {
            Ok(_) => {
                let patch_params = PatchParams::apply(FIELD_MANAGER).force();
                api.patch(&name, &patch_params, &Patch::Apply(obj)).await?;
                info!(namespace = %namespace, name = %name, "applied object");
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                api.create(&PostParams::default(), obj).await?;
                info!(namespace = %namespace, name = %name, "created object");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn delete_params() -> DeleteParams {
        DeleteParams {
            grace_period_seconds: Some(DELETE_GRACE_PERIOD_SECONDS),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        }
    }

    async fn delete_namespaced<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        let res = with_retry("delete", || async {
            api.delete(name, &Self::delete_params()).await?;
            Ok(())
        })
        .await;
        not_found_ok(res)
    }

    async fn delete_cluster_scoped<K>(&self, name: &str) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let res = with_retry("delete", || async {
            api.delete(name, &Self::delete_params()).await?;
            Ok(())
        })
        .await;
        not_found_ok(res)
    }

    /// Clear `metadata.finalizers` on every object of kind `K` in the namespace.
    async fn strip_finalizers<K>(&self, namespace: &str) -> Result<usize>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        let patch = serde_json::json!({ "metadata": { "finalizers": null } });
        let mut stripped = 0;
        for obj in api.list(&ListParams::default()).await?.items {
            if obj.finalizers().is_empty() {
                continue;
            }
            let name = obj.name_any();
            match api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => stripped += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => warn!(namespace = %namespace, name = %name, error = %e, "failed to strip finalizers"),
            }
        }
        Ok(stripped)
    }

    async fn residual_names<K>(&self, namespace: &str, kind: &str, out: &mut Vec<String>)
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced(namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => out.extend(list.items.iter().map(|o| format!("{}/{}", kind, o.name_any()))),
            Err(e) => warn!(namespace = %namespace, kind = %kind, error = %e, "failed to list residual objects"),
        }
    }

    async fn force_namespace_cleanup(&self, name: &str) -> Result<()> {
        let mut stripped = 0;
        stripped += self.strip_finalizers::<Pod>(name).await?;
        stripped += self.strip_finalizers::<PersistentVolumeClaim>(name).await?;
        stripped += self.strip_finalizers::<Service>(name).await?;
        stripped += self.strip_finalizers::<Deployment>(name).await?;
        stripped += self.strip_finalizers::<DaemonSet>(name).await?;
        stripped += self.strip_finalizers::<Job>(name).await?;
        stripped += self.strip_finalizers::<CronJob>(name).await?;
        stripped += self.strip_finalizers::<ConfigMap>(name).await?;
        stripped += self.strip_finalizers::<Secret>(name).await?;
        stripped += self.strip_finalizers::<ServiceAccount>(name).await?;

        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(mut ns) => {
                ns.metadata.finalizers = None;
                if let Some(spec) = ns.spec.as_mut() {
                    spec.finalizers = None;
                }
                let body = serde_json::to_vec(&ns)?;
                if let Err(e) = api
                    .replace_subresource("finalize", name, &PostParams::default(), body)
                    .await
                {
                    warn!(namespace = %name, error = %e, "failed to finalize namespace");
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        info!(namespace = %name, stripped, "stripped finalizers");
        Ok(())
    }

    async fn residuals(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.residual_names::<Pod>(name, "pod", &mut out).await;
        self.residual_names::<PersistentVolumeClaim>(name, "persistentvolumeclaim", &mut out)
            .await;
        self.residual_names::<Service>(name, "service", &mut out).await;
        self.residual_names::<Deployment>(name, "deployment", &mut out).await;
        self.residual_names::<DaemonSet>(name, "daemonset", &mut out).await;
        self.residual_names::<Job>(name, "job", &mut out).await;
        out
    }

    async fn wait_namespace_gone(&self, name: &str, opts: &NamespaceDeletion) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let spec = WaitSpec::custom(&format!("namespace '{}' deletion", name), opts.timeout, opts.interval);
        self.poller
            .wait(&spec, None, || async {
                match api.get(name).await {
                    Ok(ns) => {
                        let phase = ns
                            .status
                            .and_then(|s| s.phase)
                            .unwrap_or_else(|| "Unknown".to_string());
                        Ok(Check::Pending(format!("namespace phase {}", phase)))
                    }
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(Check::Done(())),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }
}

#[async_trait::async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        with_retry("list nodes", || async {
            Ok(api.list(&ListParams::default()).await?.items)
        })
        .await
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some([("name".to_string(), name.to_string())].into_iter().collect()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %name, "created namespace");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!(namespace = %name, "namespace already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_namespace_and_wait(&self, name: &str, opts: &NamespaceDeletion) -> Result<()> {
        delete_namespace(self, name, opts).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = self.namespaced(namespace);
        Ok(api.get(name).await?)
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        with_retry("get pv", || async { Ok(api.get(name).await?) }).await
    }

    async fn list_pods(&self, namespace: &str, limit: Option<u32>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = self.namespaced(namespace);
        let mut lp = ListParams::default();
        if let Some(limit) = limit {
            lp = lp.limit(limit);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        with_retry("list secrets", || async {
            Ok(api.list(&ListParams::default()).await?.items)
        })
        .await
    }

    async fn pod_logs(&self, namespace: &str, name: &str, tail_lines: Option<i64>) -> Result<String> {
        let api: Api<Pod> = self.namespaced(namespace);
        let lp = LogParams {
            tail_lines,
            ..Default::default()
        };
        Ok(api.logs(name, &lp).await?)
    }

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.apply_namespaced(namespace, deployment).await
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<()> {
        self.apply_namespaced(namespace, service).await
    }

    async fn apply_storage_class(&self, class: &StorageClass) -> Result<()> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let name = class.name_any();
        match api.create(&PostParams::default(), class).await {
            Ok(_) => info!(name = %name, "created storage class"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!(name = %name, "storage class already exists")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        self.create_namespaced(namespace, job).await
    }

    async fn create_cronjob(&self, namespace: &str, cronjob: &CronJob) -> Result<()> {
        self.create_namespaced(namespace, cronjob).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        self.create_namespaced(namespace, pod).await
    }

    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let api: Api<Pod> = self.namespaced(namespace);
        api.replace(&pod.name_any(), &PostParams::default(), pod).await?;
        Ok(())
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
        self.create_namespaced(namespace, pvc).await
    }

    async fn resize_pvc(&self, namespace: &str, name: &str, storage: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        let patch = serde_json::json!({
            "spec": { "resources": { "requests": { "storage": storage } } }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(namespace = %namespace, name = %name, storage = %storage, "resized PVC");
        Ok(())
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        info!(kind = %kind, namespace = %namespace, name = %name, "deleting object");
        match kind {
            ObjectKind::Deployment => self.delete_namespaced::<Deployment>(namespace, name).await,
            ObjectKind::Service => self.delete_namespaced::<Service>(namespace, name).await,
            ObjectKind::Job => self.delete_namespaced::<Job>(namespace, name).await,
            ObjectKind::CronJob => self.delete_namespaced::<CronJob>(namespace, name).await,
            ObjectKind::Pod => self.delete_namespaced::<Pod>(namespace, name).await,
            ObjectKind::PersistentVolumeClaim => {
                self.delete_namespaced::<PersistentVolumeClaim>(namespace, name)
                    .await
            }
            ObjectKind::StorageClass => self.delete_cluster_scoped::<StorageClass>(name).await,
        }
    }

    async fn wait_for_service_ingress(
        &self,
        namespace: &str,
        name: &str,
        target: &ElbTarget,
        timeout: Duration,
    ) -> Result<LoadBalancerRef> {
        let api: Api<Service> = self.namespaced(namespace);
        let spec = WaitSpec::custom(
            &format!("Service '{}/{}' ingress hostname", namespace, name),
            timeout,
            INGRESS_POLL_INTERVAL,
        )
        .tolerate_missing();

        let res = self
            .poller
            .wait(&spec, None, || async {
                let svc = api.get(name).await?;
                let host = match ingress_hostname(&svc) {
                    Some(h) => h,
                    None => return Ok(Check::Pending("no ingress hostname".to_string())),
                };
                if !resolves(&host).await {
                    return Ok(Check::Pending(format!("hostname {} not resolvable yet", host)));
                }
                info!(namespace = %namespace, service = %name, hostname = %host, "ingress hostname resolved");
                Ok(Check::Done(host))
            })
            .await;

        match res {
            Ok(host) => Ok(LoadBalancerRef::from_hostname(&host, target)),
            Err(TesterError::DeadlineExceeded { .. }) => Err(TesterError::IngressTimeout {
                namespace: namespace.to_string(),
                service: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl NamespaceOps for KubeClientImpl {
    async fn request_delete(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let res = with_retry("delete namespace", || async {
            api.delete(name, &Self::delete_params()).await?;
            Ok(())
        })
        .await;
        not_found_ok(res)
    }

    async fn wait_gone(&self, name: &str, opts: &NamespaceDeletion) -> Result<()> {
        self.wait_namespace_gone(name, opts).await
    }

    async fn force_cleanup(&self, name: &str) -> Result<()> {
        self.force_namespace_cleanup(name).await
    }

    async fn residual_objects(&self, name: &str) -> Vec<String> {
        self.residuals(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_hostnames() {
        assert!(resolves("localhost").await);
        assert!(!resolves("no-such-host.invalid").await);
    }

    #[test]
    fn test_not_found_is_success_for_deletes() {
        let gone = TesterError::not_found("Deployment", "x", "ns");
        assert!(not_found_ok(Err(gone)).is_ok());
        assert!(not_found_ok(Err(TesterError::Cancelled)).is_err());
    }
}
