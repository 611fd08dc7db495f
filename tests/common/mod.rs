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

//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_addon_tester::domain::tester::{Tester, TesterContext};
use k8s_addon_tester::infrastructure::elb::LoadBalancers;
use k8s_addon_tester::infrastructure::helm::{Helm, HelmRelease};
use k8s_addon_tester::infrastructure::kubectl::Kubectl;
use k8s_addon_tester::infrastructure::kubernetes::{
    Check, ElbTarget, KubeClient, LoadBalancerRef, NamespaceDeletion, ObjectKind, WaitSpec,
};
use k8s_addon_tester::infrastructure::logging::LogWriter;
use k8s_addon_tester::shared::{CancelScope, Result, TesterError};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, DeploymentStatus};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Node, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus,
    PersistentVolumeSpec, Pod, Secret, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn api_error(code: u16, reason: &str, message: &str) -> TesterError {
    TesterError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

pub fn ready_deployment(name: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            ready_replicas: Some(replicas),
            updated_replicas: Some(replicas),
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeState {
    pub nodes: usize,
    pub deployments: BTreeMap<(String, String), Deployment>,
    pub pods: BTreeMap<(String, String), Pod>,
    pub pvcs: BTreeMap<(String, String), PersistentVolumeClaim>,
    pub pvs: BTreeMap<String, PersistentVolume>,
    pub namespaces: BTreeSet<String>,
    /// Every mutating call, e.g. `delete Deployment kube-system/metrics-server`.
    pub calls: Vec<String>,
    /// `delete_object` fails for these object names.
    pub failing_deletes: BTreeSet<String>,
    /// The next this-many `replace_pod` calls fail with a write conflict.
    pub replace_conflicts: usize,
}

/// A cluster kept in memory. Objects not seeded are NotFound.
#[derive(Clone, Default)]
pub struct FakeClient {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    pub fn with_nodes(nodes: usize) -> Self {
        let c = Self::default();
        c.state.lock().unwrap().nodes = nodes;
        c
    }

    pub fn put_deployment(&self, namespace: &str, dp: Deployment) {
        let name = dp.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert((namespace.to_string(), name), dp);
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl KubeClient for FakeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let n = self.state.lock().unwrap().nodes;
        Ok((0..n)
            .map(|i| Node {
                metadata: ObjectMeta {
                    name: Some(format!("node-{}", i)),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.record(format!("create Namespace {}", name));
        self.state.lock().unwrap().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace_and_wait(&self, name: &str, _opts: &NamespaceDeletion) -> Result<()> {
        self.record(format!("delete Namespace {}", name));
        self.state.lock().unwrap().namespaces.remove(name);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TesterError::not_found("Deployment", name, namespace))
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        Err(TesterError::not_found("DaemonSet", name, namespace))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        Err(TesterError::not_found("Job", name, namespace))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        Err(TesterError::not_found("Service", name, namespace))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TesterError::not_found("Pod", name, namespace))
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.state
            .lock()
            .unwrap()
            .pvcs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TesterError::not_found("PersistentVolumeClaim", name, namespace))
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        self.state
            .lock()
            .unwrap()
            .pvs
            .get(name)
            .cloned()
            .ok_or_else(|| TesterError::not_found("PersistentVolume", name, ""))
    }

    async fn list_pods(&self, namespace: &str, limit: Option<u32>) -> Result<Vec<Pod>> {
        let pods: Vec<Pod> = self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect();
        Ok(match limit {
            Some(l) => pods.into_iter().take(l as usize).collect(),
            None => pods,
        })
    }

    async fn list_secrets(&self, _namespace: &str) -> Result<Vec<Secret>> {
        Ok(Vec::new())
    }

    async fn pod_logs(&self, _namespace: &str, _name: &str, _tail_lines: Option<i64>) -> Result<String> {
        Ok(String::new())
    }

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.record(format!(
            "apply Deployment {}/{}",
            namespace,
            deployment.metadata.name.clone().unwrap_or_default()
        ));
        Ok(())
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<()> {
        self.record(format!(
            "apply Service {}/{}",
            namespace,
            service.metadata.name.clone().unwrap_or_default()
        ));
        Ok(())
    }

    async fn apply_storage_class(&self, class: &StorageClass) -> Result<()> {
        self.record(format!(
            "apply StorageClass {}",
            class.metadata.name.clone().unwrap_or_default()
        ));
        Ok(())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        self.record(format!(
            "create Job {}/{}",
            namespace,
            job.metadata.name.clone().unwrap_or_default()
        ));
        Ok(())
    }

    async fn create_cronjob(&self, namespace: &str, cronjob: &CronJob) -> Result<()> {
        self.record(format!(
            "create CronJob {}/{}",
            namespace,
            cronjob.metadata.name.clone().unwrap_or_default()
        ));
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if state.pods.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", &format!("pods {:?} already exists", name)));
        }
        state.pods.insert(key, pod.clone());
        state.calls.push(format!("create Pod {}/{}", namespace, name));
        Ok(())
    }

    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if state.replace_conflicts > 0 {
            state.replace_conflicts -= 1;
            return Err(api_error(
                409,
                "Conflict",
                &format!("the object has been modified; pod {:?}", name),
            ));
        }
        state.pods.insert((namespace.to_string(), name.clone()), pod.clone());
        state.calls.push(format!("replace Pod {}/{}", namespace, name));
        Ok(())
    }

    /// Binds the claim right away to a volume of the requested size.
    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        let volume = format!("pvc-{}", name);
        let size = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .cloned()
            .unwrap_or_else(|| Quantity("1Gi".to_string()));

        let mut bound = pvc.clone();
        if let Some(spec) = bound.spec.as_mut() {
            spec.volume_name = Some(volume.clone());
        }
        bound.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(volume.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                capacity: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut state = self.state.lock().unwrap();
        state.pvcs.insert((namespace.to_string(), name.clone()), bound);
        state.pvs.insert(volume, pv);
        state
            .calls
            .push(format!("create PersistentVolumeClaim {}/{}", namespace, name));
        Ok(())
    }

    /// Grows the bound volume immediately.
    async fn resize_pvc(&self, namespace: &str, name: &str, storage: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let volume = state
            .pvcs
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|c| c.spec.as_ref())
            .and_then(|s| s.volume_name.clone());
        if let Some(pv) = volume.and_then(|v| state.pvs.get_mut(&v)) {
            if let Some(spec) = pv.spec.as_mut() {
                spec.capacity = Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.to_string()),
                )]));
            }
        }
        state.calls.push(format!(
            "resize PersistentVolumeClaim {}/{} {}",
            namespace, name, storage
        ));
        Ok(())
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete {} {}/{}", kind, namespace, name));
        if self.state.lock().unwrap().failing_deletes.contains(name) {
            return Err(api_error(500, "InternalError", "etcdserver: request timed out"));
        }
        Ok(())
    }

    async fn wait_for_service_ingress(
        &self,
        namespace: &str,
        name: &str,
        _target: &ElbTarget,
        _timeout: Duration,
    ) -> Result<LoadBalancerRef> {
        Err(TesterError::IngressTimeout {
            namespace: namespace.to_string(),
            service: name.to_string(),
        })
    }
}

/// Answers by the first rule whose needle appears in the joined arguments.
#[derive(Clone, Default)]
pub struct FakeKubectl {
    pub rules: Arc<Mutex<Vec<(String, String)>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeKubectl {
    pub fn reply(self, needle: &str, output: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), output.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Kubectl for FakeKubectl {
    async fn run(&self, args: &[String], _timeout: Duration) -> Result<String> {
        let line = args.join(" ");
        self.calls.lock().unwrap().push(line.clone());
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("kubectl {}", args.join(" "))
    }
}

#[derive(Default)]
pub struct FakeHelm;

#[async_trait]
impl Helm for FakeHelm {
    async fn add_update(&self, _repo_name: &str, _repo_url: &str) -> Result<()> {
        Ok(())
    }

    async fn install(&self, _release: &HelmRelease) -> Result<()> {
        Ok(())
    }

    async fn uninstall(&self, _release: &HelmRelease) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLoadBalancers;

#[async_trait]
impl LoadBalancers for FakeLoadBalancers {
    async fn delete(&self, _arn: &str) -> Result<()> {
        Ok(())
    }

    async fn account_id(&self) -> Result<String> {
        Ok("123456789012".to_string())
    }
}

pub fn context(client: FakeClient, kubectl: FakeKubectl, cancel: CancelScope) -> TesterContext {
    TesterContext {
        client: Arc::new(client),
        kubectl: Arc::new(kubectl),
        helm: Arc::new(FakeHelm),
        load_balancers: Arc::new(FakeLoadBalancers),
        http: reqwest::Client::new(),
        log_writer: LogWriter::memory(),
        cancel,
        prompt: None,
        client_timeout: Duration::from_secs(15),
        kubeconfig_path: String::new(),
        kubeconfig_context: String::new(),
        kubectl_path: "kubectl".to_string(),
    }
}

/// What a [`ScriptedTester`] should do when called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Script {
    Ok,
    Fail,
}

/// A tester that only records its calls into a shared journal.
pub struct ScriptedTester {
    pub name: String,
    pub enabled: bool,
    pub apply: Script,
    pub delete: Script,
    pub journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTester {
    pub fn boxed(
        name: &str,
        enabled: bool,
        apply: Script,
        delete: Script,
        journal: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn Tester> {
        Box::new(Self {
            name: name.to_string(),
            enabled,
            apply,
            delete,
            journal: journal.clone(),
        })
    }
}

#[async_trait]
impl Tester for ScriptedTester {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn apply(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("apply {}", self.name));
        match self.apply {
            Script::Ok => Ok(()),
            Script::Fail => Err(TesterError::assertion(format!("{} is broken", self.name))),
        }
    }

    async fn delete(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("delete {}", self.name));
        match self.delete {
            Script::Ok => Ok(()),
            Script::Fail => Err(TesterError::assertion(format!("{} refused to go", self.name))),
        }
    }
}

/// A tester whose `apply` polls a predicate that never holds and whose
/// `delete` sleeps on the same poller, so both go through the cancel scope.
pub struct WaitingTester {
    pub name: String,
    pub ctx: TesterContext,
    pub journal: Arc<Mutex<Vec<String>>>,
}

impl WaitingTester {
    pub fn boxed(name: &str, ctx: &TesterContext, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn Tester> {
        Box::new(Self {
            name: name.to_string(),
            ctx: ctx.clone(),
            journal: journal.clone(),
        })
    }
}

#[async_trait]
impl Tester for WaitingTester {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn apply(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("apply {}", self.name));
        let spec = WaitSpec::custom(
            &format!("{} readiness", self.name),
            Duration::from_secs(10 * 60),
            Duration::from_secs(5),
        );
        self.ctx
            .poller()
            .wait(&spec, None, || async {
                Ok(Check::<()>::Pending("not ready".to_string()))
            })
            .await
    }

    async fn delete(&mut self) -> Result<()> {
        self.ctx.poller().sleep(Duration::from_secs(1)).await?;
        self.ctx
            .client
            .delete_namespace_and_wait(&self.name, &NamespaceDeletion::default())
            .await?;
        self.journal.lock().unwrap().push(format!("delete {}", self.name));
        Ok(())
    }
}
