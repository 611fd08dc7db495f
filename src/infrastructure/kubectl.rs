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

//! The `kubectl` collaborator.
//!
//! Output is never interpreted beyond simple substring checks; observers copy
//! it verbatim into the diagnostics log.

use crate::infrastructure::constants::{
    DEFAULT_KUBECTL_VERSION, KUBECTL_APPLY_TICK, KUBECTL_APPLY_WAIT, KUBECTL_READ_TIMEOUT,
};
use crate::infrastructure::installer::{ensure_binary, host_os_arch};
use crate::infrastructure::kubernetes::{Check, Observer, Poller, WaitSpec};
use crate::infrastructure::logging::LogWriter;
use crate::infrastructure::process::{render_command_line, run_checked};
use crate::shared::{CancelScope, Precondition, Result, TesterError};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn default_kubectl_download_url() -> String {
    let (os, arch) = host_os_arch();
    format!(
        "https://storage.googleapis.com/kubernetes-release/release/{}/bin/{}/{}/kubectl",
        DEFAULT_KUBECTL_VERSION, os, arch
    )
}

pub fn default_kubectl_path() -> String {
    format!("/tmp/kubectl-test-{}", DEFAULT_KUBECTL_VERSION)
}

#[async_trait]
pub trait Kubectl: Send + Sync {
    /// Run with kubeconfig and context flags prepended; a non-zero exit is an error.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<String>;

    /// Printable command line, for logs.
    fn command_line(&self, args: &[String]) -> String;

    /// Start `kubectl proxy` in the background on `port`.
    async fn proxy(&self, port: u16) -> Result<ProxyHandle> {
        Err(Precondition::MissingCollaborator(format!(
            "{} is not supported by this runner",
            self.command_line(&args(&["proxy", &format!("--port={}", port)]))
        ))
        .into())
    }
}

/// A running `kubectl proxy`. The process is killed when this is dropped.
#[derive(Debug)]
pub struct ProxyHandle {
    child: Option<tokio::process::Child>,
    pub port: u16,
}

impl ProxyHandle {
    pub async fn stop(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop kubectl proxy");
            }
        }
    }
}

pub struct KubectlCli {
    path: PathBuf,
    kubeconfig_path: String,
    context: String,
    cancel: CancelScope,
}

impl KubectlCli {
    pub fn new(path: impl Into<PathBuf>, kubeconfig_path: &str, context: &str, cancel: CancelScope) -> Self {
        Self {
            path: path.into(),
            kubeconfig_path: kubeconfig_path.to_string(),
            context: context.to_string(),
            cancel,
        }
    }

    /// Download kubectl to `path` unless already installed.
    pub async fn install(&self, download_url: &str) -> Result<()> {
        ensure_binary(&self.path, download_url, &self.cancel).await
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if !self.kubeconfig_path.is_empty() {
            full.push(format!("--kubeconfig={}", self.kubeconfig_path));
        }
        if !self.context.is_empty() {
            full.push(format!("--context={}", self.context));
        }
        full.extend(args.iter().cloned());
        full
    }
}

#[async_trait]
impl Kubectl for KubectlCli {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<String> {
        let program = self.path.to_string_lossy().to_string();
        run_checked(&program, &self.full_args(args), timeout, &self.cancel).await
    }

    fn command_line(&self, args: &[String]) -> String {
        render_command_line(&self.path.to_string_lossy(), &self.full_args(args))
    }

    async fn proxy(&self, port: u16) -> Result<ProxyHandle> {
        let proxy_args = self.full_args(&args(&["proxy", &format!("--port={}", port)]));
        let line = render_command_line(&self.path.to_string_lossy(), &proxy_args);
        let child = tokio::process::Command::new(&self.path)
            .args(&proxy_args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TesterError::command(&line, e.to_string()))?;
        info!(command = %line, pid = ?child.id(), "started kubectl proxy");
        Ok(ProxyHandle {
            child: Some(child),
            port,
        })
    }
}

pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn write_manifest(manifest: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("k8s-addon-tester-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(manifest.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// `kubectl apply -f` an embedded manifest, retried every 5s for up to 5m.
///
/// A run counts when its output mentions ` created`, ` configured` or
/// ` unchanged`, even if a later object in the file raced with a CRD.
pub async fn apply_manifest(
    kubectl: &dyn Kubectl,
    poller: &Poller,
    log_writer: &LogWriter,
    operation: &str,
    manifest: &str,
) -> Result<()> {
    let file = write_manifest(manifest)?;
    let apply_args = args(&["apply", "-f", &file.path().to_string_lossy()]);
    info!(operation = %operation, command = %kubectl.command_line(&apply_args), "applying manifest");

    let spec = WaitSpec::custom(operation, KUBECTL_APPLY_WAIT, KUBECTL_APPLY_TICK);
    poller
        .wait(&spec, None, || async {
            match kubectl.run(&apply_args, KUBECTL_READ_TIMEOUT).await {
                Ok(out) => {
                    log_writer.section(&kubectl.command_line(&apply_args), &out);
                    if out.contains(" created")
                        || out.contains(" configured")
                        || out.contains(" unchanged")
                    {
                        Ok(Check::Done(()))
                    } else {
                        Ok(Check::Pending(out.trim().to_string()))
                    }
                }
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    warn!(operation = %operation, error = %e, "kubectl apply failed; retrying");
                    Ok(Check::Pending(e.to_string()))
                }
            }
        })
        .await?;
    info!(operation = %operation, "applied manifest");
    Ok(())
}

/// `kubectl delete -f` an embedded manifest; missing objects are ignored.
pub async fn delete_manifest(
    kubectl: &dyn Kubectl,
    log_writer: &LogWriter,
    manifest: &str,
    timeout: Duration,
) -> Result<()> {
    let file = write_manifest(manifest)?;
    let delete_args = args(&[
        "delete",
        "--ignore-not-found=true",
        "--wait=true",
        "-f",
        &file.path().to_string_lossy(),
    ]);
    let out = kubectl.run(&delete_args, timeout).await?;
    log_writer.section(&kubectl.command_line(&delete_args), &out);
    Ok(())
}

/// Runs a fixed list of kubectl commands each tick and logs their output.
pub struct KubectlObserver {
    kubectl: Arc<dyn Kubectl>,
    log_writer: LogWriter,
    commands: Vec<Vec<String>>,
}

impl KubectlObserver {
    pub fn new(kubectl: Arc<dyn Kubectl>, log_writer: LogWriter) -> Self {
        Self {
            kubectl,
            log_writer,
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, items: &[&str]) -> Self {
        self.commands.push(args(items));
        self
    }

    /// `kubectl describe <kind> <name>` in the namespace.
    pub fn describe(self, namespace: &str, kind: &str, name: &str) -> Self {
        self.command(&["--namespace", namespace, "describe", kind, name])
    }

    /// `kubectl logs --tail=N` for a pod or `deployment/x` style target.
    pub fn logs(self, namespace: &str, target: &str, tail: u32) -> Self {
        let tail = format!("--tail={}", tail);
        self.command(&["--namespace", namespace, "logs", target, &tail])
    }

    pub fn get_all(self, namespace: &str) -> Self {
        self.command(&["--namespace", namespace, "get", "all"])
    }
}

#[async_trait]
impl Observer for KubectlObserver {
    async fn observe(&self) -> Result<()> {
        let mut failures = Vec::new();
        for cmd in &self.commands {
            let line = self.kubectl.command_line(cmd);
            match self.kubectl.run(cmd, KUBECTL_READ_TIMEOUT).await {
                Ok(out) => self.log_writer.section(&line, &out),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.log_writer.section(&line, &e.to_string());
                    failures.push(e.to_string());
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TesterError::command("kubectl", failures.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<Vec<String>>>,
        replies: Mutex<Vec<Result<String>>>,
    }

    #[async_trait]
    impl Kubectl for Scripted {
        async fn run(&self, args: &[String], _timeout: Duration) -> Result<String> {
            self.calls.lock().unwrap().push(args.to_vec());
            let mut r = self.replies.lock().unwrap();
            if r.is_empty() {
                Ok(String::new())
            } else {
                r.remove(0)
            }
        }

        fn command_line(&self, args: &[String]) -> String {
            format!("kubectl {}", args.join(" "))
        }
    }

    #[tokio::test]
    async fn test_proxy_needs_a_real_kubectl() {
        let k = Scripted {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        };
        let err = k.proxy(8001).await.unwrap_err();
        assert!(matches!(
            err,
            TesterError::PreconditionFailed(Precondition::MissingCollaborator(_))
        ));
    }

    #[test]
    fn test_full_args_prepends_flags() {
        let k = KubectlCli::new("/tmp/kubectl", "/tmp/kc", "ctx", CancelScope::new());
        let a = k.full_args(&args(&["get", "nodes"]));
        assert_eq!(a, args(&["--kubeconfig=/tmp/kc", "--context=ctx", "get", "nodes"]));
        let k = KubectlCli::new("/tmp/kubectl", "", "", CancelScope::new());
        assert_eq!(k.full_args(&args(&["version"])), args(&["version"]));
    }

    #[test]
    fn test_default_download_url() {
        let url = default_kubectl_download_url();
        assert!(url.starts_with("https://storage.googleapis.com/kubernetes-release/release/v1.21.1/bin/"));
        assert!(url.ends_with("/kubectl"));
        assert_eq!(default_kubectl_path(), "/tmp/kubectl-test-v1.21.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_manifest_retries_until_created() {
        let k = Scripted {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(vec![
                Err(TesterError::command("kubectl apply", "connection refused")),
                Ok("error: no matches for kind".to_string()),
                Ok("deployment.apps/metrics-server created".to_string()),
            ]),
        };
        let w = LogWriter::memory();
        apply_manifest(&k, &Poller::new(CancelScope::new()), &w, "metrics-server", "kind: List\n")
            .await
            .unwrap();
        assert_eq!(k.calls.lock().unwrap().len(), 3);
        assert!(w.contents().contains("metrics-server created"));
    }

    #[tokio::test]
    async fn test_observer_logs_every_command() {
        let k = Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(vec![Ok("Name: x".to_string()), Ok("log line".to_string())]),
        });
        let w = LogWriter::memory();
        let obs = KubectlObserver::new(k.clone(), w.clone())
            .describe("kube-system", "deployment", "metrics-server")
            .logs("kube-system", "deployment/metrics-server", 30);
        obs.observe().await.unwrap();
        let text = w.contents();
        assert!(text.contains("describe deployment metrics-server"));
        assert!(text.contains("Name: x"));
        assert!(text.contains("--tail=30"));
    }

    #[tokio::test]
    async fn test_delete_manifest_runs_after_stop_once_tearing_down() {
        let scope = CancelScope::new();
        let k = KubectlCli::new("true", "", "", scope.clone());
        let w = LogWriter::memory();
        scope.stop();
        let err = delete_manifest(&k, &w, "kind: List\n", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        scope.teardown();
        delete_manifest(&k, &w, "kind: List\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(w.contents().contains("delete --ignore-not-found=true"));
    }
}
