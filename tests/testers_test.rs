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

mod common;

#[cfg(test)]
mod tests {
    use super::common::{context, ready_deployment, FakeClient, FakeKubectl};
    use k8s_addon_tester::domain::config::{AddOnConfig, ValidationScope};
    use k8s_addon_tester::domain::testers::csi_ebs::{CsiEbsConfig, CsiEbsTester};
    use k8s_addon_tester::domain::testers::kubernetes_dashboard::{
        KubernetesDashboardConfig, KubernetesDashboardTester,
    };
    use k8s_addon_tester::domain::testers::metrics_server::{
        MetricsServerConfig, MetricsServerTester,
    };
    use k8s_addon_tester::domain::testers::stress::{self, StressConfig, StressTester};
    use k8s_addon_tester::shared::{CancelScope, TesterError};
    use k8s_addon_tester::{Config, Tester};
    use std::time::Duration;

    fn kubectl() -> FakeKubectl {
        FakeKubectl::default()
            .reply("apply -f", "deployment.apps/metrics-server created")
            .reply("top node", "NAME   CPU(cores)   MEMORY(bytes)\nip-10-0-0-1   41m   512Mi")
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_server_apply_and_delete() {
        let client = FakeClient::with_nodes(2);
        client.put_deployment("kube-system", ready_deployment("metrics-server", 1));
        let kubectl = kubectl();
        let ctx = context(client.clone(), kubectl.clone(), CancelScope::new());

        let mut tester = MetricsServerTester::new(MetricsServerConfig::default(), ctx);
        tester.apply().await.unwrap();
        assert!(kubectl.calls().iter().any(|c| c == "top node"));

        tester.delete().await.unwrap();
        assert!(client
            .calls()
            .contains(&"delete Deployment kube-system/metrics-server".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_server_delete_reports_failures() {
        let client = FakeClient::with_nodes(1);
        client.fail_delete_of("metrics-server");
        let ctx = context(client, kubectl(), CancelScope::new());

        let mut tester = MetricsServerTester::new(MetricsServerConfig::default(), ctx);
        let err = tester.delete().await.unwrap_err();
        match err {
            TesterError::Multiple(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("failed to delete metrics-server Deployment"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_server_needs_enough_nodes() {
        let ctx = context(FakeClient::with_nodes(1), kubectl(), CancelScope::new());
        let cfg = MetricsServerConfig {
            minimum_nodes: 2,
            ..Default::default()
        };
        let err = MetricsServerTester::new(cfg, ctx).apply().await.unwrap_err();
        assert!(matches!(err, TesterError::PreconditionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_times_out_when_never_ready() {
        let client = FakeClient::with_nodes(1);
        client.put_deployment(
            "kubernetes-dashboard",
            ready_deployment("kubernetes-dashboard", 0),
        );
        let ctx = context(client, kubectl(), CancelScope::new());
        let log = ctx.log_writer.clone();

        let mut tester = KubernetesDashboardTester::new(KubernetesDashboardConfig::default(), ctx);
        let err = tester.apply().await.unwrap_err();
        assert!(
            matches!(err, TesterError::DeadlineExceeded { .. }),
            "unexpected error {:?}",
            err
        );
        assert!(log
            .contents()
            .contains("describe deployment kubernetes-dashboard' output:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_csi_ebs_resizes_claim() {
        let client = FakeClient::with_nodes(2);
        let ctx = context(client.clone(), FakeKubectl::default(), CancelScope::new());
        let log = ctx.log_writer.clone();
        let cfg = CsiEbsConfig {
            enable: true,
            ..Default::default()
        };
        let namespace = cfg.namespace.clone();

        let mut tester = CsiEbsTester::new(cfg, ctx);
        tester.apply().await.unwrap();
        assert!(log.contents().contains("[PASSED] PVC ReSize"));
        let calls = client.calls();
        assert!(calls.contains(&format!(
            "create PersistentVolumeClaim {}/ebs-claim",
            namespace
        )));
        assert!(calls.contains(&format!(
            "resize PersistentVolumeClaim {}/ebs-claim 6Gi",
            namespace
        )));

        tester.delete().await.unwrap();
        assert!(client.calls().contains(&format!("delete Namespace {}", namespace)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_apply() {
        // No Deployment ever shows up, so apply only ends through the stop signal.
        let cancel = CancelScope::new();
        let ctx = context(FakeClient::with_nodes(1), kubectl(), cancel.clone());
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            stopper.stop();
        });

        let mut tester = MetricsServerTester::new(MetricsServerConfig::default(), ctx);
        let err = tester.apply().await.unwrap_err();
        assert!(err.is_cancelled(), "unexpected error {:?}", err);
    }

    #[tokio::test]
    async fn test_stress_bounded_writes() {
        let client = FakeClient::with_nodes(1);
        let ctx = context(client.clone(), FakeKubectl::default(), CancelScope::new());

        let mut cfg = StressConfig {
            enable: true,
            objects: 5,
            object_size: 64,
            update_concurrency: 1,
            list_limit: -1,
            ..Default::default()
        };
        cfg.validate_and_set_defaults(&ValidationScope {
            add_on: stress::NAME,
            cluster_name: "demo",
        })
        .unwrap();
        let namespace = cfg.namespace.clone();

        let mut tester = StressTester::new(cfg, ctx);
        tester.apply().await.unwrap();

        let mut config = Config::default();
        tester.write_back(&mut config);
        let out = &config.add_on_stress;
        assert_eq!(out.latency_summary_writes.success_total, 5);
        assert_eq!(out.latency_summary_writes.failure_total, 0);
        assert_eq!(out.latency_summary_gets.failure_total, 0);
        assert_eq!(out.latency_summary_range_gets.success_total, 0);

        let created = client
            .calls()
            .iter()
            .filter(|c| c.starts_with(&format!("create Pod {}/", namespace)))
            .count();
        assert_eq!(created, 5);

        tester.delete().await.unwrap();
        assert!(client.calls().contains(&format!("delete Namespace {}", namespace)));
    }

    #[tokio::test]
    async fn test_stress_retries_conflicting_updates() {
        let client = FakeClient::with_nodes(1);
        client.state.lock().unwrap().replace_conflicts = 1;
        let ctx = context(client.clone(), FakeKubectl::default(), CancelScope::new());

        // Eleven writes over ten keys: the last one updates the first pod.
        let mut cfg = StressConfig {
            enable: true,
            objects: 11,
            object_size: 64,
            update_concurrency: 1,
            list_limit: -1,
            ..Default::default()
        };
        cfg.validate_and_set_defaults(&ValidationScope {
            add_on: stress::NAME,
            cluster_name: "demo",
        })
        .unwrap();
        let namespace = cfg.namespace.clone();

        let mut tester = StressTester::new(cfg, ctx);
        tester.apply().await.unwrap();

        let mut config = Config::default();
        tester.write_back(&mut config);
        let writes = &config.add_on_stress.latency_summary_writes;
        assert_eq!(writes.success_total, 11);
        assert_eq!(writes.failure_total, 1);

        let replaced = client
            .calls()
            .iter()
            .filter(|c| c.starts_with(&format!("replace Pod {}/", namespace)))
            .count();
        assert_eq!(replaced, 1);
    }
}
