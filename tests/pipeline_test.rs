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
    use super::common::{context, FakeClient, FakeKubectl, Script, ScriptedTester, WaitingTester};
    use k8s_addon_tester::domain::config::Config;
    use k8s_addon_tester::domain::registry::build_all;
    use k8s_addon_tester::shared::{CancelScope, FailureClass, Precondition, TesterError};
    use k8s_addon_tester::{Outcome, Pipeline};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config() -> Config {
        Config {
            cluster_name: "demo".to_string(),
            prompt: false,
            ..Default::default()
        }
    }

    fn pipeline(
        nodes: usize,
        testers: Vec<Box<dyn k8s_addon_tester::Tester>>,
    ) -> Pipeline {
        let ctx = context(
            FakeClient::with_nodes(nodes),
            FakeKubectl::default(),
            CancelScope::new(),
        );
        Pipeline::new(testers, ctx.client.clone(), None)
    }

    #[tokio::test]
    async fn test_apply_runs_enabled_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            2,
            vec![
                ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal),
                ScriptedTester::boxed("b", false, Script::Ok, Script::Ok, &journal),
                ScriptedTester::boxed("c", true, Script::Ok, Script::Ok, &journal),
            ],
        );
        assert_eq!(p.apply_order(), vec!["a", "c"]);
        assert_eq!(p.delete_order(), vec!["c", "a"]);

        let mut cfg = config();
        p.apply(&mut cfg).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["apply a", "apply c"]);
        assert_eq!(cfg.total_nodes, 2);

        let outcomes: Vec<Outcome> = p.outcomes().iter().map(|o| o.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Applied, Outcome::Skipped, Outcome::Applied]
        );
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            1,
            vec![
                ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal),
                ScriptedTester::boxed("b", true, Script::Fail, Script::Ok, &journal),
                ScriptedTester::boxed("c", true, Script::Ok, Script::Ok, &journal),
            ],
        );
        let err = p.apply(&mut config()).await.unwrap_err();
        match &err {
            TesterError::ApplyFailed { tester, .. } => assert_eq!(tester, "b"),
            other => panic!("unexpected error {:?}", other),
        }
        // No rollback: "a" is never deleted.
        assert_eq!(*journal.lock().unwrap(), vec!["apply a", "apply b"]);

        let o = p.outcomes();
        assert_eq!(o[0].outcome, Outcome::Applied);
        assert!(matches!(o[1].outcome, Outcome::Failed(ref m) if m.contains("b is broken")));
        assert_eq!(o[2].outcome, Outcome::NotRun);
    }

    #[tokio::test]
    async fn test_apply_rejects_small_cluster_before_any_tester() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            1,
            vec![ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal)],
        );
        let mut cfg = config();
        cfg.minimum_nodes = 3;
        let err = p.apply(&mut cfg).await.unwrap_err();
        assert!(matches!(
            err,
            TesterError::PreconditionFailed(Precondition::InsufficientNodes {
                required: 3,
                actual: 1
            })
        ));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reverse_and_partial() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            1,
            vec![
                ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal),
                ScriptedTester::boxed("b", true, Script::Ok, Script::Fail, &journal),
                ScriptedTester::boxed("c", true, Script::Ok, Script::Ok, &journal),
            ],
        );
        let err = p.delete(&mut config()).await.unwrap_err();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["delete c", "delete b", "delete a"]
        );
        match err {
            TesterError::PartialTeardown { errors, class } => {
                assert_eq!(class, FailureClass::Partial);
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("b refused to go"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(p.outcomes()[0].outcome, Outcome::Deleted);
    }

    #[tokio::test]
    async fn test_delete_total_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            1,
            vec![
                ScriptedTester::boxed("a", true, Script::Ok, Script::Fail, &journal),
                ScriptedTester::boxed("b", false, Script::Ok, Script::Fail, &journal),
            ],
        );
        let err = p.delete(&mut config()).await.unwrap_err();
        assert!(matches!(
            err,
            TesterError::PartialTeardown {
                class: FailureClass::Total,
                ..
            }
        ));
        assert_eq!(*journal.lock().unwrap(), vec!["delete a"]);
    }

    #[tokio::test]
    async fn test_apply_syncs_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            4,
            vec![ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal)],
        );
        let mut cfg = config();
        cfg.config_path = dir.path().join("demo.k8s-tester.yaml").display().to_string();
        p.apply(&mut cfg).await.unwrap();

        let reloaded = Config::load(&cfg.config_path).unwrap();
        assert_eq!(reloaded.total_nodes, 4);
    }

    #[tokio::test]
    async fn test_delete_after_failed_apply_reaches_every_tester() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            1,
            vec![
                ScriptedTester::boxed("a", true, Script::Ok, Script::Ok, &journal),
                ScriptedTester::boxed("b", true, Script::Fail, Script::Ok, &journal),
            ],
        );
        let mut cfg = config();
        assert!(p.apply(&mut cfg).await.is_err());
        p.delete(&mut cfg).await.unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["apply a", "apply b", "delete b", "delete a"]
        );
    }

    #[tokio::test]
    async fn test_registry_orders_observability_first() {
        let mut cfg = config();
        cfg.add_on_metrics_server.enable = true;
        cfg.add_on_cloudwatch_agent.enable = true;
        let ctx = context(
            FakeClient::with_nodes(1),
            FakeKubectl::default(),
            CancelScope::new(),
        );
        let p = Pipeline::new(build_all(&cfg, &ctx), ctx.client.clone(), None);
        assert_eq!(p.apply_order(), vec!["cloudwatch-agent", "metrics-server"]);
        assert_eq!(p.delete_order(), vec!["metrics-server", "cloudwatch-agent"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_apply_then_delete_succeeds() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelScope::new();
        let ctx = context(FakeClient::with_nodes(1), FakeKubectl::default(), cancel.clone());
        let mut p = Pipeline::new(
            vec![
                WaitingTester::boxed("waiting", &ctx, &journal),
                ScriptedTester::boxed("later", true, Script::Ok, Script::Ok, &journal),
            ],
            ctx.client.clone(),
            None,
        )
        .with_cancel(cancel.clone());

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            stopper.stop();
        });

        let mut cfg = config();
        let err = p.apply(&mut cfg).await.unwrap_err();
        assert!(err.is_cancelled(), "unexpected error {:?}", err);
        assert_eq!(p.outcomes()[1].outcome, Outcome::NotRun);
        assert_eq!(*journal.lock().unwrap(), vec!["apply waiting"]);

        p.delete(&mut cfg).await.unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["apply waiting", "delete later", "delete waiting"]
        );
        assert!(p
            .outcomes()
            .iter()
            .all(|o| o.outcome == Outcome::Deleted));
    }
}
