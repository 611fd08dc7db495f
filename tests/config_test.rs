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

#[cfg(test)]
mod tests {
    use k8s_addon_tester::shared::{ConfigError, TesterError};
    use k8s_addon_tester::Config;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_environment_overlay_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.k8s-tester.yaml");
        std::fs::write(&path, "cluster_name: demo\nprompt: false\n").unwrap();

        let mut cfg = Config::load(&path).unwrap();
        cfg.update_from_environment(&env(&[
            ("K8S_TESTER_CLIENT_TIMEOUT", "20s"),
            ("K8S_TESTER_MINIMUM_NODES", "3"),
            ("K8S_TESTER_ADD_ON_STRESS_ENABLE", "true"),
            ("K8S_TESTER_ADD_ON_STRESS_OBJECTS", "50"),
            ("K8S_TESTER_ADD_ON_METRICS_SERVER_ENABLE", "true"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        cfg.validate_and_set_defaults().unwrap();
        assert_eq!(cfg.enabled_add_ons(), vec!["metrics-server", "stress"]);

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.client_timeout, Duration::from_secs(20));
        assert_eq!(reloaded.client_timeout_string, "20s");
        assert_eq!(reloaded.minimum_nodes, 3);
        assert!(reloaded.add_on_stress.enable);
        assert_eq!(reloaded.add_on_stress.objects, 50);
        assert!(!reloaded.add_on_stress.namespace.is_empty());
        assert_eq!(reloaded, cfg);
    }

    #[test]
    fn test_environment_rejects_unknown_and_read_only() {
        let mut cfg = Config::default();
        let err = cfg
            .update_from_environment(&env(&[("K8S_TESTER_ADD_ON_STRESS_OBJECTZ", "1")]))
            .unwrap_err();
        assert!(matches!(err, TesterError::Config(ConfigError::UnknownField(_))));

        let err = cfg
            .update_from_environment(&env(&[("K8S_TESTER_TOTAL_NODES", "9")]))
            .unwrap_err();
        assert!(matches!(err, TesterError::Config(ConfigError::ReadOnly { .. })));
    }

    #[test]
    fn test_unknown_key_in_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.k8s-tester.yaml");
        std::fs::write(&path, "cluster_name: demo\nadd_on_metrics_server:\n  replicas: 2\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, TesterError::Config(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, TesterError::Config(ConfigError::NotFound(_))));
    }
}
