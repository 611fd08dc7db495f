//! Offline commands: schema docs and environment keys

use super::display::TableRenderer;
use crate::domain::config::schema::{env_key, FieldSchema};
use crate::domain::config::ROOT_SCHEMA;
use crate::domain::registry::REGISTRY;
use crate::infrastructure::constants::ENV_PREFIX;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct DocsCommand {
    /// Only show this add-on (or "root")
    #[arg(long)]
    pub add_on: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct EnvCommand {
    /// Include read-only fields, which are rejected when set
    #[arg(long)]
    pub all: bool,
}

/// Root section first, then every add-on in registry order.
pub fn sections() -> Vec<(String, String, &'static [FieldSchema])> {
    let mut out = vec![("root".to_string(), ENV_PREFIX.to_string(), ROOT_SCHEMA)];
    out.extend(
        REGISTRY
            .iter()
            .map(|a| (a.name.to_string(), a.env_prefix(), a.schema)),
    );
    out
}

/// Every recognized `K8S_TESTER_*` key.
pub fn env_keys(include_read_only: bool) -> Vec<String> {
    sections()
        .into_iter()
        .flat_map(|(_, prefix, schema)| {
            schema
                .iter()
                .filter(move |f| include_read_only || !f.read_only)
                .map(move |f| env_key(&prefix, f.name))
        })
        .collect()
}

impl DocsCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let renderer = TableRenderer::new();
        let mut shown = 0;
        for (title, prefix, schema) in sections() {
            if self.add_on.as_deref().map_or(true, |n| n == title) {
                println!("{}", renderer.render_schema(&title, &prefix, schema));
                shown += 1;
            }
        }
        if shown == 0 {
            anyhow::bail!("unknown section {:?}", self.add_on.as_deref().unwrap_or_default());
        }
        Ok(())
    }
}

impl EnvCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        for key in env_keys(self.all) {
            println!("{}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_keys() {
        let keys = env_keys(false);
        assert!(keys.contains(&"K8S_TESTER_CLIENT_TIMEOUT".to_string()));
        assert!(keys.contains(&"K8S_TESTER_ADD_ON_METRICS_SERVER_NAMESPACE".to_string()));
        assert!(keys.contains(&"K8S_TESTER_ADD_ON_STRESS_OBJECTS".to_string()));
        assert!(!keys.contains(&"K8S_TESTER_TOTAL_NODES".to_string()));
        assert!(env_keys(true).contains(&"K8S_TESTER_TOTAL_NODES".to_string()));
    }

    #[test]
    fn test_sections_follow_registry() {
        let s = sections();
        assert_eq!(s.len(), 14);
        assert_eq!(s[0].0, "root");
        assert_eq!(s[1].0, "cloudwatch-agent");
        assert_eq!(s[13].0, "stress");
    }
}
