// CLI command definitions

use super::docs::{DocsCommand, EnvCommand};
use super::pipeline::{AddOnCommand, ApplyCommand, DeleteCommand};
use clap::{Args, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "k8s-addon-tester",
    version,
    about = "Apply, verify and tear down Kubernetes add-ons",
    long_about = "Installs a catalog of cluster add-ons in a fixed order, waits for each to become ready, and deletes them in reverse order"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override the config file for every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to kubeconfig file
    /// If not specified, uses kubeconfig_path from the config file, then default resolution
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    /// Kubernetes context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Never ask for confirmation
    #[arg(long, global = true)]
    pub no_prompt: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Apply every enabled add-on in order
    Apply(ApplyCommand),

    /// Delete every enabled add-on in reverse order
    Delete(DeleteCommand),

    /// Apply or delete a single add-on
    #[command(name = "add-on")]
    AddOn(AddOnCommand),

    /// Show every config field per section
    Docs(DocsCommand),

    /// List every recognized environment variable
    Env(EnvCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_with_globals() {
        let args = CliArgs::try_parse_from([
            "k8s-addon-tester",
            "apply",
            "--config",
            "/tmp/demo.k8s-tester.yaml",
            "--no-prompt",
            "--context",
            "demo",
        ])
        .unwrap();
        assert!(args.global.no_prompt);
        assert_eq!(args.global.context.as_deref(), Some("demo"));
        match args.command {
            Commands::Apply(cmd) => assert_eq!(cmd.config, "/tmp/demo.k8s-tester.yaml"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_on() {
        let args = CliArgs::try_parse_from([
            "k8s-addon-tester",
            "add-on",
            "metrics-server",
            "delete",
            "--config",
            "c.yaml",
        ])
        .unwrap();
        match args.command {
            Commands::AddOn(cmd) => {
                assert_eq!(cmd.name, "metrics-server");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
