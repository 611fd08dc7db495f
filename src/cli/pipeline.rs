//! Commands that talk to the cluster: apply, delete, and single add-on runs

use super::commands::GlobalArgs;
use super::display::{StatusIcon, TableRenderer};
use crate::domain::config::Config;
use crate::domain::pipeline::Pipeline;
use crate::domain::prompt::{Prompt, StdinPrompt};
use crate::domain::registry;
use crate::domain::tester::TesterContext;
use crate::infrastructure::elb::AwsCliLoadBalancers;
use crate::infrastructure::helm::HelmCli;
use crate::infrastructure::kubectl::KubectlCli;
use crate::infrastructure::kubernetes::KubeClientImpl;
use crate::infrastructure::logging::{init_tracing, LogWriter};
use crate::shared::{CancelScope, ConfigError, Result, TesterError};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Clone)]
pub struct ApplyCommand {
    /// Path to the tester configuration file (YAML)
    /// Created with defaults when missing
    #[arg(long, short = 'c')]
    pub config: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// Path to the tester configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AddOnAction {
    Apply,
    Delete,
}

#[derive(Parser, Debug, Clone)]
pub struct AddOnCommand {
    /// Add-on name, e.g. metrics-server
    pub name: String,

    #[arg(value_enum)]
    pub action: AddOnAction,

    /// Path to the tester configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: String,
}

/// Load `path` (or start from defaults), overlay `K8S_TESTER_*`, apply the
/// global flags, and validate.
pub fn load_config(path: &str, global: &GlobalArgs) -> Result<Config> {
    let mut config = match Config::load(path) {
        Ok(c) => c,
        Err(TesterError::Config(ConfigError::NotFound(_))) => {
            let mut c = Config::default();
            c.config_path = path.to_string();
            c
        }
        Err(e) => return Err(e),
    };
    config.update_from_environment(&Config::process_env())?;

    if let Some(kubeconfig) = &global.kubeconfig {
        config.kubeconfig_path = kubeconfig.clone();
    }
    if let Some(context) = &global.context {
        config.kubeconfig_context = context.clone();
    }
    if global.no_prompt {
        config.prompt = false;
    }
    config.validate_and_set_defaults()?;
    Ok(config)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Build every collaborator the testers share. Installs kubectl if missing.
pub async fn connect(config: &Config, cancel: CancelScope) -> Result<TesterContext> {
    let log_writer = match config.log_file() {
        Some(path) => LogWriter::open(&path)?,
        None => LogWriter::discard(),
    };

    let client = KubeClientImpl::new_with_config(
        non_empty(&config.kubeconfig_path),
        non_empty(&config.kubeconfig_context),
        config.client_timeout,
        cancel.clone(),
    )
    .await?;

    let kubectl = KubectlCli::new(
        &config.kubectl_path,
        &config.kubeconfig_path,
        &config.kubeconfig_context,
        cancel.clone(),
    );
    kubectl.install(&config.kubectl_download_url).await?;

    let helm = HelmCli::new(
        &config.kubeconfig_path,
        &config.kubeconfig_context,
        log_writer.clone(),
        cancel.clone(),
    );
    let region = std::env::var("AWS_REGION").unwrap_or_default();
    let load_balancers = AwsCliLoadBalancers::new(&region, cancel.clone());
    let http = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()?;

    Ok(TesterContext {
        client: Arc::new(client),
        kubectl: Arc::new(kubectl),
        helm: Arc::new(helm),
        load_balancers: Arc::new(load_balancers),
        http,
        log_writer,
        cancel,
        prompt: None,
        client_timeout: config.client_timeout,
        kubeconfig_path: config.kubeconfig_path.clone(),
        kubeconfig_context: config.kubeconfig_context.clone(),
        kubectl_path: config.kubectl_path.clone(),
    })
}

fn prompt_for(config: &Config) -> Option<Arc<dyn Prompt>> {
    config
        .prompt
        .then(|| Arc::new(StdinPrompt) as Arc<dyn Prompt>)
}

async fn prepare(path: &str, global: &GlobalArgs, cancel: CancelScope) -> anyhow::Result<(Config, TesterContext)> {
    let config = load_config(path, global)?;
    init_tracing(&config.log_level, &config.log_outputs, config.log_color)?;
    info!(config_path = %config.config_path, add_ons = ?config.enabled_add_ons(), "loaded config");
    let ctx = connect(&config, cancel).await?;
    Ok((config, ctx))
}

fn print_footer(config: &Config) {
    println!(
        "{} config: {}",
        StatusIcon::SUCCESS.green(),
        config.config_path
    );
    if let Some(log) = config.log_file() {
        println!("{} log: {}", StatusIcon::SUCCESS.green(), log.display());
    }
}

async fn run_pipeline(
    action: &str,
    path: &str,
    global: &GlobalArgs,
    cancel: CancelScope,
) -> anyhow::Result<()> {
    let (mut config, ctx) = prepare(path, global, cancel).await?;
    let testers = registry::build_all(&config, &ctx);
    let mut pipeline = Pipeline::new(testers, ctx.client.clone(), prompt_for(&config))
        .with_cancel(ctx.cancel.clone());

    let res = if action == "apply" {
        pipeline.apply(&mut config).await
    } else {
        pipeline.delete(&mut config).await
    };

    let renderer = TableRenderer::new();
    println!(
        "{}",
        renderer.render_summary(action, chrono::Local::now(), pipeline.outcomes())
    );
    print_footer(&config);
    res.map_err(Into::into)
}

impl ApplyCommand {
    pub async fn execute(&self, global: &GlobalArgs, cancel: CancelScope) -> anyhow::Result<()> {
        run_pipeline("apply", &self.config, global, cancel).await
    }
}

impl DeleteCommand {
    pub async fn execute(&self, global: &GlobalArgs, cancel: CancelScope) -> anyhow::Result<()> {
        run_pipeline("delete", &self.config, global, cancel).await
    }
}

impl AddOnCommand {
    pub async fn execute(&self, global: &GlobalArgs, cancel: CancelScope) -> anyhow::Result<()> {
        let add_on = registry::find(&self.name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown add-on {:?} (known: {})",
                self.name,
                registry::names().join(", ")
            )
        })?;
        let (mut config, ctx) = prepare(&self.config, global, cancel).await?;
        if !config.enabled_add_ons().contains(&add_on.name) {
            anyhow::bail!(
                "add-on {:?} is not enabled in {}",
                self.name,
                config.config_path
            );
        }

        let ctx = ctx.with_prompt(prompt_for(&config));
        let mut tester = (add_on.build)(&config, &ctx);
        let res = match self.action {
            AddOnAction::Apply => tester.apply().await,
            AddOnAction::Delete => {
                ctx.cancel.teardown();
                tester.delete().await
            }
        };
        tester.write_back(&mut config);
        config.sync()?;

        match &res {
            Ok(()) => println!("{} {} {:?}", StatusIcon::SUCCESS.green(), self.name, self.action),
            Err(_) => println!("{} {} {:?}", StatusIcon::ERROR.red(), self.name, self.action),
        }
        print_footer(&config);
        res.map_err(Into::into)
    }
}
