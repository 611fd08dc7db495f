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


use clap::Parser;
use colored::Colorize;
use k8s_addon_tester::cli::display::StatusIcon;
use k8s_addon_tester::cli::{CliArgs, Commands};
use k8s_addon_tester::shared::CancelScope;

/// The first SIGINT or SIGTERM closes the stop channel; a second one
/// cancels the outer context, which also interrupts teardown.
fn watch_signals(cancel: CancelScope) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "failed to watch SIGTERM");
                None
            }
        };

        for received in 0..2 {
            #[cfg(unix)]
            {
                let sigterm = async {
                    match term.as_mut() {
                        Some(t) => {
                            t.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm => {}
                }
            }
            #[cfg(not(unix))]
            let _ = tokio::signal::ctrl_c().await;

            if received == 0 {
                tracing::warn!("received shutdown signal; stopping");
                cancel.stop();
            } else {
                tracing::warn!("received second shutdown signal; cancelling");
                cancel.ctx.cancel();
            }
        }
    });
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let cancel = CancelScope::new();
    watch_signals(cancel.clone());

    let global = &args.global;
    match &args.command {
        Commands::Apply(cmd) => cmd.execute(global, cancel).await,
        Commands::Delete(cmd) => cmd.execute(global, cancel).await,
        Commands::AddOn(cmd) => cmd.execute(global, cancel).await,
        Commands::Docs(cmd) => cmd.execute().await,
        Commands::Env(cmd) => cmd.execute().await,
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("{} {}", StatusIcon::ERROR.red(), e);
        std::process::exit(1);
    }
}
