// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assh::config::Validations;
use assh::{Application, Cli, Configuration};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Configuration::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err:#}");
            return 1;
        }
    };

    let mut validations = Validations::default();
    let app = Application::build(&config, cli.stats_port, &mut validations);
    if let Some(summary) = validations.render(cli.verbose > 0) {
        print!("{summary}");
    }
    if validations.has_errors() {
        return 1;
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // The management surface the REST adapter attaches to; it lives for
    // the whole daemon run.
    let managers = app.managers(cancel.clone());
    let result = app.run(cancel).await;
    managers.close().await;

    match result {
        Ok(()) => {
            info!("shutdown complete");
            0
        }
        Err(err) => {
            eprintln!("{err:#}");
            1
        }
    }
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::new("assh=warn"),
        1 => EnvFilter::new("assh=info"),
        2 => EnvFilter::new("assh=debug"),
        _ => EnvFilter::new("assh=trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Cancel the daemon's root token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(err) => {
                    tracing::error!("failed to install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = terminate.recv() => info!("termination signal received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received");
        }
        cancel.cancel();
    });
}
