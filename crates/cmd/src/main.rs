// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser, Subcommand};
use keyq_app::AppConfig;
use keyq_common_telemetry::logging::{LogFormat, LoggingOptions};
use keyq_server::http::RestServerConfig;
use snafu::Whatever;
use tracing_subscriber::filter::Targets;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "keyq",
about = "keyq-cmd",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION,
long_version = build_info::LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the keyq queue server on the given port.
Examples:

keyq server 8080
keyq server 8080 --host 0.0.0.0 --metrics-port 9090

")]
struct ServerArgs {
    /// Port for the queue listener
    port: u16,

    /// Address the queue listener binds to
    #[arg(long, env = "KEYQ_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Serve `/metrics` on this port, on the same host
    #[arg(long, env = "KEYQ_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log filter directives, e.g. `info` or `keyq_server=debug`
    #[arg(long, env = "KEYQ_LOG_LEVEL", value_parser = log_filter)]
    log_level: Option<String>,

    #[arg(long, env = "KEYQ_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Write rotated log files here in addition to stdout
    #[arg(long, env = "KEYQ_LOG_DIR", default_value = "")]
    log_dir: String,
}

/// Rejects filters the logger would fail on, before anything starts.
fn log_filter(raw: &str) -> Result<String, String> {
    raw.parse::<Targets>()
        .map(|_| raw.to_owned())
        .map_err(|e| e.to_string())
}

impl ServerArgs {
    fn config(&self) -> AppConfig {
        let listener = |port| {
            RestServerConfig::builder()
                .bind_address(SocketAddr::new(self.host, port).to_string())
                .build()
        };
        AppConfig::builder()
            .http_config(listener(self.port))
            .maybe_metrics_config(self.metrics_port.map(listener))
            .logging(
                LoggingOptions::builder()
                    .dir(self.log_dir.clone())
                    .maybe_level(self.log_level.clone())
                    .log_format(self.log_format)
                    .build(),
            )
            .build()
    }

    async fn run(&self) -> Result<(), Whatever> { self.config().open().run().await }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(sa) => sa.run().await,
    }
}
