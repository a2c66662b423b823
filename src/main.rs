// Copyright 2025 Chris Custine
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

mod config;
mod simulation;
mod status;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use clap::Parser;
use log::{info, LevelFilter};
use service_link::{LocalDiscovery, ManagerConfig, ServiceManager};
use tokio_util::sync::CancellationToken;

use config::AppConfig;
use simulation::SimulatedService;
use status::{ConnectionReport, SharedConnectionReport};

/// Bootstrap the hook module's host service tracking.
#[derive(Parser, Debug)]
#[command(name = "hookbridge", version, about)]
struct Cli {
    /// Log level; when given, RUST_LOG and the config file are ignored
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Config file to use instead of the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the default config file path and exit
    #[arg(long)]
    print_config: bool,
}

/// The CLI level replaces every other source, including per-module
/// `RUST_LOG` directives. Without it, `RUST_LOG` wins over the config file.
fn logger_builder(config: &AppConfig, cli_level: Option<LevelFilter>) -> env_logger::Builder {
    match cli_level {
        Some(level) => {
            let mut builder = env_logger::Builder::new();
            builder.filter_level(level);
            builder
        }
        None => {
            let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
            env_logger::Builder::from_env(env)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", AppConfig::config_path()?.display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.validate()?;
    logger_builder(&config, cli.log_level).init();

    info!("Starting hookbridge...");

    let manager = ServiceManager::<SimulatedService>::new(ManagerConfig {
        tag: config.log_tag.clone(),
        transition_buffer: config.transition_buffer,
    });
    let discovery = LocalDiscovery::new();

    let report: SharedConnectionReport = Arc::new(Mutex::new(ConnectionReport::new()));
    let cancel_token = CancellationToken::new();
    let reporter = status::spawn_reporter(&manager, Arc::clone(&report), cancel_token.clone());

    manager.init(&discovery)?;
    // Module entry points may run more than once per process.
    manager.init(&discovery)?;

    let services = simulation::run_scenario(&discovery, &config.scenario).await;
    info!(
        "Scenario finished: {} service(s) bound, module activated: {}",
        services.len(),
        manager.is_module_activated()
    );

    cancel_token.cancel();
    reporter.await?;

    if let Ok(report) = report.lock() {
        println!("status:       {:?}", report.status);
        println!("service:      {}", report.service.as_deref().unwrap_or("-"));
        println!("binds:        {}", report.binds);
        println!("deaths:       {}", report.deaths);
        if let Some(at) = report.last_change {
            println!("last change:  {}", at.to_rfc3339());
        }
        if let Some(uptime) = report.uptime(Utc::now()) {
            println!("uptime:       {} ms", uptime.num_milliseconds());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Metadata};

    fn enabled(logger: &env_logger::Logger, level: Level, target: &str) -> bool {
        logger.enabled(&Metadata::builder().level(level).target(target).build())
    }

    #[test]
    fn test_cli_level_applies_to_every_target() {
        let config = AppConfig {
            log_level: "trace".to_string(),
            ..Default::default()
        };

        let logger = logger_builder(&config, Some(LevelFilter::Warn)).build();

        assert_eq!(logger.filter(), LevelFilter::Warn);
        assert!(enabled(&logger, Level::Warn, "hookbridge"));
        assert!(!enabled(&logger, Level::Info, "hookbridge"));
        assert!(!enabled(&logger, Level::Debug, service_link::DEFAULT_TAG));
    }

    #[test]
    fn test_cli_parses_log_level() {
        let cli = Cli::try_parse_from(["hookbridge", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, Some(LevelFilter::Debug));

        assert!(Cli::try_parse_from(["hookbridge", "--log-level", "loud"]).is_err());
    }
}
