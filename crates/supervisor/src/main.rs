// Copyright (C) 2025-present The QueryWatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use querywatch_supervisor::{
    config::{SupervisorConfig, PROGRAM_NAME},
    init_supervision,
    lock::InstanceLock,
};
use std::{path::PathBuf, str::FromStr};
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = PROGRAM_NAME, version, about)]
struct Cli {
    /// YAML configuration file, merged over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(long)]
    debug: bool,

    /// Keep the lock file and the stats database under /tmp
    #[arg(long)]
    dev: bool,
}

fn init_tracing(level: &'_ str) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::from_str(level).expect("invalid logging level"))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn load_config(cli: &Cli) -> Result<SupervisorConfig, figment::Error> {
    let mut figment = Figment::from(Serialized::defaults(SupervisorConfig::default()));
    if let Some(config_file) = &cli.config {
        figment = figment.merge(Yaml::file(config_file));
    }
    figment.merge(Env::prefixed("QW_").split("__")).extract()
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();
    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            return Err(format!("Parsing configuration failed: {err}").into());
        }
    };
    config.validate()?;
    if cli.dev {
        config = config.into_dev_mode();
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging.level);

    let lock = InstanceLock::acquire(&config.lock_path)?;
    info!("{PROGRAM_NAME} holding {}", lock.path().display());

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    // If num threads is not configured then the default use all CPU cores is used
    if let Some(num_threads) = config.runtime.threads {
        runtime_builder.worker_threads(num_threads);
    }
    runtime_builder.enable_all();
    let runtime = runtime_builder.build()?;
    runtime.block_on(async move {
        let meter = opentelemetry::global::meter(PROGRAM_NAME);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Termination signal received, shutting down");
                Ok::<(), Box<dyn std::error::Error + Send + Sync + 'static>>(())
            }
            ret = init_supervision(config, meter) => {
                info!("Capture terminated, shutting down the supervisor");
                ret.map_err(Into::into)
            }
        }
    })
}
