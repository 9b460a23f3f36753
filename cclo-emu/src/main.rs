// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Run a scenario on an emulated system of CCLO ranks.
//!
//! Options are merged from built-in defaults, a TOML configuration file,
//! `CCLO_`-prefixed environment variables and the command line, in
//! increasing order of priority. For example:
//!
//! ```sh
//! CCLO_LEN=8192 cclo-emu --scenario send-recv --transport tcp
//! ```
//!
//! The emulator exits with an error if any command fails or any destination
//! memory differs from the expected bytes.

use std::path::PathBuf;

use cclo_engine::engine::Engine;
use cclo_engine::sim_error;
use cclo_engine::types::SimError;
use cclo_platform::System;
use cclo_platform::host::spawn_host;
use cclo_platform::types::{SystemConfig, Transport};
use cclo_track::builder::{TrackerConfig, build_tracker};
use cclo_track::{error, info, lock};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::scenario::{Scenario, prepare, verify};

mod scenario;

/// Two ranks over UDP with 1MiB of memory each.
pub(crate) const DEFAULT_TOPOLOGY: &str = "
transport: udp
datapath_bytes: 64
max_packet_bytes: 1KiB
max_frame_words: 16
ranks:
  - ip: 10.0.0.1
    memory_bytes: 1MiB
    rx_buffers: { count: 16, bytes: 1KiB, base_address: 0xC_0000 }
  - ip: 10.0.0.2
    memory_bytes: 1MiB
    rx_buffers: { count: 16, bytes: 1KiB, base_address: 0xC_0000 }
";

const DEFAULT_CONF_FILE: &str = "cclo-emu.toml";

#[derive(Clone, Copy, Debug, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
enum Link {
    Udp,
    Tcp,
}

impl From<Link> for Transport {
    fn from(link: Link) -> Self {
        match link {
            Link::Udp => Transport::Udp,
            Link::Tcp => Transport::Tcp,
        }
    }
}

#[derive(Debug, Parser, Deserialize, Serialize)]
#[command(about = "CCLO dataflow emulator")]
struct Config {
    /// YAML topology of the system. A two-rank UDP system is used if none is
    /// given.
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Scenario to run.
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,

    /// Override the transport of the topology.
    #[arg(long, value_enum)]
    transport: Option<Link>,

    /// Bytes moved by the scenario.
    #[arg(long)]
    len: Option<u32>,

    /// Seed for the generated input data.
    #[arg(long)]
    seed: Option<u64>,

    /// Level of log message to display.
    #[arg(long)]
    log_level: Option<log::Level>,

    /// Set a regular expression for which entities should have logging level
    /// set to `--log-level`. Others will have level set to `Error`.
    #[arg(long)]
    log_filter: Option<String>,

    /// File the log is written to. `-` selects stdout.
    #[arg(long)]
    log_file: Option<String>,

    /// TOML file providing defaults for any of these options.
    #[arg(long)]
    #[serde(skip)]
    conf_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topology: None,
            scenario: Some(Scenario::Copy),
            transport: None,
            len: Some(4096),
            seed: Some(1),
            log_level: Some(log::Level::Warn),
            log_filter: Some(String::new()),
            log_file: Some("-".to_string()),
            conf_file: Some(PathBuf::from(DEFAULT_CONF_FILE)),
        }
    }
}

impl Config {
    fn parse_all_sources() -> Result<Config, SimError> {
        let cli = Config::parse();
        let conf_file = cli
            .conf_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_FILE));
        let config = Config::figment_with_defaults()
            .merge(Toml::file(conf_file))
            .merge(Env::prefixed("CCLO_"));
        let config: Config = config
            .extract()
            .map_err(|e| SimError(format!("Invalid configuration: {e}")))?;
        Ok(config.clap_merge(cli))
    }

    fn figment_with_defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    fn clap_merge(mut self, cli: Config) -> Config {
        if cli.topology.is_some() {
            self.topology = cli.topology;
        }
        if cli.scenario.is_some() {
            self.scenario = cli.scenario;
        }
        if cli.transport.is_some() {
            self.transport = cli.transport;
        }
        if cli.len.is_some() {
            self.len = cli.len;
        }
        if cli.seed.is_some() {
            self.seed = cli.seed;
        }
        if cli.log_level.is_some() {
            self.log_level = cli.log_level;
        }
        if cli.log_filter.is_some() {
            self.log_filter = cli.log_filter;
        }
        if cli.log_file.is_some() {
            self.log_file = cli.log_file;
        }
        self
    }

    fn system_config(&self) -> Result<SystemConfig, SimError> {
        let yaml = match &self.topology {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| SimError(format!("Unable to read {}: {e}", path.display())))?,
            None => DEFAULT_TOPOLOGY.to_string(),
        };
        let mut system_config = SystemConfig::from_yaml(&yaml)?;
        if let Some(link) = self.transport {
            system_config.transport = link.into();
        }
        Ok(system_config)
    }
}

fn main() -> Result<(), SimError> {
    let config = Config::parse_all_sources()?;
    let defaults = Config::default();

    let tracker = build_tracker(&TrackerConfig {
        level: config.log_level.or(defaults.log_level).unwrap_or(log::Level::Warn),
        filter_regex: config.log_filter.as_deref().unwrap_or_default(),
        file: config.log_file.as_deref(),
    })
    .map_err(|e| SimError(format!("{e}")))?;

    let mut engine = Engine::new(&tracker);
    let system = System::build(&mut engine, config.system_config()?)?;

    let scenario = config.scenario.or(defaults.scenario).unwrap_or(Scenario::Copy);
    let len = config.len.or(defaults.len).unwrap_or_default();
    let seed = config.seed.or(defaults.seed).unwrap_or_default();
    let plan = prepare(&system, scenario, len, seed)?;
    let report = spawn_host(&engine, &system, plan.steps)?;

    info!(system.entity() ; "running {} of {}B", scenario, len);
    engine.run()?;

    let report = lock(&report);
    if !report.all_ok() {
        for (rank, status) in report.moves.iter().filter(|(_, s)| !s.ok) {
            error!(system.entity() ; "rank {}: {}", rank, status);
        }
        return sim_error!(format!("{scenario}: commands failed"));
    }

    let mismatches = verify(&system, &plan.checks)?;
    if !mismatches.is_empty() {
        for mismatch in &mismatches {
            error!(system.entity() ; "{}", mismatch);
        }
        return sim_error!(format!("{scenario}: {} regions differ", mismatches.len()));
    }

    println!("{scenario}: {len}B ok");
    Ok(())
}
