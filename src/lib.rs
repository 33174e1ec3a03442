//! Crate root: CLI arguments and the `run` entry point that binds a line
//! service (or performs a one-shot resolve) against a loaded configuration.

pub mod alias;
pub mod config;
pub mod error;
pub mod lookup;
pub mod matching;
pub mod milter;
pub mod net;
pub mod processor;
pub mod statistics;
pub mod verifier;

use anyhow::Context as _;
use config::Configuration;
use net::Shared;
use std::net::{TcpListener, ToSocketAddrs as _};
use std::path;
use std::sync::Arc;
use std::time::Duration;

/// How often the watchdog checks the configuration file's mtime (§5's
/// "configuration-file watchdog"), matching the original reporter's poll
/// cadence.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[arg(long = "config", help = "Configuration file")]
  pub config: path::PathBuf,

  #[clap(subcommand)]
  pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
  /// Run the table-server line protocol (§6.1).
  Table,
  /// Run the virtual-domain server line protocol (§6.2).
  Virtual,
  /// Run the milter protocol adapter (§6.3).
  Milter,
  /// Resolve one alias against the configuration and print the result.
  Resolve {
    alias: String,
  },
}

fn build_processor(config: &Configuration) -> anyhow::Result<Box<dyn processor::Processor>> {
  match &config.settings.processor {
    Some(name) => Ok(processor::resolve(name)?),
    None => Ok(Box::new(processor::Identity)),
  }
}

/// Spawns the watchdog thread that reloads the configuration file when its
/// mtime advances (§5's "Shared state", §9's "Configuration hot-swap"). A
/// reload that fails to parse is logged and the previous configuration is
/// retained (§7's load-time error policy in non-strict mode).
fn spawn_watchdog(path: path::PathBuf, shared: Arc<Shared>) {
  std::thread::spawn(move || {
    let mut last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
    loop {
      std::thread::sleep(WATCHDOG_INTERVAL);
      let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(err) => {
          log::warn!("couldn't stat configuration file {path:?}: {err:#}");
          continue;
        }
      };
      if last_modified == Some(modified) {
        continue;
      }
      match Configuration::load_file(&path) {
        Ok(config) => {
          log::info!("reloaded configuration from {path:?}");
          shared.config.store(config);
          last_modified = Some(modified);
        }
        Err(err) => log::warn!("couldn't reload configuration from {path:?}: {err}"),
      }
    }
  });
}

/// Spawns a thread that logs one line per statistics collector on the
/// configured interval, mirroring the original's periodic statistics
/// report. A no-op (loads the interval once) when `STATISTICS` is `0`.
fn spawn_statistics_reporter(shared: Arc<Shared>) {
  let interval = shared.config.load().settings.statistics;
  if interval == 0 {
    return;
  }
  std::thread::spawn(move || loop {
    std::thread::sleep(Duration::from_secs(interval));
    for collector in shared.statistics.stats() {
      log::info!("{}", collector.format_line());
    }
  });
}

pub fn run(arguments: &Arguments) -> anyhow::Result<()> {
  let config = Configuration::load_file(&arguments.config).with_context(|| format!("couldn't load {:?}", arguments.config))?;

  if let Command::Resolve { alias } = &arguments.command {
    let resolution = lookup::resolve(&config, alias);
    match resolution.account {
      Some(account) => println!("{account}"),
      None => println!("(no match)"),
    }
    return Ok(());
  }

  let processor = build_processor(&config)?;
  let address = (config.settings.host.as_str(), config.settings.port)
    .to_socket_addrs()?
    .next()
    .with_context(|| format!("couldn't resolve {}:{}", config.settings.host, config.settings.port))?;
  let listener = TcpListener::bind(address).with_context(|| format!("couldn't bind {address}"))?;

  let shared = Arc::new(Shared::new(config, processor));
  spawn_watchdog(arguments.config.clone(), Arc::clone(&shared));
  spawn_statistics_reporter(Arc::clone(&shared));

  log::info!("listening on {address}");
  match &arguments.command {
    Command::Table => net::serve(listener, move |stream| net::table::handle(stream, Arc::clone(&shared))),
    Command::Virtual => net::serve(listener, move |stream| net::virtual_server::handle(stream, Arc::clone(&shared))),
    Command::Milter => net::serve(listener, move |stream| net::milter_server::handle(stream, Arc::clone(&shared))),
    Command::Resolve { .. } => unreachable!(),
  }
  .map_err(Into::into)
}
