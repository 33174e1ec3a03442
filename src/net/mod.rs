//! Shared TCP service scaffolding: hot-swappable configuration, a
//! thread-per-connection accept loop, and the small text-request grammar
//! shared by the table and virtual-domain servers (§5, §6.1-6.2).

pub mod milter_server;
pub mod table;
pub mod virtual_server;

use crate::config::Configuration;
use crate::processor::Processor;
use crate::statistics::{StatisticsCollector, StatisticsFactory};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Holds the currently active configuration. A reload builds a fresh
/// `Configuration` and calls `store`; in-flight connections keep resolving
/// against whichever `Arc` they already loaded (§5's "Shared state", §9's
/// "Configuration hot-swap"). The lock here only ever guards a pointer
/// clone/replace, never I/O.
pub struct ConfigHandle(Mutex<Arc<Configuration>>);

impl ConfigHandle {
  pub fn new(config: Configuration) -> Self {
    ConfigHandle(Mutex::new(Arc::new(config)))
  }

  pub fn load(&self) -> Arc<Configuration> {
    Arc::clone(&self.0.lock().unwrap())
  }

  pub fn store(&self, config: Configuration) {
    *self.0.lock().unwrap() = Arc::new(config);
  }
}

/// Everything one line-service connection needs: the hot-swappable
/// configuration, the bound pre/post-processor, and the statistics this
/// process reports through `stats`/`jstats` (§6.1).
pub struct Shared {
  pub config: ConfigHandle,
  pub processor: Box<dyn Processor>,
  pub statistics: StatisticsFactory,
  pub resolve_collector: Arc<StatisticsCollector>,
}

impl Shared {
  pub fn new(config: Configuration, processor: Box<dyn Processor>) -> Self {
    let statistics = StatisticsFactory::new();
    let resolve_collector = statistics.collector("resolve");
    Shared { config: ConfigHandle::new(config), processor, statistics, resolve_collector }
  }
}

/// Runs `listener`'s accept loop, spawning one detached thread per
/// connection and handing it to `handle` (§5's "one independent task per
/// accepted connection"). Returns only on a listener error.
pub fn serve<F>(listener: TcpListener, handle: F) -> io::Result<()>
where
  F: Fn(TcpStream) + Send + Sync + 'static,
{
  let handle = Arc::new(handle);
  loop {
    let (stream, peer) = listener.accept()?;
    let handle = Arc::clone(&handle);
    thread::spawn(move || {
      log::debug!("accepted connection from {:?}", peer);
      handle(stream);
      log::debug!("connection from {:?} closed", peer);
    });
  }
}

peg::parser! {
  /// The table/virtual-server request line grammar (§6.1, §6.2): one of
  /// `get <arg>`, `stats`, `jstats`, surrounded by optional whitespace.
  grammar line() for str {
    rule ws() = quiet!{[' ' | '\t']*}
    rule token() -> &'input str
      = s:$(['!'..='~']+) { s }
    pub rule request() -> Request<'input>
      = ws() "get" ws() arg:token() ws() { Request::Get(arg) }
      / ws() "jstats" ws() { Request::Jstats }
      / ws() "stats" ws() { Request::Stats }
  }
}

/// A parsed table/virtual-server request line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request<'a> {
  Get(&'a str),
  Stats,
  Jstats,
}

/// Parses one request line (without its trailing `\n`). A parse failure
/// maps to the `400 <reason>` response both line services use for malformed
/// requests.
pub fn parse_request(line_text: &str) -> Result<Request<'_>, String> {
  line::request(line_text).map_err(|e| format!("malformed request: {e}"))
}
