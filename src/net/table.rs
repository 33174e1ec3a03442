//! Table-server protocol (§6.1): `get <alias>`, `stats`, `jstats`.

use crate::lookup;
use crate::net::{self, Request, Shared};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

/// Services one table-server connection until the peer closes it or a write
/// fails. Requests are handled strictly in arrival order (§5's "Ordering").
pub fn handle(stream: TcpStream, shared: Arc<Shared>) {
  let mut writer = match stream.try_clone() {
    Ok(w) => w,
    Err(err) => {
      log::warn!("couldn't clone table connection: {err:#}");
      return;
    }
  };
  let reader = BufReader::new(stream);
  for line in reader.lines() {
    let line = match line {
      Ok(line) => line,
      Err(err) => {
        log::debug!("table connection read error: {err:#}");
        break;
      }
    };
    if line.trim().is_empty() {
      continue;
    }
    let reply = respond(&line, &shared);
    if let Err(err) = writer.write_all(reply.as_bytes()) {
      log::debug!("table connection write error: {err:#}");
      break;
    }
  }
}

fn respond(line: &str, shared: &Shared) -> String {
  match net::parse_request(line) {
    Ok(Request::Get(alias)) => {
      let config = shared.config.load();
      let timer = shared.resolve_collector.start_timer();
      let (alias, _) = shared.processor.preprocess(alias, None);
      let resolution = lookup::resolve(&config, &alias);
      timer.stop();
      match resolution.account {
        Some(account) => {
          let (account, _) = shared.processor.postprocess(&account, None);
          format!("200 {account}\n")
        }
        None => "500 not found\n".to_string(),
      }
    }
    Ok(Request::Stats) => stats_lines(shared),
    Ok(Request::Jstats) => jstats_line(shared),
    Err(reason) => format!("400 {reason}\n"),
  }
}

fn stats_lines(shared: &Shared) -> String {
  if shared.config.load().settings.statistics == 0 {
    return "400 statistics disabled\n".to_string();
  }
  let mut out = String::new();
  for (i, collector) in shared.statistics.stats().iter().enumerate() {
    let code = if i == 0 { 210 } else { 212 };
    out.push_str(&format!("{code} {}\n", collector.format_line()));
  }
  out
}

fn jstats_line(shared: &Shared) -> String {
  if shared.config.load().settings.statistics == 0 {
    return "400 statistics disabled\n".to_string();
  }
  match serde_json::to_string(&shared.statistics.stats()) {
    Ok(payload) => format!("210 {payload}\n"),
    Err(err) => format!("400 couldn't serialize statistics: {err}\n"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Configuration;
  use crate::processor::Identity;

  fn shared(source: &str) -> Shared {
    Shared::new(Configuration::load(source).unwrap(), Box::new(Identity))
  }

  #[test]
  fn get_resolves_a_matching_alias() {
    let shared = shared("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n");
    assert_eq!(respond("get bar", &shared), "200 foo\n");
  }

  #[test]
  fn get_reports_not_found() {
    let shared = shared("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n");
    assert_eq!(respond("get nope", &shared), "500 not found\n");
  }

  #[test]
  fn malformed_request_reports_400() {
    let shared = shared("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n");
    assert!(respond("get", &shared).starts_with("400 "));
  }

  #[test]
  fn stats_disabled_by_default() {
    let shared = shared("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n");
    assert_eq!(respond("stats", &shared), "400 statistics disabled\n");
  }
}
