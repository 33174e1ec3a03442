//! Virtual-domain server protocol (§6.2): `get <local@domain>`.

use crate::lookup;
use crate::net::{self, Request, Shared};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

pub fn handle(stream: TcpStream, shared: Arc<Shared>) {
  let mut writer = match stream.try_clone() {
    Ok(w) => w,
    Err(err) => {
      log::warn!("couldn't clone virtual-server connection: {err:#}");
      return;
    }
  };
  let reader = BufReader::new(stream);
  for line in reader.lines() {
    let line = match line {
      Ok(line) => line,
      Err(err) => {
        log::debug!("virtual-server connection read error: {err:#}");
        break;
      }
    };
    if line.trim().is_empty() {
      continue;
    }
    let reply = respond(&line, &shared);
    if let Err(err) = writer.write_all(reply.as_bytes()) {
      log::debug!("virtual-server connection write error: {err:#}");
      break;
    }
  }
}

fn respond(line: &str, shared: &Shared) -> String {
  match net::parse_request(line) {
    Ok(Request::Get(address)) => resolve_address(address, shared),
    Ok(Request::Stats | Request::Jstats) => "400 not supported\n".to_string(),
    Err(reason) => format!("400 {reason}\n"),
  }
}

fn resolve_address(address: &str, shared: &Shared) -> String {
  let Some((local, domain)) = address.rsplit_once('@') else {
    return "400 malformed address\n".to_string();
  };
  if local.is_empty() || domain.is_empty() {
    return "400 malformed address\n".to_string();
  }

  let config = shared.config.load();
  if !config.settings.local_domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
    return "500 not found\n".to_string();
  }

  let timer = shared.resolve_collector.start_timer();
  let (local, domain_hint) = shared.processor.preprocess(local, Some(domain));
  let resolution = lookup::resolve(&config, &local);
  timer.stop();

  match resolution.account {
    Some(account) => {
      let (account, domain_hint) = shared.processor.postprocess(&account, domain_hint.as_deref());
      let domain = domain_hint.unwrap_or_else(|| domain.to_string());
      format!("200 {account}@{domain}\n")
    }
    None => "500 not found\n".to_string(),
  }
}
