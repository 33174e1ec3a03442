//! Milter accept loop: wires the frame codec and state machine to a socket,
//! priming a verifier per connection (§4.8, §6.3, §6.5).

use crate::milter;
use crate::milter::state::MilterConnection;
use crate::net::Shared;
use crate::processor::Identity;
use crate::verifier::{AlwaysAccept, SmtpVerifier, Verifier};
use std::net::TcpStream;
use std::sync::Arc;

/// Services one milter connection until the MTA disconnects or a fatal
/// protocol error occurs (§4.8's "Failure model").
pub fn handle(stream: TcpStream, shared: Arc<Shared>) {
  let mut reader = match stream.try_clone() {
    Ok(s) => s,
    Err(err) => {
      log::warn!("couldn't clone milter connection: {err:#}");
      return;
    }
  };
  let mut writer = stream;

  let config = shared.config.load();
  let domains = config.settings.local_domains.clone();
  let verifier = connect_verifier(&config);
  let mut connection = MilterConnection::new(domains, Box::new(Identity), verifier);

  loop {
    let frame = match milter::read_frame(&mut reader) {
      Ok(Some(frame)) => frame,
      Ok(None) => break,
      Err(err) => {
        log::warn!("milter connection framing error: {err:#}");
        break;
      }
    };

    let config = shared.config.load();
    let timer = shared.resolve_collector.start_timer();
    let replies = connection.handle(&config, frame.cmd, &frame.payload);
    timer.stop();

    match replies {
      Ok(replies) => {
        for (cmd, payload) in replies {
          if let Err(err) = milter::write_frame(&mut writer, cmd, &payload) {
            log::debug!("milter connection write error: {err:#}");
            return;
          }
        }
      }
      Err(err) => {
        log::warn!("fatal milter protocol error: {err}");
        let _ = milter::write_frame(&mut writer, milter::SMFIR_REJECT, &[]);
        break;
      }
    }
  }
}

fn connect_verifier(config: &crate::config::Configuration) -> Box<dyn Verifier> {
  match (&config.settings.smtp_host, &config.settings.local_host) {
    (Some(host), Some(local_host)) => match SmtpVerifier::connect((host.as_str(), config.settings.smtp_port), local_host) {
      Ok(verifier) => Box::new(verifier),
      Err(err) => {
        log::warn!("couldn't connect verifier to {host}:{}: {err:#}", config.settings.smtp_port);
        Box::new(AlwaysAccept)
      }
    },
    _ => Box::new(AlwaysAccept),
  }
}
