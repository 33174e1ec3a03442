//! External account verifier (§6.5; `trualias/smtplib.py`).
//!
//! The milter server primes one of these per connection and calls `verify`
//! for each candidate recipient address. The default implementation speaks
//! just enough SMTP to run `EHLO` once and then `VRFY` per address, closing
//! with `QUIT` on drop.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

/// The outcome of asking an external collaborator whether an address is
/// deliverable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
  Accept,
  Reject,
  Error,
}

/// External collaborator consulted by the milter server before accepting a
/// (possibly aliased) recipient (§6.5). The engine itself never validates
/// deliverability.
pub trait Verifier: Send {
  fn verify(&mut self, address: &str) -> Verdict;
}

/// Minimal synchronous SMTP client good for `EHLO` + `VRFY` + `QUIT` over a
/// `TcpStream` (§6.5's example collaborator).
pub struct SmtpVerifier {
  writer: TcpStream,
  reader: BufReader<TcpStream>,
}

impl SmtpVerifier {
  /// Connects to `addr`, reads the greeting and sends `EHLO local_hostname`.
  /// Any failure here is fatal to constructing the verifier, matching the
  /// original's `init()` raising on a non-220 greeting.
  pub fn connect(addr: impl ToSocketAddrs, local_hostname: &str) -> anyhow::Result<Self> {
    let addr = addr
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| anyhow::anyhow!("no address to connect to"))?;
    let stream = TcpStream::connect_timeout(&addr, TIMEOUT)?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    stream.set_write_timeout(Some(TIMEOUT))?;
    let reader = BufReader::new(stream.try_clone()?);
    let mut verifier = SmtpVerifier { writer: stream, reader };

    let (code, _) = verifier.read_reply()?;
    anyhow::ensure!(code == 220, "unexpected greeting code {code}");
    let (code, _) = verifier.command(&format!("EHLO {}", local_hostname))?;
    anyhow::ensure!(code == 250, "EHLO rejected with code {code}");
    Ok(verifier)
  }

  fn command(&mut self, line: &str) -> anyhow::Result<(u16, String)> {
    self.writer.write_all(line.as_bytes())?;
    self.writer.write_all(b"\r\n")?;
    self.writer.flush()?;
    self.read_reply()
  }

  fn read_reply(&mut self) -> anyhow::Result<(u16, String)> {
    let mut message = String::new();
    loop {
      let mut line = String::new();
      let n = self.reader.read_line(&mut line)?;
      anyhow::ensure!(n > 0, "connection closed mid-reply");
      anyhow::ensure!(line.len() >= 4, "malformed SMTP reply line {line:?}");
      let code: u16 = line[..3].parse().map_err(|_| anyhow::anyhow!("malformed SMTP status {line:?}"))?;
      message.push_str(line[4..].trim_end());
      let continues = line.as_bytes()[3] == b'-';
      if !continues {
        return Ok((code, message));
      }
      message.push('\n');
    }
  }
}

impl Verifier for SmtpVerifier {
  fn verify(&mut self, address: &str) -> Verdict {
    match self.command(&format!("VRFY {}", address)) {
      Ok((code, _)) if (200..300).contains(&code) => Verdict::Accept,
      Ok((550, _)) => Verdict::Reject,
      Ok((code, message)) => {
        log::warn!("VRFY {} returned unexpected status {}: {}", address, code, message);
        Verdict::Error
      }
      Err(err) => {
        log::warn!("VRFY {} failed: {:#}", address, err);
        Verdict::Error
      }
    }
  }
}

impl Drop for SmtpVerifier {
  fn drop(&mut self) {
    let _ = self.command("QUIT");
  }
}

/// A verifier that always accepts; used when no external verifier is
/// configured, or in tests.
pub struct AlwaysAccept;

impl Verifier for AlwaysAccept {
  fn verify(&mut self, _address: &str) -> Verdict {
    Verdict::Accept
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn always_accept_accepts_anything() {
    let mut v = AlwaysAccept;
    assert_eq!(v.verify("foo@example.net"), Verdict::Accept);
  }
}
