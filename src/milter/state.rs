//! `MilterServer` state machine: OPTNEG negotiation, RCPT resolution, EOB
//! rewriting (§4.8, §6.3; `trualias/milter.py`'s `MilterServer`).
//!
//! One `MilterConnection` is built per accepted connection and fed frames in
//! order; it never touches the socket itself, leaving I/O to
//! `crate::net::milter_server`.

use crate::config::Configuration;
use crate::error::ProtocolError;
use crate::lookup;
use crate::milter;
use crate::processor::Processor;
use crate::verifier::{Verdict, Verifier};

/// A recipient as presented by the MTA, parsed out of its `<local@domain>`
/// envelope form (`Recipient` in the original).
pub struct Recipient {
  pub original: String,
  pub local: String,
  pub domain: String,
  alias: Option<String>,
}

impl Recipient {
  /// Parses `<local@domain>`. Angle brackets are located independently, the
  /// way the original does with `find('<')`/`rfind('>')`, so a display name
  /// outside the brackets doesn't confuse the split.
  pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
    let start = raw.find('<').ok_or_else(|| ProtocolError(format!("recipient missing '<': {raw:?}")))?;
    let end = raw.rfind('>').ok_or_else(|| ProtocolError(format!("recipient missing '>': {raw:?}")))?;
    if end < start {
      return Err(ProtocolError(format!("malformed recipient brackets: {raw:?}")));
    }
    let addr = &raw[start + 1..end];
    let at = addr.rfind('@').ok_or_else(|| ProtocolError(format!("recipient missing '@': {raw:?}")))?;
    let local = &addr[..at];
    let domain = &addr[at + 1..];
    if local.is_empty() {
      return Err(ProtocolError(format!("recipient has no account name: {raw:?}")));
    }
    if domain.is_empty() {
      return Err(ProtocolError(format!("recipient has no domain name: {raw:?}")));
    }
    Ok(Recipient { original: raw.to_string(), local: local.to_string(), domain: domain.to_lowercase(), alias: None })
  }

  pub fn set_alias(&mut self, account: String) {
    self.alias = Some(account);
  }

  pub fn set_noalias(&mut self) {
    self.alias = None;
  }

  fn delivery_local(&self) -> &str {
    self.alias.as_deref().unwrap_or(&self.local)
  }

  /// True if the resolved account differs from what the MTA originally sent,
  /// i.e. this recipient needs a DELRCPT/ADDRCPT pair at end-of-body.
  fn rewritten(&self) -> bool {
    self.alias.as_deref().is_some_and(|a| a != self.local)
  }

  fn rewritten_address(&self) -> String {
    format!("<{}@{}>", self.delivery_local(), self.domain)
  }
}

/// Per-connection milter state: negotiated capabilities and the recipient
/// list accumulated since the last context reset.
pub struct MilterConnection {
  domains: Vec<String>,
  processor: Box<dyn Processor>,
  verifier: Box<dyn Verifier>,
  negotiated_proto_exts: u32,
  recipients: Vec<Recipient>,
}

/// One reply frame the caller must write back to the MTA.
pub type Reply = (u8, Vec<u8>);

impl MilterConnection {
  pub fn new(domains: Vec<String>, processor: Box<dyn Processor>, verifier: Box<dyn Verifier>) -> Self {
    MilterConnection { domains, processor, verifier, negotiated_proto_exts: 0, recipients: Vec::new() }
  }

  fn is_local_domain(&self, domain: &str) -> bool {
    self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
  }

  /// Handles one frame, returning the reply frame(s) to write back (possibly
  /// none, if the negotiated protocol extensions say the MTA isn't expecting
  /// one).
  pub fn handle(&mut self, config: &Configuration, cmd: u8, payload: &[u8]) -> Result<Vec<Reply>, ProtocolError> {
    if milter::SMFIC_CONTEXT_RESET.contains(&cmd) {
      self.recipients.clear();
    }

    match cmd {
      milter::SMFIC_OPTNEG => Ok(vec![self.negotiate(payload)?]),
      milter::SMFIC_RCPT => self.handle_rcpt(config, payload),
      milter::SMFIC_EOB => Ok(self.handle_eob()),
      _ => Ok(self.maybe_continue(cmd)),
    }
  }

  fn negotiate(&mut self, payload: &[u8]) -> Result<Reply, ProtocolError> {
    if payload.len() < 12 {
      return Err(ProtocolError("OPTNEG payload too short".to_string()));
    }
    let version = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let actions = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let proto_exts = u32::from_be_bytes(payload[8..12].try_into().unwrap());

    if version < milter::VERSION {
      return Err(ProtocolError(format!("MTA offered milter version {version}, need at least {}", milter::VERSION)));
    }
    if actions & milter::REQUIRED_ACTIONS != milter::REQUIRED_ACTIONS {
      return Err(ProtocolError("MTA doesn't grant ADDRCPT/DELRCPT actions".to_string()));
    }
    self.negotiated_proto_exts = proto_exts & milter::SUPPORTED_PROTO_EXTS;

    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&milter::VERSION.to_be_bytes());
    body.extend_from_slice(&milter::REQUIRED_ACTIONS.to_be_bytes());
    body.extend_from_slice(&self.negotiated_proto_exts.to_be_bytes());
    Ok((milter::SMFIC_OPTNEG, body))
  }

  fn handle_rcpt(&mut self, config: &Configuration, payload: &[u8]) -> Result<Vec<Reply>, ProtocolError> {
    let strings = milter::unpack_strings(payload);
    let raw = strings.first().ok_or_else(|| ProtocolError("RCPT command with no address".to_string()))?;
    let mut recipient = Recipient::parse(raw)?;

    if !self.is_local_domain(&recipient.domain) {
      self.recipients.push(recipient);
      return Ok(vec![(milter::SMFIR_CONTINUE, Vec::new())]);
    }

    let (alias, domain) = self.processor.preprocess(&recipient.local, Some(&recipient.domain));
    let resolution = lookup::resolve(config, &alias);
    let _ = domain;

    match &resolution.account {
      Some(account) => {
        let (account, _) = self.processor.postprocess(account, Some(&recipient.domain));
        let address = format!("{}@{}", account, recipient.domain);
        match self.verifier.verify(&address) {
          Verdict::Accept => {
            recipient.set_alias(account);
            self.recipients.push(recipient);
            Ok(vec![(milter::SMFIR_CONTINUE, Vec::new())])
          }
          Verdict::Reject | Verdict::Error => {
            recipient.set_noalias();
            self.recipients.push(recipient);
            Ok(vec![milter::reply_reject()])
          }
        }
      }
      None => {
        recipient.set_noalias();
        self.recipients.push(recipient);
        Ok(vec![milter::reply_reject()])
      }
    }
  }

  fn handle_eob(&mut self) -> Vec<Reply> {
    let mut replies = Vec::new();
    for recipient in &self.recipients {
      if recipient.rewritten() {
        replies.push(milter::reply_strings(milter::SMFIR_DELRCPT, &[&recipient.original]));
        replies.push(milter::reply_strings(milter::SMFIR_ADDRCPT, &[&recipient.rewritten_address()]));
      }
    }
    replies.push((milter::SMFIR_CONTINUE, Vec::new()));
    replies
  }

  /// Commands we don't interpret still need an ack unless the negotiated
  /// extensions say the MTA isn't waiting for one.
  fn maybe_continue(&self, cmd: u8) -> Vec<Reply> {
    match milter::no_reply_bit(cmd) {
      Some(bit) if self.negotiated_proto_exts & bit != 0 => Vec::new(),
      _ => vec![(milter::SMFIR_CONTINUE, Vec::new())],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::processor::Identity;
  use crate::verifier::AlwaysAccept;

  fn config() -> Configuration {
    Configuration::load("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n").unwrap()
  }

  fn connection(domains: &[&str]) -> MilterConnection {
    MilterConnection::new(domains.iter().map(|s| s.to_string()).collect(), Box::new(Identity), Box::new(AlwaysAccept))
  }

  #[test]
  fn parses_recipient_envelope() {
    let r = Recipient::parse("<bar@example.net>").unwrap();
    assert_eq!(r.local, "bar");
    assert_eq!(r.domain, "example.net");
  }

  #[test]
  fn rejects_recipient_without_angle_brackets() {
    assert!(Recipient::parse("bar@example.net").is_err());
  }

  #[test]
  fn negotiate_clamps_to_supported_extensions_and_required_actions() {
    let mut conn = connection(&["example.net"]);
    let mut payload = Vec::new();
    payload.extend_from_slice(&7u32.to_be_bytes());
    payload.extend_from_slice(&(milter::REQUIRED_ACTIONS | 0x10000).to_be_bytes());
    payload.extend_from_slice(&0xffffffffu32.to_be_bytes());
    let (cmd, body) = conn.negotiate(&payload).unwrap();
    assert_eq!(cmd, milter::SMFIC_OPTNEG);
    let negotiated = u32::from_be_bytes(body[8..12].try_into().unwrap());
    assert_eq!(negotiated, milter::SUPPORTED_PROTO_EXTS);
  }

  #[test]
  fn rcpt_in_local_domain_resolves_and_continues() {
    let mut conn = connection(&["example.net"]);
    let config = config();
    let payload = {
      let mut p = Vec::new();
      p.extend_from_slice(b"<bar@example.net>\0");
      p
    };
    let replies = conn.handle(&config, milter::SMFIC_RCPT, &payload).unwrap();
    assert_eq!(replies, vec![(milter::SMFIR_CONTINUE, Vec::new())]);
    assert_eq!(conn.recipients.len(), 1);
    assert!(conn.recipients[0].rewritten());
  }

  #[test]
  fn rcpt_outside_local_domains_passes_through_untouched() {
    let mut conn = connection(&["example.net"]);
    let config = config();
    let payload = b"<someone@elsewhere.test>\0".to_vec();
    let replies = conn.handle(&config, milter::SMFIC_RCPT, &payload).unwrap();
    assert_eq!(replies, vec![(milter::SMFIR_CONTINUE, Vec::new())]);
    assert!(!conn.recipients[0].rewritten());
  }

  #[test]
  fn eob_rewrites_only_changed_recipients() {
    let mut conn = connection(&["example.net"]);
    let config = config();
    conn.handle(&config, milter::SMFIC_RCPT, b"<bar@example.net>\0").unwrap();
    let replies = conn.handle_eob();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0].0, milter::SMFIR_DELRCPT);
    assert_eq!(replies[1].0, milter::SMFIR_ADDRCPT);
    assert_eq!(replies[2].0, milter::SMFIR_CONTINUE);
  }

  #[test]
  fn abort_resets_recipient_list() {
    let mut conn = connection(&["example.net"]);
    let config = config();
    conn.handle(&config, milter::SMFIC_RCPT, b"<bar@example.net>\0").unwrap();
    conn.handle(&config, milter::SMFIC_ABORT, &[]).unwrap();
    assert!(conn.recipients.is_empty());
  }
}
