//! End-to-end milter framing and RCPT/EOB handling (§4.8, §6.3).

use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use trualias::config::Configuration;
use trualias::milter;
use trualias::milter::state::MilterConnection;
use trualias::processor::Identity;
use trualias::verifier::AlwaysAccept;

fn config() -> Configuration {
  Configuration::load("ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n").unwrap()
}

fn connection() -> MilterConnection {
  MilterConnection::new(vec!["example.net".to_string()], Box::new(Identity), Box::new(AlwaysAccept))
}

#[test]
fn negotiation_rejects_a_low_version() {
  let mut conn = connection();
  let config = config();
  let mut payload = Vec::new();
  payload.extend_from_slice(&2u32.to_be_bytes());
  payload.extend_from_slice(&milter::REQUIRED_ACTIONS.to_be_bytes());
  payload.extend_from_slice(&0u32.to_be_bytes());
  assert!(conn.handle(&config, milter::SMFIC_OPTNEG, &payload).is_err());
}

#[test]
fn full_transaction_rewrites_an_aliased_recipient_at_eob() {
  let mut conn = connection();
  let config = config();

  let mut optneg = Vec::new();
  optneg.extend_from_slice(&milter::VERSION.to_be_bytes());
  optneg.extend_from_slice(&milter::REQUIRED_ACTIONS.to_be_bytes());
  optneg.extend_from_slice(&0u32.to_be_bytes());
  conn.handle(&config, milter::SMFIC_OPTNEG, &optneg).unwrap();

  let rcpt_payload = milter::reply_strings(milter::SMFIC_RCPT, &["<bar@example.net>"]).1;
  let replies = conn.handle(&config, milter::SMFIC_RCPT, &rcpt_payload).unwrap();
  assert_eq!(replies, vec![(milter::SMFIR_CONTINUE, Vec::new())]);

  let eob = conn.handle(&config, milter::SMFIC_EOB, &[]).unwrap();
  assert_eq!(eob.len(), 3);
  assert_eq!(eob[0].0, milter::SMFIR_DELRCPT);
  assert_eq!(milter::unpack_strings(&eob[0].1), vec!["<bar@example.net>".to_string()]);
  assert_eq!(eob[1].0, milter::SMFIR_ADDRCPT);
  assert_eq!(milter::unpack_strings(&eob[1].1), vec!["<foo@example.net>".to_string()]);
  assert_eq!(eob[2].0, milter::SMFIR_CONTINUE);
}

#[test]
fn recipient_outside_local_domains_is_never_rewritten() {
  let mut conn = connection();
  let config = config();
  let rcpt_payload = milter::reply_strings(milter::SMFIC_RCPT, &["<someone@elsewhere.test>"]).1;
  conn.handle(&config, milter::SMFIC_RCPT, &rcpt_payload).unwrap();
  let eob = conn.handle(&config, milter::SMFIC_EOB, &[]).unwrap();
  assert_eq!(eob, vec![(milter::SMFIR_CONTINUE, Vec::new())]);
}

#[test]
fn wire_framing_round_trips_over_a_real_socket() {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();

  let server = std::thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let frame = milter::read_frame(&mut stream).unwrap().unwrap();
    assert_eq!(frame.cmd, milter::SMFIC_HELO);
    milter::write_frame(&mut stream, milter::SMFIR_CONTINUE, &[]).unwrap();
  });

  let mut client = TcpStream::connect(addr).unwrap();
  milter::write_frame(&mut client, milter::SMFIC_HELO, b"mail.example.net\0").unwrap();
  let mut len_bytes = [0u8; 4];
  client.read_exact(&mut len_bytes).unwrap();
  assert_eq!(u32::from_be_bytes(len_bytes), 1);
  let mut cmd = [0u8; 1];
  client.read_exact(&mut cmd).unwrap();
  assert_eq!(cmd[0], milter::SMFIR_CONTINUE);

  server.join().unwrap();
}
