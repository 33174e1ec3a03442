//! Milter wire protocol: constants and frame codec (§4.8, §6.3).
//!
//! Bit-exact framing: a big-endian `u32` length, a 1-byte command code, then
//! payload bytes. Payload strings are NUL-terminated and concatenated.
//! Grounded in `trualias/milter.py`'s `read_command`/`write_command`/
//! `unpack_strings`.

pub mod state;

use std::io::{self, Read, Write};

// Commands (§4.8), in the original's typical execution order.
pub const SMFIC_OPTNEG: u8 = b'O';
pub const SMFIC_MACRO: u8 = b'D';
pub const SMFIC_CONNECT: u8 = b'C';
pub const SMFIC_UNKNOWN: u8 = b'U';
pub const SMFIC_HELO: u8 = b'H';
pub const SMFIC_ABORT: u8 = b'A';
pub const SMFIC_MAIL: u8 = b'M';
pub const SMFIC_RCPT: u8 = b'R';
pub const SMFIC_DATA: u8 = b'T';
pub const SMFIC_HEADER: u8 = b'L';
pub const SMFIC_EOH: u8 = b'N';
pub const SMFIC_BODY: u8 = b'B';
pub const SMFIC_EOB: u8 = b'E';
pub const SMFIC_QUIT: u8 = b'Q';
pub const SMFIC_QUIT_NC: u8 = b'K';

// Actions emitted (subset, §4.8).
pub const SMFIR_ADDRCPT: u8 = b'+';
pub const SMFIR_DELRCPT: u8 = b'-';
pub const SMFIR_CONTINUE: u8 = b'c';
pub const SMFIR_REJECT: u8 = b'r';
pub const SMFIR_TEMPFAIL: u8 = b't';

// Requested-actions bitmask (subset the server requires).
pub const SMFIF_ADDRCPT: u32 = 0x0004;
pub const SMFIF_DELRCPT: u32 = 0x0008;

// Protocol-extension bits ("the MTA shouldn't send X" / "doesn't expect a reply to X").
pub const SMFIP_NOCONNECT: u32 = 0x000001;
pub const SMFIP_NOHELO: u32 = 0x000002;
pub const SMFIP_NOMAIL: u32 = 0x000004;
pub const SMFIP_NOBODY: u32 = 0x000010;
pub const SMFIP_NOHDRS: u32 = 0x000020;
pub const SMFIP_NOEOH: u32 = 0x000040;
pub const SMFIP_NOUNKNOWN: u32 = 0x000100;
pub const SMFIP_NODATA: u32 = 0x000200;
pub const SMFIP_NR_HDR: u32 = 0x000080;
pub const SMFIP_NR_CONN: u32 = 0x001000;
pub const SMFIP_NR_HELO: u32 = 0x002000;
pub const SMFIP_NR_MAIL: u32 = 0x004000;
pub const SMFIP_NR_DATA: u32 = 0x010000;
pub const SMFIP_NR_UNKN: u32 = 0x020000;
pub const SMFIP_NR_EOH: u32 = 0x040000;
pub const SMFIP_NR_BODY: u32 = 0x080000;

pub const VERSION: u32 = 6;
pub const REQUIRED_ACTIONS: u32 = SMFIF_ADDRCPT | SMFIF_DELRCPT;
pub const SUPPORTED_PROTO_EXTS: u32 = SMFIP_NOCONNECT
  | SMFIP_NOHELO
  | SMFIP_NOMAIL
  | SMFIP_NOBODY
  | SMFIP_NOHDRS
  | SMFIP_NOEOH
  | SMFIP_NR_HDR
  | SMFIP_NOUNKNOWN
  | SMFIP_NODATA
  | SMFIP_NR_CONN
  | SMFIP_NR_HELO
  | SMFIP_NR_MAIL
  | SMFIP_NR_DATA
  | SMFIP_NR_UNKN
  | SMFIP_NR_EOH
  | SMFIP_NR_BODY;

/// Commands that start a new recipient transaction: any buffered recipient
/// state must be cleared before processing them (`SMFIC_CONTEXT_RESET` in
/// the original).
pub const SMFIC_CONTEXT_RESET: [u8; 4] = [SMFIC_ABORT, SMFIC_EOB, SMFIC_QUIT, SMFIC_QUIT_NC];

/// Maps a command that may skip its reply to the extension bit that, when
/// negotiated, means "the MTA doesn't expect a reply to this command"
/// (`SMFIC_TO_SMFIP` in the original).
pub fn no_reply_bit(cmd: u8) -> Option<u32> {
  Some(match cmd {
    SMFIC_HEADER => SMFIP_NR_HDR,
    SMFIC_CONNECT => SMFIP_NR_CONN,
    SMFIC_HELO => SMFIP_NR_HELO,
    SMFIC_MAIL => SMFIP_NR_MAIL,
    SMFIC_DATA => SMFIP_NR_DATA,
    SMFIC_UNKNOWN => SMFIP_NR_UNKN,
    SMFIC_EOH => SMFIP_NR_EOH,
    SMFIC_BODY => SMFIP_NR_BODY,
    _ => return None,
  })
}

/// One framed milter message: a command byte and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
  pub cmd: u8,
  pub payload: Vec<u8>,
}

/// Reads one frame, or `None` on a clean EOF before any bytes of the next
/// frame arrive.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<Frame>> {
  let mut len_bytes = [0u8; 4];
  match reader.read_exact(&mut len_bytes) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e),
  }
  let len = u32::from_be_bytes(len_bytes) as usize;
  if len == 0 {
    return Err(io::Error::new(io::ErrorKind::InvalidData, "zero-length milter frame"));
  }
  let mut body = vec![0u8; len];
  reader.read_exact(&mut body)?;
  let cmd = body[0];
  let payload = body[1..].to_vec();
  Ok(Some(Frame { cmd, payload }))
}

/// Writes one frame: length-prefixed `cmd` followed by `payload` verbatim.
pub fn write_frame(writer: &mut impl Write, cmd: u8, payload: &[u8]) -> io::Result<()> {
  let len = (1 + payload.len()) as u32;
  writer.write_all(&len.to_be_bytes())?;
  writer.write_all(&[cmd])?;
  writer.write_all(payload)?;
  writer.flush()
}

/// Writes a frame whose payload is a sequence of NUL-terminated strings.
pub fn write_strings(writer: &mut impl Write, cmd: u8, strings: &[&str]) -> io::Result<()> {
  let mut payload = Vec::new();
  for s in strings {
    payload.extend_from_slice(s.as_bytes());
    payload.push(0);
  }
  write_frame(writer, cmd, &payload)
}

/// Builds a reply frame's `(cmd, payload)` pair from a set of strings,
/// without writing it anywhere; used by the connection state machine, which
/// doesn't own the socket.
pub fn reply_strings(cmd: u8, strings: &[&str]) -> (u8, Vec<u8>) {
  let mut payload = Vec::new();
  for s in strings {
    payload.extend_from_slice(s.as_bytes());
    payload.push(0);
  }
  (cmd, payload)
}

/// A bare `SMFIR_REJECT` reply, with no payload.
pub fn reply_reject() -> (u8, Vec<u8>) {
  (SMFIR_REJECT, Vec::new())
}

/// Splits a NUL-delimited payload into strings, dropping the Python
/// artifact of a trailing empty string after the final NUL.
pub fn unpack_strings(payload: &[u8]) -> Vec<String> {
  let mut strings: Vec<String> = payload.split(|b| *b == 0).map(|s| String::from_utf8_lossy(s).into_owned()).collect();
  if strings.last().map_or(false, String::is_empty) {
    strings.pop();
  }
  strings
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_a_frame() {
    let mut buf = Vec::new();
    write_strings(&mut buf, SMFIC_RCPT, &["<foo@example.net>"]).unwrap();
    let mut cursor = &buf[..];
    let frame = read_frame(&mut cursor).unwrap().unwrap();
    assert_eq!(frame.cmd, SMFIC_RCPT);
    assert_eq!(unpack_strings(&frame.payload), vec!["<foo@example.net>".to_string()]);
  }

  #[test]
  fn read_frame_returns_none_on_clean_eof() {
    let mut cursor: &[u8] = &[];
    assert_eq!(read_frame(&mut cursor).unwrap(), None);
  }

  #[test]
  fn unpack_strings_drops_trailing_empty() {
    assert_eq!(unpack_strings(b"a\0b\0"), vec!["a".to_string(), "b".to_string()]);
  }
}
