//! DSL tokenizer and statement parser (§4.7).
//!
//! Lines beginning with `#` are comments; statements are whitespace
//! delimited. `(`, `)`, `,`, `;`, `:` are always split off into their own
//! tokens regardless of surrounding whitespace, so a calc list like
//! `ANY(),VOWELS(),ANY();` tokenizes the same whether or not it carries
//! spaces around the punctuation. Scalar settings run to end-of-line; alias
//! specs run to the next `;` and may span lines.

use super::Settings;
use crate::alias::{Alias, CalcCall, CalcExpression, FieldKind, IdentRef, MatchExpression};
use crate::error::{ConfigError, ParseError};

struct Token {
  text: String,
  line: usize,
}

fn tokenize(source: &str) -> Vec<Token> {
  let mut tokens = Vec::new();
  for (i, raw_line) in source.lines().enumerate() {
    let line_no = i + 1;
    if raw_line.trim_start().starts_with('#') {
      continue;
    }
    let mut spaced = String::with_capacity(raw_line.len());
    for ch in raw_line.chars() {
      if "(),;:".contains(ch) {
        spaced.push(' ');
        spaced.push(ch);
        spaced.push(' ');
      } else {
        spaced.push(ch);
      }
    }
    for word in spaced.split_whitespace() {
      tokens.push(Token { text: word.to_string(), line: line_no });
    }
  }
  tokens
}

struct Cursor {
  tokens: Vec<Token>,
  pos: usize,
}

impl Cursor {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_is(&self, text: &str) -> bool {
    self.peek().map_or(false, |t| t.text == text)
  }

  fn bump(&mut self) -> Option<Token> {
    if self.pos < self.tokens.len() {
      let t = self.tokens.remove(self.pos);
      Some(t)
    } else {
      None
    }
  }

  fn current_line(&self) -> usize {
    self.peek().map(|t| t.line).unwrap_or(self.tokens.last().map(|t| t.line).unwrap_or(1))
  }

  fn expect_word(&mut self) -> Result<Token, ParseError> {
    self.bump().ok_or_else(|| ParseError::new("unexpected end of configuration", self.current_line()))
  }

  fn expect_punct(&mut self, text: &str) -> Result<(), ParseError> {
    let line = self.current_line();
    match self.bump() {
      Some(t) if t.text == text => Ok(()),
      Some(t) => Err(ParseError::new(format!("expected \"{}\", found \"{}\"", text, t.text), t.line)),
      None => Err(ParseError::new(format!("expected \"{}\", found end of configuration", text), line)),
    }
  }

  fn expect_keyword(&mut self, text: &str) -> Result<usize, ParseError> {
    let line = self.current_line();
    match self.bump() {
      Some(t) if t.text == text => Ok(t.line),
      Some(t) => Err(ParseError::new(format!("expected \"{}\", found \"{}\"", text, t.text), t.line)),
      None => Err(ParseError::new(format!("expected \"{}\", found end of configuration", text), line)),
    }
  }
}

/// Result of parsing the whole configuration: scalar settings plus alias specs.
pub struct ParsedConfig {
  pub settings: Settings,
  pub specs: Vec<Alias>,
}

const SCALAR_FIRST_WORDS: &[&str] = &["HOST", "PORT", "LOGGING", "DEBUG", "STATISTICS", "PROCESSOR", "SMTP", "LOCAL"];

pub fn parse(source: &str) -> Result<ParsedConfig, ConfigError> {
  let mut cursor = Cursor { tokens: tokenize(source), pos: 0 };
  let mut settings = Settings::default();
  let mut specs = Vec::new();

  while let Some(tok) = cursor.peek() {
    if tok.text == "ACCOUNT" {
      specs.push(parse_alias_spec(&mut cursor)?);
    } else if SCALAR_FIRST_WORDS.contains(&tok.text.as_str()) {
      parse_setting(&mut cursor, &mut settings)?;
    } else {
      return Err(ConfigError::Parse(ParseError::new(format!("unrecognized statement \"{}\"", tok.text), tok.line)));
    }
  }

  Ok(ParsedConfig { settings, specs })
}

fn parse_setting(cursor: &mut Cursor, settings: &mut Settings) -> Result<(), ConfigError> {
  let first = cursor.expect_word()?;
  let (key, line) = if matches!(first.text.as_str(), "DEBUG" | "SMTP" | "LOCAL") {
    let second = cursor.expect_word()?;
    (format!("{} {}", first.text, second.text), first.line)
  } else {
    (first.text.clone(), first.line)
  };
  cursor.expect_punct(":")?;

  let mut values = Vec::new();
  while let Some(t) = cursor.peek() {
    if t.line != line {
      break;
    }
    values.push(cursor.bump().unwrap().text);
  }
  let value = values.join(" ");
  if value.is_empty() {
    return Err(ConfigError::Parse(ParseError::new(format!("\"{}\" requires a value", key), line)));
  }

  apply_setting(settings, &key, &value, line)?;
  Ok(())
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str, line: usize) -> Result<(), ParseError> {
  match key {
    "HOST" => {
      value.parse::<std::net::IpAddr>().map_err(|_| ParseError::new(format!("not a valid address: \"{}\"", value), line))?;
      settings.host = value.to_string();
    }
    "PORT" => settings.port = parse_port(value, line)?,
    "LOGGING" => settings.logging = parse_loglevel(value, line)?,
    "DEBUG ACCOUNT" => settings.debug_account = Some(parse_account(value, line)?),
    "STATISTICS" => settings.statistics = parse_statistics(value),
    "PROCESSOR" => settings.processor = Some(value.to_string()),
    "SMTP HOST" => settings.smtp_host = Some(value.to_string()),
    "SMTP PORT" => settings.smtp_port = parse_port(value, line)?,
    "LOCAL HOST" => settings.local_host = Some(value.to_string()),
    "LOCAL DOMAINS" => settings.local_domains = value.split_whitespace().map(|s| s.to_lowercase()).collect(),
    other => return Err(ParseError::new(format!("unrecognized configuration item \"{}\"", other), line)),
  }
  Ok(())
}

fn parse_port(value: &str, line: usize) -> Result<u16, ParseError> {
  value.parse::<u16>().map_err(|_| ParseError::new(format!("not a valid port number: \"{}\"", value), line))
}

fn parse_loglevel(value: &str, line: usize) -> Result<log::LevelFilter, ParseError> {
  match value.to_lowercase().as_str() {
    "debug" => Ok(log::LevelFilter::Debug),
    "info" => Ok(log::LevelFilter::Info),
    "warning" | "warn" => Ok(log::LevelFilter::Warn),
    "error" => Ok(log::LevelFilter::Error),
    "critical" => Ok(log::LevelFilter::Error),
    _ => Err(ParseError::new(format!("not a valid logging level: \"{}\"", value), line)),
  }
}

fn parse_account(value: &str, line: usize) -> Result<String, ParseError> {
  if value.contains(' ') || value.contains('@') {
    return Err(ParseError::new(format!("not a valid account: \"{}\"", value), line));
  }
  Ok(value.to_string())
}

fn parse_statistics(value: &str) -> u64 {
  if matches!(value.to_lowercase().as_str(), "none" | "no") {
    return 0;
  }
  value.parse::<i64>().unwrap_or(0).max(0) as u64
}

fn parse_alias_spec(cursor: &mut Cursor) -> Result<Alias, ConfigError> {
  let line = cursor.expect_keyword("ACCOUNT")?;
  let accounts = ident_list(cursor)?;

  let mut account_matcher = FieldKind::Ident;
  if cursor.peek_is("USING") {
    cursor.bump();
    let tok = cursor.expect_word()?;
    account_matcher = match FieldKind::from_name(&tok.text.to_lowercase()) {
      Some(k @ (FieldKind::Alnum | FieldKind::Alpha | FieldKind::Number | FieldKind::Ident | FieldKind::Fqdn)) => k,
      _ => return Err(ConfigError::Parse(ParseError::new(format!("unrecognized identifier matcher \"{}\"", tok.text), tok.line))),
    };
  }

  let mut aliases = Vec::new();
  if cursor.peek_is("ALIASED") {
    cursor.bump();
    aliases = ident_list(cursor)?;
  }

  cursor.expect_keyword("MATCHES")?;
  let expr_tok = cursor.expect_word()?;
  let mut matchex = MatchExpression::compile(&expr_tok.text, expr_tok.line)?;
  matchex.account_matcher = account_matcher;

  cursor.expect_keyword("WITH")?;
  let calcs = parse_calc_list(cursor, &matchex, !aliases.is_empty())?;
  cursor.expect_punct(";")?;

  Ok(Alias {
    accounts,
    aliases,
    matchex,
    calc: CalcExpression { calcs, line: expr_tok.line },
    line,
    unique: false,
  })
}

fn ident_list(cursor: &mut Cursor) -> Result<Vec<String>, ConfigError> {
  let mut idents = vec![cursor.expect_word()?.text];
  while cursor.peek_is(",") {
    cursor.bump();
    idents.push(cursor.expect_word()?.text);
  }
  Ok(idents)
}

fn parse_calc_list(cursor: &mut Cursor, matchex: &MatchExpression, has_aliases: bool) -> Result<Vec<CalcCall>, ConfigError> {
  let mut calcs = Vec::new();
  loop {
    let name_tok = cursor.expect_word()?;
    cursor.expect_punct("(")?;
    let mut args = Vec::new();
    if !cursor.peek_is(")") {
      args.push(cursor.expect_word()?.text);
      while cursor.peek_is(",") {
        cursor.bump();
        args.push(cursor.expect_word()?.text);
      }
    }
    cursor.expect_punct(")")?;
    calcs.push(build_calc_call(&name_tok.text, args, matchex, has_aliases, name_tok.line)?);
    if cursor.peek_is(",") {
      cursor.bump();
      continue;
    }
    break;
  }
  Ok(calcs)
}

fn parse_ident_ref(arg: &str, line: usize) -> Result<IdentRef, ParseError> {
  match arg.to_lowercase().as_str() {
    "account" => Ok(IdentRef::Account),
    "alias" => Ok(IdentRef::Alias),
    _ => arg
      .parse::<usize>()
      .map(|i| IdentRef::Index(i, true))
      .map_err(|_| ParseError::new(format!("expected an identifier index, \"account\" or \"alias\", found \"{}\"", arg), line)),
  }
}

fn parse_i64(arg: &str, line: usize) -> Result<i64, ParseError> {
  arg.parse::<i64>().map_err(|_| ParseError::new(format!("expected an integer, found \"{}\"", arg), line))
}

fn parse_default_char(arg: &str, line: usize) -> Result<char, ParseError> {
  let mut chars = arg.chars();
  let c = chars.next().ok_or_else(|| ParseError::new("CHAR default must be a single character", line))?;
  if chars.next().is_some() {
    return Err(ParseError::new(format!("CHAR default must be a single character, found \"{}\"", arg), line));
  }
  Ok(c)
}

fn build_calc_call(name: &str, args: Vec<String>, matchex: &MatchExpression, has_aliases: bool, line: usize) -> Result<CalcCall, ConfigError> {
  let wrap = |r: Result<CalcCall, ParseError>| r.map_err(ConfigError::Parse);

  if name.eq_ignore_ascii_case("CHAR") {
    return wrap((|| {
      if args.len() < 2 {
        return Err(ParseError::new("CHAR() requires at least 2 arguments", line));
      }
      let n = matchex.identifiers;
      let mut idx = 0;
      let ident = if n > 1 {
        let r = parse_ident_ref(&args[0], line)?;
        idx += 1;
        r
      } else {
        IdentRef::Index(1, false)
      };
      let is_fqdn = matches!(ident, IdentRef::Index(i, _) if matchex.fqdns.contains(&i));
      let label = if is_fqdn {
        let v = args.get(idx).ok_or_else(|| ParseError::new("CHAR() missing label argument for fqdn identifier", line))?;
        idx += 1;
        parse_i64(v, line)?
      } else {
        0
      };
      let offset_arg = args.get(idx).ok_or_else(|| ParseError::new("CHAR() missing offset argument", line))?;
      let offset = parse_i64(offset_arg, line)?;
      idx += 1;
      let default_arg = args.get(idx).ok_or_else(|| ParseError::new("CHAR() missing default argument", line))?;
      let default = parse_default_char(default_arg, line)?;
      idx += 1;
      if idx != args.len() {
        return Err(ParseError::new("CHAR() has too many arguments", line));
      }
      Ok(CalcCall::Char { ident, label, offset, default })
    })());
  }

  wrap((|| {
    if args.len() > 1 {
      return Err(ParseError::new(format!("{}() requires at most 1 argument", name), line));
    }
    if matchex.identifiers > 1 && args.is_empty() {
      return Err(ParseError::new(format!("{}() requires an identifier index", name), line));
    }
    let ident = if args.is_empty() { IdentRef::Index(1, false) } else { parse_ident_ref(&args[0], line)? };
    if matches!(ident, IdentRef::Alias) && !has_aliases {
      return Err(ParseError::new(format!("\"alias\" referenced in {}() but no aliases present", name), line));
    }
    match name.to_uppercase().as_str() {
      "DIGITS" => Ok(CalcCall::Digits(ident)),
      "ALPHAS" => Ok(CalcCall::Alphas(ident)),
      "LABELS" => Ok(CalcCall::Labels(ident)),
      "CHARS" => Ok(CalcCall::Chars(ident)),
      "VOWELS" => Ok(CalcCall::Vowels(ident)),
      "ANY" => Ok(CalcCall::Any(ident)),
      "NONE" => Ok(CalcCall::None_(ident)),
      other => Err(ParseError::new(format!("unrecognized calc function \"{}\"", other), line)),
    }
  })())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tokenizes_calc_list_without_spaces() {
    let toks = tokenize("ACCOUNT foo MATCHES %ident%.%code% WITH ANY(),VOWELS(),ANY();");
    let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(
      texts,
      vec!["ACCOUNT", "foo", "MATCHES", "%ident%.%code%", "WITH", "ANY", "(", ")", ",", "VOWELS", "(", ")", ",", "ANY", "(", ")", ";"]
    );
  }

  #[test]
  fn parses_minimal_spec() {
    let parsed = parse("ACCOUNT foo MATCHES %ident%.%code% WITH ANY();").unwrap();
    assert_eq!(parsed.specs.len(), 1);
    assert_eq!(parsed.specs[0].accounts, vec!["foo".to_string()]);
  }

  #[test]
  fn parses_scalar_settings() {
    let parsed = parse("HOST: 127.0.0.1\nPORT: 3047\nDEBUG ACCOUNT: nobody\n").unwrap();
    assert_eq!(parsed.settings.host, "127.0.0.1");
    assert_eq!(parsed.settings.port, 3047);
    assert_eq!(parsed.settings.debug_account, Some("nobody".to_string()));
  }

  #[test]
  fn rejects_unrecognized_calc_function() {
    let err = parse("ACCOUNT foo MATCHES %ident%.%code% WITH NOPE();").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }
}
