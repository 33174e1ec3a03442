//! Match expressions, sketches, calc expressions and alias specs (§3, §4.2-4.4, §4.6).
//!
//! `MatchExpression::match_against` runs the non-deterministic backtracking
//! enumerator over a compiled sketch and verifies each candidate against the
//! calc expression, turning ambiguity into an explicit `ambiguous` flag on
//! `MatchInfo` rather than raising it as a control-flow exception — matching
//! the "ambiguity as control flow" design note, the recursive enumerator
//! below just returns an empty `Vec` on failure instead of unwinding.

use crate::error::SemanticError;
use crate::matching::{CodeMatcher, Matcher, Shape};
use std::collections::HashSet;

/// A field kind, as named in a `%placeholder%` of a match expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
  Alnum,
  Alpha,
  Number,
  Ident,
  Fqdn,
  Account,
  Alias,
  Code,
}

impl FieldKind {
  pub fn from_name(name: &str) -> Option<Self> {
    Some(match name {
      "alnum" => FieldKind::Alnum,
      "alpha" => FieldKind::Alpha,
      "number" => FieldKind::Number,
      "ident" => FieldKind::Ident,
      "fqdn" => FieldKind::Fqdn,
      "account" => FieldKind::Account,
      "alias" => FieldKind::Alias,
      "code" => FieldKind::Code,
      _ => return None,
    })
  }

  /// Is this one of the two kinds that may sit next to an instance of
  /// itself or each other, but never next to a third kind?
  fn is_friendly(self) -> bool {
    matches!(self, FieldKind::Alpha | FieldKind::Number)
  }

  fn is_field_matcher(self) -> bool {
    matches!(self, FieldKind::Alnum | FieldKind::Alpha | FieldKind::Number | FieldKind::Ident | FieldKind::Fqdn)
  }

  fn matcher(self) -> Matcher {
    match self {
      FieldKind::Alnum => Matcher::alnum(),
      FieldKind::Alpha => Matcher::alpha(),
      FieldKind::Number => Matcher::number(),
      FieldKind::Ident => Matcher::ident(),
      FieldKind::Fqdn => Matcher::fqdn(),
      _ => unreachable!("account/alias/code are not fixed-class matchers"),
    }
  }
}

/// One token of a parsed match expression: a literal run of text, or a
/// `%field%` placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprToken {
  Literal(String),
  Field(FieldKind),
}

/// A matched identifier: the field kind and the exact substring captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identifier {
  pub kind: FieldKind,
  pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LiteralPart {
  Account,
  Alias,
}

/// A literal sketch slot, recording where `account`/`alias` substitutions
/// land inside otherwise-fixed text, so it can be re-rendered per candidate
/// `(account, alias)` pair without recompiling the sketch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SketchLiteral {
  texts: Vec<String>,
  subs: Vec<LiteralPart>,
}

impl SketchLiteral {
  fn render(&self, account: &str, alias: &str) -> String {
    let mut out = String::new();
    out.push_str(&self.texts[0]);
    for (i, sub) in self.subs.iter().enumerate() {
      out.push_str(match sub {
        LiteralPart::Account => account,
        LiteralPart::Alias => alias,
      });
      out.push_str(&self.texts[i + 1]);
    }
    out
  }
}

#[derive(Clone, Debug)]
enum FieldMatcher {
  Fixed(FieldKind, Matcher),
  Code(CodeMatcher),
}

impl FieldMatcher {
  fn kind(&self) -> FieldKind {
    match self {
      FieldMatcher::Fixed(k, _) => *k,
      FieldMatcher::Code(_) => FieldKind::Code,
    }
  }

  fn find(&mut self, address: &[u8], start: usize, end: Option<usize>, minimal: bool) -> Option<(usize, usize)> {
    match self {
      FieldMatcher::Fixed(_, m) => m.find(address, start, end, minimal),
      FieldMatcher::Code(m) => m.find(address, start, end, minimal),
    }
  }
}

#[derive(Clone, Debug)]
enum SketchElem {
  Literal(SketchLiteral),
  Field(FieldMatcher),
}

/// A compiled sketch: alternating literal and field slots, starting and
/// ending with a (possibly empty) literal (§4.2).
#[derive(Clone, Debug)]
pub struct Sketch {
  elems: Vec<SketchElem>,
}

impl Sketch {
  /// Renders account/alias substitutions into concrete literal text and
  /// clones the field matchers fresh (a `CodeMatcher`'s anchor cache is
  /// cheap to rebuild and must not be shared across concurrent lookups).
  fn render(&self, account: &str, alias: &str) -> Vec<RenderedElem> {
    self
      .elems
      .iter()
      .map(|e| match e {
        SketchElem::Literal(l) => RenderedElem::Literal(l.render(account, alias)),
        SketchElem::Field(f) => RenderedElem::Field(f.clone()),
      })
      .collect()
  }
}

enum RenderedElem {
  Literal(String),
  Field(FieldMatcher),
}

impl RenderedElem {
  fn as_literal(&self) -> Option<&str> {
    match self {
      RenderedElem::Literal(s) => Some(s),
      RenderedElem::Field(_) => None,
    }
  }
}

/// A compiled match expression: source text, the token sequence, and (after
/// `build_sketch`) the compiled sketch used to drive matching.
#[derive(Clone, Debug)]
pub struct MatchExpression {
  pub source: String,
  pub line: usize,
  tokens: Vec<ExprToken>,
  pub identifiers: usize,
  pub fqdns: HashSet<usize>,
  /// The matcher used in place of `account`/`alias` for the structural
  /// pre-check only (§4.1's `DEFAULT_ACCOUNT_MATCH`); set by the DSL's
  /// optional `USING` clause, `ident` otherwise.
  pub account_matcher: FieldKind,
  sketch: Option<Sketch>,
  prefilter: Option<Vec<SketchElem>>,
}

const FRIENDLY_ADJACENCY_MSG: &str = "cannot occur next to itself or another matcher outside {alpha, number}";

impl MatchExpression {
  /// Parses `source` (already split on `%` by the caller — see
  /// `config/parser.rs`) into tokens, checking the adjacency invariant from
  /// §3: two field matchers may sit next to each other only if both are
  /// drawn from the friendly set {alpha, number} and are not the same kind.
  pub fn compile(source: &str, line: usize) -> Result<Self, SemanticError> {
    let mut tokens = Vec::new();
    let mut identifiers = 0usize;
    let mut fqdns = HashSet::new();
    let mut state: Option<FieldKind> = None;
    let mut poisoned = false;

    let parts: Vec<&str> = source.split('%').collect();
    let mut outside = false;
    let mut i = 0usize;
    while i < parts.len() {
      let tok = parts[i];
      outside = !outside;
      if outside {
        if tok.is_empty() && i + 2 < parts.len() && parts[i + 1].is_empty() {
          tokens.push(ExprToken::Literal("%".to_string()));
          i += 2;
          outside = true;
          continue;
        }
        tokens.push(ExprToken::Literal(tok.to_string()));
        if !tok.is_empty() {
          state = None;
          poisoned = false;
        }
      } else {
        if tok.is_empty() {
          if i > 0 && parts[i - 1].is_empty() {
            i += 1;
            continue;
          }
          return Err(SemanticError::new("empty matchvalue between '%' delimiters", line));
        }
        let kind = FieldKind::from_name(tok)
          .ok_or_else(|| SemanticError::new(format!("unrecognized matchvalue \"{}\"", tok), line))?;
        if poisoned {
          return Err(SemanticError::new(format!("\"{}\" {}", tok, FRIENDLY_ADJACENCY_MSG), line));
        }
        if kind.is_friendly() {
          if state == Some(kind) {
            return Err(SemanticError::new(format!("\"{}\" cannot occur next to itself", tok), line));
          }
          state = Some(kind);
        } else {
          if state.map_or(false, |s| s.is_friendly()) {
            return Err(SemanticError::new(format!("\"{}\" {}", tok, FRIENDLY_ADJACENCY_MSG), line));
          }
          poisoned = true;
        }
        if kind.is_field_matcher() {
          identifiers += 1;
          if kind == FieldKind::Fqdn {
            fqdns.insert(identifiers);
          }
        }
        tokens.push(ExprToken::Field(kind));
      }
      i += 1;
    }

    Ok(MatchExpression {
      source: source.to_string(),
      line,
      tokens,
      identifiers,
      fqdns,
      account_matcher: FieldKind::Ident,
      sketch: None,
      prefilter: None,
    })
  }

  /// Builds the sketch (§4.2), folding `account`/`alias` placeholders into
  /// the surrounding literal and building the `code` field's `CodeMatcher`
  /// from the calc expression's elementary shapes, in call order. Also
  /// builds the unfolded prefilter sketch, which keeps `account`/`alias` as
  /// real matchers (shaped by `account_matcher`) for a cheap structural
  /// pre-check before the per-candidate enumeration substitutes real
  /// strings in.
  pub fn build_sketch(&mut self, calc: &CalcExpression) {
    let mut prefilter: Vec<SketchElem> = Vec::new();
    for tok in &self.tokens {
      match tok {
        ExprToken::Literal(s) => prefilter.push(SketchElem::Literal(SketchLiteral { texts: vec![s.clone()], subs: vec![] })),
        ExprToken::Field(FieldKind::Account) => {
          prefilter.push(SketchElem::Field(FieldMatcher::Fixed(FieldKind::Account, self.account_matcher.matcher())))
        }
        ExprToken::Field(FieldKind::Alias) => {
          prefilter.push(SketchElem::Field(FieldMatcher::Fixed(FieldKind::Alias, self.account_matcher.matcher())))
        }
        ExprToken::Field(FieldKind::Code) => {
          let mut code = CodeMatcher::new();
          for call in &calc.calcs {
            code.append(call.shape());
          }
          prefilter.push(SketchElem::Field(FieldMatcher::Code(code)));
        }
        ExprToken::Field(kind) => prefilter.push(SketchElem::Field(FieldMatcher::Fixed(*kind, kind.matcher()))),
      }
    }
    self.prefilter = Some(prefilter);

    let mut raw: Vec<RawItem> = Vec::new();
    for tok in &self.tokens {
      match tok {
        ExprToken::Literal(s) => raw.push(RawItem::Literal(s.clone())),
        ExprToken::Field(FieldKind::Account) => raw.push(RawItem::Account),
        ExprToken::Field(FieldKind::Alias) => raw.push(RawItem::Alias),
        ExprToken::Field(FieldKind::Code) => {
          let mut code = CodeMatcher::new();
          for call in &calc.calcs {
            code.append(call.shape());
          }
          raw.push(RawItem::Field(FieldMatcher::Code(code)));
        }
        ExprToken::Field(kind) => raw.push(RawItem::Field(FieldMatcher::Fixed(*kind, kind.matcher()))),
      }
    }

    let mut elems = Vec::new();
    let mut i = 0;
    while i < raw.len() {
      let mut texts = vec![raw[i].literal_text().expect("even index is literal").to_string()];
      let mut subs = Vec::new();
      i += 1;
      loop {
        match raw.get(i) {
          Some(RawItem::Account) => {
            subs.push(LiteralPart::Account);
            i += 1;
            texts.push(raw[i].literal_text().expect("literal follows placeholder").to_string());
            i += 1;
          }
          Some(RawItem::Alias) => {
            subs.push(LiteralPart::Alias);
            i += 1;
            texts.push(raw[i].literal_text().expect("literal follows placeholder").to_string());
            i += 1;
          }
          _ => break,
        }
      }
      elems.push(SketchElem::Literal(SketchLiteral { texts, subs }));
      if let Some(RawItem::Field(f)) = raw.get(i) {
        elems.push(SketchElem::Field(f.clone()));
        i += 1;
      }
    }

    self.sketch = Some(Sketch { elems });
  }

  /// Runs the backtracking enumerator over the compiled sketch for one
  /// `(account, alias)` candidate pair, returning every way the sketch can
  /// consume `address` exactly.
  fn match_sketch_for(&self, account: &str, alias: &str, address: &[u8]) -> Vec<Vec<Identifier>> {
    let sketch = self.sketch.as_ref().expect("build_sketch must run before matching");
    let rendered = sketch.render(account, alias);
    match_sketch(&rendered, address, 0, 0)
  }

  /// Whether any candidate account/alias combination could possibly match
  /// `address` at all, using the prefilter sketch (`account`/`alias` as
  /// real matchers, not placeholders) as a structural pre-check before the
  /// expensive per-candidate enumeration.
  fn quick_reject(&self, address: &[u8]) -> bool {
    let prefilter = self.prefilter.as_ref().expect("build_sketch must run before matching");
    let rendered: Vec<RenderedElem> = prefilter
      .iter()
      .map(|e| match e {
        SketchElem::Literal(l) => RenderedElem::Literal(l.render("", "")),
        SketchElem::Field(f) => RenderedElem::Field(f.clone()),
      })
      .collect();
    match_sketch(&rendered, address, 0, 0).is_empty()
  }

  /// Tests `address` against every `(account, alias)` combination, verifying
  /// each structural match against `calc`, and returns one `MatchInfo` per
  /// account that verified at least one candidate.
  pub fn match_against(&self, calc: &CalcExpression, accounts: &[String], aliases: &[String], address: &str) -> Vec<MatchInfo> {
    let bytes = address.as_bytes();
    if self.quick_reject(bytes) {
      return Vec::new();
    }

    let accounts_iter: Vec<&str> = if accounts.is_empty() { vec![""] } else { accounts.iter().map(String::as_str).collect() };
    let aliases_iter: Vec<&str> = if aliases.is_empty() { vec![""] } else { aliases.iter().map(String::as_str).collect() };

    let mut matches = Vec::new();
    for account in &accounts_iter {
      for alias in &aliases_iter {
        let candidates = self.match_sketch_for(account, alias, bytes);
        if candidates.is_empty() {
          continue;
        }
        let mut verified = Vec::new();
        for idents in candidates {
          let (code, fields) = split_code(&idents);
          let code = match code {
            Some(c) => c,
            None => continue,
          };
          if calc.calculate(&code.value, &fields, account, alias) {
            verified.push(fields);
          }
        }
        if !verified.is_empty() {
          matches.push(MatchInfo {
            delivery_account: account.to_string(),
            built_match: verified[0].clone(),
            ambiguous: verified.len() > 1,
          });
        }
      }
    }
    matches
  }
}

enum RawItem {
  Literal(String),
  Account,
  Alias,
  Field(FieldMatcher),
}

impl RawItem {
  fn literal_text(&self) -> Option<&str> {
    match self {
      RawItem::Literal(s) => Some(s),
      _ => None,
    }
  }
}

fn split_code(idents: &[Identifier]) -> (Option<&Identifier>, Vec<Identifier>) {
  let mut code = None;
  let mut fields = Vec::new();
  for ident in idents {
    if ident.kind == FieldKind::Code {
      code = Some(ident);
    } else if ident.kind.is_field_matcher() {
      fields.push(ident.clone());
    }
  }
  (code, fields)
}

/// The recursive backtracking enumerator (§4.3). Returns one `Vec<Identifier>`
/// per way `address` can be fully consumed by `sketch` from `(i, start_pos)`
/// onward; an empty `Vec` means no way was found — failure is an ordinary
/// return value, never a panic or exception.
fn match_sketch(sketch: &[RenderedElem], address: &[u8], i: usize, start_pos: usize) -> Vec<Vec<Identifier>> {
  // The leading literal at this slot is validated and consumed first: for
  // every call except the very first, this was already done by the caller's
  // `end_literal` check below, but a one-literal sketch (a match expression
  // with no field placeholders at all) has no caller to have done it, so it
  // must happen before the exhaustion check treats `start_pos` as final.
  let mut start_pos = start_pos;
  if start_pos == 0 {
    let literal = sketch[i].as_literal().expect("even index is a literal slot");
    if !address.starts_with(literal.as_bytes()) {
      return Vec::new();
    }
    start_pos = literal.len();
  }

  let sketch_exhausted = i + 1 >= sketch.len();
  let address_exhausted = start_pos >= address.len();
  if sketch_exhausted || address_exhausted {
    return if sketch_exhausted && address_exhausted { vec![vec![]] } else { vec![] };
  }

  let end_literal = if sketch.len() > i + 2 { sketch[i + 2].as_literal() } else { None };
  let mut field = match &sketch[i + 1] {
    RenderedElem::Field(f) => f.clone(),
    RenderedElem::Literal(_) => unreachable!("odd index is a field slot"),
  };

  let mut matches = Vec::new();
  let mut end_offset = start_pos;
  // `end_offset` must be allowed to reach `address.len()` so a field with
  // nothing (or an empty literal) after it can consume all the way to the
  // end of the address — the overwhelmingly common shape, since every spec
  // ends in `%code%` with nothing following.
  while end_offset <= address.len() {
    let ident_value;
    if let Some(end_literal) = end_literal {
      let rest = &address[end_offset..];
      let fits = rest.starts_with(end_literal.as_bytes())
        && end_offset > start_pos
        && field.find(address, start_pos, Some(end_offset.saturating_sub(1)), false).is_some();
      if !fits {
        end_offset += 1;
        continue;
      }
      ident_value = std::str::from_utf8(&address[start_pos..end_offset]).unwrap().to_string();
      // An empty trailing literal must still advance `end_offset`, or a
      // field shape that accepts more than one length here would loop
      // forever re-matching the same span.
      end_offset += end_literal.len().max(1);
    } else {
      if end_offset >= address.len() {
        break;
      }
      end_offset += 1;
      if end_offset - 1 < start_pos || field.find(address, start_pos, Some(end_offset - 1), false).is_none() {
        continue;
      }
      ident_value = std::str::from_utf8(&address[start_pos..end_offset]).unwrap().to_string();
    }

    let sub = match_sketch(sketch, address, i + 2, end_offset);
    if !sub.is_empty() {
      let kind = field.kind();
      for tail in sub {
        let mut full = Vec::with_capacity(tail.len() + 1);
        full.push(Identifier { kind, value: ident_value.clone() });
        full.extend(tail);
        matches.push(full);
      }
    }
  }
  matches
}

/// One example candidate match, plus whether more than one candidate
/// verified for the same account (§4.3).
#[derive(Clone, Debug)]
pub struct MatchInfo {
  pub delivery_account: String,
  pub built_match: Vec<Identifier>,
  pub ambiguous: bool,
}

/// Refers to an identifier by position, or by the `account`/`alias` keyword.
/// `Index`'s `bool` is whether the index was written out explicitly or is a
/// defaulted reference to the lone non-code identifier (only possible when
/// there is at most one) — index-bounds and fqdn-directness checks only
/// apply to an explicit index, matching a call with its argument omitted
/// entirely never being validated against a field count it didn't name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentRef {
  Index(usize, bool),
  Account,
  Alias,
}

/// One calc call (§4.4). `Char` is the only variadic function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalcCall {
  Digits(IdentRef),
  Alphas(IdentRef),
  Labels(IdentRef),
  Chars(IdentRef),
  Vowels(IdentRef),
  Any(IdentRef),
  None_(IdentRef),
  Char { ident: IdentRef, label: i64, offset: i64, default: char },
}

impl CalcCall {
  fn ident_ref(&self) -> IdentRef {
    match self {
      CalcCall::Digits(i) | CalcCall::Alphas(i) | CalcCall::Labels(i) | CalcCall::Chars(i) | CalcCall::Vowels(i) | CalcCall::Any(i) | CalcCall::None_(i) => *i,
      CalcCall::Char { ident, .. } => *ident,
    }
  }

  /// The elementary shape this call contributes to the code matcher:
  /// `ANY`/`NONE`/`CHAR` are single-character picks (`any`), everything else
  /// produces a run of decimal digits.
  fn shape(&self) -> Shape {
    match self {
      CalcCall::Any(_) | CalcCall::None_(_) | CalcCall::Char { .. } => Shape::Any,
      _ => Shape::Number,
    }
  }
}

struct Fields<'a> {
  idents: &'a [Identifier],
  account: &'a str,
  alias: &'a str,
}

impl<'a> Fields<'a> {
  fn get(&self, r: IdentRef) -> Option<(FieldKind, &'a str)> {
    match r {
      IdentRef::Account => Some((FieldKind::Account, self.account)),
      IdentRef::Alias => Some((FieldKind::Alias, self.alias)),
      IdentRef::Index(i, _) => self.idents.get(i.checked_sub(1)?).map(|id| (id.kind, id.value.as_str())),
    }
  }
}

/// A compiled calc expression: an ordered sequence of calc calls (§4.4).
#[derive(Clone, Debug, Default)]
pub struct CalcExpression {
  pub calcs: Vec<CalcCall>,
  pub line: usize,
}

impl CalcExpression {
  /// Validates every call against the match expression it will run beside:
  /// index bounds, FQDN label requirements, and alias-without-aliases (§3
  /// invariants). Constants a calc call needs (label/offset/default for
  /// `CHAR`) are already typed by the parser; this only checks cross-refs
  /// that depend on the match expression's shape.
  pub fn semantic_check(&self, matchex: &MatchExpression, has_aliases: bool) -> Result<(), SemanticError> {
    let n = matchex.identifiers;
    for call in &self.calcs {
      let r = call.ident_ref();
      match r {
        IdentRef::Index(i, explicit) => {
          // An omitted index defaults to the lone non-code identifier and is
          // never checked against `n` — there is nothing in the call to
          // check; only an index the config actually wrote out is validated.
          if !explicit {
            continue;
          }
          if i < 1 || i > n {
            return Err(SemanticError::new(
              format!("index must be between 1 and {} in \"{}\"", n, matchex.source),
              self.line,
            ));
          }
          let is_fqdn = matchex.fqdns.contains(&i);
          let needs_label = matches!(call, CalcCall::Char { .. });
          if is_fqdn && !matches!(call, CalcCall::Labels(_) | CalcCall::Char { .. }) {
            return Err(SemanticError::new(
              format!("identifier {} is an fqdn; only LABELS/CHAR may reference it directly in \"{}\"", i, matchex.source),
              self.line,
            ));
          }
          if !is_fqdn && needs_label {
            if let CalcCall::Char { label, .. } = call {
              if *label != 0 {
                return Err(SemanticError::new(
                  format!("CHAR label index given for non-fqdn identifier {} in \"{}\"", i, matchex.source),
                  self.line,
                ));
              }
            }
          }
        }
        IdentRef::Alias => {
          if !has_aliases {
            return Err(SemanticError::new(
              format!("\"alias\" referenced in calc but no aliases present for \"{}\"", matchex.source),
              self.line,
            ));
          }
        }
        IdentRef::Account => {}
      }
    }
    Ok(())
  }

  /// Evaluates the calc expression left to right against `code`, consuming a
  /// prefix on each call; succeeds only if every call consumes and nothing
  /// is left over (§4.4).
  pub fn calculate(&self, code: &str, idents: &[Identifier], account: &str, alias: &str) -> bool {
    let fields = Fields { idents, account, alias };
    let mut remaining = code;
    for call in &self.calcs {
      if remaining.is_empty() {
        return false;
      }
      let value = match eval_call(call, remaining, &fields) {
        Some(v) => v,
        None => return false,
      };
      if let Some(rest) = remaining.strip_prefix(value.as_str()) {
        remaining = rest;
      } else {
        return false;
      }
    }
    remaining.is_empty()
  }
}

fn eval_call(call: &CalcCall, code: &str, fields: &Fields) -> Option<String> {
  match call {
    CalcCall::Digits(r) => {
      let (_, v) = fields.get(*r)?;
      Some(v.chars().filter(|c| c.is_ascii_digit()).count().to_string())
    }
    CalcCall::Alphas(r) => {
      let (_, v) = fields.get(*r)?;
      Some(v.chars().filter(|c| c.is_ascii_lowercase() || c.is_ascii_uppercase()).count().to_string())
    }
    CalcCall::Labels(r) => {
      let (kind, v) = fields.get(*r)?;
      if kind != FieldKind::Fqdn {
        return None;
      }
      Some(v.split('.').count().to_string())
    }
    CalcCall::Chars(r) => {
      let (_, v) = fields.get(*r)?;
      Some(v.chars().count().to_string())
    }
    CalcCall::Vowels(r) => {
      let (_, v) = fields.get(*r)?;
      Some(v.chars().filter(|c| "aeiouAEIOU".contains(*c)).count().to_string())
    }
    CalcCall::Any(r) => {
      let (_, v) = fields.get(*r)?;
      let first = code.chars().next()?;
      v.chars().any(|c| c == first).then(|| first.to_string())
    }
    CalcCall::None_(r) => {
      let (_, v) = fields.get(*r)?;
      let first = code.chars().next()?;
      (!v.chars().any(|c| c == first)).then(|| first.to_string())
    }
    CalcCall::Char { ident, label, offset, default } => {
      let (kind, v) = fields.get(*ident)?;
      let selected: &str = if kind == FieldKind::Fqdn {
        let labels: Vec<&str> = v.split('.').collect();
        let idx = label_index(*label, labels.len())?;
        match idx {
          Some(i) => labels[i],
          None => return Some(default.to_string()),
        }
      } else {
        v
      };
      let chars: Vec<char> = selected.chars().collect();
      match char_index(*offset, chars.len()) {
        Some(i) => Some(chars[i].to_string()),
        None => Some(default.to_string()),
      }
    }
  }
}

/// 1-based, negative-from-end index resolution shared by `CHAR`'s label and
/// offset arguments. Returns `Some(None)` when the label itself is absent
/// (offset 0 is treated as "no label"), `None` when out of bounds.
fn label_index(label: i64, len: usize) -> Option<Option<usize>> {
  if label == 0 {
    return Some(None);
  }
  char_index(label, len).map(Some)
}

fn char_index(offset: i64, len: usize) -> Option<usize> {
  if offset.unsigned_abs() as usize > len || offset == 0 {
    return None;
  }
  if offset > 0 {
    Some(offset as usize - 1)
  } else {
    Some(len - offset.unsigned_abs() as usize)
  }
}

/// One `ACCOUNT ... MATCHES ... WITH ...;` specification (§3).
#[derive(Clone, Debug)]
pub struct Alias {
  pub accounts: Vec<String>,
  pub aliases: Vec<String>,
  pub matchex: MatchExpression,
  pub calc: CalcExpression,
  pub line: usize,
  /// True when no other spec shares this spec's source match expression
  /// string; computed by `config::Configuration::build_maps` (§4.6).
  pub unique: bool,
}

impl Alias {
  /// Validates the calc expression against the match expression and
  /// compiles the sketch; called once per spec while loading a configuration.
  pub fn semantic_check(&mut self) -> Result<(), SemanticError> {
    self.calc.semantic_check(&self.matchex, !self.aliases.is_empty())?;
    self.matchex.build_sketch(&self.calc);
    Ok(())
  }

  pub fn matches(&self, localpart: &str) -> Vec<MatchInfo> {
    self.matchex.match_against(&self.calc, &self.accounts, &self.aliases, localpart)
  }

  /// Whether this spec's match expression mentions the given field kind
  /// (used by uniqueness enforcement, §4.6, which cares whether `account`
  /// or `alias` appears literally in the expression).
  pub fn references(&self, kind: FieldKind) -> bool {
    self.matchex.tokens.iter().any(|t| matches!(t, ExprToken::Field(k) if *k == kind))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn compile(expr: &str) -> MatchExpression {
    MatchExpression::compile(expr, 1).unwrap()
  }

  #[test]
  fn rejects_adjacent_unfriendly_matchers() {
    let err = MatchExpression::compile("%ident%%fqdn%", 1).unwrap_err();
    assert!(err.reason.contains("cannot occur next"));
  }

  #[test]
  fn allows_adjacent_friendly_matchers() {
    let mx = compile("%alpha%%number%%code%");
    assert_eq!(mx.identifiers, 2);
  }

  #[test]
  fn counts_fqdn_identifier_positions() {
    let mx = compile("%account%.%fqdn%.%code%");
    assert!(mx.fqdns.contains(&1));
  }

  #[test]
  fn simple_match_resolves_account() {
    let mut mx = compile("%account%-%number%-%code%");
    let mut calc = CalcExpression::default();
    calc.calcs.push(CalcCall::Any(IdentRef::Index(1, true)));
    mx.build_sketch(&calc);
    let accounts = vec!["bob".to_string()];
    let aliases: Vec<String> = vec![];
    let matches = mx.match_against(&calc, &accounts, &aliases, "bob-42-4");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].delivery_account, "bob");
  }

  #[test]
  fn calc_digits_counts_numeric_characters() {
    let fields = Fields { idents: &[Identifier { kind: FieldKind::Ident, value: "a1b2c3".into() }], account: "", alias: "" };
    let v = eval_call(&CalcCall::Digits(IdentRef::Index(1, true)), "3xyz", &fields).unwrap();
    assert_eq!(v, "3");
  }

  #[test]
  fn calc_char_uses_default_when_offset_out_of_bounds() {
    let fields = Fields { idents: &[Identifier { kind: FieldKind::Ident, value: "ab".into() }], account: "", alias: "" };
    let v = eval_call(&CalcCall::Char { ident: IdentRef::Index(1, true), label: 0, offset: 9, default: '*' }, "*", &fields).unwrap();
    assert_eq!(v, "*");
  }

  #[test]
  fn calc_char_negative_offset_counts_from_end() {
    let fields = Fields { idents: &[Identifier { kind: FieldKind::Ident, value: "abcd".into() }], account: "", alias: "" };
    let v = eval_call(&CalcCall::Char { ident: IdentRef::Index(1, true), label: 0, offset: -1, default: '*' }, "d", &fields).unwrap();
    assert_eq!(v, "d");
  }
}
