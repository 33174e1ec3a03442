//! The `fqdn_vs_ident` scenarios from §8: `ident` and `fqdn` fields must be
//! told apart by the same matcher discipline that tells dotted FQDN labels
//! apart from a single dashed token.

use pretty_assertions::assert_eq;
use trualias::config::Configuration;
use trualias::lookup;

const SOURCE: &str = r#"
ACCOUNT foo   MATCHES %account%.%ident%.%code%   WITH ANY(), VOWELS(), ANY();
ACCOUNT bar   MATCHES %account%.%fqdn%.%code%    WITH ANY(), VOWELS(), ANY();
ACCOUNT ping  MATCHES parsely.%ident%.%code%     WITH ANY(), VOWELS(), ANY();
ACCOUNT pong  MATCHES eggplant.%fqdn%.%code%     WITH ANY(), VOWELS(), ANY();
ACCOUNT zip   MATCHES walnut-%ident%-%code%      WITH ANY(), VOWELS(), ANY();
ACCOUNT zap   MATCHES almond-%fqdn%-%code%       WITH ANY(), VOWELS(), ANY();
"#;

fn resolve(alias: &str) -> Option<String> {
  let config = Configuration::load(SOURCE).unwrap();
  lookup::resolve(&config, alias).account
}

#[test]
fn account_dot_ident_dot_code() {
  assert_eq!(resolve("foo.green.g2r"), Some("foo".to_string()));
}

#[test]
fn account_dot_fqdn_dot_code() {
  assert_eq!(resolve("bar.green.beans.g4r"), Some("bar".to_string()));
}

#[test]
fn literal_prefix_with_ident() {
  assert_eq!(resolve("parsely.green.g2r"), Some("ping".to_string()));
}

#[test]
fn literal_prefix_with_fqdn() {
  assert_eq!(resolve("eggplant.green.beans.g4r"), Some("pong".to_string()));
}

#[test]
fn dashed_literal_with_ident() {
  assert_eq!(resolve("walnut-shrimp-s1m"), Some("zip".to_string()));
}

#[test]
fn dashed_literal_with_fqdn() {
  assert_eq!(resolve("almond-mocha.latte-t4l"), Some("zap".to_string()));
}

#[test]
fn trailing_characters_outside_any_sketch_literal_reject_every_scenario() {
  for input in [
    "foo.green.g2rX",
    "bar.green.beans.g4rX",
    "parsely.green.g2rX",
    "eggplant.green.beans.g4rX",
    "walnut-shrimp-s1mX",
    "almond-mocha.latte-t4lX",
  ] {
    assert_eq!(resolve(input), None, "expected no match for {input:?}");
  }
}

#[test]
fn single_label_with_a_dash_is_neither_ident_nor_fqdn() {
  assert_eq!(resolve("foo.a-b.a1b"), None);
}

#[test]
fn fqdn_accepts_dashes_in_arbitrary_label_positions() {
  assert_eq!(resolve("eggplant.ab.cd.ef.a2f"), Some("pong".to_string()));
}
