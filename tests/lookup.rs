//! Resolver scenarios from §8's "Lookup test".

use pretty_assertions::assert_eq;
use trualias::config::Configuration;
use trualias::lookup;

#[test]
fn digits_any_vowels_over_the_account_alias_literal() {
  // bar-none-0n2: DIGITS() of "none" = 0, ANY() picks 'n', VOWELS() of
  // "none" = 2 (o, e).
  let source = "ACCOUNT bar ALIASED none MATCHES %account%-%alias%-%code% WITH DIGITS(alias), ANY(alias), VOWELS(alias);\n";
  let config = Configuration::load(source).unwrap();
  assert_eq!(lookup::resolve(&config, "bar-none-0n2").account, Some("bar".to_string()));
}

#[test]
fn resolves_through_the_alias_path_with_a_literal_in_between() {
  // griselda-23-skidoo-0r3: DIGITS() of "griselda" = 0, ANY() picks 'r'
  // (present in "griselda"), VOWELS() of "griselda" = 3 (i, e, a).
  let source = "ACCOUNT foo ALIASED griselda MATCHES %alias%-23-skidoo-%code% WITH DIGITS(alias), ANY(alias), VOWELS(alias);\n";
  let config = Configuration::load(source).unwrap();
  assert_eq!(lookup::resolve(&config, "griselda-23-skidoo-0r3").account, Some("foo".to_string()));
}

#[test]
fn empty_input_never_matches() {
  let source = "ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n";
  let config = Configuration::load(source).unwrap();
  assert_eq!(lookup::resolve(&config, "").account, None);
}

#[test]
fn cross_spec_disagreement_falls_back_to_the_debug_account() {
  let source = r#"
DEBUG ACCOUNT: postmaster
ACCOUNT one MATCHES %ident%_%code% WITH ANY();
ACCOUNT two MATCHES %alnum%_%code% WITH ANY();
"#;
  let config = Configuration::load(source).unwrap();
  let resolution = lookup::resolve(&config, "ab_a");
  assert_eq!(resolution.account, Some("postmaster".to_string()));
  assert!(resolution.ambiguous);
}
