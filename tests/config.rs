//! Configuration DSL parsing and validation, end to end (§4.6, §4.7).

use pretty_assertions::assert_eq;
use trualias::error::ConfigError;
use trualias::config::Configuration;

#[test]
fn loads_scalar_settings_and_an_alias_spec() {
  let source = r#"
HOST: 0.0.0.0
PORT: 4047
LOGGING: debug
DEBUG ACCOUNT: postmaster
STATISTICS: 60
LOCAL DOMAINS: Example.NET other.test

ACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();
"#;
  let config = Configuration::load(source).unwrap();
  assert_eq!(config.settings.host, "0.0.0.0");
  assert_eq!(config.settings.port, 4047);
  assert_eq!(config.settings.logging, log::LevelFilter::Debug);
  assert_eq!(config.settings.debug_account, Some("postmaster".to_string()));
  assert_eq!(config.settings.statistics, 60);
  assert_eq!(config.settings.local_domains, vec!["example.net".to_string(), "other.test".to_string()]);
  assert_eq!(config.specs.len(), 1);
}

#[test]
fn comment_lines_are_ignored() {
  let source = "# a comment\nACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n";
  let config = Configuration::load(source).unwrap();
  assert_eq!(config.specs.len(), 1);
}

#[test]
fn rejects_an_invalid_port() {
  let source = "PORT: not-a-number\nACCOUNT foo ALIASED bar MATCHES %alias% WITH ANY();\n";
  let err = Configuration::load(source).unwrap_err();
  assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn rejects_adjacent_unfriendly_field_matchers() {
  // %ident% directly followed by %fqdn% is not in the friendly set
  // {alpha, number}, so adjacency is forbidden.
  let source = "ACCOUNT foo MATCHES %ident%%fqdn%%code% WITH ANY(), ANY();\n";
  let err = Configuration::load(source).unwrap_err();
  assert!(matches!(err, ConfigError::Semantic(_)));
}

#[test]
fn allows_adjacent_friendly_matchers_of_different_kinds() {
  let source = "ACCOUNT foo MATCHES %alpha%%number%-%code% WITH ANY(), ANY();\n";
  Configuration::load(source).unwrap();
}

#[test]
fn rejects_alias_reference_without_declared_aliases() {
  let source = "ACCOUNT foo MATCHES %alias%-%code% WITH ANY(alias), ANY();\n";
  let err = Configuration::load(source).unwrap_err();
  assert!(matches!(err, ConfigError::Semantic(_)));
}

#[test]
fn a_shared_alias_across_accounts_requires_both_account_and_alias_in_the_expression() {
  let source = r#"
ACCOUNT foo ALIASED shared MATCHES %account%-%alias%-%code% WITH ANY();
ACCOUNT bar ALIASED shared MATCHES %account%-%alias%-%code% WITH ANY();
"#;
  Configuration::load(source).unwrap();
}

#[test]
fn a_shared_alias_without_account_reference_is_rejected() {
  let source = r#"
ACCOUNT foo ALIASED shared MATCHES %alias%-%code% WITH ANY();
ACCOUNT bar ALIASED shared MATCHES foo-%alias%-%code% WITH ANY();
"#;
  let err = Configuration::load(source).unwrap_err();
  assert!(matches!(err, ConfigError::Semantic(_)));
}
