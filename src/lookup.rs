//! Resolver: aggregate per-spec matches into a single delivery decision (§4.5).

use crate::config::Configuration;

/// The outcome of resolving one localpart against a configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
  pub account: Option<String>,
  /// True if any contributing spec match was itself ambiguous, or if more
  /// than one distinct account was produced across specs.
  pub ambiguous: bool,
}

/// Resolves `localpart` against every spec in `config`, collapsing the
/// per-spec `MatchInfo`s into a single decision (§4.5 step 2-3). Returns the
/// resolved account, the configured debug account on cross-spec ambiguity,
/// or nothing.
pub fn resolve(config: &Configuration, localpart: &str) -> Resolution {
  let mut accounts = std::collections::HashSet::new();
  let mut ambiguous = false;

  for spec in &config.specs {
    for info in spec.matches(localpart) {
      ambiguous |= info.ambiguous;
      accounts.insert(info.delivery_account);
    }
  }

  match accounts.len() {
    0 => Resolution { account: None, ambiguous },
    1 => Resolution { account: accounts.into_iter().next(), ambiguous },
    _ => {
      log::warn!("ambiguous resolution for {:?}: {:?}", localpart, accounts);
      Resolution { account: config.settings.debug_account.clone(), ambiguous: true }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn load(source: &str) -> Configuration {
    Configuration::load(source).unwrap()
  }

  #[test]
  fn resolves_unambiguous_single_spec() {
    let config = load("ACCOUNT bar ALIASED none MATCHES %alias%-%code% WITH DIGITS(alias), ANY(alias), VOWELS(alias);\n");
    let r = resolve(&config, "none-0n2");
    assert_eq!(r.account, Some("bar".to_string()));
    assert!(!r.ambiguous);
  }

  #[test]
  fn empty_on_no_match() {
    let config = load("ACCOUNT bar ALIASED none MATCHES %alias%-%code% WITH DIGITS(alias), ANY(alias), VOWELS(alias);\n");
    let r = resolve(&config, "nope");
    assert_eq!(r.account, None);
  }

  #[test]
  fn falls_back_to_debug_account_on_cross_spec_ambiguity() {
    // Two syntactically distinct (hence individually "unique") expressions
    // that happen to accept the same concrete input, producing two
    // different delivery accounts for it.
    let source = r#"
DEBUG ACCOUNT: nobody
ACCOUNT foo MATCHES %ident%_%code% WITH ANY();
ACCOUNT bar MATCHES %alnum%_%code% WITH ANY();
"#;
    let config = load(source);
    let r = resolve(&config, "ab_a");
    assert_eq!(r.account, Some("nobody".to_string()));
    assert!(r.ambiguous);
  }
}
