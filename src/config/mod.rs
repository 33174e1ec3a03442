//! Configuration: scalar settings, derived maps, uniqueness enforcement (§3, §4.6).

pub mod parser;

use crate::alias::{Alias, FieldKind};
use crate::error::{ConfigError, SemanticError};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Scalar settings recognized by the DSL (§4.7), with the original's
/// defaults.
#[derive(Clone, Debug)]
pub struct Settings {
  pub host: String,
  pub port: u16,
  pub logging: log::LevelFilter,
  pub debug_account: Option<String>,
  /// Statistics reporting interval in seconds; `0` disables reporting.
  pub statistics: u64,
  pub processor: Option<String>,
  pub smtp_host: Option<String>,
  pub smtp_port: u16,
  pub local_host: Option<String>,
  pub local_domains: Vec<String>,
}

impl Default for Settings {
  fn default() -> Self {
    Settings {
      host: "127.0.0.1".to_string(),
      port: 3047,
      logging: log::LevelFilter::Warn,
      debug_account: None,
      statistics: 0,
      processor: None,
      smtp_host: None,
      smtp_port: 25,
      local_host: None,
      local_domains: Vec::new(),
    }
  }
}

/// A fully loaded, immutable configuration. Reloading never mutates one in
/// place: a new `Configuration` is built and the running service atomically
/// swaps its pointer (§5) — see `crate::config::watch`.
#[derive(Clone, Debug)]
pub struct Configuration {
  pub settings: Settings,
  pub specs: Vec<Alias>,
  account_to_specs: HashMap<String, Vec<usize>>,
  alias_to_specs: HashMap<String, Vec<usize>>,
  alias_to_accounts: HashMap<String, HashSet<String>>,
}

impl Configuration {
  /// Parses and validates a configuration from DSL source text: tokenizes
  /// (§4.7), semantic-checks each spec (§4.4 cross-checks), builds the
  /// derived maps, then enforces uniqueness (§4.6). Returns the first error
  /// encountered, with its source line.
  pub fn load(source: &str) -> Result<Self, ConfigError> {
    let parsed = parser::parse(source)?;
    let mut specs = parsed.specs;
    for spec in &mut specs {
      spec.semantic_check()?;
    }

    let mut config = Configuration {
      settings: parsed.settings,
      specs,
      account_to_specs: HashMap::new(),
      alias_to_specs: HashMap::new(),
      alias_to_accounts: HashMap::new(),
    };
    config.build_maps();
    config.enforce_uniqueness()?;
    Ok(config)
  }

  pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
    let source = std::fs::read_to_string(path).unwrap_or_default();
    Self::load(&source)
  }

  /// Computes each spec's `unique` flag and the account/alias derived maps
  /// (§3's Configuration data model).
  fn build_maps(&mut self) {
    let mut expr_counts: HashMap<String, usize> = HashMap::new();
    for spec in &self.specs {
      *expr_counts.entry(spec.matchex.source.clone()).or_insert(0) += 1;
    }
    for spec in &mut self.specs {
      spec.unique = expr_counts.get(&spec.matchex.source) == Some(&1);
    }

    self.account_to_specs.clear();
    self.alias_to_specs.clear();
    self.alias_to_accounts.clear();
    for (i, spec) in self.specs.iter().enumerate() {
      for account in &spec.accounts {
        self.account_to_specs.entry(account.clone()).or_default().push(i);
      }
      for alias in &spec.aliases {
        self.alias_to_specs.entry(alias.clone()).or_default().push(i);
        self.alias_to_accounts.entry(alias.clone()).or_default().extend(spec.accounts.iter().cloned());
      }
    }
  }

  fn associated_aliases(&self, account: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    if let Some(indices) = self.account_to_specs.get(account) {
      for &i in indices {
        out.extend(self.specs[i].aliases.iter().cloned());
      }
    }
    out
  }

  fn associated_accounts(&self, alias: &str) -> &HashSet<String> {
    static EMPTY: once_cell::sync::Lazy<HashSet<String>> = once_cell::sync::Lazy::new(HashSet::new);
    self.alias_to_accounts.get(alias).unwrap_or(&EMPTY)
  }

  /// Enforces the per-spec disambiguation requirement (§4.6): every spec
  /// must be resolvable from the input localpart alone, without relying on
  /// another spec's accounts/aliases to break a tie.
  fn enforce_uniqueness(&self) -> Result<(), SemanticError> {
    for account in self.account_to_specs.keys() {
      let associated_aliases = self.associated_aliases(account);
      for &i in &self.account_to_specs[account] {
        let spec = &self.specs[i];
        if associated_aliases.is_empty() {
          if spec.references(FieldKind::Account) || spec.unique {
            continue;
          }
          return Err(SemanticError::new(
            format!("ambiguous: account not present in expression and expression not unique in \"{}\"", spec.matchex.source),
            spec.line,
          ));
        }

        let solely_owned = associated_aliases.len() == 1
          && self.associated_accounts(associated_aliases.iter().next().unwrap()).len() == 1;
        if solely_owned {
          if spec.references(FieldKind::Account) || spec.references(FieldKind::Alias) || spec.unique {
            continue;
          }
          return Err(SemanticError::new(
            format!("ambiguous: neither account nor alias present and expression not unique in \"{}\"", spec.matchex.source),
            spec.line,
          ));
        }

        if spec.references(FieldKind::Account) && spec.references(FieldKind::Alias) {
          continue;
        }
        return Err(SemanticError::new(
          format!("ambiguous: alias is shared by multiple accounts but expression lacks account and alias in \"{}\"", spec.matchex.source),
          spec.line,
        ));
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loads_fqdn_vs_ident_example() {
    let source = r#"
ACCOUNT foo   MATCHES %account%.%ident%.%code%   WITH ANY(), VOWELS(), ANY();
ACCOUNT bar   MATCHES %account%.%fqdn%.%code%    WITH ANY(), VOWELS(), ANY();
"#;
    let config = Configuration::load(source).unwrap();
    assert_eq!(config.specs.len(), 2);
  }

  #[test]
  fn rejects_ambiguous_unreferenced_duplicate_expression() {
    let source = r#"
ACCOUNT foo MATCHES %ident%.%code% WITH ANY();
ACCOUNT bar MATCHES %ident%.%code% WITH ANY();
"#;
    let err = Configuration::load(source).unwrap_err();
    assert!(matches!(err, ConfigError::Semantic(_)));
  }
}
