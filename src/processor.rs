//! Pre/post-processing hook (§9 Design Notes; `preprocessing_sample.py`).
//!
//! The original loads a Python module by name and calls its
//! `preprocess`/`postprocess`/`reload` functions. §9 explicitly asks for a
//! static, name-keyed registry instead of dynamic code loading: a
//! `Processor` trait, bound to an implementation at process start by the
//! name given in the DSL's `PROCESSOR` setting.

use crate::error::ProcessorError;
use std::collections::HashSet;
use std::sync::RwLock;

/// Implemented by a pre/post-processing module. `reload` is called once per
/// successful configuration load with the fresh account/alias sets; a
/// failure there is fatal to the load, mirroring the original's treatment of
/// a `reload()` exception as a configuration error.
pub trait Processor: Send + Sync {
  /// Called before the resolver looks up an alias. `domain` is `Some` for
  /// the virtual-domain server, `None` for the table server.
  fn preprocess(&self, alias: &str, domain: Option<&str>) -> (String, Option<String>) {
    (alias.to_string(), domain.map(str::to_string))
  }

  /// Called once the resolver has determined an account.
  fn postprocess(&self, account: &str, domain: Option<&str>) -> (String, Option<String>) {
    (account.to_string(), domain.map(str::to_string))
  }

  fn reload(&self, accounts: &HashSet<String>, aliases: &HashSet<String>) -> Result<(), ProcessorError> {
    let _ = (accounts, aliases);
    Ok(())
  }
}

/// No-op processor used when the configuration names no `PROCESSOR`.
pub struct Identity;

impl Processor for Identity {}

type Factory = fn() -> Box<dyn Processor>;

static REGISTRY: RwLock<Vec<(&'static str, Factory)>> = RwLock::new(Vec::new());

/// Registers a processor implementation under `name`, so `PROCESSOR: name`
/// in the configuration can bind to it. Call at process start, before any
/// configuration is loaded; never from within a reload.
pub fn register(name: &'static str, factory: Factory) {
  REGISTRY.write().unwrap().push((name, factory));
}

/// Resolves a configured `PROCESSOR` name to a fresh instance.
pub fn resolve(name: &str) -> Result<Box<dyn Processor>, ProcessorError> {
  REGISTRY
    .read()
    .unwrap()
    .iter()
    .find(|(n, _)| *n == name)
    .map(|(_, factory)| factory())
    .ok_or_else(|| ProcessorError(format!("no processor registered under \"{}\"", name)))
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Upper;
  impl Processor for Upper {
    fn preprocess(&self, alias: &str, domain: Option<&str>) -> (String, Option<String>) {
      (alias.to_uppercase(), domain.map(str::to_string))
    }
  }

  #[test]
  fn identity_passes_values_through() {
    let p = Identity;
    assert_eq!(p.preprocess("foo", None), ("foo".to_string(), None));
    assert_eq!(p.postprocess("bar", Some("example.net")), ("bar".to_string(), Some("example.net".to_string())));
  }

  #[test]
  fn resolve_fails_for_unregistered_name() {
    let err = resolve("does-not-exist-in-this-test").unwrap_err();
    assert!(err.0.contains("does-not-exist-in-this-test"));
  }

  #[test]
  fn registered_processor_resolves_by_name() {
    register("upper-test-processor", || Box::new(Upper));
    let p = resolve("upper-test-processor").unwrap();
    assert_eq!(p.preprocess("foo", None).0, "FOO");
  }
}
