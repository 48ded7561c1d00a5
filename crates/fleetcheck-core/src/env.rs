//! Environment resolution for required provisioning parameters.
//!
//! The resolver is constructed with an explicit [`ParameterSource`]; nothing
//! downstream reads the process environment directly. Tests substitute a
//! [`FixedParameters`] fixture.

use std::collections::BTreeMap;
use std::env;

use fleet_interfaces::{ParameterKind, ParameterSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, Result};

/// Somewhere raw parameter values can be looked up by key.
pub trait ParameterSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;

    /// Human-readable description for diagnostics.
    fn describe(&self) -> String;
}

/// Reads the process environment, optionally under a prefix.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    prefix: String,
}

impl ProcessEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look keys up as `{prefix}{key}`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ParameterSource for ProcessEnv {
    fn lookup(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", self.prefix, key)).ok()
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            "process environment".to_string()
        } else {
            format!("process environment (prefix {})", self.prefix)
        }
    }
}

/// A fixed key → value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedParameters(BTreeMap<String, String>);

impl FixedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ParameterSource for FixedParameters {
    fn lookup(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn describe(&self) -> String {
        format!("{} fixed parameter(s)", self.0.len())
    }
}

/// Consults each source in order; the first that knows a key wins.
#[derive(Default)]
pub struct Layered {
    sources: Vec<Box<dyn ParameterSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: impl ParameterSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl ParameterSource for Layered {
    fn lookup(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.lookup(key))
    }

    fn describe(&self) -> String {
        self.sources
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// A parameter the provisioning configuration requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Lookup key in the source (e.g. `REGION`).
    pub key: String,
    /// Name handed to the provisioner; defaults to the lower-cased key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn string(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            kind: ParameterKind::String,
        }
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Integer,
            ..Self::string(key)
        }
    }

    pub fn list(key: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::List,
            ..Self::string(key)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parameter_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.key.to_ascii_lowercase())
    }
}

/// Resolves required parameters from an injected source.
pub struct EnvironmentResolver {
    source: Box<dyn ParameterSource>,
}

impl EnvironmentResolver {
    pub fn new(source: impl ParameterSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Resolve every required parameter into a complete [`ParameterSet`].
    ///
    /// Blank values count as absent. All missing keys are reported together
    /// in one `MissingParameter`; a value that does not parse as its declared
    /// kind yields `InvalidParameter`. Never returns a partial set.
    pub fn resolve(&self, specs: &[ParameterSpec]) -> Result<ParameterSet> {
        let mut missing = Vec::new();
        let mut params = ParameterSet::new();
        let mut invalid = None;

        for spec in specs {
            match self.source.lookup(&spec.key) {
                Some(raw) if !raw.trim().is_empty() => match spec.kind.parse(&raw) {
                    Ok(value) => params.insert(spec.parameter_name(), value),
                    Err(reason) => {
                        invalid.get_or_insert(FleetError::InvalidParameter {
                            name: spec.key.clone(),
                            reason,
                        });
                    }
                },
                _ => missing.push(spec.key.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(FleetError::MissingParameter { names: missing });
        }
        if let Some(err) = invalid {
            return Err(err);
        }

        debug!(
            source = %self.source.describe(),
            count = params.len(),
            "resolved required parameters"
        );
        Ok(params)
    }

    /// Resolve plain string parameters by key.
    pub fn resolve_names(&self, keys: &[&str]) -> Result<ParameterSet> {
        let specs: Vec<ParameterSpec> = keys.iter().map(|k| ParameterSpec::string(*k)).collect();
        self.resolve(&specs)
    }

    /// Look up a single optional raw value.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.source.lookup(key).filter(|v| !v.trim().is_empty())
    }
}
