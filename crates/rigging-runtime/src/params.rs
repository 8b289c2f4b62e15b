//! Stack parameter resolution.
//!
//! Values come from, highest precedence first: `--param key=value`
//! overrides, `RIGGING_PARAM_<key>` environment variables, a YAML params
//! file, then the declared default.

use std::collections::BTreeMap;
use std::path::Path;

use rigging_common::constants::PARAM_ENV_PREFIX;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::value::Value;
use rigging_compose::expr::Expr;
use rigging_compose::parser::ast::ParamDecl;

/// Resolved parameter values by name.
pub type Params = BTreeMap<String, Sensitive<Value>>;

/// Raw parameter inputs, before matching against declarations.
#[derive(Debug, Clone, Default)]
pub struct ParamSources {
    overrides: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    file: BTreeMap<String, Value>,
}

impl ParamSources {
    /// Creates empty sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key=value` override.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Config` if `pair` has no `=` or an empty key.
    pub fn with_override(mut self, pair: &str) -> Result<Self> {
        let (key, value) = parse_override(pair)?;
        let _ = self.overrides.insert(key, value);
        Ok(self)
    }

    /// Collects `RIGGING_PARAM_*` variables from the process environment.
    #[must_use]
    pub fn with_process_env(self) -> Self {
        self.with_env_vars(std::env::vars())
    }

    /// Collects `RIGGING_PARAM_*` variables from `vars`.
    #[must_use]
    pub fn with_env_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(PARAM_ENV_PREFIX) {
                if !name.is_empty() {
                    let _ = self.env.insert(name.to_string(), value);
                }
            }
        }
        self
    }

    /// Loads a YAML mapping of parameter values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a YAML mapping.
    pub fn with_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RiggingError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| RiggingError::Config {
                message: format!("{}: {e}", path.display()),
            })?;
        match Value::from_yaml(&yaml) {
            Value::Map(entries) => self.file.extend(entries),
            Value::Null => {}
            other => {
                return Err(RiggingError::Config {
                    message: format!(
                        "{}: params file must be a mapping, got {}",
                        path.display(),
                        other.type_name()
                    ),
                });
            }
        }
        tracing::debug!(path = %path.display(), count = self.file.len(), "params file loaded");
        Ok(self)
    }

    fn lookup(&self, name: &str) -> Option<(Value, &'static str)> {
        if let Some(raw) = self.overrides.get(name) {
            return Some((Value::String(raw.clone()), "flag"));
        }
        if let Some(raw) = self.env.get(name) {
            return Some((Value::String(raw.clone()), "environment"));
        }
        self.file.get(name).map(|v| (v.clone(), "params file"))
    }
}

/// Splits `key=value`.
///
/// # Errors
///
/// Returns `RiggingError::Config` for a missing `=` or an empty key.
pub fn parse_override(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(RiggingError::Config {
            message: format!("parameter override must be key=value, got \"{pair}\""),
        }),
    }
}

/// Resolves every declared parameter.
///
/// # Errors
///
/// Returns `RiggingError::Config` naming every parameter with no value,
/// or the first value that cannot be coerced to its default's type.
pub fn resolve_params(decls: &[ParamDecl], sources: &ParamSources) -> Result<Params> {
    let mut params = Params::new();
    let mut missing = Vec::new();

    for decl in decls {
        let default = decl
            .default
            .as_ref()
            .map(Expr::evaluate_literal)
            .transpose()?;
        let secret = decl.secret || default.as_ref().is_some_and(Sensitive::is_secret);

        let value = match (sources.lookup(&decl.name), default) {
            (Some((raw, origin)), default) => {
                tracing::debug!(param = %decl.name, origin, "parameter supplied");
                coerce(&decl.name, raw, default.as_ref().map(Sensitive::expose))?
            }
            (None, Some(default)) => default.into_exposed(),
            (None, None) => {
                missing.push(decl.name.clone());
                continue;
            }
        };
        let _ = params.insert(decl.name.clone(), Sensitive::new(value, secret));
    }

    if !missing.is_empty() {
        return Err(RiggingError::Config {
            message: format!("missing required parameter(s): {}", missing.join(", ")),
        });
    }

    let declared: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
    for name in sources.overrides.keys() {
        if !declared.contains(&name.as_str()) {
            tracing::warn!(param = %name, "override for undeclared parameter ignored");
        }
    }
    Ok(params)
}

fn coerce(name: &str, raw: Value, default: Option<&Value>) -> Result<Value> {
    let Value::String(text) = &raw else {
        return Ok(raw);
    };
    let mismatch = |expected: &str| RiggingError::Config {
        message: format!("parameter \"{name}\" expects {expected}"),
    };
    match default {
        Some(Value::Integer(_)) => raw
            .as_integer()
            .map(Value::Integer)
            .ok_or_else(|| mismatch("an integer")),
        Some(Value::Bool(_)) => raw
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch("a bool")),
        _ => Ok(Value::String(text.clone())),
    }
}
