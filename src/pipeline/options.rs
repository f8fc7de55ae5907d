//! Stage options and the namespaced configuration bundle.
//!
//! Each stage declares its options through a static `OptionSpec` table. A
//! binding supplies raw `--key=value` arguments, runtime overrides are
//! addressed as `namespace.key`, and resolution merges
//! `defaults <- binding args <- overrides` into typed `ConfigValue`s.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::message::ConfigValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Namespace used in error reports for malformed runtime overrides.
pub const OVERRIDES_SCOPE: &str = "overrides";

/// Declared type of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    String,
    /// Comma-separated list of strings.
    List,
    /// One of a fixed set of strings.
    Choice(&'static [&'static str]),
}

impl OptionKind {
    /// Parse a raw string into a value of this kind.
    pub fn parse(&self, raw: &str) -> Result<ConfigValue, String> {
        match self {
            OptionKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(ConfigValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(ConfigValue::Bool(false)),
                _ => Err("expected a boolean".to_string()),
            },
            OptionKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|e| format!("expected an integer ({})", e)),
            OptionKind::Float => raw
                .trim()
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|e| format!("expected a number ({})", e)),
            OptionKind::String => Ok(ConfigValue::String(raw.to_string())),
            OptionKind::List => Ok(ConfigValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            OptionKind::Choice(allowed) => {
                if allowed.contains(&raw) {
                    Ok(ConfigValue::String(raw.to_string()))
                } else {
                    Err(format!("expected one of: {}", allowed.join(", ")))
                }
            }
        }
    }
}

/// Static declaration of one option a stage recognises.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    /// Raw default, parsed with `kind`. `None` makes the option required.
    pub default: Option<&'static str>,
    pub description: &'static str,
}

impl OptionSpec {
    pub const fn new(
        name: &'static str,
        kind: OptionKind,
        default: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            description,
        }
    }

    pub const fn required(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            default: None,
            description,
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    fn parse(&self, namespace: &str, raw: &str) -> PipelineResult<ConfigValue> {
        self.kind
            .parse(raw)
            .map_err(|reason| PipelineError::InvalidOptionValue {
                namespace: namespace.to_string(),
                key: self.name.to_string(),
                value: raw.to_string(),
                reason,
            })
    }
}

/// Build the externally visible `namespace.key` form.
pub fn qualify(namespace: &str, key: &str) -> String {
    format!("{}.{}", namespace, key)
}

/// Split `namespace.key` at the first dot. Namespaces never contain dots.
pub fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    let (ns, key) = qualified.split_once('.')?;
    if ns.is_empty() || key.is_empty() {
        None
    } else {
        Some((ns, key))
    }
}

/// Split a `--key=value` argument. The leading dashes are optional.
fn split_argument(arg: &str) -> Option<(&str, &str)> {
    let body = arg.trim_start_matches("--");
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

/// Parse one binding's own argument list.
///
/// A key given twice is rejected rather than resolved by last-write-wins.
pub fn parse_args(namespace: &str, args: &[String]) -> PipelineResult<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for arg in args {
        let (key, value) = split_argument(arg).ok_or_else(|| PipelineError::MalformedArgument {
            namespace: namespace.to_string(),
            arg: arg.clone(),
        })?;
        if parsed.insert(key.to_string(), value.to_string()).is_some() {
            return Err(PipelineError::DuplicateOption {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(parsed)
}

/// Runtime overrides of option values, addressed by qualified key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    entries: BTreeMap<String, String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `namespace.key=value` items from one override source.
    pub fn parse<I, S>(items: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = Self::new();
        for item in items {
            let item = item.as_ref();
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| PipelineError::MalformedArgument {
                    namespace: OVERRIDES_SCOPE.to_string(),
                    arg: item.to_string(),
                })?;
            overrides.insert(key.trim(), value)?;
        }
        Ok(overrides)
    }

    /// Add one override. The same qualified key twice is an error.
    pub fn insert(&mut self, qualified: &str, value: impl Into<String>) -> PipelineResult<()> {
        let (namespace, key) =
            split_qualified(qualified).ok_or_else(|| PipelineError::MalformedArgument {
                namespace: OVERRIDES_SCOPE.to_string(),
                arg: qualified.to_string(),
            })?;
        if self.entries.contains_key(qualified) {
            return Err(PipelineError::DuplicateOption {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        self.entries.insert(qualified.to_string(), value.into());
        Ok(())
    }

    /// Layer `self` on top of `lower`; keys present in both take `self`'s value.
    pub fn layered_over(self, lower: Overrides) -> Overrides {
        let mut entries = lower.entries;
        entries.extend(self.entries);
        Overrides { entries }
    }

    pub fn get(&self, qualified: &str) -> Option<&str> {
        self.entries.get(qualified).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overrides addressed to `namespace`, keyed by local option name.
    pub fn for_namespace<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.iter().filter_map(move |(qualified, value)| {
            let (ns, key) = split_qualified(qualified)?;
            (ns == namespace).then_some((key, value))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve one binding's options: defaults, then binding args, then overrides.
///
/// Every supplied key must be declared; every required option must end up set.
pub fn resolve_options(
    namespace: &str,
    specs: &[OptionSpec],
    args: &BTreeMap<String, String>,
    overrides: &Overrides,
) -> PipelineResult<BTreeMap<String, ConfigValue>> {
    let find = |key: &str| {
        specs
            .iter()
            .find(|s| s.name == key)
            .ok_or_else(|| PipelineError::UnknownOption {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    };

    let mut raw: BTreeMap<&str, &str> = BTreeMap::new();
    for spec in specs {
        if let Some(default) = spec.default {
            raw.insert(spec.name, default);
        }
    }
    for (key, value) in args {
        let spec = find(key)?;
        raw.insert(spec.name, value.as_str());
    }
    for (key, value) in overrides.for_namespace(namespace) {
        let spec = find(key)?;
        raw.insert(spec.name, value);
    }

    let mut resolved = BTreeMap::new();
    for spec in specs {
        match raw.get(spec.name) {
            Some(value) => {
                resolved.insert(spec.name.to_string(), spec.parse(namespace, value)?);
            }
            None => {
                return Err(PipelineError::MissingOption {
                    namespace: namespace.to_string(),
                    key: spec.name.to_string(),
                })
            }
        }
    }
    Ok(resolved)
}

/// Read-only configuration slice handed to a single stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    namespace: String,
    values: BTreeMap<String, ConfigValue>,
}

impl StageConfig {
    pub fn new(namespace: impl Into<String>, values: BTreeMap<String, ConfigValue>) -> Self {
        Self {
            namespace: namespace.into(),
            values,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        extract: impl FnOnce(&'a ConfigValue) -> Option<T>,
    ) -> PipelineResult<T> {
        let value = self.get(key).ok_or_else(|| PipelineError::MissingOption {
            namespace: self.namespace.clone(),
            key: key.to_string(),
        })?;
        extract(value).ok_or_else(|| PipelineError::InvalidOptionValue {
            namespace: self.namespace.clone(),
            key: key.to_string(),
            value: value.to_string(),
            reason: format!("expected {}", expected),
        })
    }

    pub fn bool(&self, key: &str) -> PipelineResult<bool> {
        self.typed(key, "a boolean", ConfigValue::as_bool)
    }

    pub fn int(&self, key: &str) -> PipelineResult<i64> {
        self.typed(key, "an integer", ConfigValue::as_int)
    }

    /// Integer option that must not be negative.
    pub fn uint(&self, key: &str) -> PipelineResult<u64> {
        let value = self.int(key)?;
        u64::try_from(value).map_err(|_| PipelineError::InvalidOptionValue {
            namespace: self.namespace.clone(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must not be negative".to_string(),
        })
    }

    pub fn float(&self, key: &str) -> PipelineResult<f64> {
        self.typed(key, "a number", ConfigValue::as_float)
    }

    pub fn str(&self, key: &str) -> PipelineResult<&str> {
        self.typed(key, "a string", ConfigValue::as_str)
    }

    pub fn list(&self, key: &str) -> PipelineResult<&[String]> {
        self.typed(key, "a list", ConfigValue::as_list)
    }
}

/// The merged configuration of a whole pipeline, keyed by `namespace.key`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBundle {
    stages: Vec<Arc<StageConfig>>,
}

impl ConfigBundle {
    pub(crate) fn push(&mut self, config: StageConfig) -> Arc<StageConfig> {
        let config = Arc::new(config);
        self.stages.push(config.clone());
        config
    }

    /// Look up a value by its qualified key.
    pub fn get(&self, qualified: &str) -> Option<&ConfigValue> {
        let (namespace, key) = split_qualified(qualified)?;
        self.slice(namespace)?.get(key)
    }

    /// The configuration slice of one namespace.
    pub fn slice(&self, namespace: &str) -> Option<&Arc<StageConfig>> {
        self.stages.iter().find(|s| s.namespace() == namespace)
    }

    /// All entries as `(qualified key, value)` pairs, in stage order.
    pub fn entries(&self) -> Vec<(String, ConfigValue)> {
        self.stages
            .iter()
            .flat_map(|stage| {
                stage
                    .iter()
                    .map(|(key, value)| (qualify(stage.namespace(), key), value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
