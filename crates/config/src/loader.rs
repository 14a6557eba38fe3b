use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{AdmissionConfig, Config, DEFAULT_CATEGORY};

/// Fields whose expansion may fail, e.g. on an unset environment variable. They are dropped instead of failing the load.
const OPTIONAL_ENV_FIELDS: &[&str] = &["identity.jwt_secret", "telemetry.service_name"];

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config = parse(&content)?;

    for warning in validate_admission(&config.admission)? {
        log::warn!("{warning}");
    }

    Ok(config)
}

fn parse(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;

    // Each optional field is removed at most once, so this terminates.
    loop {
        let Err(err) = expand_dynamic_strings(&mut Vec::new(), &mut raw_config) else {
            break;
        };

        match err.optional_path() {
            Some(path) if remove_field(&mut raw_config, &path) => {
                log::warn!("Ignoring optional field '{path}': {err}");
            }
            _ => return Err(err.into()),
        }
    }

    Ok(Config::deserialize(raw_config)?)
}

/// Checks the admission settings for values the engine cannot work with.
///
/// Returns warnings for settings that are legal but probably unintended.
pub(crate) fn validate_admission(config: &AdmissionConfig) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();

    if config.global_limit == 0 {
        bail!("admission.global_limit must be at least 1");
    }

    if config.bucket_ttl.is_zero() {
        bail!("admission.bucket_ttl must be greater than zero");
    }

    if config.policies.contains_key(DEFAULT_CATEGORY) {
        bail!(indoc! {r#"
            The policy name 'default' is reserved. Configure the fallback policy under [admission.default_policy]:

              [admission.default_policy]
              capacity = 20
        "#});
    }

    for (name, policy) in &config.policies {
        if !policy.path_prefix.starts_with('/') {
            bail!(
                "Policy '{name}' has path_prefix '{}', which must start with '/'",
                policy.path_prefix
            );
        }

        validate_quota(name, policy.capacity, policy.refill_rate())?;
    }

    validate_quota(DEFAULT_CATEGORY, config.default_policy.capacity, config.default_policy.refill_rate())?;

    for key in config.allow_list.intersection(&config.deny_list) {
        warnings.push(format!(
            "Client key '{key}' is in both allow_list and deny_list, the allow_list takes precedence"
        ));
    }

    Ok(warnings)
}

fn validate_quota(name: &str, capacity: u32, refill_rate: f64) -> anyhow::Result<()> {
    if capacity == 0 {
        bail!("Policy '{name}' must have a capacity of at least 1");
    }

    if !refill_rate.is_finite() || refill_rate <= 0.0 {
        bail!("Policy '{name}' has refill_rate {refill_rate}, which must be a positive number");
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to expand dynamic string at path '{path}': {message}")]
struct ExpansionError {
    path: String,
    message: String,
}

impl ExpansionError {
    fn optional_path(&self) -> Option<String> {
        OPTIONAL_ENV_FIELDS
            .contains(&self.path.as_str())
            .then(|| self.path.clone())
    }
}

fn expand_dynamic_strings<'a>(
    path: &mut Vec<Result<&'a str, usize>>,
    value: &'a mut Value,
) -> Result<(), ExpansionError> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path.iter() {
                    match segment {
                        Ok(key) => {
                            p.push_str(key);
                            p.push('.');
                        }
                        Err(i) => {
                            let _ = write!(p, "[{i}]");
                        }
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                return Err(ExpansionError {
                    path: p,
                    message: err.to_string(),
                });
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Removes a dotted path from the TOML tree. Returns whether anything was removed.
fn remove_field(config: &mut Value, path: &str) -> bool {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = config;

    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        match current.as_table_mut().and_then(|table| table.get_mut(part)) {
            Some(value) => current = value,
            None => return false,
        }
    }

    current
        .as_table_mut()
        .map(|table| table.remove(last).is_some())
        .unwrap_or(false)
}
