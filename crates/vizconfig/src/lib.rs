//! Configuration files consumed by the visualization renderer.
//!
//! Three file shapes live here, all TOML:
//!
//! - [`VizConfig`] describes one visualization: either a single fragment
//!   shader with a vertex source, or an ordered list of multipass graph lines.
//! - [`FxConfig`] describes a post-processing chain applied on top of a
//!   running visualization.
//! - [`AppConfig`] carries process-wide knobs (search paths, crossfade length,
//!   resolution limit, shader cache capacity).
//!
//! [`Library`] resolves visualization, FX and shader file names against the
//! configured search paths.

mod app;
mod fx;
mod library;
mod viz;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub use app::AppConfig;
pub use fx::{FxConfig, FxSection, PrimaryPolicy};
pub use library::Library;
pub use viz::{MultipassSection, ShaderSection, VizConfig, DEFAULT_VERTEX_SOURCE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} '{name}' not found in any search path")]
    NotFound { kind: &'static str, name: String },
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.unwrap_or(Duration::ZERO))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Accepts a table whose values may be strings, integers, floats or booleans
/// and flattens everything to strings. Vertex-source settings are handed to
/// factories as text, the same way the graph's settings column is.
fn deserialize_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    let raw: BTreeMap<String, Helper> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Helper::Str(value) => value,
                Helper::Int(value) => value.to_string(),
                Helper::Float(value) => value.to_string(),
                Helper::Bool(value) => value.to_string(),
            };
            (key, text)
        })
        .collect())
}

fn validate_uniforms(owner: &str, uniforms: &BTreeMap<String, f32>) -> Result<(), ConfigError> {
    for name in uniforms.keys() {
        let valid = name
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
            && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return Err(ConfigError::Invalid(format!(
                "{owner} declares uniform '{name}' which is not a valid GLSL identifier"
            )));
        }
    }
    Ok(())
}
