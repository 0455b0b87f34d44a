/*!
 * Serde utilities for common serialization/deserialization patterns.
 *
 * Durations in configuration are written as seconds, either as numbers
 * (`base_delay = 0.1`) or as strings. Values coming from environment
 * variables always arrive as strings, so both forms are accepted.
 */

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;
use std::time::Duration;

fn seconds_from_value<E: Error>(value: Value) -> Result<Duration, E> {
    let seconds = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| E::custom(format!("Invalid numeric value: {n}")))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| E::custom(format!("Cannot parse '{s}' as seconds")))?,
        other => {
            return Err(E::custom(format!(
                "Expected seconds as number or string, found: {other}"
            )))
        }
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(E::custom(format!(
            "Duration must be a non-negative number of seconds, got {seconds}"
        )));
    }

    Ok(Duration::from_secs_f64(seconds))
}

/// `#[serde(with = "duration_secs")]` for `Duration` fields
pub mod duration_secs {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        seconds_from_value(value)
    }
}

/// `#[serde(default, with = "option_duration_secs")]` for `Option<Duration>` fields
pub mod option_duration_secs {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(value) => seconds_from_value(value).map(Some),
        }
    }
}
