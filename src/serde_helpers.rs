//! Lenient deserialization of server payloads.
//!
//! With the `tracing` feature, fields the target type does not know about are
//! logged instead of silently ignored, and a failed deserialization logs the JSON
//! path that broke. The backend adds fields freely, so neither is fatal beyond the
//! failure itself.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize `value` into `T`, logging unknown fields under `tracing`.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    let target = std::any::type_name::<T>();
    tracing::trace!(%target, json = %value, "deserializing payload");

    let mut unknown = Vec::new();
    let outcome: Result<T, serde_json::Error> =
        serde_ignored::deserialize(&value, |path| unknown.push(path.to_string()));

    let parsed = match outcome {
        Ok(parsed) => parsed,
        Err(e) => {
            let text = value.to_string();
            let mut deserializer = serde_json::Deserializer::from_str(&text);
            if let Err(located) = serde_path_to_error::deserialize::<_, T>(&mut deserializer) {
                let path = located.path().to_string();
                tracing::error!(
                    %target,
                    %path,
                    value = %describe(lookup(&value, &path)),
                    error = %located.inner(),
                    "payload does not match the expected shape"
                );
            }
            return Err(e.into());
        }
    };

    for path in unknown {
        tracing::warn!(
            %target,
            field = %path,
            value = %describe(lookup(&value, &path)),
            "unknown field in server payload"
        );
    }

    Ok(parsed)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Resolves a `serde_ignored` / `serde_path_to_error` path such as
/// `files[2].name` or `file_info.?.path` against `value`.
#[cfg(feature = "tracing")]
fn lookup<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "<missing>".to_owned(), Value::to_string)
}
