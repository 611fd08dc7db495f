// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Field descriptors for configuration structs.
//!
//! Every config struct publishes a table of [`FieldSchema`] entries. The table
//! drives the environment overlay and the `docs`/`env` commands; nothing is
//! discovered by inspecting types at runtime.

use crate::shared::duration::{format_duration, parse_duration};
use crate::shared::{ConfigError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    /// Go-style text such as `15s` or `1h30m`.
    Duration,
    /// Comma separated in the environment.
    StrList,
    /// JSON object in the environment.
    Map,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::UInt => "uint",
            FieldKind::Float => "float",
            FieldKind::Str => "string",
            FieldKind::Duration => "duration",
            FieldKind::StrList => "[]string",
            FieldKind::Map => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    /// YAML key.
    pub name: &'static str,
    pub kind: FieldKind,
    /// Populated by the tool; setting it from the environment is an error.
    pub read_only: bool,
    pub doc: &'static str,
}

impl FieldSchema {
    pub const fn new(name: &'static str, kind: FieldKind, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            read_only: false,
            doc,
        }
    }

    pub const fn read_only(name: &'static str, kind: FieldKind, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            read_only: true,
            doc,
        }
    }
}

pub const ENABLE: FieldSchema = FieldSchema::new("enable", FieldKind::Bool, "install this add-on");
pub const MINIMUM_NODES: FieldSchema = FieldSchema::new(
    "minimum_nodes",
    FieldKind::Int,
    "minimum number of nodes required for this add-on",
);
pub const NAMESPACE: FieldSchema =
    FieldSchema::new("namespace", FieldKind::Str, "namespace for all add-on resources");

/// `prefix` + upper-cased name with dashes turned into underscores.
pub fn env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.replace('-', "_").to_uppercase())
}

/// `metrics-server` under `K8S_TESTER_` becomes `K8S_TESTER_ADD_ON_METRICS_SERVER_`.
pub fn add_on_env_prefix(root_prefix: &str, add_on: &str) -> String {
    format!("{}ADD_ON_{}_", root_prefix, add_on.replace('-', "_").to_uppercase())
}

/// Parse one environment value into the JSON shape serde expects for `kind`.
pub fn parse_value(kind: FieldKind, raw: &str) -> std::result::Result<Value, String> {
    match kind {
        FieldKind::Bool => parse_bool(raw).map(Value::Bool),
        FieldKind::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| e.to_string()),
        FieldKind::UInt => raw
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|e| e.to_string()),
        FieldKind::Float => {
            let v = raw.trim().parse::<f64>().map_err(|e| e.to_string())?;
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| format!("{} is not a finite number", v))
        }
        FieldKind::Str => Ok(Value::String(raw.to_string())),
        FieldKind::Duration => parse_duration(raw).map(|d| Value::String(format_duration(d))),
        FieldKind::StrList => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        FieldKind::Map => {
            let v: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
            if v.is_object() {
                Ok(v)
            } else {
                Err("expected a JSON object".to_string())
            }
        }
    }
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(format!("invalid syntax {:?}", other)),
    }
}

/// Overlay `env` onto `target` for the fields in `schema`.
///
/// Empty values are ignored. Returns the environment keys that were used so
/// the caller can reject the rest. Applying the same environment twice yields
/// the same value.
pub fn overlay_env<T>(
    target: &mut T,
    prefix: &str,
    schema: &[FieldSchema],
    env: &BTreeMap<String, String>,
) -> Result<Vec<String>>
where
    T: Serialize + DeserializeOwned,
{
    let mut consumed = Vec::new();
    let mut updates = Vec::new();
    for field in schema {
        let key = env_key(prefix, field.name);
        let raw = match env.get(&key) {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        if field.read_only {
            return Err(ConfigError::ReadOnly {
                key,
                value: raw.clone(),
            }
            .into());
        }
        let value = parse_value(field.kind, raw).map_err(|reason| ConfigError::ParseFailure {
            key: key.clone(),
            value: raw.clone(),
            field: field.name.to_string(),
            reason,
        })?;
        updates.push((field.name, value));
        consumed.push(key);
    }
    if updates.is_empty() {
        return Ok(consumed);
    }

    let mut doc = serde_json::to_value(&*target)?;
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| ConfigError::Malformed("config is not a mapping".to_string()))?;
    for (name, value) in updates {
        obj.insert(name.to_string(), value);
    }
    *target = serde_json::from_value(doc).map_err(|e| ConfigError::ParseFailure {
        key: consumed.join(","),
        value: String::new(),
        field: prefix.to_string(),
        reason: e.to_string(),
    })?;
    Ok(consumed)
}
