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

//! `{{ key }}` substitution for embedded manifests. No conditionals, no loops.

use crate::shared::{Result, TesterError};
use regex::Regex;
use std::collections::BTreeMap;

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

/// Values for one render.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

/// Replace every placeholder in `template`. A placeholder without a value is
/// an error, so a typo never ships an empty field to the API server.
pub fn render(template: &str, vars: &Vars) -> Result<String> {
    let re = Regex::new(PLACEHOLDER)
        .map_err(|e| TesterError::assertion(format!("bad placeholder pattern: {}", e)))?;

    let mut missing = Vec::new();
    let out = re.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match vars.values.get(key) {
            Some(v) => v.clone(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(TesterError::assertion(format!(
            "template references unset values: {}",
            missing.join(", ")
        )));
    }
    Ok(out.into_owned())
}
