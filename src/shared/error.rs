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

use thiserror::Error;
pub type Result<T> = std::result::Result<T, TesterError>;

/// Configuration problems. Surfaced to the caller, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("malformed config: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingRequired(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("failed to parse '{value}' for field '{field}' (env '{key}'): {reason}")]
    ParseFailure {
        key: String,
        value: String,
        field: String,
        reason: String,
    },

    #[error("'{key}={value}' is 'read-only' field; should not be set")]
    ReadOnly { key: String, value: String },

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("contradictory settings: {0}")]
    Contradiction(String),

    #[error("config I/O failure: {0}")]
    IoFailure(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    #[error("insufficient nodes: required {required}, found {actual}")]
    InsufficientNodes { required: usize, actual: usize },

    #[error("missing collaborator: {0}")]
    MissingCollaborator(String),
}

/// How a best-effort teardown ended. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// At least one tester tore down cleanly.
    Partial,
    /// Every attempted tester failed.
    Total,
}

#[derive(Error, Debug)]
pub enum TesterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(#[from] Precondition),

    #[error("Transient Kubernetes error: {0}")]
    Transient(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {resource_type} '{name}' in namespace '{namespace}'")]
    NotFound {
        resource_type: String,
        name: String,
        namespace: String,
    },

    #[error("deadline exceeded waiting for {operation} (last state: {last_state})")]
    DeadlineExceeded {
        operation: String,
        last_state: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("{}", .errors.join(", "))]
    PartialTeardown {
        errors: Vec<String>,
        class: FailureClass,
    },

    /// Several independent steps failed; joined with ", ".
    #[error("{}", .0.join(", "))]
    Multiple(Vec<String>),

    #[error("namespace '{namespace}' still has residual objects after force delete: {}", .residual.join(", "))]
    ForceDeleteIncomplete {
        namespace: String,
        residual: Vec<String>,
    },

    #[error("timed out waiting for ingress hostname of service '{service}' in namespace '{namespace}'")]
    IngressTimeout { namespace: String, service: String },

    #[error("apply '{tester}' failed: {source}")]
    ApplyFailed {
        tester: String,
        #[source]
        source: Box<TesterError>,
    },

    #[error("delete '{tester}' failed: {source}")]
    DeleteFailed {
        tester: String,
        #[source]
        source: Box<TesterError>,
    },

    #[error("command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TesterError {
    pub fn not_found(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn deadline(operation: impl Into<String>, last_state: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            last_state: last_state.into(),
        }
    }

    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn assertion(context: impl Into<String>) -> Self {
        Self::Assertion(context.into())
    }

    pub fn apply_failed(tester: impl Into<String>, source: TesterError) -> Self {
        Self::ApplyFailed {
            tester: tester.into(),
            source: Box::new(source),
        }
    }

    pub fn delete_failed(tester: impl Into<String>, source: TesterError) -> Self {
        Self::DeleteFailed {
            tester: tester.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through `ApplyFailed` / `DeleteFailed` wrappers.
    pub fn root(&self) -> &TesterError {
        match self {
            Self::ApplyFailed { source, .. } | Self::DeleteFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// 404 and 410 from the API server, or a façade-level `NotFound`.
    pub fn is_not_found_or_gone(&self) -> bool {
        match self.root() {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404 || ae.code == 410,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists")
    }

    /// Internal errors, timeouts, throttling, and broken connections are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Transient(_) => true,
            Self::Kube(kube::Error::Api(ae)) => {
                matches!(ae.code, 429 | 500 | 503 | 504)
                    || ae.reason == "ServerTimeout"
                    || ae.reason == "Timeout"
                    || ae.reason == "TooManyRequests"
            }
            Self::Kube(kube::Error::HyperError(_)) | Self::Kube(kube::Error::Service(_)) => true,
            Self::Kube(other) => {
                let msg = other.to_string();
                msg.contains("connection reset") || msg.contains("EOF")
            }
            _ => false,
        }
    }
}
