// Copyright 2024 Saptak Santra
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

//! Error types and the pluggable error reporter.

use std::fmt;

/// Crate error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input was not valid JSON
    InvalidJson(String),

    /// A required field was absent
    MissingField(String),

    /// A field held a value of the wrong shape
    TypeMismatch(String),

    /// Component name has no registered (de)serializer
    ComponentNotRegistered(String),

    /// Prefab name is unknown
    UnknownPrefab(String),

    /// System dependency graph has a cycle or an unsatisfiable dependency
    DependencyCycle(String),

    /// Internal failure surfaced from a codec or callback
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            Error::MissingField(msg) => write!(f, "missing field: {msg}"),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Error::ComponentNotRegistered(msg) => write!(f, "component not registered: {msg}"),
            Error::UnknownPrefab(msg) => write!(f, "unknown prefab: {msg}"),
            Error::DependencyCycle(msg) => write!(f, "dependency cycle: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Sink for errors encountered on paths that keep going after a failure
/// (deserialization skips bad entries rather than aborting the world load).
///
/// Injectable on [`SerializationContext`](crate::serialization::SerializationContext)
/// and [`PrefabManager`](crate::prefab::PrefabManager). Stateful collectors
/// use interior mutability.
pub trait ErrorReporter {
    fn report(&self, error: &Error);
}

/// Default reporter: forwards to the logging facade.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &Error) {
        tracing::error!(target: "sparse_ecs", "{error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::UnknownPrefab("Goblin".into());
        assert_eq!(err.to_string(), "unknown prefab: Goblin");

        let err = Error::DependencyCycle("A -> B -> A".into());
        assert!(err.to_string().contains("cycle"));
    }
}
