//! HTTP method → abstract policy action.

use std::fmt;

use axum::http::Method;
use serde::Serialize;

/// Abstract verb understood by the policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Retrieval
    Read,
    /// Anything else, including verbs not known today
    Modify,
}

impl Action {
    /// Name sent to the PDP
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Modify => "modify",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an HTTP method name to an [`Action`].
///
/// Only `GET` is a read. Every other token, including `HEAD`, lowercase
/// `get`, the empty string and unknown extension methods, is `Modify`.
#[must_use]
pub fn map_action(method: &str) -> Action {
    if method == Method::GET.as_str() {
        Action::Read
    } else {
        Action::Modify
    }
}

impl From<&Method> for Action {
    fn from(method: &Method) -> Self {
        map_action(method.as_str())
    }
}
