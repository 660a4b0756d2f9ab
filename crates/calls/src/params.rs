//! Description of a remote call.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of one remote call: the operation plus its qualifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Operation name, e.g. `listPod` or `replaceService`.
    pub method: String,
    /// Namespace the call targets, if namespaced.
    pub namespace: Option<String>,
    /// Name of the target object, if the call addresses one.
    pub name: Option<String>,
    /// Request payload.
    pub body: Option<Value>,
    /// Field selector for list calls.
    pub field_selector: Option<String>,
    /// Label selector for list calls.
    pub label_selector: Option<String>,
    /// Resource version for optimistic concurrency and watches.
    pub resource_version: Option<String>,
}

impl RequestParams {
    /// Create parameters for `method` with no qualifiers.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            namespace: None,
            name: None,
            body: None,
            field_selector: None,
            label_selector: None,
            resource_version: None,
        }
    }

    /// Target a namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Target a named object.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }
}

impl fmt::Display for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method)?;
        match (&self.namespace, &self.name) {
            (Some(ns), Some(name)) => write!(f, " {ns}/{name}"),
            (Some(ns), None) => write!(f, " {ns}"),
            (None, Some(name)) => write!(f, " {name}"),
            (None, None) => Ok(()),
        }
    }
}
