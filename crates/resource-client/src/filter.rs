//! List/watch filters

use crate::error::ClientError;
use crate::selector::{FieldSelector, LabelSelector};
use kube::Resource;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which objects a list or watch call returns.
///
/// Selectors are passed to the API server verbatim; empty strings mean "no selector".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Namespace to restrict to, or `None` for all namespaces
    pub namespace: Option<String>,
    /// Field selector, e.g. `status.phase=Running`
    pub field_selector: Option<String>,
    /// Label selector, e.g. `app=web,!canary`
    pub label_selector: Option<String>,
}

impl ListFilter {
    /// Matches every object in every namespace.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches every object in `namespace`.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Sets the field selector.
    #[must_use]
    pub fn with_fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    /// Sets the label selector.
    #[must_use]
    pub fn with_labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Field selector, if set and non-empty.
    #[must_use]
    pub fn fields(&self) -> Option<&str> {
        self.field_selector.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Label selector, if set and non-empty.
    #[must_use]
    pub fn labels(&self) -> Option<&str> {
        self.label_selector.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Checks that both selectors parse.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSelector`] for a malformed selector.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.compile().map(|_| ())
    }

    /// Parses the selectors so the filter can be evaluated locally.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSelector`] for a malformed selector.
    pub fn compile(&self) -> Result<CompiledFilter, ClientError> {
        Ok(CompiledFilter {
            namespace: self.namespace.clone(),
            fields: self.fields().unwrap_or_default().parse()?,
            labels: self.labels().unwrap_or_default().parse()?,
        })
    }
}

/// A [`ListFilter`] with parsed selectors.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    namespace: Option<String>,
    fields: FieldSelector,
    labels: LabelSelector,
}

impl CompiledFilter {
    /// Returns `true` if the API server would include `object` in a list with this filter.
    pub fn matches<K>(&self, object: &K) -> bool
    where
        K: Resource + Serialize,
    {
        let meta = object.meta();
        let namespace_matches = self
            .namespace
            .as_deref()
            .is_none_or(|namespace| meta.namespace.as_deref() == Some(namespace));
        if !namespace_matches {
            return false;
        }

        let labels_match = match &meta.labels {
            Some(labels) => self.labels.matches(labels),
            None => self.labels.matches(&BTreeMap::new()),
        };
        if !labels_match {
            return false;
        }

        if self.fields.requirements().is_empty() {
            return true;
        }
        match serde_json::to_value(object) {
            Ok(value) => self.fields.matches(&value),
            Err(e) => {
                tracing::warn!("Failed to serialize object for field selector: {}", e);
                false
            }
        }
    }
}
