//! Object keys
//!
//! Objects are identified by `namespace/name`, or by `name` alone for
//! cluster-scoped objects.

use crate::handler::DeletedObject;
use kube::Resource;
use thiserror::Error;

/// Errors deriving or splitting keys
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// `metadata.name` is absent or empty
    #[error("object has no name")]
    MissingName,

    /// The key has more than one `/` or an empty part
    #[error("unexpected key format: {0:?}")]
    InvalidKey(String),
}

/// Key of `object`: `namespace/name`, or `name` when it has no namespace.
///
/// # Errors
///
/// Returns [`KeyError::MissingName`] if the object has no name.
pub fn meta_namespace_key<K: Resource>(object: &K) -> Result<String, KeyError> {
    let meta = object.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(KeyError::MissingName)?;
    Ok(match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    })
}

/// Key of a deleted object. Tombstones already carry their key.
///
/// # Errors
///
/// Returns [`KeyError::MissingName`] if a live object has no name.
pub fn deletion_handling_key<K: Resource>(deleted: &DeletedObject<K>) -> Result<String, KeyError> {
    match deleted {
        DeletedObject::Live(object) => meta_namespace_key(object.as_ref()),
        DeletedObject::Tombstone(tombstone) => Ok(tombstone.key.clone()),
    }
}

/// Splits a key into its namespace (if any) and name.
///
/// # Errors
///
/// Returns [`KeyError::InvalidKey`] for keys with more than one `/` or an empty part.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    let invalid = || KeyError::InvalidKey(key.to_string());
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
            Ok((Some(namespace), name))
        }
        _ => Err(invalid()),
    }
}
