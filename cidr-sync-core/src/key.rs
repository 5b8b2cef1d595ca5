use std::{fmt::Display, str::FromStr};

use kube::Resource;
use thiserror::Error;

/// Identity of a watched object, formatted as `namespace/name` for namespaced
/// resources and as a bare `name` for cluster-scoped ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key is empty!")]
    Empty,
    #[error("Key '{}' has an empty name!", .0)]
    EmptyName(String),
    #[error("Key '{}' has an empty namespace!", .0)]
    EmptyNamespace(String),
    #[error("Key '{}' has unexpected segments!", .0)]
    UnexpectedSegments(String),
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Returns `None` for objects without a name, which the API server never hands out.
    pub fn from_resource<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();

        Some(Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone()?,
        })
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }

        let mut segments = raw.split('/');
        let first = segments.next().unwrap_or_default();
        let second = segments.next();

        if segments.next().is_some() {
            return Err(KeyError::UnexpectedSegments(raw.to_owned()));
        }

        match second {
            None => Ok(Self::cluster(first)),
            Some(_) if first.is_empty() => Err(KeyError::EmptyNamespace(raw.to_owned())),
            Some("") => Err(KeyError::EmptyName(raw.to_owned())),
            Some(name) => Ok(Self::namespaced(first, name)),
        }
    }
}
