//! Payload typing: what can be dispatched and received.

use std::any::{type_name, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type that can travel over the service bus as an integration event.
///
/// `TYPE_ID` is the default wire-level identifier written into the
/// `PayloadTypeId` application property. Registrations may override it.
/// Usually implemented with `#[derive(Payload)]`.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Default payload type id (the simple type name when derived).
    const TYPE_ID: &'static str;
}

/// Runtime identity of a payload type, used as a registry key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    /// Identity of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, without generic arguments.
    pub fn simple_name(&self) -> &'static str {
        simple_name(self.name)
    }
}

impl fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.simple_name())
    }
}

pub(crate) fn simple_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
