//! Resource records exchanged with the declarative-state layer.
//!
//! A [`ResourceData`] carries one resource instance across a create, read,
//! update or delete call: its identifier, the attributes recorded by the last
//! run (absent on create), and the current attributes. Field access goes
//! through typed projections, so change detection is checked at compile time.

use serde::{Deserialize, Serialize};

/// Kind of managed resource.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A Dokku application.
    App,
    /// A managed data service.
    Service,
    /// A service-to-application link.
    Link,
}

/// One resource instance with its prior and current attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData<T> {
    /// Remote identifier; empty when the resource does not exist.
    id: String,
    /// Attributes recorded before this operation.
    prior: Option<T>,
    /// Desired attributes going in, observed attributes coming out.
    current: T,
}

impl<T> ResourceData<T> {
    /// Creates a record for a resource that does not exist yet.
    #[must_use]
    pub const fn for_create(desired: T) -> Self {
        Self {
            id: String::new(),
            prior: None,
            current: desired,
        }
    }

    /// Creates a record for an existing resource.
    #[must_use]
    pub fn new(id: impl Into<String>, prior: T, current: T) -> Self {
        Self {
            id: id.into(),
            prior: Some(prior),
            current,
        }
    }

    /// Returns the current attributes.
    #[must_use]
    pub const fn get(&self) -> &T {
        &self.current
    }

    /// Returns the prior attributes, if any were recorded.
    #[must_use]
    pub const fn prior(&self) -> Option<&T> {
        self.prior.as_ref()
    }

    /// Returns the prior and current value of one attribute.
    pub fn get_change<'a, V: ?Sized>(
        &'a self,
        field: impl Fn(&'a T) -> &'a V,
    ) -> (Option<&'a V>, &'a V) {
        (self.prior.as_ref().map(&field), field(&self.current))
    }

    /// Returns true if the attribute differs from its recorded value.
    ///
    /// Without a prior record every attribute counts as changed.
    pub fn has_change<V: PartialEq + ?Sized>(&self, field: impl Fn(&T) -> &V) -> bool {
        self.prior
            .as_ref()
            .is_none_or(|prior| field(prior) != field(&self.current))
    }

    /// Replaces the current attributes.
    pub fn set(&mut self, value: T) {
        self.current = value;
    }

    /// Sets the remote identifier; an empty id marks the resource as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Returns the remote identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true if the resource exists remotely.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Consumes the record, returning its id and current attributes.
    #[must_use]
    pub fn into_parts(self) -> (String, T) {
        (self.id, self.current)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::App => "app",
            Self::Service => "service",
            Self::Link => "link",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Attrs {
        name: String,
        size: u32,
    }

    fn attrs(name: &str, size: u32) -> Attrs {
        Attrs {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_create_reports_every_change() {
        let data = ResourceData::for_create(attrs("a", 1));
        assert!(data.has_change(|a| &a.name));
        assert_eq!(data.get_change(|a| &a.size), (None, &1));
        assert!(!data.exists());
    }

    #[test]
    fn test_change_detection_per_field() {
        let data = ResourceData::new("a", attrs("a", 1), attrs("b", 1));
        assert!(data.has_change(|a| &a.name));
        assert!(!data.has_change(|a| &a.size));
        assert_eq!(data.get_change(|a| a.name.as_str()), (Some("a"), "b"));
    }

    #[test]
    fn test_set_id_and_parts() {
        let mut data = ResourceData::new("a", attrs("a", 1), attrs("a", 2));
        data.set_id("");
        assert!(!data.exists());
        data.set(attrs("c", 3));
        data.set_id("c");
        assert_eq!(data.into_parts(), (String::from("c"), attrs("c", 3)));
    }
}
