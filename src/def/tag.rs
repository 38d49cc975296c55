//! # Tags: labels attachable to any definition.
//!
//! A [`TagDef`] declares a tag; a [`TagRef`] attaches it to a definition,
//! optionally with a configuration value. A definition depending on a tag
//! receives a read-only accessor over everything currently carrying it.

use std::sync::Arc;

use crate::dynamic::Dynamic;

use super::dependency::DependencyRef;
use super::id::{DefKind, Id};

/// Declaration of a tag.
///
/// Tags participate in registration like any other definition: a tag must
/// be registered (through some resource's registration list) before a
/// dependency on it resolves. A registered tag that nothing carries
/// resolves to an empty accessor, not an error.
pub struct TagDef {
    id: Id,
}

impl TagDef {
    /// Declares a tag with the given id.
    pub fn new(id: impl Into<Id>) -> Arc<Self> {
        Arc::new(Self { id: id.into() })
    }

    /// Declares a tag with a generated anonymous id.
    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            id: Id::anonymous(DefKind::Tag),
        })
    }

    /// The tag's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// A dependency reference on this tag.
    pub fn as_dep(&self) -> DependencyRef {
        DependencyRef::Tag(self.id.clone())
    }

    /// An attachment of this tag without configuration.
    pub fn attach(&self) -> TagRef {
        TagRef {
            id: self.id.clone(),
            config: None,
        }
    }

    /// An attachment of this tag carrying a configuration value.
    pub fn attach_with(&self, config: Dynamic) -> TagRef {
        TagRef {
            id: self.id.clone(),
            config: Some(config),
        }
    }
}

/// One attachment of a tag to a definition.
#[derive(Clone)]
pub struct TagRef {
    /// The attached tag's id.
    pub id: Id,
    /// Per-attachment configuration, surfaced through tag accessors.
    pub config: Option<Dynamic>,
}

impl TagRef {
    /// Attaches the named tag without configuration.
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{downcast_ref, dynamic};

    #[test]
    fn test_attachment_carries_config() {
        let tag = TagDef::new("route");
        let plain = tag.attach();
        assert!(plain.config.is_none());

        let configured = tag.attach_with(dynamic(String::from("/health")));
        let cfg = configured.config.expect("config present");
        assert_eq!(downcast_ref::<String>(&cfg).unwrap(), "/health");
    }

    #[test]
    fn test_dep_targets_tag_id() {
        let tag = TagDef::new("jobs");
        assert_eq!(tag.as_dep().target().as_str(), "jobs");
    }
}
