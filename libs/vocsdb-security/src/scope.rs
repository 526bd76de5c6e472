use serde::{Deserialize, Serialize};

/// A domain identifier.
pub type DomainId = String;

/// A project identifier.
pub type ProjectId = String;

/// The owned location of a User/Role/Loop inside the auth tree.
///
/// Every owned entity's index entry carries one of these instead of a parent
/// pointer walked at read time — see the pointer-chasing-to-parents
/// redesign decision. A `Scope` is a value, not a reference: it survives the
/// entity being relocated within the tree and is cheap to copy.
///
/// # Examples
///
/// ```
/// use vocsdb_security::Scope;
///
/// let s = Scope::Project("localhost".to_owned(), "project1".to_owned());
/// assert_eq!(s.domain_id(), "localhost");
/// assert_eq!(s.project_id(), Some("project1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Owned directly by a domain.
    Domain(DomainId),
    /// Owned by a project, which itself belongs to a domain.
    Project(DomainId, ProjectId),
}

impl Scope {
    /// The owning domain id, regardless of whether the scope is a domain or
    /// a project within it.
    #[inline]
    #[must_use]
    pub fn domain_id(&self) -> &str {
        match self {
            Self::Domain(d) | Self::Project(d, _) => d,
        }
    }

    /// The owning project id, if this scope is a project.
    #[inline]
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Domain(_) => None,
            Self::Project(_, p) => Some(p),
        }
    }

    /// `true` iff this scope names a domain directly (not a project).
    #[inline]
    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }

    /// `true` iff this scope names a project.
    #[inline]
    #[must_use]
    pub fn is_project(&self) -> bool {
        matches!(self, Self::Project(..))
    }

    /// The project's enclosing domain scope, or `self` unchanged if this is
    /// already a domain scope. Used to resolve project-admin inheritance
    /// (domain-admin subsumes project-admin within its domain).
    #[must_use]
    pub fn parent_domain(&self) -> Self {
        Self::Domain(self.domain_id().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_scope_has_no_project() {
        let s = Scope::Domain("localhost".to_owned());
        assert_eq!(s.domain_id(), "localhost");
        assert_eq!(s.project_id(), None);
        assert!(s.is_domain());
        assert!(!s.is_project());
    }

    #[test]
    fn project_scope_reports_both_ids() {
        let s = Scope::Project("localhost".to_owned(), "project1".to_owned());
        assert_eq!(s.domain_id(), "localhost");
        assert_eq!(s.project_id(), Some("project1"));
        assert!(s.is_project());
    }

    #[test]
    fn parent_domain_strips_project() {
        let s = Scope::Project("localhost".to_owned(), "project1".to_owned());
        assert_eq!(s.parent_domain(), Scope::Domain("localhost".to_owned()));
        let d = Scope::Domain("localhost".to_owned());
        assert_eq!(d.parent_domain(), d);
    }
}
