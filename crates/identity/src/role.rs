use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use roster_core::{DomainError, DomainResult, ValueObject};

/// Role held by a user.
///
/// A plain value: two roles are equal iff their names are equal. Roles have
/// no identity; when persisted they live as child rows of their user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    /// Validating constructor: rejects blank role names.
    pub fn parse(value: impl Into<Cow<'static, str>>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("role value must not be blank"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Role {}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        assert_eq!(Role::new("Admin"), Role::new(String::from("Admin")));
        assert_ne!(Role::new("Admin"), Role::new("admin"));
    }

    #[test]
    fn parse_rejects_blank_values() {
        assert!(matches!(Role::parse("   "), Err(DomainError::Validation(_))));
        assert_eq!(Role::parse("Basic").unwrap().as_str(), "Basic");
    }
}
