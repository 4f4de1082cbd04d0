//! Precedence-ordered privilege resolution
//!
//! Checks run in a fixed order and stop at the first match:
//!
//! 1. the unauthenticated sentinel is never exempt
//! 2. explicit usernames
//! 3. explicit groups
//! 4. service-account groups matching a pattern, or service accounts named in the set
//! 5. layered-product admins, only for resources whose name matches their pattern
//!
//! Patterns are compiled once when the set is built.

use std::collections::BTreeSet;

use regex::{Regex, RegexSet};

use crate::error::RegistrationError;
use crate::request::Identity;

/// A compiled class of regular expressions
#[derive(Debug, Clone)]
pub struct PatternClass {
    set: RegexSet,
    patterns: Vec<String>,
}

impl PatternClass {
    pub fn new<I, S>(patterns: I) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        for pattern in &patterns {
            Regex::new(pattern).map_err(|source| RegistrationError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        let set = RegexSet::new(&patterns).map_err(|source| RegistrationError::InvalidPattern {
            pattern: patterns.join("|"),
            source,
        })?;

        Ok(Self { set, patterns })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.set.is_match(haystack)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Which rule granted an exemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exemption {
    ExplicitUser,
    ExplicitGroup,
    ServiceAccount,
    LayeredProduct,
}

impl Exemption {
    /// Informational reason used on allowed responses
    pub const fn reason(self) -> &'static str {
        match self {
            Self::ExplicitUser | Self::ExplicitGroup => "Cluster and SRE admins may access",
            Self::ServiceAccount => "Privileged service accounts may access",
            Self::LayeredProduct => "Layered product admins may access",
        }
    }
}

/// Terminal branch of privilege resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Anonymous caller; deny early and log
    Unauthenticated,
    Exempt(Exemption),
    NotExempt,
}

#[derive(Debug, Clone)]
struct LayeredProduct {
    group: String,
    names: PatternClass,
}

/// Identities exempt from a policy's substantive check
#[derive(Debug, Clone, Default)]
pub struct PrivilegeSet {
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    service_account_groups: Option<PatternClass>,
    service_account_names: BTreeSet<String>,
    layered_product: Option<LayeredProduct>,
}

impl PrivilegeSet {
    pub fn builder() -> PrivilegeSetBuilder {
        PrivilegeSetBuilder::default()
    }

    /// Resolves `identity` against this set for a resource called `resource_name`
    pub fn resolve(&self, identity: &Identity, resource_name: &str) -> Resolution {
        if identity.is_unauthenticated() {
            return Resolution::Unauthenticated;
        }

        if self.users.contains(&identity.username) {
            return Resolution::Exempt(Exemption::ExplicitUser);
        }

        if identity.groups.iter().any(|g| self.groups.contains(g)) {
            return Resolution::Exempt(Exemption::ExplicitGroup);
        }

        if let Some(class) = &self.service_account_groups
            && identity.groups.iter().any(|g| class.is_match(g))
        {
            return Resolution::Exempt(Exemption::ServiceAccount);
        }

        if let Some((_, name)) = identity.service_account()
            && self.service_account_names.contains(name)
        {
            return Resolution::Exempt(Exemption::ServiceAccount);
        }

        if let Some(layered) = &self.layered_product
            && identity.in_group(&layered.group)
            && layered.names.is_match(resource_name)
        {
            return Resolution::Exempt(Exemption::LayeredProduct);
        }

        Resolution::NotExempt
    }

    pub fn is_exempt(&self, identity: &Identity, resource_name: &str) -> bool {
        matches!(self.resolve(identity, resource_name), Resolution::Exempt(_))
    }
}

#[derive(Debug, Default)]
pub struct PrivilegeSetBuilder {
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    service_account_groups: Vec<String>,
    service_account_names: BTreeSet<String>,
    layered_product: Option<(String, String)>,
}

impl PrivilegeSetBuilder {
    #[must_use]
    pub fn users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.extend(users.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Group patterns such as `^system:serviceaccounts:openshift-.*`
    #[must_use]
    pub fn service_account_groups<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_account_groups
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Service accounts exempt by their short name, in any namespace
    #[must_use]
    pub fn service_account_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_account_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn layered_product(mut self, group: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.layered_product = Some((group.into(), pattern.into()));
        self
    }

    pub fn build(self) -> Result<PrivilegeSet, RegistrationError> {
        let service_account_groups = if self.service_account_groups.is_empty() {
            None
        } else {
            Some(PatternClass::new(self.service_account_groups)?)
        };

        let layered_product = self
            .layered_product
            .map(|(group, pattern)| {
                PatternClass::new([pattern]).map(|names| LayeredProduct { group, names })
            })
            .transpose()?;

        Ok(PrivilegeSet {
            users: self.users,
            groups: self.groups,
            service_account_groups,
            service_account_names: self.service_account_names,
            layered_product,
        })
    }
}
