//! Protected label diffing
//!
//! Compares only the restricted views of the old and new label maps, so churn
//! on unrelated labels never affects the verdict.

use std::collections::{BTreeMap, BTreeSet};

use crate::request::Operation;

pub type Labels = BTreeMap<String, String>;

/// Label keys whose changes are restricted for non-exempt identities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedLabelPolicy {
    /// Never added, removed or changed
    pub immutable: BTreeSet<String>,
    /// May be removed, never added or changed
    pub removable_only: BTreeSet<String>,
}

impl ProtectedLabelPolicy {
    pub fn new<I, R, S, T>(immutable: I, removable_only: R) -> Self
    where
        I: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            immutable: immutable.into_iter().map(Into::into).collect(),
            removable_only: removable_only.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.immutable.is_empty() && self.removable_only.is_empty()
    }

    fn protects(&self, key: &str) -> bool {
        self.immutable.contains(key) || self.removable_only.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

fn restrict<'a>(labels: &'a Labels, keys: &BTreeSet<String>) -> BTreeMap<&'a str, &'a str> {
    labels
        .iter()
        .filter(|(k, _)| keys.contains(k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn key_list<'a>(keys: impl IntoIterator<Item = &'a str>) -> String {
    keys.into_iter().collect::<Vec<_>>().join(", ")
}

/// Classifies a label change under `policy`
///
/// Missing label maps are treated as empty. Connect requests carry no labels
/// and are always allowed.
pub fn evaluate(
    operation: Operation,
    old: Option<&Labels>,
    new: Option<&Labels>,
    policy: &ProtectedLabelPolicy,
) -> Verdict {
    if policy.is_empty() {
        return Verdict::Allowed;
    }

    let empty = Labels::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    match operation {
        Operation::Create => {
            let present: Vec<&str> = new
                .keys()
                .map(String::as_str)
                .filter(|k| policy.protects(k))
                .collect();

            if present.is_empty() {
                Verdict::Allowed
            } else {
                Verdict::Denied(format!(
                    "Managed labels cannot be set on creation: {}",
                    key_list(present)
                ))
            }
        }
        Operation::Update => {
            let old_immutable = restrict(old, &policy.immutable);
            let new_immutable = restrict(new, &policy.immutable);
            if old_immutable != new_immutable {
                let changed = policy
                    .immutable
                    .iter()
                    .map(String::as_str)
                    .filter(|k| old_immutable.get(k) != new_immutable.get(k));
                return Verdict::Denied(format!(
                    "Managed labels are immutable: {}",
                    key_list(changed)
                ));
            }

            let old_removable = restrict(old, &policy.removable_only);
            let violations: Vec<&str> = restrict(new, &policy.removable_only)
                .into_iter()
                .filter(|(k, v)| old_removable.get(k) != Some(v))
                .map(|(k, _)| k)
                .collect();

            if violations.is_empty() {
                Verdict::Allowed
            } else {
                Verdict::Denied(format!(
                    "Managed labels can only be removed: {}",
                    key_list(violations)
                ))
            }
        }
        Operation::Delete | Operation::Connect => Verdict::Allowed,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const PV_QUOTA: &str = "managed.openshift.io/storage-pv-quota-exempt";
    const LB_QUOTA: &str = "managed.openshift.io/service-lb-quota-exempt";
    const MONITORING: &str = "openshift.io/cluster-monitoring";

    fn policy() -> ProtectedLabelPolicy {
        ProtectedLabelPolicy::new([PV_QUOTA, LB_QUOTA], [MONITORING])
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_create_with_immutable_label_denied() {
        let new = labels(&[(PV_QUOTA, "true")]);
        let verdict = evaluate(Operation::Create, None, Some(&new), &policy());
        assert!(matches!(verdict, Verdict::Denied(reason) if reason.contains(PV_QUOTA)));
    }

    #[test]
    fn test_create_with_removable_label_denied() {
        let new = labels(&[(MONITORING, "true")]);
        assert!(!evaluate(Operation::Create, None, Some(&new), &policy()).is_allowed());
    }

    #[test]
    fn test_create_with_unrelated_labels_allowed() {
        let new = labels(&[("team", "a")]);
        assert!(evaluate(Operation::Create, None, Some(&new), &policy()).is_allowed());
        assert!(evaluate(Operation::Create, None, None, &policy()).is_allowed());
    }

    #[test]
    fn test_removing_removable_label_allowed() {
        let old = labels(&[(MONITORING, "true")]);
        let new = Labels::new();
        assert_eq!(
            evaluate(Operation::Update, Some(&old), Some(&new), &policy()),
            Verdict::Allowed
        );
    }

    #[test]
    fn test_adding_removable_label_denied() {
        let old = Labels::new();
        let new = labels(&[(MONITORING, "true")]);
        let verdict = evaluate(Operation::Update, Some(&old), Some(&new), &policy());
        assert!(matches!(verdict, Verdict::Denied(reason) if reason.contains("only be removed")));
    }

    #[test]
    fn test_editing_removable_label_denied() {
        let old = labels(&[(MONITORING, "true")]);
        let new = labels(&[(MONITORING, "false")]);
        assert!(!evaluate(Operation::Update, Some(&old), Some(&new), &policy()).is_allowed());
    }

    #[test]
    fn test_immutable_label_changes_denied() {
        let with = labels(&[(LB_QUOTA, "true")]);
        let other = labels(&[(LB_QUOTA, "false")]);
        let without = Labels::new();

        for (old, new) in [(&with, &without), (&without, &with), (&with, &other)] {
            let verdict = evaluate(Operation::Update, Some(old), Some(new), &policy());
            assert!(matches!(verdict, Verdict::Denied(reason) if reason.contains(LB_QUOTA)));
        }
    }

    #[test]
    fn test_unrelated_churn_ignored() {
        let old = labels(&[(PV_QUOTA, "true"), (MONITORING, "true"), ("a", "1")]);
        let new = labels(&[(PV_QUOTA, "true"), (MONITORING, "true"), ("b", "2")]);
        assert!(evaluate(Operation::Update, Some(&old), Some(&new), &policy()).is_allowed());
    }

    #[test]
    fn test_delete_always_allowed() {
        let old = labels(&[(PV_QUOTA, "true")]);
        assert!(evaluate(Operation::Delete, Some(&old), None, &policy()).is_allowed());
    }

    fn label_map() -> impl Strategy<Value = Labels> {
        let key = prop_oneof![
            Just(PV_QUOTA.to_owned()),
            Just(LB_QUOTA.to_owned()),
            Just(MONITORING.to_owned()),
            "[a-z]{1,8}",
        ];
        let value = prop_oneof![Just("true".to_owned()), Just("false".to_owned())];
        prop::collection::btree_map(key, value, 0..5)
    }

    proptest! {
        #[test]
        fn prop_create_law(new in label_map()) {
            let policy = policy();
            let protected = new.keys().any(|k| policy.protects(k));
            let verdict = evaluate(Operation::Create, None, Some(&new), &policy);
            prop_assert_eq!(verdict.is_allowed(), !protected);
        }

        #[test]
        fn prop_update_law(old in label_map(), new in label_map()) {
            let policy = policy();
            let immutable_same =
                restrict(&old, &policy.immutable) == restrict(&new, &policy.immutable);
            let old_removable = restrict(&old, &policy.removable_only);
            let removable_ok = restrict(&new, &policy.removable_only)
                .iter()
                .all(|(k, v)| old_removable.get(k) == Some(v));

            let verdict = evaluate(Operation::Update, Some(&old), Some(&new), &policy);
            prop_assert_eq!(verdict.is_allowed(), immutable_same && removable_ok);
        }

        #[test]
        fn prop_delete_law(old in label_map(), new in label_map()) {
            let verdict = evaluate(Operation::Delete, Some(&old), Some(&new), &policy());
            prop_assert!(verdict.is_allowed());
        }

        #[test]
        fn prop_unchanged_labels_allowed(labels in label_map()) {
            let verdict = evaluate(Operation::Update, Some(&labels), Some(&labels), &policy());
            prop_assert!(verdict.is_allowed());
        }

        #[test]
        fn prop_empty_policy_allows(old in label_map(), new in label_map()) {
            let empty = ProtectedLabelPolicy::default();
            prop_assert!(evaluate(Operation::Create, None, Some(&new), &empty).is_allowed());
            prop_assert!(evaluate(Operation::Update, Some(&old), Some(&new), &empty).is_allowed());
        }
    }
}
