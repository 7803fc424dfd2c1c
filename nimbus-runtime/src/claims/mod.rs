//! Matching claims to classes and managed resources.
//!
//! Three reconcilers share one claim kind. Their watch filters are mutually
//! exclusive, so at most one of them acts on a claim at a time:
//! - scheduling: the claim selects classes by label
//! - defaulting: the claim names nothing, the default class is used
//! - binding: the claim references a class or a managed resource

pub mod binding;
pub mod defaulting;
pub mod scheduling;

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::controller::Predicate;
use crate::error::Result;
use crate::meta::{EXTERNAL_NAME_ANNOTATION, Gvk, Object};
use crate::resource::{Claim, Class, Managed};

pub use binding::{ApiBinder, Binder, ClaimBindingReconciler};
pub use defaulting::ClaimDefaultingReconciler;
pub use scheduling::ClaimSchedulingReconciler;

pub fn has_class_selector<C: Claim>(claim: &C) -> bool {
    claim.claim_spec().class_selector.is_some()
}

pub fn has_no_class_selector<C: Claim>(claim: &C) -> bool {
    claim.claim_spec().class_selector.is_none()
}

pub fn has_no_class_reference<C: Claim>(claim: &C) -> bool {
    claim.claim_spec().class_ref.is_none()
}

pub fn has_no_managed_resource_reference<C: Claim>(claim: &C) -> bool {
    claim.claim_spec().resource_ref.is_none()
}

/// Claims whose class reference points at the given class kind.
pub fn has_class_reference_kind<C: Claim>(kind: Gvk) -> Predicate<C> {
    Arc::new(move |claim: &C| {
        claim
            .claim_spec()
            .class_ref
            .as_ref()
            .is_some_and(|r| r.is_kind(kind))
    })
}

/// Claims whose resource reference points at the given managed kind.
pub fn has_managed_resource_reference_kind<C: Claim>(kind: Gvk) -> Predicate<C> {
    Arc::new(move |claim: &C| {
        claim
            .claim_spec()
            .resource_ref
            .as_ref()
            .is_some_and(|r| r.is_kind(kind))
    })
}

pub fn all_of<T: 'static>(predicates: Vec<Predicate<T>>) -> Predicate<T> {
    Arc::new(move |obj: &T| predicates.iter().all(|p| p(obj)))
}

pub fn any_of<T: 'static>(predicates: Vec<Predicate<T>>) -> Predicate<T> {
    Arc::new(move |obj: &T| predicates.iter().any(|p| p(obj)))
}

/// Filter for claims handled by the scheduling reconciler.
pub fn schedulable<C: Claim>() -> Predicate<C> {
    all_of(vec![
        Arc::new(has_class_selector::<C>) as Predicate<C>,
        Arc::new(has_no_class_reference::<C>) as Predicate<C>,
        Arc::new(has_no_managed_resource_reference::<C>) as Predicate<C>,
    ])
}

/// Filter for claims handled by the defaulting reconciler.
pub fn defaultable<C: Claim>() -> Predicate<C> {
    all_of(vec![
        Arc::new(has_no_class_selector::<C>) as Predicate<C>,
        Arc::new(has_no_class_reference::<C>) as Predicate<C>,
        Arc::new(has_no_managed_resource_reference::<C>) as Predicate<C>,
    ])
}

/// Filter for claims handled by the binding reconciler.
pub fn bindable<C: Claim>(class_kind: Gvk, managed_kind: Gvk) -> Predicate<C> {
    any_of(vec![
        has_class_reference_kind(class_kind),
        has_managed_resource_reference_kind(managed_kind),
    ])
}

/// Fills in a managed resource stub from a claim and the class it selected.
pub trait ManagedConfigurator<C, K, M>: Send + Sync {
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()>;
}

impl<C, K, M, F> ManagedConfigurator<C, K, M> for F
where
    F: Fn(&C, &K, &mut M) -> Result<()> + Send + Sync,
{
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()> {
        self(claim, class, managed)
    }
}

/// Copies the class reclaim policy onto the managed resource.
pub fn configure_reclaim_policy<C: Claim, K: Class, M: Managed>(
    _claim: &C,
    class: &K,
    managed: &mut M,
) -> Result<()> {
    managed.resource_spec_mut().reclaim_policy = class.class_template().reclaim_policy;
    Ok(())
}

const NAME_SUFFIX_LEN: usize = 5;

/// Names the managed resource after its claim, plus a random suffix, and
/// uses that name for the external resource too.
pub fn configure_names<C: Claim, K: Class, M: Managed>(
    claim: &C,
    _class: &K,
    managed: &mut M,
) -> Result<()> {
    let meta = managed.meta_mut();
    if meta.name.is_empty() {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NAME_SUFFIX_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        let claim_meta = claim.meta();
        meta.name = match &claim_meta.namespace {
            Some(ns) => format!("{}-{}-{}", ns, claim_meta.name, suffix),
            None => format!("{}-{}", claim_meta.name, suffix),
        };
    }
    if !meta.annotations.contains_key(EXTERNAL_NAME_ANNOTATION) {
        let name = meta.name.clone();
        meta.annotations
            .insert(EXTERNAL_NAME_ANNOTATION.to_string(), name);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::condition::ResourceStatus;
    use crate::meta::{LabelSelector, ObjectMeta, ObjectRef};
    use crate::resource::{ClassSpecTemplate, ReclaimPolicy, ResourceClaimSpec, ResourceSpec};

    pub const CLAIM: Gvk = Gvk::new("test.nimbus.io", "v1", "CacheClaim");
    pub const CLASS: Gvk = Gvk::new("test.nimbus.io", "v1", "CacheClass");
    pub const MANAGED: Gvk = Gvk::new("test.nimbus.io", "v1", "Cache");

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct TestClaim {
        pub meta: ObjectMeta,
        pub spec: ResourceClaimSpec,
        pub status: ResourceStatus,
    }

    impl Object for TestClaim {
        fn gvk(&self) -> Gvk {
            CLAIM
        }
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    impl Claim for TestClaim {
        fn claim_spec(&self) -> &ResourceClaimSpec {
            &self.spec
        }
        fn claim_spec_mut(&mut self) -> &mut ResourceClaimSpec {
            &mut self.spec
        }
        fn status(&self) -> &ResourceStatus {
            &self.status
        }
        fn status_mut(&mut self) -> &mut ResourceStatus {
            &mut self.status
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct TestClass {
        pub meta: ObjectMeta,
        pub template: ClassSpecTemplate,
    }

    impl Object for TestClass {
        fn gvk(&self) -> Gvk {
            CLASS
        }
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    impl Class for TestClass {
        fn class_template(&self) -> &ClassSpecTemplate {
            &self.template
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct TestManaged {
        pub meta: ObjectMeta,
        pub spec: ResourceSpec,
        pub status: ResourceStatus,
    }

    impl Object for TestManaged {
        fn gvk(&self) -> Gvk {
            MANAGED
        }
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    impl Managed for TestManaged {
        fn resource_spec(&self) -> &ResourceSpec {
            &self.spec
        }
        fn resource_spec_mut(&mut self) -> &mut ResourceSpec {
            &mut self.spec
        }
        fn status(&self) -> &ResourceStatus {
            &self.status
        }
        fn status_mut(&mut self) -> &mut ResourceStatus {
            &mut self.status
        }
    }

    pub fn claim(name: &str) -> TestClaim {
        TestClaim {
            meta: ObjectMeta::named(Some("default"), name),
            ..Default::default()
        }
    }

    pub fn class(name: &str, labels: &[(&str, &str)]) -> TestClass {
        let mut meta = ObjectMeta::named(None, name);
        meta.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TestClass {
            meta,
            template: ClassSpecTemplate {
                write_connection_secrets_to_namespace: "nimbus-system".to_string(),
                reclaim_policy: ReclaimPolicy::Delete,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_filters_are_exclusive() {
        let schedule = schedulable::<TestClaim>();
        let default = defaultable::<TestClaim>();
        let bind = bindable::<TestClaim>(CLASS, MANAGED);

        let mut selecting = claim("a");
        selecting.spec.class_selector = Some(LabelSelector::new([("tier", "fast")]));
        let plain = claim("b");
        let mut referencing = claim("c");
        referencing.spec.class_ref = Some(ObjectRef::new(CLASS, None, "fast"));
        // A selector stops mattering once a class has been chosen.
        let mut scheduled = selecting.clone();
        scheduled.spec.class_ref = Some(ObjectRef::new(CLASS, None, "fast"));

        for (c, expected) in [
            (&selecting, (true, false, false)),
            (&plain, (false, true, false)),
            (&referencing, (false, false, true)),
            (&scheduled, (false, false, true)),
        ] {
            assert_eq!((schedule(c), default(c), bind(c)), expected, "{}", c.meta.name);
        }
    }

    #[test]
    fn test_bindable_checks_reference_kind() {
        let bind = bindable::<TestClaim>(CLASS, MANAGED);
        let mut other = claim("a");
        other.spec.class_ref = Some(ObjectRef::new(
            Gvk::new("test.nimbus.io", "v1", "OtherClass"),
            None,
            "x",
        ));
        assert!(!bind(&other));

        let mut static_bound = claim("b");
        static_bound.spec.resource_ref = Some(ObjectRef::new(MANAGED, None, "cache-1"));
        assert!(bind(&static_bound));
    }

    #[test]
    fn test_configure_names() {
        let mut managed = TestManaged::default();
        configure_names(&claim("cache"), &class("c", &[]), &mut managed).unwrap();

        let name = &managed.meta.name;
        assert!(name.starts_with("default-cache-"));
        assert_eq!(name.len(), "default-cache-".len() + NAME_SUFFIX_LEN);
        assert_eq!(managed.meta.external_name(), name);
    }

    #[test]
    fn test_configure_reclaim_policy() {
        let mut managed = TestManaged::default();
        let configurator: &dyn ManagedConfigurator<TestClaim, TestClass, TestManaged> =
            &configure_reclaim_policy::<TestClaim, TestClass, TestManaged>;
        configurator
            .configure(&claim("a"), &class("c", &[]), &mut managed)
            .unwrap();
        assert_eq!(managed.spec.reclaim_policy, ReclaimPolicy::Delete);
    }
}
