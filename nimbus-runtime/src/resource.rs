//! Managed resources, claims and classes.

use serde::{Deserialize, Serialize};

use crate::condition::{BindingPhase, Condition, ResourceStatus};
use crate::meta::{LabelSelector, Object, ObjectRef, Reference};

/// Finalizer held by the managed reconciler until the external resource is handled.
pub const MANAGED_FINALIZER: &str = "finalizer.managedresource.nimbus.io";

/// Finalizer held by the claim binding reconciler until the claim is unbound.
pub const CLAIM_FINALIZER: &str = "finalizer.resourceclaim.nimbus.io";

/// Annotation marking a class as the default for claims without a selector.
pub const DEFAULT_CLASS_ANNOTATION: &str = "resourceclass.nimbus.io/is-default-class";

/// What happens to the external resource when its managed resource is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Keep the external resource.
    #[default]
    Retain,
    /// Delete the external resource.
    Delete,
}

/// Points at a secret by namespace and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

/// Points at one key of a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

/// Points at a secret in the namespace of the referring record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSecretReference {
    pub name: String,
}

/// Spec fields common to every managed resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ObjectRef>,
    pub provider_ref: Reference,
    pub reclaim_policy: ReclaimPolicy,
}

/// A record describing one external resource.
pub trait Managed: Object {
    fn resource_spec(&self) -> &ResourceSpec;
    fn resource_spec_mut(&mut self) -> &mut ResourceSpec;
    fn status(&self) -> &ResourceStatus;
    fn status_mut(&mut self) -> &mut ResourceStatus;

    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.status_mut().set_conditions(conditions);
    }
}

/// Spec fields common to every claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceClaimSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_selector: Option<LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<LocalSecretReference>,
}

/// An abstract request for a managed resource.
pub trait Claim: Object {
    fn claim_spec(&self) -> &ResourceClaimSpec;
    fn claim_spec_mut(&mut self) -> &mut ResourceClaimSpec;
    fn status(&self) -> &ResourceStatus;
    fn status_mut(&mut self) -> &mut ResourceStatus;

    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.status_mut().set_conditions(conditions);
    }

    fn binding_phase(&self) -> BindingPhase {
        self.status().binding_phase
    }
}

/// Class fields common to every class template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassSpecTemplate {
    pub write_connection_secrets_to_namespace: String,
    pub provider_ref: Reference,
    pub reclaim_policy: ReclaimPolicy,
}

/// A template for managed resources.
pub trait Class: Object {
    fn class_template(&self) -> &ClassSpecTemplate;

    fn is_default(&self) -> bool {
        self.meta()
            .annotations
            .get(DEFAULT_CLASS_ANNOTATION)
            .is_some_and(|v| v == "true")
    }
}
