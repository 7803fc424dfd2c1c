pub mod claims;
pub mod condition;
pub mod connection;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod external;
pub mod managed;
pub mod meta;
pub mod queue;
pub mod resource;
pub mod retry;
pub mod store;

pub use condition::{
    BindingPhase, Condition, ConditionReason, ConditionStatus, ConditionType, ResourceStatus,
};
pub use controller::{Action, Controller, ControllerOptions, Manager, Reconciler};
pub use credentials::{CredentialResolver, Provider, Secret};
pub use error::{Error, Operation, Result};
pub use external::{
    Connecter, ConnectionDetails, ExternalClient, ExternalCreation, ExternalObservation,
    ExternalUpdate,
};
pub use managed::ManagedReconciler;
pub use meta::{Gvk, LabelSelector, Object, ObjectMeta, ObjectRef, Reference};
pub use resource::{
    Claim, Class, ClassSpecTemplate, Managed, ReclaimPolicy, ResourceClaimSpec, ResourceSpec,
};
pub use store::{Store, StoreEvent};
