//! Record types served by this provider.

pub mod cache;
pub mod network;

use nimbus_runtime::meta::{Gvk, Object, ObjectMeta};
use nimbus_runtime::{Error, Managed, ResourceSpec, ResourceStatus, Result};

pub use cache::{
    REDIS_CLASS_GVK, REDIS_CLUSTER_GVK, REDIS_GVK, Redis, RedisClass, RedisCluster,
    SUPPORTED_REDIS_VERSION,
};
pub use network::{SUBNET_GVK, Subnet};

/// Every managed resource kind this provider reconciles.
///
/// All managed kinds share one store. Components written for one kind
/// recover it with [`AzureManaged::subnet_mut`] and friends, which fail
/// with `TypeMismatch` on any other kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AzureManaged {
    Subnet(Subnet),
    Redis(Redis),
}

impl AzureManaged {
    pub fn is_kind(&self, gvk: Gvk) -> bool {
        self.gvk() == gvk
    }

    pub fn subnet(&self) -> Result<&Subnet> {
        match self {
            AzureManaged::Subnet(s) => Ok(s),
            other => Err(Error::type_mismatch(SUBNET_GVK.kind, other.gvk().kind)),
        }
    }

    pub fn subnet_mut(&mut self) -> Result<&mut Subnet> {
        match self {
            AzureManaged::Subnet(s) => Ok(s),
            other => Err(Error::type_mismatch(SUBNET_GVK.kind, other.gvk().kind)),
        }
    }

    pub fn redis(&self) -> Result<&Redis> {
        match self {
            AzureManaged::Redis(r) => Ok(r),
            other => Err(Error::type_mismatch(REDIS_GVK.kind, other.gvk().kind)),
        }
    }

    pub fn redis_mut(&mut self) -> Result<&mut Redis> {
        match self {
            AzureManaged::Redis(r) => Ok(r),
            other => Err(Error::type_mismatch(REDIS_GVK.kind, other.gvk().kind)),
        }
    }
}

/// Forwards to the record inside the variant.
macro_rules! each_kind {
    ($mg:expr, $inner:ident => $body:expr) => {
        match $mg {
            AzureManaged::Subnet($inner) => $body,
            AzureManaged::Redis($inner) => $body,
        }
    };
}

impl Object for AzureManaged {
    fn gvk(&self) -> Gvk {
        each_kind!(self, r => r.gvk())
    }
    fn meta(&self) -> &ObjectMeta {
        each_kind!(self, r => r.meta())
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        each_kind!(self, r => r.meta_mut())
    }
}

impl Managed for AzureManaged {
    fn resource_spec(&self) -> &ResourceSpec {
        each_kind!(self, r => r.resource_spec())
    }
    fn resource_spec_mut(&mut self) -> &mut ResourceSpec {
        each_kind!(self, r => r.resource_spec_mut())
    }
    fn status(&self) -> &ResourceStatus {
        each_kind!(self, r => Managed::status(r))
    }
    fn status_mut(&mut self) -> &mut ResourceStatus {
        each_kind!(self, r => Managed::status_mut(r))
    }
}

impl From<Subnet> for AzureManaged {
    fn from(s: Subnet) -> Self {
        AzureManaged::Subnet(s)
    }
}

impl From<Redis> for AzureManaged {
    fn from(r: Redis) -> Self {
        AzureManaged::Redis(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_accessors() {
        let mut mg = AzureManaged::from(Redis::default());
        assert!(mg.is_kind(REDIS_GVK));
        assert!(mg.redis_mut().is_ok());

        let err = mg.subnet_mut().unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(err.to_string(), "expected Subnet, got Redis");
    }

    #[test]
    fn test_delegates_metadata() {
        let mut subnet = Subnet::default();
        subnet.metadata.name = "snet".to_string();
        let mut mg = AzureManaged::from(subnet);
        assert_eq!(mg.object_ref().kind, "Subnet");

        mg.meta_mut().add_finalizer("f");
        assert_eq!(mg.subnet().unwrap().metadata.finalizers, vec!["f".to_string()]);
    }
}
