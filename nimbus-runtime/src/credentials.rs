//! Provider and secret records, and resolution of provider credentials.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::meta::{Gvk, Object, ObjectMeta, ObjectRef, Reference};
use crate::resource::SecretKeySelector;
use crate::store::Store;

pub const SECRET_GVK: Gvk = Gvk::new("", "v1", "Secret");
pub const PROVIDER_GVK: Gvk = Gvk::new("azure.nimbus.io", "v1alpha3", "Provider");

/// Opaque key/value payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Secret {
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, Vec<u8>>,
    /// Write-only convenience for manifests; folded into `data` by [`Secret::normalize`].
    #[serde(skip_serializing)]
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::named(Some(namespace), name),
            ..Default::default()
        }
    }

    /// Move `string_data` into `data`.
    pub fn normalize(mut self) -> Self {
        for (key, value) in std::mem::take(&mut self.string_data) {
            self.data.insert(key, value.into_bytes());
        }
        self
    }

    pub fn key_ref(namespace: &str, name: &str) -> ObjectRef {
        ObjectRef::new(SECRET_GVK, Some(namespace), name)
    }
}

impl Object for Secret {
    fn gvk(&self) -> Gvk {
        SECRET_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSpec {
    pub credentials_secret_ref: SecretKeySelector,
}

/// Cloud account configuration. Holds a reference to the credentials secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub metadata: ObjectMeta,
    pub spec: ProviderSpec,
}

impl Object for Provider {
    fn gvk(&self) -> Gvk {
        PROVIDER_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Resolves a provider reference to the raw credential bytes it points at.
///
/// Lookups are not cached: every call reads the provider and its secret.
#[derive(Clone)]
pub struct CredentialResolver {
    providers: Arc<Store<Provider>>,
    secrets: Arc<Store<Secret>>,
}

impl CredentialResolver {
    pub fn new(providers: Arc<Store<Provider>>, secrets: Arc<Store<Secret>>) -> Self {
        Self { providers, secrets }
    }

    pub async fn resolve(&self, provider_ref: &Reference) -> Result<Vec<u8>> {
        let provider_key = provider_ref.to_object_ref(PROVIDER_GVK);
        let provider = self
            .providers
            .get(&provider_key)
            .await
            .map_err(|e| Error::lookup("provider", provider_ref, e))?;

        let selector = &provider.spec.credentials_secret_ref;
        let secret_key = Secret::key_ref(&selector.namespace, &selector.name);
        let secret = self
            .secrets
            .get(&secret_key)
            .await
            .map_err(|e| Error::lookup("provider secret", &secret_key, e))?;

        debug!(provider = %provider_ref, secret = %secret_key, "Resolved provider credentials");

        secret.data.get(&selector.key).cloned().ok_or_else(|| {
            Error::lookup(
                "provider secret key",
                format!("{}/{}", secret_key, selector.key),
                Error::not_found("secret key", &selector.key),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(secret_key: &str) -> Provider {
        Provider {
            metadata: ObjectMeta::named(None, "azure"),
            spec: ProviderSpec {
                credentials_secret_ref: SecretKeySelector {
                    namespace: "nimbus-system".to_string(),
                    name: "azure-creds".to_string(),
                    key: secret_key.to_string(),
                },
            },
        }
    }

    async fn resolver_with(provider: Option<Provider>, secret: Option<Secret>) -> CredentialResolver {
        let providers = Arc::new(Store::new());
        let secrets = Arc::new(Store::new());
        if let Some(p) = provider {
            providers.create(p).await.unwrap();
        }
        if let Some(s) = secret {
            secrets.create(s).await.unwrap();
        }
        CredentialResolver::new(providers, secrets)
    }

    fn creds_secret() -> Secret {
        let mut s = Secret::new("nimbus-system", "azure-creds");
        s.string_data
            .insert("credentials".to_string(), "{\"clientId\":\"x\"}".to_string());
        s.normalize()
    }

    #[tokio::test]
    async fn test_resolves_secret_bytes() {
        let resolver = resolver_with(Some(provider("credentials")), Some(creds_secret())).await;
        let bytes = resolver.resolve(&Reference::new(None, "azure")).await.unwrap();
        assert_eq!(bytes, b"{\"clientId\":\"x\"}".to_vec());
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let resolver = resolver_with(None, Some(creds_secret())).await;
        let err = resolver
            .resolve(&Reference::new(None, "azure"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("cannot get provider azure"));
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let resolver = resolver_with(Some(provider("credentials")), None).await;
        let err = resolver
            .resolve(&Reference::new(None, "azure"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("cannot get provider secret"));
    }

    #[tokio::test]
    async fn test_missing_secret_key() {
        let resolver = resolver_with(Some(provider("other")), Some(creds_secret())).await;
        let err = resolver
            .resolve(&Reference::new(None, "azure"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
