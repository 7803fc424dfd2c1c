//! Seeding the record stores from a JSON manifest.

use std::path::Path;

use anyhow::{Context, Result};
use nimbus_runtime::{Object, Provider, Secret};
use serde::Deserialize;
use tracing::info;

use crate::apis::{AzureManaged, Redis, RedisClass, RedisCluster, Subnet};
use crate::controller::Stores;

/// Records to load at startup, grouped by kind.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub providers: Vec<Provider>,
    pub secrets: Vec<Secret>,
    pub subnets: Vec<Subnet>,
    pub redis: Vec<Redis>,
    pub redis_classes: Vec<RedisClass>,
    pub redis_clusters: Vec<RedisCluster>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read manifest {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("cannot parse manifest {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Create every record in its store. Returns the number of records created.
    ///
    /// Providers, secrets and classes go in first so the first reconcile of a
    /// managed resource or claim can already resolve them.
    pub async fn apply(self, stores: &Stores) -> Result<usize> {
        let mut count = 0;

        for provider in self.providers {
            let key = provider.object_ref();
            stores
                .providers
                .create(provider)
                .await
                .with_context(|| format!("cannot create {}", key))?;
            count += 1;
        }
        for secret in self.secrets {
            let key = secret.object_ref();
            stores
                .secrets
                .create(secret.normalize())
                .await
                .with_context(|| format!("cannot create {}", key))?;
            count += 1;
        }
        for class in self.redis_classes {
            let key = class.object_ref();
            stores
                .redis_classes
                .create(class)
                .await
                .with_context(|| format!("cannot create {}", key))?;
            count += 1;
        }

        let managed = self
            .subnets
            .into_iter()
            .map(AzureManaged::from)
            .chain(self.redis.into_iter().map(AzureManaged::from));
        for mg in managed {
            let key = mg.object_ref();
            stores
                .managed
                .create(mg)
                .await
                .with_context(|| format!("cannot create {}", key))?;
            count += 1;
        }

        for claim in self.redis_clusters {
            let key = claim.object_ref();
            stores
                .redis_clusters
                .create(claim)
                .await
                .with_context(|| format!("cannot create {}", key))?;
            count += 1;
        }

        info!(records = count, "Applied manifest");
        Ok(count)
    }
}
