//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use nimbus_runtime::ControllerOptions;

use crate::controller::Settings;

/// nimbus Azure provider
#[derive(Parser, Debug, Clone)]
#[command(name = "nimbus-azure", version, about)]
pub struct Config {
    /// JSON manifest seeding the record stores
    #[arg(long, env = "NIMBUS_MANIFESTS")]
    pub manifests: Option<PathBuf>,

    /// Concurrent workers per controller
    #[arg(long, env = "NIMBUS_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Seconds between full resyncs of every watched record
    #[arg(long, env = "NIMBUS_SYNC_PERIOD", default_value = "300")]
    pub sync_period: u64,

    /// Seconds to wait after requesting an external change
    #[arg(long, env = "NIMBUS_SHORT_WAIT", default_value = "30")]
    pub short_wait: u64,

    /// Seconds between drift checks of an up-to-date resource
    #[arg(long, env = "NIMBUS_LONG_WAIT", default_value = "60")]
    pub long_wait: u64,

    /// Upper bound in seconds for a single reconcile
    #[arg(long, env = "NIMBUS_RECONCILE_TIMEOUT", default_value = "60")]
    pub reconcile_timeout: u64,
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            options: ControllerOptions {
                workers: self.workers.max(1),
                resync_period: Duration::from_secs(self.sync_period.max(1)),
                reconcile_timeout: Duration::from_secs(self.reconcile_timeout.max(1)),
            },
            short_wait: Duration::from_secs(self.short_wait),
            long_wait: Duration::from_secs(self.long_wait),
        }
    }
}
