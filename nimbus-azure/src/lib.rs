//! nimbus Azure provider: Subnet and Redis controllers plus RedisCluster claims.

pub mod apis;
pub mod clients;
pub mod config;
pub mod controller;
pub mod manifest;
