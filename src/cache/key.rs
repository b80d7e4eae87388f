use std::fmt;

use crate::config::BuildConfig;
use crate::fetch::checksum::sha256_hex;

/// Opaque digest naming a cached base rootfs.
///
/// Only the inputs that change the bootstrapped tree participate: the
/// distribution id and the cache schema version. The requested OS version
/// does not, since the base image carries no branding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(distribution: &str, schema_version: u32) -> Self {
        let input = format!("{}{}", distribution, schema_version);
        CacheKey(sha256_hex(input.as_bytes()))
    }

    pub fn for_config(config: &BuildConfig) -> Self {
        Self::compute(&config.distribution, config.cache_schema_version)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
