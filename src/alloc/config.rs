//! Allocator configuration
//!
//! Build-time defaults mirroring cub::CachingDeviceAllocator's parameters,
//! with one difference: allocations larger than `BIN_GROWTH^MAX_BIN` fail
//! instead of bypassing the cache.

use once_cell::sync::Lazy;

/// Geometric growth factor between consecutive bins.
pub const BIN_GROWTH: u32 = 2;

/// Smallest bin is `BIN_GROWTH^MIN_BIN` bytes (256 B); smaller requests
/// are rounded up to it.
pub const MIN_BIN: u32 = 8;

/// Largest bin is `BIN_GROWTH^MAX_BIN` bytes (1 GiB); larger requests fail.
pub const MAX_BIN: u32 = 30;

/// Explicit cap on cached bytes per allocator. 0 means no explicit cap.
pub const MAX_CACHED_BYTES: usize = 0;

/// Fraction of total device memory the cache may retain. 0 disables the
/// fractional limit. When both limits are set the smaller wins.
pub const MAX_CACHED_FRACTION: f64 = 0.8;

/// Reuse cached blocks whose last use was on the requesting queue without
/// polling their event; work on a single queue is serialised by the driver.
pub const REUSE_SAME_QUEUE: bool = true;

/// Per-allocation settings for one caching allocator instance.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub bin_growth: u32,
    pub min_bin: u32,
    pub max_bin: u32,
    pub max_cached_bytes: usize,
    pub max_cached_fraction: f64,
    pub reuse_same_queue: bool,
    pub debug: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            bin_growth: BIN_GROWTH,
            min_bin: MIN_BIN,
            max_bin: MAX_BIN,
            max_cached_bytes: MAX_CACHED_BYTES,
            max_cached_fraction: MAX_CACHED_FRACTION,
            reuse_same_queue: REUSE_SAME_QUEUE,
            debug: debug_enabled(),
        }
    }
}

/// One-shot switch for allocator debug diagnostics, read from the
/// `HIPCACHE_DEBUG` environment variable at first use.
pub fn debug_enabled() -> bool {
    static DEBUG: Lazy<bool> =
        Lazy::new(|| std::env::var_os("HIPCACHE_DEBUG").is_some_and(|v| v != "0"));
    *DEBUG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_build_constants() {
        let config = AllocatorConfig::default();
        assert_eq!(config.bin_growth, 2);
        assert_eq!(config.min_bin, 8);
        assert_eq!(config.max_bin, 30);
        assert_eq!(config.max_cached_bytes, 0);
        assert!(config.reuse_same_queue);
    }
}
