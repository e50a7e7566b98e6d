//! Explicit configuration objects. Nothing here reads the environment;
//! callers construct values and plumb them through.

/// Feature switches for the two-tier resolution cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Per-compilation cache on each mirrored method.
    pub local: bool,
    /// Per-client-session cache shared across compilations.
    pub global: bool,
    /// Re-fetch attribute answers on global hits and compare. Costs one
    /// round trip per hit; intended for debug builds and tests.
    pub verify_cached_attributes: bool,
}

impl CacheConfig {
    /// Every tier off. Every query goes to the client.
    pub fn disabled() -> Self {
        Self {
            local: false,
            global: false,
            verify_cached_attributes: false,
        }
    }

    pub fn local_only() -> Self {
        Self {
            local: true,
            global: false,
            verify_cached_attributes: false,
        }
    }

    pub fn global_only() -> Self {
        Self {
            local: false,
            global: true,
            verify_cached_attributes: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local: true,
            global: true,
            verify_cached_attributes: cfg!(debug_assertions),
        }
    }
}

/// Hard bounds enforced while decoding received frames.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolLimits {
    /// Upper bound on a whole frame, prefix included.
    pub max_message_bytes: usize,
    /// Upper bound on declared point counts, at every nesting level.
    pub max_data_points: usize,
    /// Upper bound on composite nesting.
    pub max_nesting_depth: usize,
    /// Starting capacity of each stream's buffer.
    pub initial_buffer_capacity: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            // Compiled bodies and ROM snapshots ride in single frames.
            max_message_bytes: 64 * 1024 * 1024,
            max_data_points: 4096,
            max_nesting_depth: 32,
            initial_buffer_capacity: crate::net::buffer::INITIAL_CAPACITY,
        }
    }
}
