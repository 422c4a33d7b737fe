//! Runtime configuration, gathered into one struct.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFlavor {
    Rio,
    IoUring,
    Epoll,
    Kqueue,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub slot_size: usize,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderConfig {
    pub queue_depth: u32,
    pub max_concurrent: u32,
    pub buffer_pool: BufferPoolConfig,
    pub send_pool: BufferPoolConfig,
    pub flavor: ProviderFlavor,
    /// How long the network worker blocks in `process_completions` per
    /// iteration.
    pub network_poll_timeout_ms: i32,
    /// How often the logic worker fires its keepalive/timer tick.
    pub logic_tick_interval_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            max_concurrent: 128,
            buffer_pool: BufferPoolConfig {
                slot_size: 65_536,
                pool_size: 256,
            },
            send_pool: BufferPoolConfig {
                slot_size: 65_536,
                pool_size: 256,
            },
            flavor: default_flavor(),
            network_poll_timeout_ms: 100,
            logic_tick_interval_ms: 1_000,
        }
    }
}

impl ProviderConfig {
    /// `queue_depth` must be able to cover every concurrently
    /// outstanding request; a config that doesn't is a configuration
    /// bug, not a runtime condition, so this is checked once up front.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_depth < self.max_concurrent {
            return Err(format!(
                "queue_depth ({}) must be >= max_concurrent ({})",
                self.queue_depth, self.max_concurrent
            ));
        }
        if self.buffer_pool.pool_size == 0 || self.buffer_pool.slot_size == 0 {
            return Err("buffer_pool.pool_size and slot_size must be nonzero".into());
        }
        if self.send_pool.pool_size == 0 || self.send_pool.slot_size == 0 {
            return Err("send_pool.pool_size and slot_size must be nonzero".into());
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn default_flavor() -> ProviderFlavor {
    ProviderFlavor::IoUring
}

#[cfg(windows)]
fn default_flavor() -> ProviderFlavor {
    ProviderFlavor::Rio
}

#[cfg(not(any(target_os = "linux", windows)))]
fn default_flavor() -> ProviderFlavor {
    ProviderFlavor::Kqueue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ProviderConfig::default().validate().is_ok());
    }

    #[test]
    fn queue_depth_below_max_concurrent_is_rejected() {
        let mut cfg = ProviderConfig::default();
        cfg.max_concurrent = cfg.queue_depth + 1;
        assert!(cfg.validate().is_err());
    }
}
