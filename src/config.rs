//! Engine configuration.

use crate::pool::PoolConfig;

/// Settings an [`Engine`](crate::Engine) is built from.
///
/// ```
/// use patchbay::{EngineConfig, PoolConfig};
///
/// let config = EngineConfig::default()
///     .with_service("/synth")
///     .with_max_instruments(32)
///     .with_pool(PoolConfig::default().with_growth(false));
/// assert_eq!(config.max_instruments, 32);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Address prefix every default route is registered under.
    pub service: String,
    /// Number of instrument slots. Slot 0 is reserved, so IDs run from 1 to
    /// `max_instruments - 1`. Instantiation names its target slot in the
    /// 16-bit ugen field of a packed ID, so at most 65536 slots are usable.
    pub max_instruments: u32,
    pub sample_rate: u32,
    /// Ugens reserved per instrument up front.
    pub ugen_capacity: usize,
    /// Connections reserved in the rack up front.
    pub connection_capacity: usize,
    /// Instruments built up front, with all their tables reserved, and kept
    /// topped up from deletions. Defining an instrument only allocates once
    /// these run out.
    pub spare_instruments: usize,
    /// Refuse plugs that would close an instrument-level cycle.
    pub reject_cycles: bool,
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service: "/syn".to_owned(),
            max_instruments: 100,
            sample_rate: 44_100,
            ugen_capacity: 64,
            connection_capacity: 256,
            spare_instruments: 16,
            reject_cycles: true,
            pool: PoolConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Clamped to `2..=65536`; see [`EngineConfig::max_instruments`].
    pub fn with_max_instruments(mut self, max: u32) -> Self {
        self.max_instruments = max.clamp(2, u32::from(u16::MAX) + 1);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn with_ugen_capacity(mut self, capacity: usize) -> Self {
        self.ugen_capacity = capacity;
        self
    }

    pub fn with_connection_capacity(mut self, capacity: usize) -> Self {
        self.connection_capacity = capacity;
        self
    }

    pub fn with_spare_instruments(mut self, spares: usize) -> Self {
        self.spare_instruments = spares;
        self
    }

    pub fn with_cycle_rejection(mut self, reject: bool) -> Self {
        self.reject_cycles = reject;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}
