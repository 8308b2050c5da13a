//! Host port selection for container port bindings.
//!
//! A candidate counts as free if a listener can bind it and is released again
//! right away. The check is racy by nature: another process may grab the port
//! between the probe and the container engine binding it. That is acceptable
//! for short-lived test instances, not for production allocation.

use crate::error::{ProvisionError, ProvisionResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

/// IANA dynamic/private port range.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;
pub const DEFAULT_MAX_ATTEMPTS: usize = 1000;

pub struct PortAllocator {
    rng: StdRng,
    range: RangeInclusive<u16>,
    max_attempts: usize,
}

impl PortAllocator {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            range: EPHEMERAL_PORTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Deterministic candidate sequence, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Port 0 is never a candidate; an empty range makes `allocate` fail.
    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.range = (*range.start()).max(1)..=*range.end();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Draws random candidates until one can be bound, up to `max_attempts`.
    pub fn allocate(&mut self) -> ProvisionResult<u16> {
        if self.range.is_empty() {
            return Err(ProvisionError::PortExhausted { attempts: 0 });
        }
        for attempt in 1..=self.max_attempts {
            let candidate = self.rng.gen_range(self.range.clone());
            if is_port_available(candidate) {
                tracing::debug!(port = candidate, attempt, "allocated host port");
                return Ok(candidate);
            }
            tracing::trace!(port = candidate, attempt, "host port busy");
        }
        Err(ProvisionError::PortExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Binds the port on all interfaces (as the engine will) and releases it.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
