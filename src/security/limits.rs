//! Per-client connection limits.
//!
//! # Responsibilities
//! - Count concurrent connections per client IP
//! - Refuse connections beyond `max_conns_per_ip`
//!
//! # Design Decisions
//! - Checked right after accept, before any HTTP parsing
//! - Permits release their slot on drop, so a panicking connection task
//!   cannot leak a slot
//! - Entries are removed when their count returns to zero

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// Tracks concurrent connections per client IP.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    per_ip: Arc<DashMap<IpAddr, usize>>,
    max_per_ip: Option<usize>,
}

impl ConnectionLimiter {
    /// Create a limiter. `max_per_ip == 0` means unlimited.
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            per_ip: Arc::new(DashMap::new()),
            max_per_ip: (max_per_ip > 0).then_some(max_per_ip),
        }
    }

    /// Reserve a slot for `ip`, or `None` if the client is at its limit.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<IpPermit> {
        let Some(max) = self.max_per_ip else {
            return Some(IpPermit { slot: None });
        };

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= max {
            return None;
        }
        *count += 1;
        drop(count);

        Some(IpPermit {
            slot: Some((Arc::clone(&self.per_ip), ip)),
        })
    }

    /// Current connection count for `ip`.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_ip.get(&ip).map(|count| *count).unwrap_or(0)
    }
}

/// A reserved per-IP connection slot, released on drop.
#[derive(Debug)]
pub struct IpPermit {
    slot: Option<(Arc<DashMap<IpAddr, usize>>, IpAddr)>,
}

impl Drop for IpPermit {
    fn drop(&mut self) {
        if let Some((per_ip, ip)) = self.slot.take() {
            per_ip.remove_if_mut(&ip, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn unlimited_always_grants() {
        let limiter = ConnectionLimiter::new(0);
        let permits: Vec<_> = (0..100).filter_map(|_| limiter.try_acquire(CLIENT)).collect();
        assert_eq!(permits.len(), 100);
        assert_eq!(limiter.connections_from(CLIENT), 0);
    }

    #[test]
    fn limit_is_per_ip_and_released_on_drop() {
        let limiter = ConnectionLimiter::new(2);

        let first = limiter.try_acquire(CLIENT).unwrap();
        let _second = limiter.try_acquire(CLIENT).unwrap();
        assert!(limiter.try_acquire(CLIENT).is_none());
        assert!(limiter.try_acquire(OTHER).is_some());
        assert_eq!(limiter.connections_from(CLIENT), 2);

        drop(first);
        assert_eq!(limiter.connections_from(CLIENT), 1);
        assert!(limiter.try_acquire(CLIENT).is_some());
    }

    #[test]
    fn entry_removed_at_zero() {
        let limiter = ConnectionLimiter::new(1);
        drop(limiter.try_acquire(CLIENT).unwrap());
        assert_eq!(limiter.connections_from(CLIENT), 0);
        assert!(limiter.per_ip.is_empty());
    }
}
