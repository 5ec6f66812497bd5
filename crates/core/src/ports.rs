//! Even-aligned RTP/RTCP port pair allocator.

use crate::error::{Result, RtpProxyError};

/// Free-list allocator over `[port_min, port_max]`.
///
/// Every allocation hands back an even port `p`; `p + 1` is implicitly
/// reserved for the paired RTCP socket and is never itself returned by
/// [`allocate`](Self::allocate). Release puts `p` back at the end of the
/// free list — there is deliberately no reuse grace period.
#[derive(Debug)]
pub struct PortAllocator {
    free: Vec<u16>,
}

impl PortAllocator {
    /// Build the free list from a normalised `[port_min, port_max]` range.
    /// Both bounds are assumed already even-aligned by
    /// [`crate::config::ServerConfig::normalize_ports`].
    pub fn new(port_min: u16, port_max: u16) -> Self {
        let free = (port_min..=port_max).step_by(2).collect();
        Self { free }
    }

    pub fn capacity(&self) -> usize {
        self.free.len()
    }

    /// Allocate the next even RTP port, implicitly reserving `port + 1`.
    pub fn allocate(&mut self) -> Result<u16> {
        self.free.pop().ok_or(RtpProxyError::PortExhausted)
    }

    /// Return a previously allocated RTP port to the pool.
    pub fn release(&mut self, rtp_port: u16) {
        self.free.push(rtp_port);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_even_ports_only() {
        let mut pool = PortAllocator::new(10000, 10010);
        let mut seen = Vec::new();
        while let Ok(p) = pool.allocate() {
            seen.push(p);
        }
        assert!(seen.iter().all(|p| p % 2 == 0));
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut pool = PortAllocator::new(10000, 10000);
        assert!(pool.allocate().is_ok());
        assert!(matches!(pool.allocate(), Err(RtpProxyError::PortExhausted)));
    }

    #[test]
    fn released_port_is_reusable_immediately() {
        let mut pool = PortAllocator::new(10000, 10000);
        let p = pool.allocate().unwrap();
        pool.release(p);
        assert_eq!(pool.allocate().unwrap(), p);
    }
}
