//! Pool usage reporting

use serde::{Deserialize, Serialize};

/// Snapshot of how the pool region is used
///
/// `allocated_area_size` is everything in front of the bump pointer (headers
/// included); `free_size` is the payload capacity parked in free lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Bytes in the pool region
    pub pool_size: usize,
    /// Bytes the bump pointer has not reached yet
    pub free_area_size: usize,
    /// Bytes behind the bump pointer
    pub allocated_area_size: usize,
    /// Allocated bytes not sitting in a free list
    pub used_size: usize,
    /// Payload bytes held by free lists
    pub free_size: usize,
}

impl PoolStats {
    pub fn used_bytes(&self) -> usize {
        self.used_size
    }

    pub fn free_bytes_in_lists(&self) -> usize {
        self.free_size
    }

    pub fn bump_remaining(&self) -> usize {
        self.free_area_size
    }

    /// Share of the pool in live use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.pool_size == 0 {
            return 0.0;
        }
        self.used_size as f64 / self.pool_size as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "PoolStats {{ pool: {}, free_area: {}, allocated_area: {}, used: {}, \
             free_in_lists: {}, utilization: {:.2}% }}",
            self.pool_size,
            self.free_area_size,
            self.allocated_area_size,
            self.used_size,
            self.free_size,
            self.utilization() * 100.0
        )
    }
}

/// One non-empty free list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeListInfo {
    /// Payload bytes of blocks in this list
    pub payload_size: usize,
    /// Number of parked blocks
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_and_utilization() {
        let stats = PoolStats {
            pool_size: 1000,
            free_area_size: 600,
            allocated_area_size: 400,
            used_size: 250,
            free_size: 150,
        };
        assert_eq!(stats.used_bytes(), 250);
        assert_eq!(stats.free_bytes_in_lists(), 150);
        assert_eq!(stats.bump_remaining(), 600);
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
        assert!(stats.summary().contains("free_in_lists: 150"));
        assert_eq!(PoolStats::default().utilization(), 0.0);
    }
}
