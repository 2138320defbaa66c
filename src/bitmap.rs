//! `ClusterBitmap`: allocation/free tracking backed by the `$Bitmap` system
//! file's data stream.
//!
//! Bit `i` set means LCN `i` is allocated. The bitmap itself is kept as a
//! flat in-memory byte buffer here; the caller (`MasterFileTable` /
//! `File`) is responsible for loading it from and flushing it back to the
//! `$Bitmap` attribute's `RawBuffer`.

use crate::error::{NtfsError, Result};

/// One allocated range: `(lcn, length)` in clusters.
pub type Run = (u64, u64);

pub struct ClusterBitmap {
    bits: Vec<u8>,
    total_clusters: u64,
    free_clusters: u64,
}

impl ClusterBitmap {
    /// Build from raw bitmap bytes already sized for `total_clusters`.
    pub fn from_bytes(bytes: Vec<u8>, total_clusters: u64) -> Self {
        let free_clusters = (0..total_clusters)
            .filter(|&lcn| !Self::bit(&bytes, lcn))
            .count() as u64;
        ClusterBitmap {
            bits: bytes,
            total_clusters,
            free_clusters,
        }
    }

    /// A fresh all-free bitmap sized for `total_clusters`.
    pub fn new_empty(total_clusters: u64) -> Self {
        let byte_len = ((total_clusters + 7) / 8) as usize;
        ClusterBitmap {
            bits: vec![0u8; byte_len],
            total_clusters,
            free_clusters: total_clusters,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn total_clusters(&self) -> u64 {
        self.total_clusters
    }

    pub fn free_clusters(&self) -> u64 {
        self.free_clusters
    }

    fn bit(bytes: &[u8], lcn: u64) -> bool {
        let byte = lcn / 8;
        let bit = lcn % 8;
        bytes
            .get(byte as usize)
            .map(|b| b & (1 << bit) != 0)
            .unwrap_or(false)
    }

    pub fn is_allocated(&self, lcn: u64) -> bool {
        Self::bit(&self.bits, lcn)
    }

    fn set_bit(&mut self, lcn: u64, value: bool) {
        let byte = (lcn / 8) as usize;
        let bit = lcn % 8;
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        let was = self.bits[byte] & (1 << bit) != 0;
        if value {
            self.bits[byte] |= 1 << bit;
        } else {
            self.bits[byte] &= !(1 << bit);
        }
        match (was, value) {
            (false, true) => self.free_clusters -= 1,
            (true, false) => self.free_clusters += 1,
            _ => {}
        }
    }

    fn contiguous_free_run(&self, start: u64, max_len: u64) -> u64 {
        let mut len = 0;
        let mut lcn = start;
        while lcn < self.total_clusters && len < max_len && !self.is_allocated(lcn) {
            len += 1;
            lcn += 1;
        }
        len
    }

    /// First-fit scan for a single contiguous run of `len` free clusters,
    /// starting the search at `from`.
    fn find_contiguous(&self, len: u64, from: u64) -> Option<u64> {
        if len == 0 || len > self.total_clusters {
            return None;
        }
        let mut lcn = from;
        while lcn + len <= self.total_clusters {
            let run = self.contiguous_free_run(lcn, len);
            if run >= len {
                return Some(lcn);
            }
            lcn += run.max(1);
        }
        None
    }

    /// Allocate `count` clusters. Tries a contiguous run near `hint` first;
    /// falls back to first-fit from the start of the bitmap; if neither
    /// yields a single run, accumulates first-fit fragments until `count`
    /// is satisfied. `is_mft` biases the search to keep the MFT contiguous
    /// by widening the contiguous-at-hint attempt before fragmenting.
    /// `already_allocated` lets a caller pre-reserve space (used by the
    /// formatter) without a second bitmap pass.
    pub fn allocate(&mut self, count: u64, hint: u64, is_mft: bool, already_allocated: &[Run]) -> Result<Vec<Run>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        for &(lcn, len) in already_allocated {
            for i in 0..len {
                self.set_bit(lcn + i, true);
            }
        }
        if self.free_clusters < count {
            return Err(NtfsError::OutOfSpace);
        }

        let mut runs = Vec::new();
        let mut remaining = count;

        // Contiguous-at-hint attempt (both the common case and the MFT bias).
        let hint = hint.min(self.total_clusters.saturating_sub(1));
        let at_hint = self.contiguous_free_run(hint, remaining);
        if at_hint == remaining || (is_mft && at_hint > 0) {
            runs.push((hint, at_hint));
            remaining -= at_hint;
        }

        // First-fit for whatever is left, fragmenting as necessary.
        let mut scan_from = 0u64;
        while remaining > 0 {
            let lcn = match self.find_contiguous(1, scan_from) {
                Some(l) => l,
                None => return Err(NtfsError::OutOfSpace),
            };
            let run_len = self.contiguous_free_run(lcn, remaining);
            runs.push((lcn, run_len));
            remaining -= run_len;
            scan_from = lcn + run_len;
        }

        for &(lcn, len) in &runs {
            for i in 0..len {
                self.set_bit(lcn + i, true);
            }
        }

        Ok(runs)
    }

    /// Free a range. Idempotent: clearing an already-clear bit is a no-op.
    pub fn free(&mut self, range: Run) {
        let (lcn, len) = range;
        for i in 0..len {
            if self.is_allocated(lcn + i) {
                self.set_bit(lcn + i, false);
            }
        }
    }

    /// Mark a range allocated without going through the allocator, used by
    /// the formatter to reserve space for pre-placed system files.
    pub fn mark_allocated(&mut self, range: Run) {
        let (lcn, len) = range;
        for i in 0..len {
            self.set_bit(lcn + i, true);
        }
    }

    /// Extend the bitmap to track `new_total` clusters, the newly added
    /// ones starting free. Used when `$MFT`'s own record-use bitmap grows
    /// alongside its data stream.
    pub fn grow(&mut self, new_total: u64) {
        if new_total <= self.total_clusters {
            return;
        }
        let byte_len = ((new_total + 7) / 8) as usize;
        self.bits.resize(byte_len, 0);
        self.free_clusters += new_total - self.total_clusters;
        self.total_clusters = new_total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_prefers_contiguous_at_hint() {
        let mut bm = ClusterBitmap::new_empty(1000);
        let runs = bm.allocate(10, 100, false, &[]).unwrap();
        assert_eq!(runs, vec![(100, 10)]);
        assert_eq!(bm.free_clusters(), 990);
    }

    #[test]
    fn allocate_fragments_when_hint_is_full() {
        let mut bm = ClusterBitmap::new_empty(20);
        bm.mark_allocated((0, 20));
        bm.free((5, 3)); // 5,6,7 free
        bm.free((15, 2)); // 15,16 free
        let runs = bm.allocate(5, 0, false, &[]).unwrap();
        let total: u64 = runs.iter().map(|(_, l)| l).sum();
        assert_eq!(total, 5);
        for &(lcn, len) in &runs {
            for i in 0..len {
                assert!(bm.is_allocated(lcn + i));
            }
        }
    }

    #[test]
    fn allocate_fails_when_insufficient() {
        let mut bm = ClusterBitmap::new_empty(4);
        assert!(matches!(bm.allocate(5, 0, false, &[]), Err(NtfsError::OutOfSpace)));
    }

    #[test]
    fn free_is_idempotent() {
        let mut bm = ClusterBitmap::new_empty(10);
        bm.mark_allocated((2, 2));
        bm.free((2, 2));
        bm.free((2, 2));
        assert_eq!(bm.free_clusters(), 10);
    }

    #[test]
    fn invariant_no_double_allocation_across_two_allocators() {
        let mut bm = ClusterBitmap::new_empty(100);
        let a = bm.allocate(10, 0, false, &[]).unwrap();
        let b = bm.allocate(10, 0, false, &[]).unwrap();
        let mut a_lcns = std::collections::HashSet::new();
        for (lcn, len) in a {
            for i in 0..len {
                a_lcns.insert(lcn + i);
            }
        }
        for (lcn, len) in b {
            for i in 0..len {
                assert!(!a_lcns.contains(&(lcn + i)));
            }
        }
    }
}
