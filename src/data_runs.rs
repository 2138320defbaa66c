//! Run list encoding/decoding and the mutable "cooked" form used by
//! everything above the wire format.

use crate::error::{NtfsError, Result};
use crate::structures::FileRecordReference;

/// Identifies the attribute extent a run list belongs to: which MFT record
/// holds the extent, and which attribute id within that record. This is
/// the back-reference an extent needs to its own attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentKey {
    pub containing_record: FileRecordReference,
    pub attribute_id: u16,
}

/// A single decoded on-disk run: `length` clusters, either sparse (`lcn =
/// None`) or starting at absolute `lcn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRun {
    pub length: u64,
    pub lcn: Option<u64>,
}

/// Decode a run list from its on-disk mapping-pairs byte encoding. A zero
/// header byte terminates the list.
pub fn decode(data: &[u8]) -> Result<Vec<RawRun>> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut prev_lcn: i64 = 0;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break;
        }
        let length_size = (header & 0x0F) as usize;
        let offset_size = ((header >> 4) & 0x0F) as usize;
        pos += 1;

        if pos + length_size + offset_size > data.len() {
            return Err(NtfsError::corrupt("data run extends beyond buffer"));
        }

        let length = read_le_unsigned(&data[pos..pos + length_size]);
        pos += length_size;

        if offset_size == 0 {
            runs.push(RawRun { length, lcn: None });
        } else {
            let delta = read_le_signed(&data[pos..pos + offset_size]);
            pos += offset_size;
            let lcn = prev_lcn
                .checked_add(delta)
                .ok_or_else(|| NtfsError::corrupt("run list LCN delta overflowed"))?;
            if lcn < 0 {
                return Err(NtfsError::corrupt(format!("run list LCN went negative: {lcn}")));
            }
            prev_lcn = lcn;
            runs.push(RawRun {
                length,
                lcn: Some(lcn as u64),
            });
        }
    }

    Ok(runs)
}

/// Encode a run list to its minimal on-disk byte form. Offsets delta-encode
/// against the previous non-sparse run's LCN starting from 0, so
/// re-encoding an unchanged run list reproduces the original bytes
///.
pub fn encode(runs: &[RawRun]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev_lcn: i64 = 0;

    for run in runs {
        let length_bytes = minimal_unsigned_bytes(run.length);
        match run.lcn {
            None => {
                out.push(length_bytes as u8);
                push_le_unsigned(&mut out, run.length, length_bytes);
            }
            Some(lcn) => {
                let delta = lcn as i64 - prev_lcn;
                let offset_bytes = minimal_signed_bytes(delta);
                out.push((length_bytes as u8) | ((offset_bytes as u8) << 4));
                push_le_unsigned(&mut out, run.length, length_bytes);
                push_le_signed(&mut out, delta, offset_bytes);
                prev_lcn = lcn as i64;
            }
        }
    }
    out.push(0);
    out
}

fn read_le_unsigned(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as u64) << (i * 8);
    }
    value
}

fn read_le_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value = 0i64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as i64) << (i * 8);
    }
    let bits = bytes.len() * 8;
    if bits < 64 && (value & (1 << (bits - 1))) != 0 {
        value |= !((1i64 << bits) - 1);
    }
    value
}

fn minimal_unsigned_bytes(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    (bits + 7) / 8
}

fn minimal_signed_bytes(value: i64) -> usize {
    if value == 0 {
        return 1;
    }
    for n in 1..=8 {
        let bits = n * 8;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value >= min && value <= max {
            return n;
        }
    }
    8
}

fn push_le_unsigned(out: &mut Vec<u8>, value: u64, bytes: usize) {
    for i in 0..bytes {
        out.push(((value >> (i * 8)) & 0xFF) as u8);
    }
}

fn push_le_signed(out: &mut Vec<u8>, value: i64, bytes: usize) {
    for i in 0..bytes {
        out.push(((value >> (i * 8)) & 0xFF) as u8);
    }
}

/// One run in the mutable, VCN/LCN-annotated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookedRun {
    pub start_vcn: u64,
    pub length: u64,
    /// Absolute LCN, or `None` for a sparse run.
    pub lcn: Option<u64>,
}

impl CookedRun {
    pub fn end_vcn(&self) -> u64 {
        self.start_vcn + self.length
    }

    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

/// The canonical mutable run list: absolute VCN/LCN per run plus a
/// back-pointer to the owning extent.
#[derive(Debug, Clone)]
pub struct CookedDataRuns {
    pub extent: ExtentKey,
    runs: Vec<CookedRun>,
}

impl CookedDataRuns {
    pub fn from_raw(raw: &[RawRun], start_vcn: u64, extent: ExtentKey) -> Self {
        let mut vcn = start_vcn;
        let mut runs = Vec::with_capacity(raw.len());
        for r in raw {
            runs.push(CookedRun {
                start_vcn: vcn,
                length: r.length,
                lcn: r.lcn,
            });
            vcn += r.length;
        }
        CookedDataRuns { extent, runs }
    }

    pub fn empty(start_vcn: u64, extent: ExtentKey) -> Self {
        CookedDataRuns {
            extent,
            runs: vec![],
        }
        .with_start(start_vcn)
    }

    fn with_start(self, _start_vcn: u64) -> Self {
        // An empty run list has no runs to seed a starting VCN into; the
        // first run pushed by `expand_to` carries it instead.
        self
    }

    pub fn runs(&self) -> &[CookedRun] {
        &self.runs
    }

    pub fn last_vcn(&self) -> u64 {
        self.runs.last().map(|r| r.end_vcn()).unwrap_or(0)
    }

    /// Re-encode to on-disk bytes. External offsets are preserved for every
    /// run whose absolute LCN did not change, because encoding is a pure
    /// function of the sequence of (length, lcn) pairs.
    pub fn to_disk_bytes(&self) -> Vec<u8> {
        let raw: Vec<RawRun> = self
            .runs
            .iter()
            .map(|r| RawRun {
                length: r.length,
                lcn: r.lcn,
            })
            .collect();
        encode(&raw)
    }

    /// Bounded linear scan for the run covering `vcn`, starting at
    /// `start_idx`. Fails if `vcn` is past the last VCN.
    pub fn find(&self, vcn: u64, start_idx: usize) -> Result<usize> {
        for idx in start_idx..self.runs.len() {
            let r = &self.runs[idx];
            if vcn >= r.start_vcn && vcn < r.end_vcn() {
                return Ok(idx);
            }
        }
        Err(NtfsError::invalid(format!("VCN {vcn} is past the last mapped VCN")))
    }

    /// Split the run at `idx` at `vcn`, producing two runs. Sparse runs
    /// after the split point keep their absolute "LCN" undefined (`None`);
    /// non-sparse runs after the split point shift so their absolute LCN
    /// stays the same, and (being now a separate run) their own on-disk
    /// delta gets recomputed relative to whatever precedes them at encode
    /// time, so external offsets of runs whose LCN is unchanged are
    /// preserved.
    pub fn split(&mut self, idx: usize, vcn: u64) -> Result<()> {
        let run = *self
            .runs
            .get(idx)
            .ok_or_else(|| NtfsError::invalid("split index out of range"))?;
        if vcn <= run.start_vcn || vcn >= run.end_vcn() {
            return Err(NtfsError::invalid("split VCN must fall strictly inside the run"));
        }
        let first_len = vcn - run.start_vcn;
        let second_len = run.end_vcn() - vcn;
        let first = CookedRun {
            start_vcn: run.start_vcn,
            length: first_len,
            lcn: run.lcn,
        };
        let second = CookedRun {
            start_vcn: vcn,
            length: second_len,
            lcn: run.lcn.map(|lcn| lcn + first_len),
        };
        self.runs.splice(idx..idx + 1, [first, second]);
        Ok(())
    }

    /// Replace the run at `idx` with a sparse run of the same VCN span.
    pub fn make_sparse(&mut self, idx: usize) -> Result<()> {
        let run = self
            .runs
            .get_mut(idx)
            .ok_or_else(|| NtfsError::invalid("make_sparse index out of range"))?;
        run.lcn = None;
        Ok(())
    }

    /// Replace the sparse run at `idx` with one or more non-sparse runs
    /// covering the same VCN span, as returned by `ClusterBitmap::allocate`.
    /// Downstream sparse runs are unaffected (sparse runs carry no LCN
    /// baseline to inherit).
    pub fn make_non_sparse(&mut self, idx: usize, allocated: &[(u64, u64)]) -> Result<()> {
        let run = *self
            .runs
            .get(idx)
            .ok_or_else(|| NtfsError::invalid("make_non_sparse index out of range"))?;
        if !run.is_sparse() {
            return Err(NtfsError::invalid("run is not sparse"));
        }
        let total: u64 = allocated.iter().map(|(_, len)| *len).sum();
        if total != run.length {
            return Err(NtfsError::invalid("allocated length does not match sparse run length"));
        }
        let mut vcn = run.start_vcn;
        let replacement: Vec<CookedRun> = allocated
            .iter()
            .map(|&(lcn, len)| {
                let r = CookedRun {
                    start_vcn: vcn,
                    length: len,
                    lcn: Some(lcn),
                };
                vcn += len;
                r
            })
            .collect();
        self.runs.splice(idx..idx + 1, replacement);
        Ok(())
    }

    /// Drop every run at and after `idx`, returning the non-sparse ones so
    /// the caller can release their clusters in the bitmap.
    pub fn truncate_at(&mut self, idx: usize) -> Vec<(u64, u64)> {
        if idx >= self.runs.len() {
            return Vec::new();
        }
        self.runs
            .split_off(idx)
            .into_iter()
            .filter_map(|r| r.lcn.map(|lcn| (lcn, r.length)))
            .collect()
    }

    /// Append a trailing sparse run extending the mapped VCN range to
    /// `clusters`. No-op if already at least that long.
    pub fn expand_to(&mut self, clusters: u64) {
        let current = self.last_vcn();
        if clusters <= current {
            return;
        }
        self.runs.push(CookedRun {
            start_vcn: current,
            length: clusters - current,
            lcn: None,
        });
    }

    /// Merge adjacent sparse-with-sparse runs and adjacent contiguous
    /// non-sparse runs.
    pub fn collapse(&mut self) {
        let mut merged: Vec<CookedRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if let Some(last) = merged.last_mut() {
                let contiguous_non_sparse = match (last.lcn, run.lcn) {
                    (Some(a), Some(b)) => a + last.length == b,
                    (None, None) => true,
                    _ => false,
                };
                if contiguous_non_sparse && last.end_vcn() == run.start_vcn {
                    last.length += run.length;
                    continue;
                }
            }
            merged.push(run);
        }
        self.runs = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ExtentKey {
        ExtentKey {
            containing_record: FileRecordReference::new(5, 1),
            attribute_id: 0,
        }
    }

    #[test]
    fn decode_simple_run() {
        let data = [0x21, 0x10, 0x64, 0x00, 0x00];
        let runs = decode(&data).unwrap();
        assert_eq!(runs, vec![RawRun { length: 16, lcn: Some(100) }]);
    }

    #[test]
    fn decode_sparse_run() {
        let data = [0x01, 0x20, 0x00];
        let runs = decode(&data).unwrap();
        assert_eq!(runs, vec![RawRun { length: 32, lcn: None }]);
    }

    #[test]
    fn decode_negative_delta() {
        let data = [0x21, 0x0A, 0xE8, 0x03, 0x22, 0x14, 0x9C, 0xFF, 0x00];
        let runs = decode(&data).unwrap();
        assert_eq!(runs[0].lcn, Some(1000));
        assert_eq!(runs[1].lcn, Some(900));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let raw = vec![
            RawRun { length: 10, lcn: Some(1000) },
            RawRun { length: 50, lcn: None },
            RawRun { length: 5, lcn: Some(900) },
        ];
        let bytes = encode(&raw);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn cooked_find_and_split_preserves_external_offsets() {
        let raw = vec![RawRun { length: 20, lcn: Some(500) }];
        let mut cooked = CookedDataRuns::from_raw(&raw, 0, key());
        let idx = cooked.find(5, 0).unwrap();
        cooked.split(idx, 10).unwrap();
        assert_eq!(cooked.runs().len(), 2);
        assert_eq!(cooked.runs()[0], CookedRun { start_vcn: 0, length: 10, lcn: Some(500) });
        assert_eq!(cooked.runs()[1], CookedRun { start_vcn: 10, length: 10, lcn: Some(510) });

        // Re-encoding after splitting a single run into two contiguous runs
        // produces bytes decodable back to the same absolute LCNs.
        let bytes = cooked.to_disk_bytes();
        let redecoded = CookedDataRuns::from_raw(&decode(&bytes).unwrap(), 0, key());
        assert_eq!(redecoded.runs(), cooked.runs());
    }

    #[test]
    fn make_sparse_then_non_sparse_restores_allocation() {
        let raw = vec![RawRun { length: 4, lcn: Some(100) }];
        let mut cooked = CookedDataRuns::from_raw(&raw, 0, key());
        cooked.make_sparse(0).unwrap();
        assert!(cooked.runs()[0].is_sparse());
        cooked.make_non_sparse(0, &[(200, 4)]).unwrap();
        assert_eq!(cooked.runs()[0].lcn, Some(200));
    }

    #[test]
    fn make_non_sparse_can_fragment() {
        let raw = vec![RawRun { length: 10, lcn: None }];
        let mut cooked = CookedDataRuns::from_raw(&raw, 0, key());
        cooked.make_non_sparse(0, &[(50, 4), (80, 6)]).unwrap();
        assert_eq!(cooked.runs().len(), 2);
        assert_eq!(cooked.runs()[0], CookedRun { start_vcn: 0, length: 4, lcn: Some(50) });
        assert_eq!(cooked.runs()[1], CookedRun { start_vcn: 4, length: 6, lcn: Some(80) });
    }

    #[test]
    fn truncate_returns_released_runs() {
        let raw = vec![
            RawRun { length: 4, lcn: Some(10) },
            RawRun { length: 4, lcn: None },
            RawRun { length: 4, lcn: Some(20) },
        ];
        let mut cooked = CookedDataRuns::from_raw(&raw, 0, key());
        let released = cooked.truncate_at(1);
        assert_eq!(released, vec![(20, 4)]);
        assert_eq!(cooked.last_vcn(), 4);
    }

    #[test]
    fn collapse_merges_contiguous_and_sparse_runs() {
        let raw = vec![
            RawRun { length: 4, lcn: Some(10) },
            RawRun { length: 4, lcn: Some(14) },
            RawRun { length: 4, lcn: None },
            RawRun { length: 4, lcn: None },
        ];
        let mut cooked = CookedDataRuns::from_raw(&raw, 0, key());
        cooked.collapse();
        assert_eq!(cooked.runs().len(), 2);
        assert_eq!(cooked.runs()[0], CookedRun { start_vcn: 0, length: 8, lcn: Some(10) });
        assert_eq!(cooked.runs()[1], CookedRun { start_vcn: 8, length: 8, lcn: None });
    }

    #[test]
    fn expand_to_appends_trailing_sparse_run() {
        let mut cooked = CookedDataRuns::empty(0, key());
        cooked.expand_to(10);
        assert_eq!(cooked.runs(), &[CookedRun { start_vcn: 0, length: 10, lcn: None }]);
        cooked.expand_to(5); // no-op, already longer
        assert_eq!(cooked.last_vcn(), 10);
    }
}
