//! `RawClusterStream`: whole-cluster I/O against a `CookedDataRuns`
//!.

use crate::bitmap::ClusterBitmap;
use crate::data_runs::CookedDataRuns;
use crate::error::{NtfsError, Result};
use crate::volume::RawVolume;
use log::trace;

pub struct RawClusterStream<'v> {
    volume: &'v mut dyn RawVolume,
    bytes_per_cluster: u32,
}

impl<'v> RawClusterStream<'v> {
    pub fn new(volume: &'v mut dyn RawVolume, bytes_per_cluster: u32) -> Self {
        Self {
            volume,
            bytes_per_cluster,
        }
    }

    fn cluster_offset(&self, lcn: u64) -> u64 {
        lcn * self.bytes_per_cluster as u64
    }

    /// Read `count` clusters starting at `start_vcn` into `out`
    /// (`out.len()` must equal `count * bytes_per_cluster`). Sparse runs
    /// read back as zeros.
    pub fn read(&mut self, runs: &CookedDataRuns, start_vcn: u64, count: u64, out: &mut [u8]) -> Result<()> {
        let cluster_size = self.bytes_per_cluster as usize;
        debug_assert_eq!(out.len(), count as usize * cluster_size);
        let mut vcn = start_vcn;
        let end_vcn = start_vcn + count;
        let mut idx = runs.find(start_vcn, 0)?;
        while vcn < end_vcn {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            let span = run.end_vcn().min(end_vcn) - vcn;
            let out_offset = (vcn - start_vcn) as usize * cluster_size;
            let out_span = &mut out[out_offset..out_offset + span as usize * cluster_size];
            match run.lcn {
                None => out_span.fill(0),
                Some(lcn) => {
                    let run_offset = vcn - run.start_vcn;
                    let byte_offset = self.cluster_offset(lcn + run_offset);
                    self.volume.read_at(byte_offset, out_span)?;
                }
            }
            vcn += span;
        }
        Ok(())
    }

    /// Write `count` clusters starting at `start_vcn`. Fails if any covered
    /// run is sparse: callers must `allocate` first.
    pub fn write(&mut self, runs: &CookedDataRuns, start_vcn: u64, count: u64, data: &[u8]) -> Result<()> {
        let cluster_size = self.bytes_per_cluster as usize;
        debug_assert_eq!(data.len(), count as usize * cluster_size);
        let mut vcn = start_vcn;
        let end_vcn = start_vcn + count;
        let mut idx = runs.find(start_vcn, 0)?;
        while vcn < end_vcn {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            let span = run.end_vcn().min(end_vcn) - vcn;
            let in_offset = (vcn - start_vcn) as usize * cluster_size;
            let in_span = &data[in_offset..in_offset + span as usize * cluster_size];
            let lcn = run
                .lcn
                .ok_or_else(|| NtfsError::invalid("write covers a sparse run; allocate first"))?;
            let run_offset = vcn - run.start_vcn;
            let byte_offset = self.cluster_offset(lcn + run_offset);
            self.volume.write_at(byte_offset, in_span)?;
            vcn += span;
        }
        Ok(())
    }

    /// Allocate backing clusters for every sparse run overlapping
    /// `[start_vcn, start_vcn + count)`. Each sparse run found is split to
    /// the exact overlapping span, then handed to the bitmap with a hint of
    /// the previous non-sparse run's tail LCN (for locality). Returns the
    /// number of clusters newly allocated.
    pub fn allocate(
        &mut self,
        runs: &mut CookedDataRuns,
        bitmap: &mut ClusterBitmap,
        start_vcn: u64,
        count: u64,
    ) -> Result<u64> {
        let end_vcn = start_vcn + count;
        let mut allocated = 0u64;
        let mut vcn = start_vcn;
        let mut idx = 0usize;
        while vcn < end_vcn {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            if run.start_vcn < vcn {
                runs.split(idx, vcn)?;
                idx += 1;
            }
            let run = runs.runs()[idx];
            let span_end = run.end_vcn().min(end_vcn);
            if span_end < run.end_vcn() {
                runs.split(idx, span_end)?;
            }
            let run = runs.runs()[idx];
            if run.is_sparse() {
                let hint = if idx > 0 {
                    runs.runs()[idx - 1].lcn.map(|l| l + runs.runs()[idx - 1].length).unwrap_or(0)
                } else {
                    0
                };
                let pieces = bitmap.allocate(run.length, hint, false, &[])?;
                trace!("allocated {} clusters for vcn {}..{}", run.length, run.start_vcn, run.end_vcn());
                runs.make_non_sparse(idx, &pieces)?;
                allocated += run.length;
            }
            vcn = span_end;
            idx += 1;
        }
        Ok(allocated)
    }

    /// Release the backing clusters of every non-sparse run overlapping
    /// `[start_vcn, start_vcn + count)`, turning them sparse. Returns the
    /// number of clusters freed.
    pub fn release(
        &mut self,
        runs: &mut CookedDataRuns,
        bitmap: &mut ClusterBitmap,
        start_vcn: u64,
        count: u64,
    ) -> Result<u64> {
        let end_vcn = start_vcn + count;
        let mut released = 0u64;
        let mut vcn = start_vcn;
        let mut idx = 0usize;
        while vcn < end_vcn {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            if run.start_vcn < vcn {
                runs.split(idx, vcn)?;
                idx += 1;
            }
            let run = runs.runs()[idx];
            let span_end = run.end_vcn().min(end_vcn);
            if span_end < run.end_vcn() {
                runs.split(idx, span_end)?;
            }
            let run = runs.runs()[idx];
            if let Some(lcn) = run.lcn {
                bitmap.free((lcn, run.length));
                runs.make_sparse(idx)?;
                released += run.length;
            }
            vcn = span_end;
            idx += 1;
        }
        runs.collapse();
        Ok(released)
    }

    /// Zero every cluster in the range. Allocation is preserved: unlike the
    /// compressed stream, a raw stream never deallocates on clear.
    pub fn clear(&mut self, runs: &CookedDataRuns, start_vcn: u64, count: u64) -> Result<()> {
        let cluster_size = self.bytes_per_cluster as usize;
        let zeros = vec![0u8; cluster_size];
        let mut vcn = start_vcn;
        let end_vcn = start_vcn + count;
        let mut idx = runs.find(start_vcn, 0)?;
        while vcn < end_vcn {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            let span = run.end_vcn().min(end_vcn) - vcn;
            if let Some(lcn) = run.lcn {
                let run_offset = vcn - run.start_vcn;
                for i in 0..span {
                    let byte_offset = self.cluster_offset(lcn + run_offset + i);
                    self.volume.write_at(byte_offset, &zeros)?;
                }
            }
            vcn += span;
        }
        Ok(())
    }

    /// Append a trailing sparse run so the stream maps at least `clusters`
    /// clusters, optionally allocating it immediately.
    pub fn expand_to(
        &mut self,
        runs: &mut CookedDataRuns,
        bitmap: &mut ClusterBitmap,
        clusters: u64,
        allocate: bool,
    ) -> Result<()> {
        let start = runs.last_vcn();
        if clusters <= start {
            return Ok(());
        }
        runs.expand_to(clusters);
        if allocate {
            self.allocate(runs, bitmap, start, clusters - start)?;
        }
        Ok(())
    }

    /// Release every cluster at and after `clusters` and drop the trailing
    /// runs.
    pub fn truncate_to(&mut self, runs: &mut CookedDataRuns, bitmap: &mut ClusterBitmap, clusters: u64) -> Result<()> {
        if clusters >= runs.last_vcn() {
            return Ok(());
        }
        let idx = if clusters == 0 {
            0
        } else {
            let idx = runs.find(clusters.saturating_sub(1), 0)?;
            let run = runs.runs()[idx];
            if run.start_vcn < clusters {
                runs.split(idx, clusters)?;
                idx + 1
            } else {
                idx
            }
        };
        for (lcn, len) in runs.truncate_at(idx) {
            bitmap.free((lcn, len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_runs::{CookedDataRuns, ExtentKey, RawRun};
    use crate::structures::FileRecordReference;

    fn key() -> ExtentKey {
        ExtentKey {
            containing_record: FileRecordReference::new(10, 1),
            attribute_id: 0,
        }
    }

    #[test]
    fn allocate_then_write_then_read_roundtrips() {
        let mut volume = vec![0u8; 64 * 4096];
        let mut bitmap = ClusterBitmap::new_empty(64);
        let mut runs = CookedDataRuns::empty(0, key());
        let mut stream = RawClusterStream::new(&mut volume, 4096);

        stream.expand_to(&mut runs, &mut bitmap, 4, true).unwrap();
        let pattern: Vec<u8> = (0..4 * 4096).map(|i| (i % 256) as u8).collect();
        stream.write(&runs, 0, 4, &pattern).unwrap();

        let mut out = vec![0u8; 4 * 4096];
        stream.read(&runs, 0, 4, &mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn sparse_reads_as_zero_and_write_requires_allocation() {
        let mut volume = vec![0u8; 16 * 4096];
        let mut runs = CookedDataRuns::empty(0, key());
        runs.expand_to(4);
        let mut stream = RawClusterStream::new(&mut volume, 4096);

        let mut out = vec![0xAAu8; 4096];
        stream.read(&runs, 1, 1, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 4096]);

        let data = vec![1u8; 4096];
        assert!(stream.write(&runs, 1, 1, &data).is_err());
    }

    #[test]
    fn release_then_truncate_frees_all_clusters() {
        let mut volume = vec![0u8; 16 * 4096];
        let mut bitmap = ClusterBitmap::new_empty(16);
        let mut runs = CookedDataRuns::empty(0, key());
        let mut stream = RawClusterStream::new(&mut volume, 4096);
        stream.expand_to(&mut runs, &mut bitmap, 8, true).unwrap();
        assert_eq!(bitmap.free_clusters(), 8);

        stream.truncate_to(&mut runs, &mut bitmap, 0).unwrap();
        assert_eq!(bitmap.free_clusters(), 16);
        assert_eq!(runs.last_vcn(), 0);
    }
}
