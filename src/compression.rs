//! `CompressedClusterStream`: the compression-unit cache layered over a
//! `RawClusterStream`.

use crate::bitmap::ClusterBitmap;
use crate::cluster_stream::RawClusterStream;
use crate::data_runs::CookedDataRuns;
use crate::error::{NtfsError, Result};
use crate::volume::{BlockCompressor, RawVolume};
use log::{debug, trace};

/// What a compression unit currently looks like on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// All clusters non-sparse, codec output not used: `unit_size` clusters
    /// of raw data.
    Stored,
    /// `leading` non-sparse clusters hold codec output; the rest of the
    /// unit is sparse.
    Compressed { leading: u32 },
    /// Every cluster in the unit is sparse.
    Sparse,
}

pub struct CompressedClusterStream<'v, 'c> {
    volume: &'v mut dyn RawVolume,
    compressor: &'c dyn BlockCompressor,
    bytes_per_cluster: u32,
    /// Compression unit size in clusters (`2^k`).
    unit_size: u32,
}

impl<'v, 'c> CompressedClusterStream<'v, 'c> {
    pub fn new(
        volume: &'v mut dyn RawVolume,
        compressor: &'c dyn BlockCompressor,
        bytes_per_cluster: u32,
        unit_size: u32,
    ) -> Self {
        debug_assert!(unit_size.is_power_of_two());
        Self {
            volume,
            compressor,
            bytes_per_cluster,
            unit_size,
        }
    }

    fn raw(&mut self) -> RawClusterStream<'_> {
        RawClusterStream::new(self.volume, self.bytes_per_cluster)
    }

    pub fn unit_start_vcn(&self, unit: u64) -> u64 {
        unit * self.unit_size as u64
    }

    pub fn unit_of_vcn(&self, vcn: u64) -> u64 {
        vcn / self.unit_size as u64
    }

    /// Inspect the run list to classify the on-disk state of `unit`.
    pub fn classify_on_disk(&self, runs: &CookedDataRuns, unit: u64) -> Result<UnitKind> {
        let start = self.unit_start_vcn(unit);
        let end = (start + self.unit_size as u64).min(runs.last_vcn());
        if end <= start {
            return Ok(UnitKind::Sparse);
        }
        let mut idx = runs.find(start, 0)?;
        let mut leading_non_sparse = 0u64;
        let mut saw_sparse_after_data = false;
        let mut vcn = start;
        let mut all_non_sparse = true;
        let mut all_sparse = true;
        while vcn < end {
            idx = runs.find(vcn, idx)?;
            let run = runs.runs()[idx];
            let span = run.end_vcn().min(end) - vcn;
            if run.is_sparse() {
                all_non_sparse = false;
                saw_sparse_after_data = leading_non_sparse > 0 || saw_sparse_after_data;
            } else {
                all_sparse = false;
                if !saw_sparse_after_data {
                    leading_non_sparse += span;
                }
            }
            vcn += span;
            idx += 1;
        }
        if all_sparse {
            Ok(UnitKind::Sparse)
        } else if all_non_sparse && (end - start) == self.unit_size as u64 {
            Ok(UnitKind::Stored)
        } else {
            Ok(UnitKind::Compressed {
                leading: leading_non_sparse as u32,
            })
        }
    }

    /// Read one compression unit. `out.len()` must equal
    /// `min(remaining_file_bytes, unit_size * bytes_per_cluster)`.
    pub fn read_unit(&mut self, runs: &CookedDataRuns, unit: u64, out: &mut [u8]) -> Result<()> {
        let kind = self.classify_on_disk(runs, unit)?;
        let cluster_size = self.bytes_per_cluster as usize;
        let start = self.unit_start_vcn(unit);
        match kind {
            UnitKind::Sparse => out.fill(0),
            UnitKind::Stored => {
                let clusters = (out.len() + cluster_size - 1) / cluster_size;
                let mut buf = vec![0u8; clusters * cluster_size];
                self.raw().read(runs, start, clusters as u64, &mut buf)?;
                out.copy_from_slice(&buf[..out.len()]);
            }
            UnitKind::Compressed { leading } => {
                let mut in_buf = vec![0u8; leading as usize * cluster_size];
                self.raw().read(runs, start, leading as u64, &mut in_buf)?;
                trace!("decompressing unit {unit}: {leading} leading clusters -> {} bytes", out.len());
                self.compressor.decompress(&in_buf, out)?;
            }
        }
        Ok(())
    }

    /// Write one full compression unit (`in_data.len() == unit_size *
    /// bytes_per_cluster`, zero-padded by the caller past end-of-file).
    pub fn write_unit(
        &mut self,
        runs: &mut CookedDataRuns,
        bitmap: &mut ClusterBitmap,
        unit: u64,
        in_data: &[u8],
    ) -> Result<()> {
        let cluster_size = self.bytes_per_cluster as usize;
        debug_assert_eq!(in_data.len(), self.unit_size as usize * cluster_size);
        let start = self.unit_start_vcn(unit);

        if self.compressor.classify_as_zero(in_data) {
            debug!("unit {unit} is all-zero, releasing");
            self.raw().release(runs, bitmap, start, self.unit_size as u64)?;
            return Ok(());
        }

        let mut compressed = Vec::new();
        let fit = self.compressor.compress(in_data, &mut compressed);
        if let Some(compressed_len) = fit {
            let needed_clusters = (compressed_len + cluster_size - 1) / cluster_size as usize;
            if (needed_clusters as u32) < self.unit_size {
                debug!("unit {unit} compressed to {needed_clusters}/{} clusters", self.unit_size);
                self.raw()
                    .allocate(runs, bitmap, start, needed_clusters as u64)?;
                let mut padded = compressed;
                padded.resize(needed_clusters * cluster_size, 0);
                self.raw().write(runs, start, needed_clusters as u64, &padded)?;
                let tail_start = start + needed_clusters as u64;
                let tail_len = self.unit_size as u64 - needed_clusters as u64;
                self.raw().release(runs, bitmap, tail_start, tail_len)?;
                return Ok(());
            }
        }

        debug!("unit {unit} stored uncompressed");
        self.raw().allocate(runs, bitmap, start, self.unit_size as u64)?;
        self.raw().write(runs, start, self.unit_size as u64, in_data)?;
        Ok(())
    }

    /// Clear a unit. At a unit boundary this is equivalent to `release`;
    /// a partial clear is rewritten through the normal write path by the
    /// caller.
    pub fn clear_whole_unit(&mut self, runs: &mut CookedDataRuns, bitmap: &mut ClusterBitmap, unit: u64) -> Result<()> {
        let start = self.unit_start_vcn(unit);
        self.raw().release(runs, bitmap, start, self.unit_size as u64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_runs::{CookedDataRuns, ExtentKey};
    use crate::structures::FileRecordReference;

    struct XorCompressor;

    impl BlockCompressor for XorCompressor {
        fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Option<usize> {
            // Trivial RLE-ish scheme good enough to exercise the "fits" path:
            // only "compresses" all-0xAB buffers, to a single marker byte.
            if input.iter().all(|&b| b == 0xAB) {
                output.push(0xAB);
                Some(1)
            } else {
                None
            }
        }

        fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()> {
            if input == [0xAB] {
                output.fill(0xAB);
                Ok(())
            } else {
                Err(NtfsError::corrupt("unrecognized compressed unit"))
            }
        }
    }

    fn key() -> ExtentKey {
        ExtentKey {
            containing_record: FileRecordReference::new(20, 1),
            attribute_id: 0,
        }
    }

    #[test]
    fn all_zero_unit_is_released() {
        let mut volume = vec![0u8; 64 * 4096];
        let mut bitmap = ClusterBitmap::new_empty(64);
        let mut runs = CookedDataRuns::empty(0, key());
        runs.expand_to(16);
        let compressor = XorCompressor;
        let mut stream = CompressedClusterStream::new(&mut volume, &compressor, 4096, 16);

        let data = vec![0u8; 16 * 4096];
        stream.write_unit(&mut runs, &mut bitmap, 0, &data).unwrap();
        assert_eq!(stream.classify_on_disk(&runs, 0).unwrap(), UnitKind::Sparse);
    }

    #[test]
    fn compressible_unit_frees_tail_clusters() {
        let mut volume = vec![0u8; 64 * 4096];
        let mut bitmap = ClusterBitmap::new_empty(64);
        let mut runs = CookedDataRuns::empty(0, key());
        runs.expand_to(16);
        let compressor = XorCompressor;
        let mut stream = CompressedClusterStream::new(&mut volume, &compressor, 4096, 16);

        let data = vec![0xABu8; 16 * 4096];
        stream.write_unit(&mut runs, &mut bitmap, 0, &data).unwrap();
        match stream.classify_on_disk(&runs, 0).unwrap() {
            UnitKind::Compressed { leading } => assert_eq!(leading, 1),
            other => panic!("expected Compressed, got {other:?}"),
        }

        let mut out = vec![0u8; 16 * 4096];
        stream.read_unit(&runs, 0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn incompressible_unit_is_stored_whole() {
        let mut volume = vec![0u8; 64 * 4096];
        let mut bitmap = ClusterBitmap::new_empty(64);
        let mut runs = CookedDataRuns::empty(0, key());
        runs.expand_to(16);
        let compressor = XorCompressor;
        let mut stream = CompressedClusterStream::new(&mut volume, &compressor, 4096, 16);

        let data: Vec<u8> = (0..16 * 4096).map(|i| (i % 251) as u8).collect();
        stream.write_unit(&mut runs, &mut bitmap, 0, &data).unwrap();
        assert_eq!(stream.classify_on_disk(&runs, 0).unwrap(), UnitKind::Stored);

        let mut out = vec![0u8; 16 * 4096];
        stream.read_unit(&runs, 0, &mut out).unwrap();
        assert_eq!(out, data);
    }
}
