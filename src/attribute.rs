//! `NtfsAttribute`: the logical read/write view an attribute presents once
//! its on-disk residency (resident inline buffer vs. non-resident cluster
//! stream, optionally compressed) is factored out.

use crate::bitmap::ClusterBitmap;
use crate::cluster_stream::RawClusterStream;
use crate::compression::{CompressedClusterStream, UnitKind};
use crate::data_runs::CookedDataRuns;
use crate::error::{NtfsError, Result};
use crate::volume::{BlockCompressor, RawVolume};

/// A resident attribute's content: a plain byte buffer living inline in the
/// FileRecord. Growth is unbounded here; `mft_updater` is what decides when
/// a resident attribute must be promoted to non-resident because it no
/// longer fits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBuffer {
    pub data: Vec<u8>,
}

impl RawBuffer {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(NtfsError::invalid("read past end of resident attribute"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    pub fn set_len(&mut self, new_len: u64) {
        self.data.resize(new_len as usize, 0);
    }
}

/// The non-resident view: a cluster stream (optionally compressed) plus the
/// three lengths NTFS tracks separately: `allocated_length`
/// (clusters actually mapped), `data_length` (logical EOF), and
/// `initialized_length` (sparse-hole boundary within `data_length`).
///
/// `runs` lives directly on `self` rather than behind a `&mut self` helper
/// method, so every stream is built inline from `self.volume` at the call
/// site: that keeps the borrow checker's view of `runs` and `volume` as the
/// disjoint fields they are.
pub struct NonResidentAttribute<'v, 'c> {
    pub runs: CookedDataRuns,
    volume: &'v mut dyn RawVolume,
    compressor: Option<&'c dyn BlockCompressor>,
    bytes_per_cluster: u32,
    /// Compression unit size in clusters; `0` means uncompressed.
    compression_unit_size: u32,
    pub allocated_length: u64,
    pub data_length: u64,
    pub initialized_length: u64,
}

impl<'v, 'c> NonResidentAttribute<'v, 'c> {
    pub fn new(
        runs: CookedDataRuns,
        volume: &'v mut dyn RawVolume,
        compressor: Option<&'c dyn BlockCompressor>,
        bytes_per_cluster: u32,
        compression_unit_size: u32,
        allocated_length: u64,
        data_length: u64,
        initialized_length: u64,
    ) -> Self {
        Self {
            runs,
            volume,
            compressor,
            bytes_per_cluster,
            compression_unit_size,
            allocated_length,
            data_length,
            initialized_length,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_unit_size > 0
    }

    /// Read `buf.len()` bytes starting at `offset`. Bytes at or past
    /// `initialized_length` (but before `data_length`) read as zero without
    /// touching the stream, matching NTFS's uninitialized-tail rule.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.data_length {
            return Err(NtfsError::invalid("read past end of attribute data"));
        }
        let cluster_size = self.bytes_per_cluster as u64;

        if self.is_compressed() {
            let unit_bytes = self.compression_unit_size as u64 * cluster_size;
            let mut pos = offset;
            let mut written = 0usize;
            while written < buf.len() {
                let unit = pos / unit_bytes;
                let unit_start = unit * unit_bytes;
                let unit_len = unit_bytes.min(self.allocated_length.saturating_sub(unit_start)).max(1) as usize;
                let mut unit_buf = vec![0u8; unit_len];
                CompressedClusterStream::new(
                    self.volume,
                    self.compressor.expect("compressed read requires a compressor"),
                    self.bytes_per_cluster,
                    self.compression_unit_size,
                )
                .read_unit(&self.runs, unit, &mut unit_buf)?;
                let in_unit_offset = (pos - unit_start) as usize;
                let take = (unit_buf.len() - in_unit_offset).min(buf.len() - written);
                buf[written..written + take].copy_from_slice(&unit_buf[in_unit_offset..in_unit_offset + take]);
                written += take;
                pos += take as u64;
            }
            return Ok(());
        }

        let init = self.initialized_length;
        let mut pos = offset;
        let mut written = 0usize;
        while written < buf.len() {
            if pos >= init {
                let zero_len = (buf.len() - written).min((self.data_length - pos) as usize);
                buf[written..written + zero_len].fill(0);
                written += zero_len;
                pos += zero_len as u64;
                continue;
            }
            let this_len = ((buf.len() - written) as u64).min(init - pos);
            let start_cluster = pos / cluster_size;
            let end_byte = pos + this_len;
            let end_cluster = (end_byte + cluster_size - 1) / cluster_size;
            let count = end_cluster - start_cluster;
            let mut tmp = vec![0u8; (count * cluster_size) as usize];
            RawClusterStream::new(self.volume, self.bytes_per_cluster).read(&self.runs, start_cluster, count, &mut tmp)?;
            let skip = (pos - start_cluster * cluster_size) as usize;
            buf[written..written + this_len as usize].copy_from_slice(&tmp[skip..skip + this_len as usize]);
            written += this_len as usize;
            pos += this_len;
        }
        Ok(())
    }

    /// Write `buf` at `offset`, allocating and extending as needed.
    pub fn write(&mut self, bitmap: &mut ClusterBitmap, offset: u64, buf: &[u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.allocated_length {
            self.grow_allocation(end);
        }

        let cluster_size = self.bytes_per_cluster as u64;
        if self.is_compressed() {
            let unit_bytes = self.compression_unit_size as u64 * cluster_size;
            let mut pos = offset;
            let mut consumed = 0usize;
            while consumed < buf.len() {
                let unit = pos / unit_bytes;
                let unit_start = unit * unit_bytes;
                let mut unit_buf = vec![0u8; unit_bytes as usize];
                let compressor = self.compressor.expect("compressed write requires a compressor");
                let kind = CompressedClusterStream::new(self.volume, compressor, self.bytes_per_cluster, self.compression_unit_size)
                    .classify_on_disk(&self.runs, unit)?;
                if kind != UnitKind::Sparse {
                    CompressedClusterStream::new(self.volume, compressor, self.bytes_per_cluster, self.compression_unit_size)
                        .read_unit(&self.runs, unit, &mut unit_buf)?;
                }
                let in_unit_offset = (pos - unit_start) as usize;
                let take = (unit_bytes as usize - in_unit_offset).min(buf.len() - consumed);
                unit_buf[in_unit_offset..in_unit_offset + take].copy_from_slice(&buf[consumed..consumed + take]);
                CompressedClusterStream::new(self.volume, compressor, self.bytes_per_cluster, self.compression_unit_size)
                    .write_unit(&mut self.runs, bitmap, unit, &unit_buf)?;
                consumed += take;
                pos += take as u64;
            }
        } else {
            let start_cluster = offset / cluster_size;
            let end_cluster = (end + cluster_size - 1) / cluster_size;
            RawClusterStream::new(self.volume, self.bytes_per_cluster).allocate(
                &mut self.runs,
                bitmap,
                start_cluster,
                end_cluster - start_cluster,
            )?;

            let first_pad = (offset - start_cluster * cluster_size) as usize;
            let last_pad = (end_cluster * cluster_size - end) as usize;
            let mut tmp = vec![0u8; ((end_cluster - start_cluster) * cluster_size) as usize];
            if first_pad > 0 || last_pad > 0 {
                RawClusterStream::new(self.volume, self.bytes_per_cluster)
                    .read(&self.runs, start_cluster, end_cluster - start_cluster, &mut tmp)?;
            }
            tmp[first_pad..first_pad + buf.len()].copy_from_slice(buf);
            RawClusterStream::new(self.volume, self.bytes_per_cluster)
                .write(&self.runs, start_cluster, end_cluster - start_cluster, &tmp)?;
        }

        if end > self.data_length {
            self.data_length = end;
        }
        if end > self.initialized_length {
            self.initialized_length = end;
        }
        Ok(())
    }

    fn grow_allocation(&mut self, new_byte_len: u64) {
        let cluster_size = self.bytes_per_cluster as u64;
        let new_clusters = (new_byte_len + cluster_size - 1) / cluster_size;
        self.runs.expand_to(new_clusters);
        self.allocated_length = new_clusters * cluster_size;
    }

    /// Shrink `data_length` (and, if it crosses a cluster boundary,
    /// `allocated_length`), releasing clusters no longer needed.
    pub fn truncate(&mut self, bitmap: &mut ClusterBitmap, new_len: u64) -> Result<()> {
        if new_len >= self.data_length {
            return Ok(());
        }
        self.data_length = new_len;
        self.initialized_length = self.initialized_length.min(new_len);
        let cluster_size = self.bytes_per_cluster as u64;
        let needed_clusters = (new_len + cluster_size - 1) / cluster_size;
        if needed_clusters * cluster_size < self.allocated_length {
            RawClusterStream::new(self.volume, self.bytes_per_cluster).truncate_to(&mut self.runs, bitmap, needed_clusters)?;
            self.allocated_length = needed_clusters * cluster_size;
        }
        Ok(())
    }
}
