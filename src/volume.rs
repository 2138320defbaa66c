//! Byte-addressable volume storage and the pluggable collaborator traits.
//!
//! `RawVolume` is the only thing the engine assumes about the outside world:
//! a random-access, byte-addressable region with a known length. Everything
//! above this layer (BPB parsing, FixupRecord framing, cluster addressing)
//! is built on top of it. `BlockCompressor` and `RandomSource` are likewise
//! supplied by the caller; the engine never picks a codec or an RNG itself.

use crate::error::Result;
use std::collections::HashMap;

/// Random-access byte storage backing an NTFS volume.
///
/// Implementations are free to be a `File`, an in-memory `Vec<u8>`, or a
/// window into a larger container image; the engine only ever reads and
/// writes through this trait.
pub trait RawVolume: Send {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Total addressable length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist any buffering the implementation does internally.
    fn flush(&mut self) -> Result<()>;
}

/// A block (de)compressor supplied by the caller.
///
/// The engine treats compression units as opaque byte ranges; it never
/// implements a specific codec itself (LZNT1 et al. are the caller's
/// concern), though the `lznt1` feature ships a reference implementation
/// for tests.
pub trait BlockCompressor: Send {
    /// Compress `input` (exactly one compression unit's worth of bytes,
    /// `unit_size` clusters). Returns the compressed byte count on success,
    /// or `None` if the data is incompressible within the unit.
    fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Option<usize>;

    /// Decompress `input` into `output`. `output` must be filled exactly;
    /// its length is `min(remaining_file_bytes, unit_size * cluster_size)`.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()>;

    /// Cheap check: is this unit entirely zero bytes? Lets callers skip an
    /// actual compression attempt for sparse holes.
    fn classify_as_zero(&self, input: &[u8]) -> bool {
        input.iter().all(|&b| b == 0)
    }
}

/// Source of randomness for volume serial numbers and object IDs.
pub trait RandomSource: Send {
    fn next_u32(&mut self) -> u32;
    fn next_u64(&mut self) -> u64;
    fn fill_bytes(&mut self, buf: &mut [u8]);
}

/// Read-through cache keyed by cluster number, wrapping a `RawVolume`.
///
/// Caching lives strictly below the `RawVolume` boundary: the engine above
/// this layer sees ordinary synchronous reads/writes.
pub struct BlockCache<V: RawVolume> {
    inner: V,
    bytes_per_cluster: u32,
    cache: HashMap<u64, Vec<u8>>,
    dirty: HashMap<u64, Vec<u8>>,
    capacity: usize,
}

impl<V: RawVolume> BlockCache<V> {
    pub fn new(inner: V, bytes_per_cluster: u32, capacity: usize) -> Self {
        Self {
            inner,
            bytes_per_cluster,
            cache: HashMap::new(),
            dirty: HashMap::new(),
            capacity,
        }
    }

    pub fn into_inner(self) -> V {
        self.inner
    }

    fn evict_if_full(&mut self) {
        if self.cache.len() > self.capacity {
            // Arbitrary eviction: drop one entry that isn't dirty if possible.
            if let Some(&key) = self.cache.keys().find(|k| !self.dirty.contains_key(k)) {
                self.cache.remove(&key);
            }
        }
    }

    pub fn read_cluster(&mut self, lcn: u64, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), self.bytes_per_cluster as usize);
        if let Some(data) = self.dirty.get(&lcn).or_else(|| self.cache.get(&lcn)) {
            out.copy_from_slice(data);
            return Ok(());
        }
        let offset = lcn * self.bytes_per_cluster as u64;
        self.inner.read_at(offset, out)?;
        self.cache.insert(lcn, out.to_vec());
        self.evict_if_full();
        Ok(())
    }

    pub fn write_cluster(&mut self, lcn: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.bytes_per_cluster as usize);
        self.dirty.insert(lcn, data.to_vec());
        self.cache.remove(&lcn);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for (lcn, data) in self.dirty.drain() {
            let offset = lcn * self.bytes_per_cluster as u64;
            self.inner.write_at(offset, &data)?;
        }
        self.inner.flush()
    }
}

impl RawVolume for Vec<u8> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.len() {
            return Err(crate::error::NtfsError::IoFailure(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of in-memory volume",
            )));
        }
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.len() {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RawVolume for std::fs::File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn flush(&mut self) -> Result<()> {
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_volume_grows_on_write() {
        let mut v: Vec<u8> = Vec::new();
        v.write_at(10, &[1, 2, 3]).unwrap();
        assert_eq!(v.len(), 13);
        let mut buf = [0u8; 3];
        v.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn block_cache_roundtrip() {
        let mut cache = BlockCache::new(vec![0u8; 4096 * 4], 4096, 8);
        let data = vec![7u8; 4096];
        cache.write_cluster(2, &data).unwrap();
        let mut out = vec![0u8; 4096];
        cache.read_cluster(2, &mut out).unwrap();
        assert_eq!(out, data);
        cache.flush().unwrap();
        let inner = cache.into_inner();
        assert_eq!(&inner[2 * 4096..3 * 4096], data.as_slice());
    }
}
