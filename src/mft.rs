//! `MasterFileTable`: bootstraps from the boot sector's `$MFT` pointer,
//! then serves record reads/writes and record-number allocation.

use crate::bitmap::ClusterBitmap;
use crate::boot_sector::BootSector;
use crate::cluster_stream::RawClusterStream;
use crate::data_runs::{CookedDataRuns, ExtentKey, RawRun};
use crate::error::{NtfsError, Result};
use crate::file_record::FileRecord;
use crate::structures::{attr_type, reserved_records, FileRecordReference};
use crate::volume::RawVolume;
use log::{debug, info};

use crate::attribute_record::AttributeBody;

/// Where `$MFT`'s own `$BITMAP` attribute content lives: resident for a
/// freshly formatted, still-tiny volume, non-resident once it has grown
/// past a handful of bytes (which every volume that has lived for more
/// than a few files reaches quickly).
enum BitmapStorage {
    Resident(Vec<u8>),
    NonResident { runs: CookedDataRuns, data_length: u64 },
}

pub struct MasterFileTable<'v> {
    volume: &'v mut dyn RawVolume,
    mft_record_size: u32,
    bytes_per_cluster: u32,
    sector_size: u32,
    data_runs: CookedDataRuns,
    data_length: u64,
    record_count: u64,
    record_bitmap: ClusterBitmap,
    bitmap_storage: BitmapStorage,
    mft_sequence_number: u16,
}

impl<'v> MasterFileTable<'v> {
    /// Read record 0 directly at the boot sector's `mft_lcn`, decode its
    /// `$DATA` run list (the whole MFT stream) and `$BITMAP` content (which
    /// records are in use).
    pub fn bootstrap(volume: &'v mut dyn RawVolume, boot: &BootSector) -> Result<Self> {
        let mft_record_size = boot.mft_record_size();
        let bytes_per_cluster = boot.bytes_per_cluster();
        let sector_size = boot.bytes_per_sector as u32;

        let mut record0 = vec![0u8; mft_record_size as usize];
        volume.read_at(boot.mft_lcn * bytes_per_cluster as u64, &mut record0)?;
        let record0 = FileRecord::parse(&mut record0, sector_size as usize, false)?;

        let data_attr = record0
            .find(attr_type::DATA, &[])
            .ok_or_else(|| NtfsError::corrupt("MFT record 0 has no $DATA attribute"))?;
        let (run_bytes, start_vcn, data_length) = match &data_attr.body {
            AttributeBody::NonResident {
                run_list_bytes,
                start_vcn,
                data_length,
                ..
            } => (run_list_bytes.clone(), *start_vcn, *data_length),
            AttributeBody::Resident { .. } => {
                return Err(NtfsError::corrupt("$MFT's $DATA attribute must be non-resident"))
            }
        };
        let data_extent = ExtentKey {
            containing_record: FileRecordReference::new(reserved_records::MFT, record0.sequence_number),
            attribute_id: data_attr.id,
        };
        let raw_runs = crate::data_runs::decode(&run_bytes)?;
        let data_runs = CookedDataRuns::from_raw(&raw_runs, start_vcn, data_extent);
        let record_count = data_length / mft_record_size as u64;

        let bitmap_attr = record0
            .find(attr_type::BITMAP, &[])
            .ok_or_else(|| NtfsError::corrupt("MFT record 0 has no $BITMAP attribute"))?;
        let (record_bitmap, bitmap_storage) = match &bitmap_attr.body {
            AttributeBody::Resident { data, .. } => {
                (ClusterBitmap::from_bytes(data.clone(), record_count), BitmapStorage::Resident(data.clone()))
            }
            AttributeBody::NonResident {
                run_list_bytes,
                start_vcn,
                data_length,
                ..
            } => {
                let extent = ExtentKey {
                    containing_record: FileRecordReference::new(reserved_records::MFT, record0.sequence_number),
                    attribute_id: bitmap_attr.id,
                };
                let raw = crate::data_runs::decode(run_list_bytes)?;
                let runs = CookedDataRuns::from_raw(&raw, *start_vcn, extent);
                let mut bytes = vec![0u8; *data_length as usize];
                let cluster_size = bytes_per_cluster as u64;
                let clusters = (*data_length + cluster_size - 1) / cluster_size;
                let mut tmp = vec![0u8; (clusters * cluster_size) as usize];
                RawClusterStream::new(volume, bytes_per_cluster).read(&runs, 0, clusters, &mut tmp)?;
                bytes.copy_from_slice(&tmp[..*data_length as usize]);
                (
                    ClusterBitmap::from_bytes(bytes, record_count),
                    BitmapStorage::NonResident {
                        runs,
                        data_length: *data_length,
                    },
                )
            }
        };

        info!("MFT bootstrapped: {record_count} records, {} in use", record_count - record_bitmap.free_clusters());

        Ok(MasterFileTable {
            volume,
            mft_record_size,
            bytes_per_cluster,
            sector_size,
            data_runs,
            data_length,
            record_count,
            record_bitmap,
            bitmap_storage,
            mft_sequence_number: record0.sequence_number,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn mft_record_size(&self) -> u32 {
        self.mft_record_size
    }

    /// The sequence number of `$MFT`'s own base record, needed to build a
    /// `FileRecordReference` pointing at it (e.g. an `$ATTRIBUTE_LIST`
    /// entry's `base_record` for one of its own extension records).
    pub fn mft_sequence_number(&self) -> u16 {
        self.mft_sequence_number
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    /// Reborrow the underlying volume for cluster I/O the MFT itself
    /// doesn't do on the caller's behalf (file data streams, directory
    /// index allocations). Keeps every layer above this one from needing
    /// its own separate handle to the same volume.
    pub fn volume_mut(&mut self) -> &mut dyn RawVolume {
        self.volume
    }

    /// Allocate fresh clusters sized for `data` and write it there — used
    /// to promote a resident attribute to non-resident.
    pub fn write_new_stream(&mut self, volume_bitmap: &mut ClusterBitmap, extent: ExtentKey, data: &[u8]) -> Result<CookedDataRuns> {
        let cluster_size = self.bytes_per_cluster as u64;
        let clusters = (data.len() as u64 + cluster_size - 1) / cluster_size;
        let mut runs = CookedDataRuns::empty(0, extent);
        RawClusterStream::new(self.volume, self.bytes_per_cluster).expand_to(&mut runs, volume_bitmap, clusters, true)?;
        let mut padded = data.to_vec();
        padded.resize((clusters * cluster_size) as usize, 0);
        RawClusterStream::new(self.volume, self.bytes_per_cluster).write(&runs, 0, clusters, &padded)?;
        Ok(runs)
    }

    fn record_byte_range(&self, index: u64) -> Result<(u64, u64)> {
        if index >= self.record_count {
            return Err(NtfsError::not_found(format!("MFT record {index} out of range")));
        }
        let start = index * self.mft_record_size as u64;
        Ok((start, start + self.mft_record_size as u64))
    }

    fn read_range(&mut self, start: u64, len: usize) -> Result<Vec<u8>> {
        let cluster_size = self.bytes_per_cluster as u64;
        let start_cluster = start / cluster_size;
        let end_cluster = (start + len as u64 + cluster_size - 1) / cluster_size;
        let count = end_cluster - start_cluster;
        let mut tmp = vec![0u8; (count * cluster_size) as usize];
        RawClusterStream::new(self.volume, self.bytes_per_cluster).read(&self.data_runs, start_cluster, count, &mut tmp)?;
        let skip = (start - start_cluster * cluster_size) as usize;
        Ok(tmp[skip..skip + len].to_vec())
    }

    fn write_range(&mut self, start: u64, data: &[u8]) -> Result<()> {
        let cluster_size = self.bytes_per_cluster as u64;
        let start_cluster = start / cluster_size;
        let end = start + data.len() as u64;
        let end_cluster = (end + cluster_size - 1) / cluster_size;
        let count = end_cluster - start_cluster;
        let mut tmp = self.read_range(start_cluster * cluster_size, (count * cluster_size) as usize)?;
        let offset = (start - start_cluster * cluster_size) as usize;
        tmp[offset..offset + data.len()].copy_from_slice(data);
        RawClusterStream::new(self.volume, self.bytes_per_cluster).write(&self.data_runs, start_cluster, count, &tmp)?;
        Ok(())
    }

    /// Read and parse record `index`. Torn/zeroed unused records still
    /// parse (`ignore_magic` is left off; a bad magic on an in-use record
    /// is corruption, while a free one is never read here — the caller
    /// checks the bitmap first).
    pub fn get(&mut self, index: u64) -> Result<FileRecord> {
        let (start, end) = self.record_byte_range(index)?;
        let mut bytes = self.read_range(start, (end - start) as usize)?;
        FileRecord::parse(&mut bytes, self.sector_size as usize, false)
    }

    /// Serialize and write `record` back to slot `index`.
    pub fn write(&mut self, index: u64, record: &mut FileRecord) -> Result<()> {
        let (start, _) = self.record_byte_range(index)?;
        let bytes = record.to_bytes(self.mft_record_size as usize, self.sector_size as usize)?;
        self.write_range(start, &bytes)
    }

    pub fn is_in_use(&self, index: u64) -> bool {
        self.record_bitmap.is_allocated(index)
    }

    /// Find a free record slot, growing the MFT (via `volume_bitmap`, the
    /// volume-wide cluster allocator) if every existing slot is taken.
    pub fn allocate(&mut self, volume_bitmap: &mut ClusterBitmap) -> Result<u64> {
        if self.record_bitmap.free_clusters() == 0 {
            self.grow(volume_bitmap)?;
        }
        let runs = self.record_bitmap.allocate(1, 0, false, &[])?;
        self.persist_bitmap()?;
        Ok(runs[0].0)
    }

    pub fn free(&mut self, index: u64) -> Result<()> {
        self.record_bitmap.free((index, 1));
        self.persist_bitmap()
    }

    /// Double the record capacity: extend `$DATA` by one more cluster's
    /// worth of records' space (at minimum) and grow `$BITMAP` to match.
    fn grow(&mut self, volume_bitmap: &mut ClusterBitmap) -> Result<()> {
        let records_per_cluster = (self.bytes_per_cluster as u64 / self.mft_record_size as u64).max(1);
        let additional_records = self.record_count.max(records_per_cluster);
        let additional_clusters = ((additional_records * self.mft_record_size as u64) + self.bytes_per_cluster as u64 - 1)
            / self.bytes_per_cluster as u64;

        let current_clusters = self.data_runs.last_vcn();
        let new_clusters = current_clusters + additional_clusters;
        RawClusterStream::new(self.volume, self.bytes_per_cluster).expand_to(&mut self.data_runs, volume_bitmap, new_clusters, true)?;

        self.data_length = new_clusters * self.bytes_per_cluster as u64;
        self.record_count = self.data_length / self.mft_record_size as u64;
        self.record_bitmap.grow(self.record_count);

        if let BitmapStorage::NonResident { runs, .. } = &mut self.bitmap_storage {
            let needed_bytes = (self.record_count + 7) / 8;
            let cluster_size = self.bytes_per_cluster as u64;
            let needed_clusters = (needed_bytes + cluster_size - 1) / cluster_size;
            if needed_clusters > runs.last_vcn() {
                RawClusterStream::new(self.volume, self.bytes_per_cluster).expand_to(runs, volume_bitmap, needed_clusters, true)?;
            }
        }

        debug!("grew $MFT to {} records", self.record_count);
        Ok(())
    }

    fn persist_bitmap(&mut self) -> Result<()> {
        let bytes = self.record_bitmap.as_bytes().to_vec();
        match &mut self.bitmap_storage {
            BitmapStorage::Resident(buf) => {
                *buf = bytes;
            }
            BitmapStorage::NonResident { runs, data_length } => {
                *data_length = bytes.len() as u64;
                let cluster_size = self.bytes_per_cluster as u64;
                let needed_clusters = (bytes.len() as u64 + cluster_size - 1) / cluster_size;
                let mut padded = bytes;
                padded.resize((needed_clusters * cluster_size) as usize, 0);
                // Growing $BITMAP's own stream length is the formatter's
                // concern at $MFT-growth time (see `grow`); ordinary bit
                // flips never change its length class, so this path only
                // ever rewrites clusters already mapped.
                debug_assert!(needed_clusters <= runs.last_vcn(), "bitmap stream needs expansion");
                RawClusterStream::new(self.volume, self.bytes_per_cluster).write(runs, 0, needed_clusters.min(runs.last_vcn()), &padded)?;
            }
        }
        Ok(())
    }
}
