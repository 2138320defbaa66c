//! `File`: the logical file abstraction above a `RecordSet` — stream
//! residency transitions, and (via the free functions at the bottom)
//! directory-level create/link/unlink operations that span a parent and a
//! child record.

use crate::attribute::{NonResidentAttribute, RawBuffer};
use crate::attribute_list::AttributeList;
use crate::attribute_record::{AttributeBody, AttributeRecord};
use crate::bitmap::ClusterBitmap;
use crate::data_runs::{self, CookedDataRuns, ExtentKey};
use crate::directory::{validate_name, Directory, FileNameRecord};
use crate::error::{NtfsError, Result};
use crate::file_record::FileRecord;
use crate::mft::MasterFileTable;
use crate::mft_updater::{update_record_in_mft, RecordSet};
use crate::structures::{attr_type, record_flags, FileRecordReference, Namespace, StandardInformation};
use crate::upcase::UpCaseTable;
use crate::volume::BlockCompressor;
use std::collections::HashSet;

/// Length at or above which a stream becomes non-resident.
pub fn non_resident_threshold(mft_record_size: u32) -> u64 {
    mft_record_size as u64
}

/// Length at or below which a non-resident stream folds back to resident
///. Kept well under `non_resident_threshold` so a stream
/// hovering near the boundary doesn't flap between residencies on small
/// writes.
pub fn resident_threshold(mft_record_size: u32) -> u64 {
    mft_record_size as u64 / 4
}

/// `AttributeBody::NonResident.compression_unit_size` stores `2^k` clusters
/// as the exponent `k`; every other layer (`NonResidentAttribute`,
/// `CompressedClusterStream`) stores the actual cluster count. These two
/// convert between the two representations at the `AttributeBody` seam.
fn compression_unit_clusters(exponent: u8) -> u32 {
    if exponent == 0 {
        0
    } else {
        1u32 << exponent
    }
}

fn compression_unit_exponent(clusters: u32) -> u8 {
    if clusters == 0 {
        0
    } else {
        clusters.trailing_zeros() as u8
    }
}

/// A single stream's content, resident or not. Holds no
/// reference to the volume: every I/O method takes one explicitly, the same
/// pattern `NonResidentAttribute` itself uses.
#[derive(Debug, Clone)]
pub enum FileStream {
    Resident(RawBuffer),
    NonResident {
        runs: CookedDataRuns,
        allocated_length: u64,
        data_length: u64,
        initialized_length: u64,
        compression_unit_size: u32,
    },
}

impl FileStream {
    pub fn len(&self) -> u64 {
        match self {
            FileStream::Resident(buf) => buf.len(),
            FileStream::NonResident { data_length, .. } => *data_length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_non_resident(&self) -> bool {
        matches!(self, FileStream::NonResident { .. })
    }

    pub fn from_body(body: &AttributeBody, extent: ExtentKey) -> Result<Self> {
        match body {
            AttributeBody::Resident { data, .. } => Ok(FileStream::Resident(RawBuffer { data: data.clone() })),
            AttributeBody::NonResident {
                start_vcn,
                run_list_bytes,
                compression_unit_size,
                allocated_length,
                data_length,
                initialized_length,
                ..
            } => {
                let raw = data_runs::decode(run_list_bytes)?;
                let runs = CookedDataRuns::from_raw(&raw, *start_vcn, extent);
                Ok(FileStream::NonResident {
                    runs,
                    allocated_length: *allocated_length,
                    data_length: *data_length,
                    initialized_length: *initialized_length,
                    compression_unit_size: compression_unit_clusters(*compression_unit_size),
                })
            }
        }
    }

    pub fn to_body(&self) -> AttributeBody {
        match self {
            FileStream::Resident(buf) => AttributeBody::Resident { data: buf.data.clone(), indexed: false },
            FileStream::NonResident {
                runs,
                allocated_length,
                data_length,
                initialized_length,
                compression_unit_size,
            } => AttributeBody::NonResident {
                start_vcn: 0,
                last_vcn: runs.last_vcn().saturating_sub(1),
                compression_unit_size: compression_unit_exponent(*compression_unit_size),
                allocated_length: *allocated_length,
                data_length: *data_length,
                initialized_length: *initialized_length,
                compressed_data_size: None,
                run_list_bytes: runs.to_disk_bytes(),
            },
        }
    }

    pub fn read(
        &mut self,
        volume: &mut dyn crate::volume::RawVolume,
        compressor: Option<&dyn BlockCompressor>,
        bytes_per_cluster: u32,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        match self {
            FileStream::Resident(raw) => raw.read(offset, buf),
            FileStream::NonResident {
                runs,
                allocated_length,
                data_length,
                initialized_length,
                compression_unit_size,
            } => {
                let mut attr = NonResidentAttribute::new(
                    runs.clone(),
                    volume,
                    compressor,
                    bytes_per_cluster,
                    *compression_unit_size,
                    *allocated_length,
                    *data_length,
                    *initialized_length,
                );
                attr.read(offset, buf)
            }
        }
    }

    /// Write `buf` at `offset`, promoting to non-resident first if the
    /// write would cross `non_resident_threshold`.
    pub fn write(
        &mut self,
        volume: &mut dyn crate::volume::RawVolume,
        bitmap: &mut ClusterBitmap,
        compressor: Option<&dyn BlockCompressor>,
        bytes_per_cluster: u32,
        mft_record_size: u32,
        extent: ExtentKey,
        offset: u64,
        buf: &[u8],
    ) -> Result<()> {
        let end = offset + buf.len() as u64;
        if matches!(self, FileStream::Resident(_)) && end >= non_resident_threshold(mft_record_size) {
            self.set_length(volume, bitmap, compressor, bytes_per_cluster, mft_record_size, extent, end)?;
        }
        match self {
            FileStream::Resident(raw) => raw.write(offset, buf),
            FileStream::NonResident {
                runs,
                allocated_length,
                data_length,
                initialized_length,
                compression_unit_size,
            } => {
                let mut attr = NonResidentAttribute::new(
                    runs.clone(),
                    volume,
                    compressor,
                    bytes_per_cluster,
                    *compression_unit_size,
                    *allocated_length,
                    *data_length,
                    *initialized_length,
                );
                attr.write(bitmap, offset, buf)?;
                *allocated_length = attr.allocated_length;
                *data_length = attr.data_length;
                *initialized_length = attr.initialized_length;
                *runs = attr.runs;
                Ok(())
            }
        }
    }

    /// Grow or shrink the stream to exactly `new_len`, promoting to
    /// non-resident or demoting back to resident as the thresholds dictate
    ///. On a fallible step partway through a residency switch,
    /// `self` is left holding an empty resident placeholder rather than its
    /// prior content — consistent with this engine's fail-fast posture
    ///, and mirroring `mft_updater`'s own lack of rollback.
    pub fn set_length(
        &mut self,
        volume: &mut dyn crate::volume::RawVolume,
        bitmap: &mut ClusterBitmap,
        compressor: Option<&dyn BlockCompressor>,
        bytes_per_cluster: u32,
        mft_record_size: u32,
        extent: ExtentKey,
        new_len: u64,
    ) -> Result<()> {
        let promote_at = non_resident_threshold(mft_record_size);
        let demote_at = resident_threshold(mft_record_size);
        let placeholder = FileStream::Resident(RawBuffer::default());
        let current = std::mem::replace(self, placeholder);

        let next = match current {
            FileStream::Resident(mut buf) => {
                if new_len >= promote_at {
                    let runs = CookedDataRuns::empty(0, extent);
                    let mut attr = NonResidentAttribute::new(runs, volume, compressor, bytes_per_cluster, 0, 0, 0, 0);
                    if !buf.data.is_empty() {
                        attr.write(bitmap, 0, &buf.data)?;
                    }
                    if new_len > attr.data_length {
                        let zeros = vec![0u8; (new_len - attr.data_length) as usize];
                        attr.write(bitmap, attr.data_length, &zeros)?;
                    } else if new_len < attr.data_length {
                        attr.truncate(bitmap, new_len)?;
                    }
                    FileStream::NonResident {
                        runs: attr.runs,
                        allocated_length: attr.allocated_length,
                        data_length: attr.data_length,
                        initialized_length: attr.initialized_length,
                        compression_unit_size: 0,
                    }
                } else {
                    buf.set_len(new_len);
                    FileStream::Resident(buf)
                }
            }
            FileStream::NonResident {
                runs,
                allocated_length,
                data_length,
                initialized_length,
                compression_unit_size,
            } => {
                if new_len <= demote_at {
                    let mut attr = NonResidentAttribute::new(
                        runs,
                        volume,
                        compressor,
                        bytes_per_cluster,
                        compression_unit_size,
                        allocated_length,
                        data_length,
                        initialized_length,
                    );
                    let mut bytes = vec![0u8; new_len as usize];
                    if new_len > 0 {
                        attr.read(0, &mut bytes)?;
                    }
                    attr.truncate(bitmap, 0)?;
                    FileStream::Resident(RawBuffer { data: bytes })
                } else {
                    let mut attr = NonResidentAttribute::new(
                        runs,
                        volume,
                        compressor,
                        bytes_per_cluster,
                        compression_unit_size,
                        allocated_length,
                        data_length,
                        initialized_length,
                    );
                    if new_len < attr.data_length {
                        attr.truncate(bitmap, new_len)?;
                    } else if new_len > attr.data_length {
                        let zeros = vec![0u8; (new_len - attr.data_length) as usize];
                        attr.write(bitmap, attr.data_length, &zeros)?;
                    }
                    FileStream::NonResident {
                        runs: attr.runs,
                        allocated_length: attr.allocated_length,
                        data_length: attr.data_length,
                        initialized_length: attr.initialized_length,
                        compression_unit_size,
                    }
                }
            }
        };
        *self = next;
        Ok(())
    }
}

/// Every extent of `(type_code, name)` across the base and loaded extension
/// records, in ascending start-VCN order.
fn collect_extents(set: &RecordSet, type_code: u32, name: &[u16]) -> Vec<AttributeRecord> {
    let mut out: Vec<AttributeRecord> = set
        .base
        .attributes
        .iter()
        .filter(|a| a.type_code == type_code && a.name_matches(name))
        .cloned()
        .collect();
    for ext in &set.extensions {
        out.extend(ext.attributes.iter().filter(|a| a.type_code == type_code && a.name_matches(name)).cloned());
    }
    out.sort_by_key(|a| match &a.body {
        AttributeBody::NonResident { start_vcn, .. } => *start_vcn,
        AttributeBody::Resident { .. } => 0,
    });
    out
}

/// A file: its base `RecordSet` plus the stream-level operations built on
/// top of it. Attribute-extent splitting across records is handled entirely
/// by `mft_updater::update_record_in_mft`, called from `save`; `File` only
/// ever sees the flattened, single-extent view of a stream (see
/// `gather_stream`), and lets the next `save` re-split it if it overflows
/// again.
pub struct File {
    pub set: RecordSet,
}

impl File {
    fn record_ref(&self) -> FileRecordReference {
        FileRecordReference::new(self.set.base.mft_record_number as u64, self.set.base.sequence_number)
    }

    pub fn mft_index(&self) -> u64 {
        self.set.base.mft_record_number as u64
    }

    pub fn hard_link_count(&self) -> u16 {
        self.set.base.hard_link_count
    }

    pub fn is_directory(&self) -> bool {
        self.set.base.is_directory()
    }

    /// Load a `File` from MFT index `index`, following its
    /// `$ATTRIBUTE_LIST` (if any) to pull in every extension record it
    /// names.
    pub fn open(mft: &mut MasterFileTable, index: u64) -> Result<Self> {
        let base = mft.get(index)?;
        let list = match base.find(attr_type::ATTRIBUTE_LIST, &[]) {
            Some(AttributeRecord { body: AttributeBody::Resident { data, .. }, .. }) => AttributeList::parse(data)?,
            Some(_) => return Err(NtfsError::corrupt("$ATTRIBUTE_LIST must be resident")),
            None => AttributeList::new(),
        };
        let mut set = RecordSet::new(base);

        let mut seen = HashSet::new();
        seen.insert(index);
        for entry in list.entries() {
            let ext_index = entry.base_record.mft_index();
            if seen.insert(ext_index) {
                let ext = mft.get(ext_index)?;
                if ext.sequence_number != entry.base_record.sequence_number() {
                    return Err(NtfsError::corrupt("attribute list entry references a stale extension record"));
                }
                set.extensions.push(ext);
            }
        }
        Ok(File { set })
    }

    /// Run the residency/splitting fixed point and write every touched
    /// record back through `mft`.
    pub fn save(&mut self, mft: &mut MasterFileTable, volume_bitmap: &mut ClusterBitmap, allocated_size: usize) -> Result<()> {
        update_record_in_mft(&mut self.set, mft, volume_bitmap, allocated_size)
    }

    pub fn standard_information(&self) -> Result<StandardInformation> {
        let attr = self
            .set
            .base
            .find(attr_type::STANDARD_INFORMATION, &[])
            .ok_or_else(|| NtfsError::corrupt("file has no $STANDARD_INFORMATION"))?;
        match &attr.body {
            AttributeBody::Resident { data, .. } => StandardInformation::decode(data),
            AttributeBody::NonResident { .. } => Err(NtfsError::corrupt("$STANDARD_INFORMATION must be resident")),
        }
    }

    pub fn set_standard_information(&mut self, info: &StandardInformation) {
        let body = AttributeBody::Resident { data: info.encode().to_vec(), indexed: false };
        if let Some(existing) = self.set.base.find_mut(attr_type::STANDARD_INFORMATION, &[]) {
            existing.body = body;
        } else {
            self.set.base.insert(AttributeRecord {
                type_code: attr_type::STANDARD_INFORMATION,
                name: Vec::new(),
                id: 0,
                flags: 0,
                body,
            });
        }
    }

    /// Total logical length of the named stream (empty name for the
    /// unnamed `$DATA` stream), without assembling its run list.
    pub fn stream_len(&self, name: &[u16]) -> u64 {
        collect_extents(&self.set, attr_type::DATA, name)
            .first()
            .map(|a| match &a.body {
                AttributeBody::Resident { data, .. } => data.len() as u64,
                AttributeBody::NonResident { data_length, .. } => *data_length,
            })
            .unwrap_or(0)
    }

    /// Ensure a `(type_code, name)` attribute exists (inserting an empty
    /// resident one if not) and return its attribute id. Stream mutation
    /// needs an id up front to build a non-resident extent's back-reference
    /// before the stream's final content is known.
    fn ensure_attribute_id(&mut self, type_code: u32, name: &[u16]) -> u16 {
        if let Some(attr) = self.set.base.find(type_code, name) {
            attr.id
        } else {
            self.set.base.insert(AttributeRecord {
                type_code,
                name: name.to_vec(),
                id: 0,
                flags: 0,
                body: AttributeBody::Resident { data: Vec::new(), indexed: false },
            })
        }
    }

    /// Merge every extent of `(type_code, name)` into one logical
    /// `FileStream`. `allocated_length`/`data_length`/`initialized_length`
    /// are attribute-wide (identical on every extent after a split), so
    /// only the first extent's copy is used; only the run lists are
    /// actually concatenated.
    fn gather_stream(&self, type_code: u32, name: &[u16]) -> Result<FileStream> {
        let extents = collect_extents(&self.set, type_code, name);
        let first = extents.first().ok_or_else(|| NtfsError::not_found("attribute not present"))?;
        if extents.len() == 1 {
            let extent = ExtentKey { containing_record: self.record_ref(), attribute_id: first.id };
            return FileStream::from_body(&first.body, extent);
        }

        let (allocated_length, data_length, initialized_length, compression_unit_size) = match &first.body {
            AttributeBody::NonResident {
                allocated_length,
                data_length,
                initialized_length,
                compression_unit_size,
                ..
            } => (*allocated_length, *data_length, *initialized_length, *compression_unit_size),
            AttributeBody::Resident { .. } => return Err(NtfsError::corrupt("resident attribute split across records")),
        };
        let mut merged_raw = Vec::new();
        for attr in &extents {
            match &attr.body {
                AttributeBody::NonResident { run_list_bytes, .. } => merged_raw.extend(data_runs::decode(run_list_bytes)?),
                AttributeBody::Resident { .. } => return Err(NtfsError::corrupt("resident attribute split across records")),
            }
        }
        let extent = ExtentKey { containing_record: self.record_ref(), attribute_id: first.id };
        let runs = CookedDataRuns::from_raw(&merged_raw, 0, extent);
        Ok(FileStream::NonResident {
            runs,
            allocated_length,
            data_length,
            initialized_length,
            compression_unit_size: compression_unit_clusters(compression_unit_size),
        })
    }

    /// Write `stream` back as a single (possibly over-budget) extent on the
    /// base record, dropping every prior extent of this attribute from the
    /// extensions and from `$ATTRIBUTE_LIST`. `save` re-splits it if it no
    /// longer fits.
    fn put_stream(&mut self, type_code: u32, name: &[u16], stream: &FileStream) -> Result<()> {
        for ext in self.set.extensions.iter_mut() {
            ext.attributes.retain(|a| !(a.type_code == type_code && a.name_matches(name)));
        }
        if let Some(AttributeRecord { body: AttributeBody::Resident { data, .. }, .. }) =
            self.set.base.find(attr_type::ATTRIBUTE_LIST, &[])
        {
            let mut list = AttributeList::parse(data)?;
            let vcns: Vec<u64> = list.extents_for(type_code, name).iter().map(|e| e.start_vcn).collect();
            for vcn in vcns {
                list.remove(type_code, name, vcn);
            }
            if list.is_empty() {
                self.set.base.attributes.retain(|a| a.type_code != attr_type::ATTRIBUTE_LIST);
            } else if let Some(attr) = self.set.base.find_mut(attr_type::ATTRIBUTE_LIST, &[]) {
                attr.body = AttributeBody::Resident { data: list.to_bytes(), indexed: false };
            }
        }

        let body = stream.to_body();
        if let Some(existing) = self.set.base.find_mut(type_code, name) {
            existing.body = body;
        } else {
            self.set.base.insert(AttributeRecord { type_code, name: name.to_vec(), id: 0, flags: 0, body });
        }
        Ok(())
    }

    pub fn read_stream(
        &self,
        mft: &mut MasterFileTable,
        compressor: Option<&dyn BlockCompressor>,
        name: &[u16],
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let mut stream = self.gather_stream(attr_type::DATA, name)?;
        let bytes_per_cluster = mft.bytes_per_cluster();
        stream.read(mft.volume_mut(), compressor, bytes_per_cluster, offset, buf)
    }

    pub fn write_stream(
        &mut self,
        mft: &mut MasterFileTable,
        bitmap: &mut ClusterBitmap,
        compressor: Option<&dyn BlockCompressor>,
        name: &[u16],
        offset: u64,
        buf: &[u8],
    ) -> Result<()> {
        let id = self.ensure_attribute_id(attr_type::DATA, name);
        let extent = ExtentKey { containing_record: self.record_ref(), attribute_id: id };
        let mut stream = self.gather_stream(attr_type::DATA, name)?;
        let bytes_per_cluster = mft.bytes_per_cluster();
        let mft_record_size = mft.mft_record_size();
        stream.write(mft.volume_mut(), bitmap, compressor, bytes_per_cluster, mft_record_size, extent, offset, buf)?;
        self.put_stream(attr_type::DATA, name, &stream)
    }

    pub fn set_stream_length(
        &mut self,
        mft: &mut MasterFileTable,
        bitmap: &mut ClusterBitmap,
        compressor: Option<&dyn BlockCompressor>,
        name: &[u16],
        new_len: u64,
    ) -> Result<()> {
        let id = self.ensure_attribute_id(attr_type::DATA, name);
        let extent = ExtentKey { containing_record: self.record_ref(), attribute_id: id };
        let mut stream = self.gather_stream(attr_type::DATA, name)?;
        let bytes_per_cluster = mft.bytes_per_cluster();
        let mft_record_size = mft.mft_record_size();
        stream.set_length(mft.volume_mut(), bitmap, compressor, bytes_per_cluster, mft_record_size, extent, new_len)?;
        self.put_stream(attr_type::DATA, name, &stream)
    }
}

/// Create a new file (or, with `is_directory`, a subdirectory with an empty
/// `$I30` index) as a child of `parent_dir`, and link it in under `name`
///.
#[allow(clippy::too_many_arguments)]
pub fn create_file(
    mft: &mut MasterFileTable,
    volume_bitmap: &mut ClusterBitmap,
    parent_dir: &mut Directory,
    parent_ref: FileRecordReference,
    name: &[u16],
    namespace: Namespace,
    file_attributes: u32,
    is_directory: bool,
    upcase: &UpCaseTable,
    index_block_size: u32,
    sector_size: usize,
    now: u64,
    allocated_size: usize,
) -> Result<File> {
    validate_name(name)?;
    if parent_dir.lookup(name).is_some() {
        return Err(NtfsError::AlreadyExists(String::from_utf16_lossy(name)));
    }

    let index = mft.allocate(volume_bitmap)?;
    let mut record = FileRecord::new_empty(index as u32, 1);
    record.hard_link_count = 1;
    record.flags = record_flags::IN_USE | if is_directory { record_flags::IS_DIRECTORY } else { 0 };

    let std_info = StandardInformation {
        creation_time: now,
        modification_time: now,
        mft_modification_time: now,
        access_time: now,
        file_attributes,
        ..StandardInformation::default()
    };
    record.insert(AttributeRecord {
        type_code: attr_type::STANDARD_INFORMATION,
        name: Vec::new(),
        id: 0,
        flags: 0,
        body: AttributeBody::Resident { data: std_info.encode().to_vec(), indexed: false },
    });

    let child_ref = FileRecordReference::new(index, record.sequence_number);
    let fnr = FileNameRecord {
        parent: parent_ref,
        creation_time: now,
        modification_time: now,
        mft_modification_time: now,
        access_time: now,
        allocated_size: 0,
        real_size: 0,
        file_attributes,
        ea_size_or_reparse_tag: 0,
        namespace,
        name: name.to_vec(),
    };
    record.insert(AttributeRecord {
        type_code: attr_type::FILE_NAME,
        name: Vec::new(),
        id: 0,
        flags: 0,
        body: AttributeBody::Resident { data: fnr.encode(), indexed: true },
    });

    if is_directory {
        let mut dir = Directory::new_empty(index_block_size, upcase);
        let (root_data, allocation_data) = dir.to_attributes(sector_size);
        debug_assert!(allocation_data.is_none(), "a brand new directory's index always fits in its root");
        record.insert(AttributeRecord {
            type_code: attr_type::INDEX_ROOT,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident { data: root_data, indexed: false },
        });
    }

    let mut file = File { set: RecordSet::new(record) };
    file.save(mft, volume_bitmap, allocated_size)?;
    parent_dir.add_entry(fnr, child_ref)?;
    Ok(file)
}

/// Add a hard link: a new `FileName` alias for an existing file, filed
/// under `name` in `directory`.
#[allow(clippy::too_many_arguments)]
pub fn add_hard_link(
    file: &mut File,
    directory: &mut Directory,
    parent_ref: FileRecordReference,
    name: &[u16],
    namespace: Namespace,
    now: u64,
    mft: &mut MasterFileTable,
    volume_bitmap: &mut ClusterBitmap,
    allocated_size: usize,
) -> Result<()> {
    validate_name(name)?;
    if directory.lookup(name).is_some() {
        return Err(NtfsError::AlreadyExists(String::from_utf16_lossy(name)));
    }

    let mut std_info = file.standard_information()?;
    let fnr = FileNameRecord {
        parent: parent_ref,
        creation_time: std_info.creation_time,
        modification_time: std_info.modification_time,
        mft_modification_time: std_info.mft_modification_time,
        access_time: std_info.access_time,
        allocated_size: 0,
        real_size: 0,
        file_attributes: std_info.file_attributes,
        ea_size_or_reparse_tag: 0,
        namespace,
        name: name.to_vec(),
    };
    file.set.base.insert(AttributeRecord {
        type_code: attr_type::FILE_NAME,
        name: Vec::new(),
        id: 0,
        flags: 0,
        body: AttributeBody::Resident { data: fnr.encode(), indexed: true },
    });
    file.set.base.hard_link_count += 1;
    std_info.mft_modification_time = now;
    file.set_standard_information(&std_info);
    file.save(mft, volume_bitmap, allocated_size)?;

    let child_ref = file.record_ref();
    directory.add_entry(fnr, child_ref)
}

/// Remove the directory entry and matching `FileName` alias for `name`,
/// decrementing the file's hard-link count. Returns `true` once the count
/// reaches zero, meaning the caller should follow up with `delete_file`
///.
pub fn remove_hard_link(
    file: &mut File,
    directory: &mut Directory,
    name: &[u16],
    mft: &mut MasterFileTable,
    volume_bitmap: &mut ClusterBitmap,
    allocated_size: usize,
) -> Result<bool> {
    let (_removed_fnr, child_ref) = directory.remove_entry(name)?;
    if child_ref != file.record_ref() {
        return Err(NtfsError::corrupt("directory entry does not reference the expected file"));
    }

    let victim_id = file.set.base.attributes.iter().find_map(|a| {
        if a.type_code != attr_type::FILE_NAME {
            return None;
        }
        match &a.body {
            AttributeBody::Resident { data, .. } => FileNameRecord::decode(data).ok().filter(|fnr| fnr.name == name).map(|_| a.id),
            AttributeBody::NonResident { .. } => None,
        }
    });
    if let Some(id) = victim_id {
        file.set.base.remove_by_id(id);
    }
    file.set.base.hard_link_count = file.set.base.hard_link_count.saturating_sub(1);
    file.save(mft, volume_bitmap, allocated_size)?;
    Ok(file.set.base.hard_link_count == 0)
}

/// Truncate every stream to nothing and free the file's record(s). Only
/// valid once `remove_hard_link` has reported a zero link count.
pub fn delete_file(file: File, mft: &mut MasterFileTable, volume_bitmap: &mut ClusterBitmap) -> Result<()> {
    let file_ref = FileRecordReference::new(file.set.base.mft_record_number as u64, file.set.base.sequence_number);
    let mut all_attrs: Vec<AttributeRecord> = file.set.base.attributes.clone();
    for ext in &file.set.extensions {
        all_attrs.extend(ext.attributes.iter().cloned());
    }

    let bytes_per_cluster = mft.bytes_per_cluster();
    {
        let volume = mft.volume_mut();
        for attr in &all_attrs {
            if let AttributeBody::NonResident {
                start_vcn,
                run_list_bytes,
                compression_unit_size,
                allocated_length,
                data_length,
                initialized_length,
                ..
            } = &attr.body
            {
                let extent = ExtentKey { containing_record: file_ref, attribute_id: attr.id };
                let raw = data_runs::decode(run_list_bytes)?;
                let runs = CookedDataRuns::from_raw(&raw, *start_vcn, extent);
                let mut attr_view = NonResidentAttribute::new(
                    runs,
                    volume,
                    None,
                    bytes_per_cluster,
                    compression_unit_clusters(*compression_unit_size),
                    *allocated_length,
                    *data_length,
                    *initialized_length,
                );
                attr_view.truncate(volume_bitmap, 0)?;
            }
        }
    }

    for ext in &file.set.extensions {
        mft.free(ext.mft_record_number as u64)?;
    }
    mft.free(file.mft_index())
}
