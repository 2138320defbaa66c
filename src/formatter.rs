//! Lay down a fresh NTFS volume: boot sector, `$MFT` and its first 19
//! reserved records, root directory, and `$Extend`'s children.
//!
//! `MasterFileTable::bootstrap` requires record 0 to already exist on disk
//! with a valid `$DATA`/`$BITMAP` pair, so none of this goes through
//! `MasterFileTable`'s own mutation API: every reserved record is built
//! directly as a `FileRecord` and written with a raw `volume.write_at`,
//! the same way `file.rs`'s test helper `build_volume_with_mft` seeds a
//! volume for its own tests. Cluster placement is tracked with a local
//! `ClusterBitmap` and `mark_allocated`, not the general-purpose
//! allocator — every extent here is chosen by the formatter, not found by
//! first-fit.

use crate::attribute_record::{AttributeBody, AttributeRecord};
use crate::aux_index::{ObjectIdIndex, QuotaIndex, ReparsePointIndex};
use crate::bitmap::ClusterBitmap;
use crate::boot_sector::{BootSector, ClusterSize};
use crate::data_runs::{self, RawRun};
use crate::directory::{Directory, FileNameRecord};
use crate::error::{NtfsError, Result};
use crate::file_record::FileRecord;
use crate::logfile;
use crate::security::{reorder_descriptor, SecurityStore};
use crate::structures::{attr_type, file_attr, record_flags, reserved_records, FileRecordReference, Namespace, StandardInformation};
use crate::upcase::UpCaseTable;
use crate::volume::{RandomSource, RawVolume};

/// Number of MFT records the formatter lays down up front: 0-11 (the
/// fixed reserved files), 12-15 (spare slots, left unused), 16-18
/// (`$Extend`'s three children). `reserved_records::FIRST_USER_RECORD` is
/// 16 in the on-disk convention this engine otherwise never enforces; the
/// real first free record in a volume this formatter produces is 19.
const INITIAL_MFT_RECORDS: u64 = 19;
const MIRROR_RECORD_COUNT: u64 = 4;

/// What `format_volume` needs beyond sizing: the caller supplies a clock
/// reading, matching the caller-supplied-timestamp convention the rest of
/// this engine uses.
pub struct FormatOptions {
    pub total_sectors: u64,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub mft_record_size: u32,
    pub index_buffer_size: u32,
    pub volume_label: String,
    pub volume_serial_number: Option<u64>,
    pub now: u64,
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Encode a byte size as a `ClusterSize` raw byte relative to `unit`
/// (`bytes_per_cluster` for the MFT record size and index buffer size
/// fields): a whole multiple of `unit` is stored as a literal sector
/// count, anything smaller as a negative power-of-two exponent.
fn encode_cluster_size(size: u32, unit: u32) -> u8 {
    if size >= unit && size % unit == 0 {
        ClusterSize::Sectors((size / unit) as u8).encode()
    } else {
        ClusterSize::Bytes(size).encode()
    }
}

fn std_info_attribute(now: u64, file_attributes: u32) -> AttributeRecord {
    let info = StandardInformation {
        creation_time: now,
        modification_time: now,
        mft_modification_time: now,
        access_time: now,
        file_attributes,
        ..StandardInformation::default()
    };
    AttributeRecord {
        type_code: attr_type::STANDARD_INFORMATION,
        name: Vec::new(),
        id: 0,
        flags: 0,
        body: AttributeBody::Resident { data: info.encode().to_vec(), indexed: false },
    }
}

fn file_name_attribute(fnr: &FileNameRecord) -> AttributeRecord {
    AttributeRecord {
        type_code: attr_type::FILE_NAME,
        name: Vec::new(),
        id: 0,
        flags: 0,
        body: AttributeBody::Resident { data: fnr.encode(), indexed: true },
    }
}

fn system_fnr(parent: FileRecordReference, name: &str, now: u64, file_attributes: u32) -> FileNameRecord {
    FileNameRecord {
        parent,
        creation_time: now,
        modification_time: now,
        mft_modification_time: now,
        access_time: now,
        allocated_size: 0,
        real_size: 0,
        file_attributes,
        ea_size_or_reparse_tag: 0,
        namespace: Namespace::Win32AndDos,
        name: utf16(name),
    }
}

/// Build a non-resident attribute occupying a single contiguous run of
/// `clusters` clusters starting at `lcn`, holding `data_length` logical
/// bytes (the rest of the last cluster is implicit zero padding).
fn non_resident_attribute(type_code: u32, name: Vec<u16>, lcn: u64, clusters: u64, bytes_per_cluster: u32, data_length: u64) -> AttributeRecord {
    let allocated_length = clusters * bytes_per_cluster as u64;
    AttributeRecord {
        type_code,
        name,
        id: 0,
        flags: 0,
        body: AttributeBody::NonResident {
            start_vcn: 0,
            last_vcn: clusters.saturating_sub(1),
            compression_unit_size: 0,
            allocated_length,
            data_length,
            initialized_length: data_length,
            compressed_data_size: None,
            run_list_bytes: data_runs::encode(&[RawRun { length: clusters, lcn: Some(lcn) }]),
        },
    }
}

fn resident_attribute(type_code: u32, name: Vec<u16>, data: Vec<u8>, indexed: bool) -> AttributeRecord {
    AttributeRecord { type_code, name, id: 0, flags: 0, body: AttributeBody::Resident { data, indexed } }
}

/// Clusters needed to hold `bytes` whole, rounded up.
fn clusters_for(bytes: u64, bytes_per_cluster: u32) -> u64 {
    (bytes + bytes_per_cluster as u64 - 1) / bytes_per_cluster as u64
}

/// Format `volume` as a fresh NTFS volume per `options`, using `random`
/// for the volume serial number if the caller didn't pin one.
pub fn format_volume(volume: &mut dyn RawVolume, options: &FormatOptions, random: &mut dyn RandomSource) -> Result<()> {
    let bytes_per_cluster = options.sectors_per_cluster as u32 * options.bytes_per_sector as u32;
    let total_bytes = options.total_sectors * options.bytes_per_sector as u64;
    let total_clusters = total_bytes / bytes_per_cluster as u64;
    let mft_record_size = options.mft_record_size;
    let sector_size = options.bytes_per_sector as usize;
    let now = options.now;

    let mut cluster_bitmap = ClusterBitmap::new_empty(total_clusters);
    let mark = |bitmap: &mut ClusterBitmap, lcn: u64, clusters: u64| bitmap.mark_allocated((lcn, clusters));

    let mut cursor = 0u64;

    let boot_lcn = cursor;
    mark(&mut cluster_bitmap, boot_lcn, 1);
    cursor += 1;

    let mft_lcn = cursor;
    let mft_bytes = INITIAL_MFT_RECORDS * mft_record_size as u64;
    let mft_clusters = clusters_for(mft_bytes, bytes_per_cluster);
    mark(&mut cluster_bitmap, mft_lcn, mft_clusters);
    cursor += mft_clusters;

    let log_file_lcn = cursor;
    let log_file_bytes = logfile::size_log_file(total_bytes, bytes_per_cluster);
    let log_file_clusters = log_file_bytes / bytes_per_cluster as u64;
    mark(&mut cluster_bitmap, log_file_lcn, log_file_clusters);
    cursor += log_file_clusters;

    let upcase = UpCaseTable::default_table();
    let upcase_bytes = upcase.to_bytes();
    let upcase_lcn = cursor;
    let upcase_clusters = clusters_for(upcase_bytes.len() as u64, bytes_per_cluster);
    mark(&mut cluster_bitmap, upcase_lcn, upcase_clusters);
    cursor += upcase_clusters;

    // $Secure, seeded with one default (empty DACL/SACL/owner/group) null
    // descriptor so $SDS/$SDH/$SII are never truly empty on a fresh volume.
    let mut security = SecurityStore::new_empty(options.index_buffer_size);
    let null_descriptor = reorder_descriptor(&[0u8; 20], &[], &[], &[], &[])?;
    security.add_descriptor(&null_descriptor)?;
    let sds_bytes = security.sds_bytes().to_vec();
    let (sdh_root, sdh_allocation) = security.sdh_to_attributes(sector_size);
    let (sii_root, sii_allocation) = security.sii_to_attributes(sector_size);
    debug_assert!(sdh_allocation.is_none() && sii_allocation.is_none(), "a single seed descriptor fits both indexes resident");

    let sds_lcn = cursor;
    let sds_clusters = clusters_for(sds_bytes.len() as u64, bytes_per_cluster);
    mark(&mut cluster_bitmap, sds_lcn, sds_clusters);
    cursor += sds_clusters;

    let root_ref = FileRecordReference::new(reserved_records::ROOT, 1);
    let extend_ref = FileRecordReference::new(reserved_records::EXTEND, 1);

    // Root directory: every reserved file except root itself. 11 entries
    // comfortably exceed the resident index budget, so this always comes
    // back as a large index with one $INDEX_ALLOCATION block.
    let mut root_dir = Directory::new_empty(options.index_buffer_size, &upcase);
    for name in ["$MFT", "$MFTMirr", "$LogFile", "$Volume", "$AttrDef", "$Bitmap", "$Boot", "$BadClus", "$Secure", "$UpCase", "$Extend"] {
        let target = reserved_record_ref(name);
        root_dir.add_entry(system_fnr(root_ref, name, now, file_attr::HIDDEN | file_attr::SYSTEM), target)?;
    }
    let (root_root_data, root_allocation_data) = root_dir.to_attributes(sector_size);
    let root_allocation_data = root_allocation_data.ok_or_else(|| NtfsError::corrupt("root directory unexpectedly stayed resident"))?;

    let root_index_lcn = cursor;
    let root_index_clusters = clusters_for(root_allocation_data.len() as u64, bytes_per_cluster);
    mark(&mut cluster_bitmap, root_index_lcn, root_index_clusters);
    cursor += root_index_clusters;
    let root_blocks_in_use = root_allocation_data.len() as u64 / options.index_buffer_size as u64;
    let root_index_bitmap = vec![0xFFu8; ((root_blocks_in_use + 7) / 8) as usize];

    // $Extend: $ObjId, $Reparse, $Quota. Three short names always fit
    // resident.
    let mut extend_dir = Directory::new_empty(options.index_buffer_size, &upcase);
    for name in ["$ObjId", "$Reparse", "$Quota"] {
        let target = reserved_record_ref(name);
        extend_dir.add_entry(system_fnr(extend_ref, name, now, file_attr::HIDDEN | file_attr::SYSTEM), target)?;
    }
    let (extend_root_data, extend_allocation_data) = extend_dir.to_attributes(sector_size);
    debug_assert!(extend_allocation_data.is_none(), "$Extend's three entries fit resident");

    let mut object_id_index = ObjectIdIndex::new_empty(options.index_buffer_size);
    let (object_id_root, object_id_allocation) = object_id_index.to_attributes(sector_size);
    debug_assert!(object_id_allocation.is_none(), "a brand new $ObjId index is empty");

    let mut reparse_index = ReparsePointIndex::new_empty(options.index_buffer_size);
    let (reparse_root, reparse_allocation) = reparse_index.to_attributes(sector_size);
    debug_assert!(reparse_allocation.is_none(), "a brand new $Reparse index is empty");

    let mut quota_index = QuotaIndex::new_empty(options.index_buffer_size);
    let (quota_owners_root, quota_owners_allocation) = quota_index.owners_to_attributes(sector_size);
    let (quota_entries_root, quota_entries_allocation) = quota_index.entries_to_attributes(sector_size);
    debug_assert!(quota_owners_allocation.is_none() && quota_entries_allocation.is_none(), "a brand new $Quota index is empty");

    // Volume-wide cluster bitmap: its own content is the very last thing
    // written, once every other reservation (including its own space) is
    // final.
    let bitmap_lcn = cursor;
    let bitmap_bytes_len = (total_clusters + 7) / 8;
    let bitmap_clusters = clusters_for(bitmap_bytes_len, bytes_per_cluster);
    mark(&mut cluster_bitmap, bitmap_lcn, bitmap_clusters);
    cursor += bitmap_clusters;

    let mft_mirror_lcn = total_clusters / 2;
    let backup_boot_lcn = total_clusters - 1;
    if mft_mirror_lcn < cursor || backup_boot_lcn < cursor {
        return Err(NtfsError::invalid("volume too small to format"));
    }
    mark(&mut cluster_bitmap, mft_mirror_lcn, 1);
    mark(&mut cluster_bitmap, backup_boot_lcn, 1);

    // --- Build every reserved FileRecord. ---
    let mut records: Vec<Option<FileRecord>> = (0..INITIAL_MFT_RECORDS).map(|_| None).collect();

    let mut mft_record = FileRecord::new_empty(reserved_records::MFT as u32, 1);
    mft_record.hard_link_count = 1;
    mft_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    mft_record.insert(file_name_attribute(&system_fnr(root_ref, "$MFT", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    mft_record.insert(non_resident_attribute(attr_type::DATA, Vec::new(), mft_lcn, mft_clusters, bytes_per_cluster, mft_bytes));
    mft_record.insert(resident_attribute(attr_type::BITMAP, Vec::new(), mft_record_use_bitmap(), false));
    records[reserved_records::MFT as usize] = Some(mft_record);

    // $MFTMirr's $DATA run is reserved now; its content (a copy of the
    // first few serialized records) is filled in once those exist.
    let mut mft_mirror_record = FileRecord::new_empty(reserved_records::MFT_MIRROR as u32, 1);
    mft_mirror_record.hard_link_count = 1;
    mft_mirror_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    mft_mirror_record.insert(file_name_attribute(&system_fnr(root_ref, "$MFTMirr", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    mft_mirror_record.insert(non_resident_attribute(
        attr_type::DATA,
        Vec::new(),
        mft_mirror_lcn,
        1,
        bytes_per_cluster,
        MIRROR_RECORD_COUNT * mft_record_size as u64,
    ));
    records[reserved_records::MFT_MIRROR as usize] = Some(mft_mirror_record);

    let mut log_file_record = FileRecord::new_empty(reserved_records::LOG_FILE as u32, 1);
    log_file_record.hard_link_count = 1;
    log_file_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    log_file_record.insert(file_name_attribute(&system_fnr(root_ref, "$LogFile", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    log_file_record.insert(non_resident_attribute(attr_type::DATA, Vec::new(), log_file_lcn, log_file_clusters, bytes_per_cluster, log_file_bytes));
    records[reserved_records::LOG_FILE as usize] = Some(log_file_record);

    let mut volume_record = FileRecord::new_empty(reserved_records::VOLUME as u32, 1);
    volume_record.hard_link_count = 1;
    volume_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    volume_record.insert(file_name_attribute(&system_fnr(root_ref, "$Volume", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    let label_bytes: Vec<u8> = utf16(&options.volume_label).iter().flat_map(|u| u.to_le_bytes()).collect();
    volume_record.insert(resident_attribute(attr_type::VOLUME_NAME, Vec::new(), label_bytes, false));
    volume_record.insert(resident_attribute(attr_type::VOLUME_INFORMATION, Vec::new(), volume_information_bytes(), false));
    records[reserved_records::VOLUME as usize] = Some(volume_record);

    let mut attr_def_record = FileRecord::new_empty(reserved_records::ATTR_DEF as u32, 1);
    attr_def_record.hard_link_count = 1;
    attr_def_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    attr_def_record.insert(file_name_attribute(&system_fnr(root_ref, "$AttrDef", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    attr_def_record.insert(resident_attribute(attr_type::DATA, Vec::new(), Vec::new(), false));
    records[reserved_records::ATTR_DEF as usize] = Some(attr_def_record);

    let mut root_record = FileRecord::new_empty(reserved_records::ROOT as u32, 1);
    root_record.hard_link_count = 1;
    root_record.flags |= record_flags::IS_DIRECTORY;
    root_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM | file_attr::DIRECTORY));
    root_record.insert(file_name_attribute(&system_fnr(root_ref, ".", now, file_attr::HIDDEN | file_attr::SYSTEM | file_attr::DIRECTORY)));
    root_record.insert(resident_attribute(attr_type::INDEX_ROOT, Vec::new(), root_root_data, false));
    root_record.insert(non_resident_attribute(
        attr_type::INDEX_ALLOCATION,
        Vec::new(),
        root_index_lcn,
        root_index_clusters,
        bytes_per_cluster,
        root_allocation_data.len() as u64,
    ));
    root_record.insert(resident_attribute(attr_type::BITMAP, Vec::new(), root_index_bitmap, false));
    records[reserved_records::ROOT as usize] = Some(root_record);

    let mut bitmap_record = FileRecord::new_empty(reserved_records::BITMAP as u32, 1);
    bitmap_record.hard_link_count = 1;
    bitmap_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    bitmap_record.insert(file_name_attribute(&system_fnr(root_ref, "$Bitmap", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    bitmap_record.insert(non_resident_attribute(attr_type::DATA, Vec::new(), bitmap_lcn, bitmap_clusters, bytes_per_cluster, bitmap_bytes_len));
    records[reserved_records::BITMAP as usize] = Some(bitmap_record);

    let boot = BootSector {
        bytes_per_sector: options.bytes_per_sector,
        sectors_per_cluster_raw: options.sectors_per_cluster,
        media_descriptor: 0xF8,
        hidden_sectors: 0,
        total_sectors: options.total_sectors,
        mft_lcn,
        mft_mirror_lcn,
        file_record_size_raw: encode_cluster_size(mft_record_size, bytes_per_cluster),
        index_buffer_size_raw: encode_cluster_size(options.index_buffer_size, bytes_per_cluster),
        volume_serial_number: options.volume_serial_number.unwrap_or_else(|| random.next_u64()),
    };
    let boot_sector_bytes = boot.to_bytes();

    let mut boot_record = FileRecord::new_empty(reserved_records::BOOT as u32, 1);
    boot_record.hard_link_count = 1;
    boot_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    boot_record.insert(file_name_attribute(&system_fnr(root_ref, "$Boot", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    boot_record.insert(non_resident_attribute(attr_type::DATA, Vec::new(), boot_lcn, 1, bytes_per_cluster, bytes_per_cluster as u64));
    records[reserved_records::BOOT as usize] = Some(boot_record);

    let mut bad_clus_record = FileRecord::new_empty(reserved_records::BAD_CLUS as u32, 1);
    bad_clus_record.hard_link_count = 1;
    bad_clus_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    bad_clus_record.insert(file_name_attribute(&system_fnr(root_ref, "$BadClus", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    bad_clus_record.insert(resident_attribute(attr_type::DATA, Vec::new(), Vec::new(), false));
    records[reserved_records::BAD_CLUS as usize] = Some(bad_clus_record);

    let mut secure_record = FileRecord::new_empty(reserved_records::SECURE as u32, 1);
    secure_record.hard_link_count = 1;
    secure_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    secure_record.insert(file_name_attribute(&system_fnr(root_ref, "$Secure", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    secure_record.insert(non_resident_attribute(attr_type::DATA, utf16("$SDS"), sds_lcn, sds_clusters, bytes_per_cluster, sds_bytes.len() as u64));
    secure_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$SDH"), sdh_root, false));
    secure_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$SII"), sii_root, false));
    records[reserved_records::SECURE as usize] = Some(secure_record);

    let mut up_case_record = FileRecord::new_empty(reserved_records::UP_CASE as u32, 1);
    up_case_record.hard_link_count = 1;
    up_case_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    up_case_record.insert(file_name_attribute(&system_fnr(root_ref, "$UpCase", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    up_case_record.insert(non_resident_attribute(attr_type::DATA, Vec::new(), upcase_lcn, upcase_clusters, bytes_per_cluster, upcase_bytes.len() as u64));
    records[reserved_records::UP_CASE as usize] = Some(up_case_record);

    let mut extend_record = FileRecord::new_empty(reserved_records::EXTEND as u32, 1);
    extend_record.hard_link_count = 1;
    extend_record.flags |= record_flags::IS_DIRECTORY;
    extend_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM | file_attr::DIRECTORY));
    extend_record.insert(file_name_attribute(&system_fnr(root_ref, "$Extend", now, file_attr::HIDDEN | file_attr::SYSTEM | file_attr::DIRECTORY)));
    extend_record.insert(resident_attribute(attr_type::INDEX_ROOT, Vec::new(), extend_root_data, false));
    records[reserved_records::EXTEND as usize] = Some(extend_record);

    let object_id_index_num = reserved_record_ref("$ObjId").mft_index() as usize;
    let mut object_id_record = FileRecord::new_empty(object_id_index_num as u32, 1);
    object_id_record.hard_link_count = 1;
    object_id_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    object_id_record.insert(file_name_attribute(&system_fnr(extend_ref, "$ObjId", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    object_id_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$O"), object_id_root, false));
    records[object_id_index_num] = Some(object_id_record);

    let reparse_index_num = reserved_record_ref("$Reparse").mft_index() as usize;
    let mut reparse_record = FileRecord::new_empty(reparse_index_num as u32, 1);
    reparse_record.hard_link_count = 1;
    reparse_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    reparse_record.insert(file_name_attribute(&system_fnr(extend_ref, "$Reparse", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    reparse_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$R"), reparse_root, false));
    records[reparse_index_num] = Some(reparse_record);

    let quota_index_num = reserved_record_ref("$Quota").mft_index() as usize;
    let mut quota_record = FileRecord::new_empty(quota_index_num as u32, 1);
    quota_record.hard_link_count = 1;
    quota_record.insert(std_info_attribute(now, file_attr::HIDDEN | file_attr::SYSTEM));
    quota_record.insert(file_name_attribute(&system_fnr(extend_ref, "$Quota", now, file_attr::HIDDEN | file_attr::SYSTEM)));
    quota_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$O"), quota_owners_root, false));
    quota_record.insert(resident_attribute(attr_type::INDEX_ROOT, utf16("$Q"), quota_entries_root, false));
    records[quota_index_num] = Some(quota_record);

    // --- Serialize and write every populated record, in ascending order
    // so the mirror can simply read back the bytes it needs. ---
    let mut serialized: Vec<Option<Vec<u8>>> = Vec::with_capacity(records.len());
    for (index, record) in records.iter_mut().enumerate() {
        match record {
            None => serialized.push(None),
            Some(record) => {
                let bytes = record.to_bytes(mft_record_size as usize, sector_size)?;
                let offset = mft_lcn * bytes_per_cluster as u64 + index as u64 * mft_record_size as u64;
                volume.write_at(offset, &bytes)?;
                serialized.push(Some(bytes));
            }
        }
    }

    let mut mirror_content = Vec::with_capacity((MIRROR_RECORD_COUNT * mft_record_size as u64) as usize);
    for index in 0..MIRROR_RECORD_COUNT as usize {
        let bytes = serialized[index].as_ref().ok_or_else(|| NtfsError::corrupt("mirrored record was never written"))?;
        mirror_content.extend_from_slice(bytes);
    }
    mirror_content.resize(bytes_per_cluster as usize, 0);
    volume.write_at(mft_mirror_lcn * bytes_per_cluster as u64, &mirror_content)?;

    let root_index_offset = root_index_lcn * bytes_per_cluster as u64;
    volume.write_at(root_index_offset, &root_allocation_data)?;

    let mut sds_padded = sds_bytes;
    sds_padded.resize((sds_clusters * bytes_per_cluster as u64) as usize, 0);
    volume.write_at(sds_lcn * bytes_per_cluster as u64, &sds_padded)?;

    let mut upcase_padded = upcase_bytes;
    upcase_padded.resize((upcase_clusters * bytes_per_cluster as u64) as usize, 0);
    volume.write_at(upcase_lcn * bytes_per_cluster as u64, &upcase_padded)?;

    let mut log_file_content = logfile::blank_log_file(log_file_bytes);
    volume.write_at(log_file_lcn * bytes_per_cluster as u64, &log_file_content)?;
    log_file_content.clear();

    // Boot sector at LBA 0 and mirrored at the volume's last sector; both
    // writes double as $Boot's own $DATA content at LCN 0.
    let mut boot_cluster = vec![0u8; bytes_per_cluster as usize];
    boot_cluster[0..512].copy_from_slice(&boot_sector_bytes);
    volume.write_at(boot_lcn * bytes_per_cluster as u64, &boot_cluster)?;
    volume.write_at((options.total_sectors - 1) * options.bytes_per_sector as u64, &boot_sector_bytes)?;

    // Volume-wide cluster bitmap: written last, now that every reservation
    // (including its own space) is reflected in `cluster_bitmap`.
    let mut bitmap_content = cluster_bitmap.as_bytes().to_vec();
    bitmap_content.resize((bitmap_clusters * bytes_per_cluster as u64) as usize, 0);
    volume.write_at(bitmap_lcn * bytes_per_cluster as u64, &bitmap_content)?;

    volume.flush()
}

/// `$MFT`'s own record-use bitmap: the 15 populated reserved records are
/// marked in use, the four spare slots (12-15) are left free.
fn mft_record_use_bitmap() -> Vec<u8> {
    let mut bitmap = ClusterBitmap::new_empty(INITIAL_MFT_RECORDS);
    for record in 0..=reserved_records::EXTEND {
        bitmap.mark_allocated((record, 1));
    }
    for record in [reserved_record_ref("$ObjId").mft_index(), reserved_record_ref("$Reparse").mft_index(), reserved_record_ref("$Quota").mft_index()] {
        bitmap.mark_allocated((record, 1));
    }
    bitmap.as_bytes().to_vec()
}

/// The fixed MFT record number a reserved system file occupies in this
/// formatter's layout.
fn reserved_record_ref(name: &str) -> FileRecordReference {
    let index = match name {
        "$MFT" => reserved_records::MFT,
        "$MFTMirr" => reserved_records::MFT_MIRROR,
        "$LogFile" => reserved_records::LOG_FILE,
        "$Volume" => reserved_records::VOLUME,
        "$AttrDef" => reserved_records::ATTR_DEF,
        "$Bitmap" => reserved_records::BITMAP,
        "$Boot" => reserved_records::BOOT,
        "$BadClus" => reserved_records::BAD_CLUS,
        "$Secure" => reserved_records::SECURE,
        "$UpCase" => reserved_records::UP_CASE,
        "$Extend" => reserved_records::EXTEND,
        "$ObjId" => reserved_records::FIRST_USER_RECORD,
        "$Reparse" => reserved_records::FIRST_USER_RECORD + 1,
        "$Quota" => reserved_records::FIRST_USER_RECORD + 2,
        other => unreachable!("not a reserved system file name: {other}"),
    };
    FileRecordReference::new(index, 1)
}

/// `$VOLUME_INFORMATION` content: 8 reserved bytes, major/minor version,
/// a flags word (NTFS 3.1, as written by Windows Vista and later).
fn volume_information_bytes() -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[8] = 3;
    buf[9] = 1;
    buf
}
