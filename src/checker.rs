//! Self-check pass: walk a mounted volume and report the invariants that
//! hold across the whole MFT, not just one record. No chkdsk-style repair
//! happens here: every finding is a `String` appended to the report and
//! the walk continues past it.

use crate::attribute_record::AttributeBody;
use crate::bitmap::ClusterBitmap;
use crate::cluster_stream::RawClusterStream;
use crate::data_runs::{self, CookedDataRuns, ExtentKey};
use crate::directory::FileNameCollator;
use crate::error::Result;
use crate::index::Index;
use crate::mft::MasterFileTable;
use crate::security::SecurityStore;
use crate::structures::{attr_type, reserved_records, FileRecordReference};
use crate::upcase::UpCaseTable;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CheckReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Read an attribute's full logical content regardless of residency,
/// truncated to its `data_length`. Non-resident attributes are read
/// through a fresh `RawClusterStream` against `mft`'s own volume handle.
fn read_attribute_content(mft: &mut MasterFileTable, body: &AttributeBody, containing_record: FileRecordReference, attribute_id: u16) -> Result<Vec<u8>> {
    match body {
        AttributeBody::Resident { data, .. } => Ok(data.clone()),
        AttributeBody::NonResident { run_list_bytes, start_vcn, data_length, .. } => {
            let raw = data_runs::decode(run_list_bytes)?;
            let extent = ExtentKey { containing_record, attribute_id };
            let runs = CookedDataRuns::from_raw(&raw, *start_vcn, extent);
            let bpc = mft.bytes_per_cluster();
            let clusters = (*data_length + bpc as u64 - 1) / bpc as u64;
            let mut buf = vec![0u8; (clusters * bpc as u64) as usize];
            RawClusterStream::new(mft.volume_mut(), bpc).read(&runs, 0, clusters, &mut buf)?;
            buf.truncate(*data_length as usize);
            Ok(buf)
        }
    }
}

pub struct Checker;

impl Checker {
    /// Run every universal invariant check against a bootstrapped
    /// `MasterFileTable`. `upcase` drives directory
    /// collation order (invariant 7); `sector_size` is needed to parse
    /// the index and `$Secure` attributes read along the way.
    pub fn check(mft: &mut MasterFileTable, upcase: &UpCaseTable, sector_size: usize) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let bpc = mft.bytes_per_cluster();
        let total_clusters = mft.volume_mut().len() / bpc as u64;
        let mut computed_bitmap = ClusterBitmap::new_empty(total_clusters);

        // base MFT record number -> (its own hard_link_count, FileName
        // attributes seen across it and every extension record that
        // points back at it). Invariant 5.
        let mut link_counts: HashMap<u64, (u16, u32)> = HashMap::new();

        let record_count = mft.record_count();
        for index in 0..record_count {
            if !mft.is_in_use(index) {
                continue;
            }
            let record = match mft.get(index) {
                Ok(r) => r,
                Err(e) => {
                    report.errors.push(format!("MFT record {index}: {e}"));
                    continue;
                }
            };
            if !record.is_in_use() {
                report.errors.push(format!("MFT record {index}: $Bitmap marks it in use but the record header disagrees"));
                continue;
            }

            let owner = if record.is_base_record() { index } else { record.base_file_record.mft_index() };
            let name_count = record.all_of_type(attr_type::FILE_NAME).count() as u32;
            let slot = link_counts.entry(owner).or_insert((0, 0));
            slot.1 += name_count;
            if record.is_base_record() {
                slot.0 = record.hard_link_count;
            }

            // Invariant 4: no two files' non-sparse runs may cover the
            // same cluster, and the union of every run is what the
            // cluster bitmap should say is allocated.
            for attr in &record.attributes {
                if let AttributeBody::NonResident { run_list_bytes, .. } = &attr.body {
                    let raw = match data_runs::decode(run_list_bytes) {
                        Ok(raw) => raw,
                        Err(e) => {
                            report.errors.push(format!("MFT record {index} attribute {}: {e}", attr.id));
                            continue;
                        }
                    };
                    for run in &raw {
                        let Some(lcn) = run.lcn else { continue };
                        if lcn + run.length > total_clusters {
                            report.errors.push(format!("MFT record {index} attribute {}: run [{lcn}, {}) runs past the volume", attr.id, lcn + run.length));
                            continue;
                        }
                        for cluster in lcn..lcn + run.length {
                            if computed_bitmap.is_allocated(cluster) {
                                report.errors.push(format!("cluster {cluster} is claimed by more than one file (MFT record {index} attribute {})", attr.id));
                            }
                        }
                        computed_bitmap.mark_allocated((lcn, run.length));
                    }
                }
            }

            // Invariant 7: every on-disk directory index is kept in
            // strictly ascending, duplicate-free collation order.
            if record.is_directory() {
                if let Some(index_root) = record.find(attr_type::INDEX_ROOT, &[]) {
                    if let AttributeBody::Resident { data: root_data, .. } = &index_root.body {
                        let allocation = match record.find(attr_type::INDEX_ALLOCATION, &[]) {
                            Some(alloc_attr) => {
                                let bytes = read_attribute_content(mft, &alloc_attr.body, FileRecordReference::new(index, record.sequence_number), alloc_attr.id)?;
                                Some(bytes)
                            }
                            None => None,
                        };
                        match Index::parse(root_data, allocation.as_deref(), sector_size) {
                            Ok(parsed) => {
                                let collator = FileNameCollator { upcase };
                                if let Err(e) = parsed.verify_order(&collator) {
                                    report.errors.push(format!("MFT record {index}'s directory index: {e}"));
                                }
                            }
                            Err(e) => report.errors.push(format!("MFT record {index}'s directory index: {e}")),
                        }
                    }
                }
            }
        }

        for (owner, (hard_link_count, name_count)) in &link_counts {
            if *name_count != *hard_link_count as u32 {
                report.errors.push(format!(
                    "MFT record {owner}: hard-link count {hard_link_count} does not match {name_count} $FILE_NAME attribute(s) across its base and extension records"
                ));
            }
        }

        // Invariant 4 (continued): every cluster a file's non-sparse run
        // claims must also be marked allocated in the volume-wide
        // $Bitmap. This is a subset check, not equality: the formatter
        // reserves a handful of clusters (the backup boot sector, for
        // one) directly in the bitmap without any attribute's run list
        // covering them, so the bitmap legitimately has bits set beyond
        // what the walk above ever sees.
        if mft.is_in_use(reserved_records::BITMAP) {
            match mft.get(reserved_records::BITMAP) {
                Ok(bitmap_record) => match bitmap_record.find(attr_type::DATA, &[]) {
                    Some(data_attr) => {
                        let extent_ref = FileRecordReference::new(reserved_records::BITMAP, bitmap_record.sequence_number);
                        match read_attribute_content(mft, &data_attr.body, extent_ref, data_attr.id) {
                            Ok(on_disk) => {
                                let on_disk_bitmap = ClusterBitmap::from_bytes(on_disk, total_clusters);
                                for cluster in 0..total_clusters {
                                    if computed_bitmap.is_allocated(cluster) && !on_disk_bitmap.is_allocated(cluster) {
                                        report.errors.push(format!("cluster {cluster} is claimed by a file's run list but $Bitmap marks it free"));
                                    }
                                }
                            }
                            Err(e) => report.errors.push(format!("reading $Bitmap's $DATA: {e}")),
                        }
                    }
                    None => report.errors.push("$Bitmap record has no $DATA attribute".to_string()),
                },
                Err(e) => report.errors.push(format!("reading $Bitmap record: {e}")),
            }
        } else {
            report.errors.push("$Bitmap's own MFT record is not marked in use".to_string());
        }

        // Invariant 6: $SDS dual-block redundancy and hash consistency.
        if mft.is_in_use(reserved_records::SECURE) {
            match mft.get(reserved_records::SECURE) {
                Ok(secure_record) => match Self::load_security_store(mft, &secure_record, sector_size) {
                    Ok(store) => match store.verify_dual_block_integrity() {
                        Ok(problems) => report.errors.extend(problems),
                        Err(e) => report.errors.push(format!("$Secure: {e}")),
                    },
                    Err(e) => report.errors.push(format!("$Secure: {e}")),
                },
                Err(e) => report.errors.push(format!("reading $Secure record: {e}")),
            }
        } else {
            report.errors.push("$Secure's own MFT record is not marked in use".to_string());
        }

        Ok(report)
    }

    fn load_security_store(mft: &mut MasterFileTable, secure_record: &crate::file_record::FileRecord, sector_size: usize) -> Result<SecurityStore> {
        let secure_ref = FileRecordReference::new(reserved_records::SECURE, secure_record.sequence_number);
        let sds_name = utf16("$SDS");
        let sdh_name = utf16("$SDH");
        let sii_name = utf16("$SII");

        let sds_attr = secure_record
            .find(attr_type::DATA, &sds_name)
            .ok_or_else(|| crate::error::NtfsError::corrupt("$Secure has no $SDS attribute"))?;
        let sds_bytes = read_attribute_content(mft, &sds_attr.body, secure_ref, sds_attr.id)?;

        let sdh_root_attr = secure_record
            .find(attr_type::INDEX_ROOT, &sdh_name)
            .ok_or_else(|| crate::error::NtfsError::corrupt("$Secure has no $SDH index root"))?;
        let sdh_root = match &sdh_root_attr.body {
            AttributeBody::Resident { data, .. } => data.clone(),
            AttributeBody::NonResident { .. } => return Err(crate::error::NtfsError::corrupt("$SDH index root must be resident")),
        };
        let sdh_allocation = match secure_record.find(attr_type::INDEX_ALLOCATION, &sdh_name) {
            Some(attr) => Some(read_attribute_content(mft, &attr.body, secure_ref, attr.id)?),
            None => None,
        };

        let sii_root_attr = secure_record
            .find(attr_type::INDEX_ROOT, &sii_name)
            .ok_or_else(|| crate::error::NtfsError::corrupt("$Secure has no $SII index root"))?;
        let sii_root = match &sii_root_attr.body {
            AttributeBody::Resident { data, .. } => data.clone(),
            AttributeBody::NonResident { .. } => return Err(crate::error::NtfsError::corrupt("$SII index root must be resident")),
        };
        let sii_allocation = match secure_record.find(attr_type::INDEX_ALLOCATION, &sii_name) {
            Some(attr) => Some(read_attribute_content(mft, &attr.body, secure_ref, attr.id)?),
            None => None,
        };

        SecurityStore::parse(sds_bytes, &sdh_root, sdh_allocation.as_deref(), &sii_root, sii_allocation.as_deref(), sector_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::BootSector;
    use crate::formatter::{format_volume, FormatOptions};
    use crate::volume::{RandomSource, RawVolume};

    struct FixedRandom(u64);
    impl RandomSource for FixedRandom {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }
        fn next_u64(&mut self) -> u64 {
            self.0
        }
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            buf.fill(0xCD);
        }
    }

    fn formatted_volume() -> Vec<u8> {
        let options = FormatOptions {
            total_sectors: 64 * 1024 * 1024 / 512,
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
            mft_record_size: 1024,
            index_buffer_size: 4096,
            volume_label: "TEST".to_string(),
            volume_serial_number: Some(0xDEAD_BEEF),
            now: 0,
        };
        let total_bytes = options.total_sectors * options.bytes_per_sector as u64;
        let mut volume: Vec<u8> = vec![0u8; total_bytes as usize];
        let mut random = FixedRandom(1);
        format_volume(&mut volume, &options, &mut random).unwrap();
        volume
    }

    #[test]
    fn freshly_formatted_volume_passes_every_check() {
        let mut volume = formatted_volume();
        let mut boot_bytes = [0u8; 512];
        volume.read_at(0, &mut boot_bytes).unwrap();
        let boot = BootSector::parse(&boot_bytes).unwrap();
        let mut mft = MasterFileTable::bootstrap(&mut volume, &boot).unwrap();
        let upcase = UpCaseTable::default_table();

        let report = Checker::check(&mut mft, &upcase, boot.bytes_per_sector as usize).unwrap();
        assert!(report.is_clean(), "unexpected findings: {:?}", report.errors);
    }

    #[test]
    fn a_record_marked_in_use_with_a_stale_hard_link_count_is_reported() {
        let mut volume = formatted_volume();
        let mut boot_bytes = [0u8; 512];
        volume.read_at(0, &mut boot_bytes).unwrap();
        let boot = BootSector::parse(&boot_bytes).unwrap();
        let mut mft = MasterFileTable::bootstrap(&mut volume, &boot).unwrap();

        let mut root_record = mft.get(reserved_records::ROOT).unwrap();
        root_record.hard_link_count = 9;
        mft.write(reserved_records::ROOT, &mut root_record).unwrap();

        let upcase = UpCaseTable::default_table();
        let report = Checker::check(&mut mft, &upcase, boot.bytes_per_sector as usize).unwrap();
        assert!(!report.is_clean());
        assert!(report.errors.iter().any(|e| e.contains("hard-link count")));
    }
}
