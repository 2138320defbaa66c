//! Scenario 1: format a fresh volume and confirm it mounts clean.

use ntfs_engine::attribute_record::AttributeBody;
use ntfs_engine::boot_sector::BootSector;
use ntfs_engine::checker::Checker;
use ntfs_engine::directory::Directory;
use ntfs_engine::structures::{attr_type, reserved_records};
use ntfs_engine::upcase::UpCaseTable;
use ntfs_engine::volume::{RandomSource, RawVolume};
use ntfs_engine::{detect, format_volume, FormatOptions, MasterFileTable};

struct FixedRandom(u64);
impl RandomSource for FixedRandom {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }
    fn next_u64(&mut self) -> u64 {
        self.0
    }
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        buf.fill(0x5A);
    }
}

fn format_64mib() -> Vec<u8> {
    let options = FormatOptions {
        total_sectors: 64 * 1024 * 1024 / 512,
        bytes_per_sector: 512,
        sectors_per_cluster: 8,
        mft_record_size: 1024,
        index_buffer_size: 4096,
        volume_label: "TEST".to_string(),
        volume_serial_number: Some(0x0102_0304_0506_0708),
        now: 0,
    };
    let total_bytes = options.total_sectors * options.bytes_per_sector as u64;
    let mut volume = vec![0u8; total_bytes as usize];
    let mut random = FixedRandom(9);
    format_volume(&mut volume, &options, &mut random).unwrap();
    volume
}

#[test]
fn a_freshly_formatted_64mib_volume_is_detected() {
    let mut volume = format_64mib();
    assert!(detect(&mut volume).unwrap());
}

#[test]
fn root_directory_lists_every_reserved_system_file_and_self() {
    let mut volume = format_64mib();
    let mut boot_bytes = [0u8; 512];
    volume.read_at(0, &mut boot_bytes).unwrap();
    let boot = BootSector::parse(&boot_bytes).unwrap();
    let mut mft = MasterFileTable::bootstrap(&mut volume, &boot).unwrap();
    let upcase = UpCaseTable::default_table();

    let root_record = mft.get(reserved_records::ROOT).unwrap();
    assert!(root_record.is_directory());

    let index_root = root_record.find(attr_type::INDEX_ROOT, &[]).unwrap();
    let root_data = match &index_root.body {
        AttributeBody::Resident { data, .. } => data.clone(),
        AttributeBody::NonResident { .. } => panic!("root index root should be resident"),
    };
    let index_allocation = root_record.find(attr_type::INDEX_ALLOCATION, &[]).unwrap();
    let allocation_data = match &index_allocation.body {
        AttributeBody::NonResident { run_list_bytes, start_vcn, data_length, .. } => {
            let raw = ntfs_engine::data_runs::decode(run_list_bytes).unwrap();
            let extent = ntfs_engine::ExtentKey {
                containing_record: ntfs_engine::FileRecordReference::new(reserved_records::ROOT, root_record.sequence_number),
                attribute_id: index_allocation.id,
            };
            let runs = ntfs_engine::CookedDataRuns::from_raw(&raw, *start_vcn, extent);
            let bpc = mft.bytes_per_cluster();
            let clusters = (*data_length + bpc as u64 - 1) / bpc as u64;
            let mut buf = vec![0u8; (clusters * bpc as u64) as usize];
            ntfs_engine::RawClusterStream::new(mft.volume_mut(), bpc).read(&runs, 0, clusters, &mut buf).unwrap();
            buf
        }
        AttributeBody::Resident { .. } => panic!("root index allocation should be non-resident"),
    };

    let directory = Directory::parse(&root_data, Some(&allocation_data), boot.bytes_per_sector as usize, &upcase).unwrap();
    let mut names: Vec<String> = directory.list().map(|(fnr, _)| String::from_utf16_lossy(&fnr.name)).collect();
    names.sort();
    let mut expected = vec!["$MFT", "$MFTMirr", "$LogFile", "$Volume", "$AttrDef", "$Bitmap", "$Boot", "$BadClus", "$Secure", "$UpCase", "$Extend"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn a_freshly_formatted_volume_has_no_checker_findings() {
    let mut volume = format_64mib();
    let mut boot_bytes = [0u8; 512];
    volume.read_at(0, &mut boot_bytes).unwrap();
    let boot = BootSector::parse(&boot_bytes).unwrap();
    let mut mft = MasterFileTable::bootstrap(&mut volume, &boot).unwrap();
    let upcase = UpCaseTable::default_table();

    let report = Checker::check(&mut mft, &upcase, boot.bytes_per_sector as usize).unwrap();
    assert!(report.is_clean(), "unexpected findings: {:?}", report.errors);
}
