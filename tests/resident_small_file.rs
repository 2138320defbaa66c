//! Scenario 2: a small write stays resident and round-trips exactly.

use ntfs_engine::attribute_record::AttributeBody;
use ntfs_engine::bitmap::ClusterBitmap;
use ntfs_engine::boot_sector::BootSector;
use ntfs_engine::directory::Directory;
use ntfs_engine::file::create_file;
use ntfs_engine::structures::{attr_type, reserved_records};
use ntfs_engine::upcase::UpCaseTable;
use ntfs_engine::volume::{RandomSource, RawVolume};
use ntfs_engine::{format_volume, FileRecordReference, FormatOptions, MasterFileTable, Namespace};

struct FixedRandom(u64);
impl RandomSource for FixedRandom {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }
    fn next_u64(&mut self) -> u64 {
        self.0
    }
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        buf.fill(0x11);
    }
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

#[test]
fn hello_txt_stays_resident_with_exact_bytes() {
    let options = FormatOptions {
        total_sectors: 64 * 1024 * 1024 / 512,
        bytes_per_sector: 512,
        sectors_per_cluster: 8,
        mft_record_size: 1024,
        index_buffer_size: 4096,
        volume_label: "TEST".to_string(),
        volume_serial_number: Some(1),
        now: 0,
    };
    let total_bytes = options.total_sectors * options.bytes_per_sector as u64;
    let mut volume = vec![0u8; total_bytes as usize];
    let mut random = FixedRandom(3);
    format_volume(&mut volume, &options, &mut random).unwrap();

    let mut boot_bytes = [0u8; 512];
    volume.read_at(0, &mut boot_bytes).unwrap();
    let boot = BootSector::parse(&boot_bytes).unwrap();
    let mut mft = MasterFileTable::bootstrap(&mut volume, &boot).unwrap();
    let upcase = UpCaseTable::default_table();
    let root_ref = FileRecordReference::new(reserved_records::ROOT, mft.get(reserved_records::ROOT).unwrap().sequence_number);

    let root_record = mft.get(reserved_records::ROOT).unwrap();
    let (root_data, allocation_data) = match (&root_record.find(attr_type::INDEX_ROOT, &[]).unwrap().body, &root_record.find(attr_type::INDEX_ALLOCATION, &[]).unwrap().body) {
        (AttributeBody::Resident { data, .. }, AttributeBody::NonResident { run_list_bytes, start_vcn, data_length, .. }) => {
            let raw = ntfs_engine::data_runs::decode(run_list_bytes).unwrap();
            let extent = ntfs_engine::ExtentKey { containing_record: root_ref, attribute_id: root_record.find(attr_type::INDEX_ALLOCATION, &[]).unwrap().id };
            let runs = ntfs_engine::CookedDataRuns::from_raw(&raw, *start_vcn, extent);
            let bpc = mft.bytes_per_cluster();
            let clusters = (*data_length + bpc as u64 - 1) / bpc as u64;
            let mut buf = vec![0u8; (clusters * bpc as u64) as usize];
            ntfs_engine::RawClusterStream::new(mft.volume_mut(), bpc).read(&runs, 0, clusters, &mut buf).unwrap();
            (data.clone(), buf)
        }
        _ => panic!("unexpected root index residency"),
    };
    let mut root_dir = Directory::parse(&root_data, Some(&allocation_data), boot.bytes_per_sector as usize, &upcase).unwrap();

    let mut volume_bitmap = ClusterBitmap::new_empty(mft.volume_mut().len() / mft.bytes_per_cluster() as u64);
    let free_before = volume_bitmap.free_clusters();

    let mut file = create_file(
        &mut mft,
        &mut volume_bitmap,
        &mut root_dir,
        root_ref,
        &utf16("hello.txt"),
        Namespace::Win32,
        0,
        false,
        &upcase,
        options.index_buffer_size,
        options.bytes_per_sector as usize,
        0,
        options.mft_record_size as usize,
    )
    .unwrap();

    file.write_stream(&mut mft, &mut volume_bitmap, None, &[], 0, b"hi").unwrap();
    file.save(&mut mft, &mut volume_bitmap, options.mft_record_size as usize).unwrap();

    let data_attr = file.set.base.find(attr_type::DATA, &[]).unwrap();
    match &data_attr.body {
        AttributeBody::Resident { data, .. } => assert_eq!(data.as_slice(), b"hi"),
        AttributeBody::NonResident { .. } => panic!("a 2-byte write must stay resident"),
    }
    assert_eq!(file.stream_len(&[]), 2);

    // a 2-byte file needs no extra cluster allocation beyond the new MFT
    // record's own bookkeeping, which this engine tracks in $Bitmap
    // separately from `volume_bitmap`'s cluster-level view.
    assert_eq!(volume_bitmap.free_clusters(), free_before);

    let mut out = [0u8; 2];
    file.read_stream(&mut mft, None, &[], 0, &mut out).unwrap();
    assert_eq!(&out, b"hi");
}
