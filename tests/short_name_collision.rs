//! Scenario 4: three colliding long names get distinct 8.3 short names.

use ntfs_engine::directory::Directory;
use ntfs_engine::upcase::UpCaseTable;
use ntfs_engine::{FileNameRecord, FileRecordReference, Namespace};

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn dos_alias(parent: FileRecordReference, short_name: &str) -> FileNameRecord {
    FileNameRecord {
        parent,
        creation_time: 0,
        modification_time: 0,
        mft_modification_time: 0,
        access_time: 0,
        allocated_size: 0,
        real_size: 0,
        file_attributes: 0,
        ea_size_or_reparse_tag: 0,
        namespace: Namespace::Dos,
        name: utf16(short_name),
    }
}

#[test]
fn hello_world_variants_get_helloworld_aliases_in_creation_order() {
    let upcase = UpCaseTable::default_table();
    let mut dir = Directory::new_empty(4096, &upcase);
    let parent = FileRecordReference::new(5, 1);

    let long_names = ["Hello World.txt", "hello world.txt", "Hello World (2).txt"];
    let expected_short_names = ["HELLOW~1.TXT", "HELLOW~2.TXT", "HELLOW~3.TXT"];

    for (index, long_name) in long_names.iter().enumerate() {
        let short_name = dir.create_short_name(&utf16(long_name));
        assert_eq!(short_name, expected_short_names[index], "collision order for {long_name}");

        let child = FileRecordReference::new(16 + index as u64, 1);
        dir.add_entry(dos_alias(parent, &short_name), child).unwrap();
    }

    let mut short_names: Vec<String> = dir.list().map(|(fnr, _)| String::from_utf16_lossy(&fnr.name)).collect();
    short_names.sort();
    let mut expected: Vec<String> = expected_short_names.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(short_names, expected);
}
