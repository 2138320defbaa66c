//! `FileRecord`: one fixup-framed MFT entry — header plus a sorted run of
//! `AttributeRecord`s.

use crate::attribute_record::{sort_key, AttributeRecord};
use crate::error::{NtfsError, Result};
use crate::fixup::FixupRecord;
use crate::structures::{record_flags, FileRecordReference};
use byteorder::{ByteOrder, LittleEndian};

const MAGIC: &[u8; 4] = b"FILE";
const HEADER_SIZE: usize = 42;

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub flags: u16,
    /// `FileRecordReference::NULL` when this record is a base record.
    pub base_file_record: FileRecordReference,
    pub next_attribute_id: u16,
    pub mft_record_number: u32,
    pub attributes: Vec<AttributeRecord>,
    fixup: FixupRecord,
}

impl FileRecord {
    pub fn new_empty(mft_record_number: u32, sequence_number: u16) -> Self {
        FileRecord {
            sequence_number,
            hard_link_count: 0,
            flags: record_flags::IN_USE,
            base_file_record: FileRecordReference::NULL,
            next_attribute_id: 0,
            mft_record_number,
            attributes: Vec::new(),
            fixup: FixupRecord::new(),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & record_flags::IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & record_flags::IS_DIRECTORY != 0
    }

    pub fn is_extension_record(&self) -> bool {
        self.flags & record_flags::IS_EXTENSION != 0
    }

    pub fn is_base_record(&self) -> bool {
        self.base_file_record == FileRecordReference::NULL
    }

    /// Allocate the next free attribute id and bump the counter.
    pub fn allocate_attribute_id(&mut self) -> u16 {
        let id = self.next_attribute_id;
        self.next_attribute_id = self.next_attribute_id.wrapping_add(1);
        id
    }

    pub fn find(&self, type_code: u32, name: &[u16]) -> Option<&AttributeRecord> {
        self.attributes.iter().find(|a| a.type_code == type_code && a.name_matches(name))
    }

    pub fn find_mut(&mut self, type_code: u32, name: &[u16]) -> Option<&mut AttributeRecord> {
        self.attributes.iter_mut().find(|a| a.type_code == type_code && a.name_matches(name))
    }

    pub fn find_by_id(&self, id: u16) -> Option<&AttributeRecord> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn all_of_type(&self, type_code: u32) -> impl Iterator<Item = &AttributeRecord> {
        self.attributes.iter().filter(move |a| a.type_code == type_code)
    }

    /// Insert an attribute, assigning it the next id, then re-sort the
    /// attribute list by `(type_code, name, start_vcn)`.
    pub fn insert(&mut self, mut attr: AttributeRecord) -> u16 {
        let id = self.allocate_attribute_id();
        attr.id = id;
        self.attributes.push(attr);
        self.attributes.sort_by_key(sort_key);
        id
    }

    pub fn remove_by_id(&mut self, id: u16) -> Option<AttributeRecord> {
        let idx = self.attributes.iter().position(|a| a.id == id)?;
        Some(self.attributes.remove(idx))
    }

    /// Bytes currently occupied by header + attributes + END marker, before
    /// padding to the record's allocated size.
    pub fn used_size(&self) -> usize {
        let attrs: usize = self.attributes.iter().map(|a| a.to_bytes().len()).sum();
        let header_and_usa = HEADER_SIZE + self.usa_len();
        // Header is itself rounded up to 8 bytes before attributes start.
        (header_and_usa + 7 & !7) + attrs + 8 // END marker + padding to 8
    }

    fn sector_count(allocated_size: usize, sector_size: usize) -> usize {
        (allocated_size + sector_size - 1) / sector_size
    }

    fn usa_len(&self) -> usize {
        // Populated lazily from the allocated size at serialize time; kept
        // here only as a documented placeholder so `used_size` has a
        // reasonable (slightly conservative) estimate before that.
        2 * 2
    }

    pub fn parse(buf: &mut [u8], sector_size: usize, ignore_magic: bool) -> Result<Self> {
        let fixup = FixupRecord::load(buf, MAGIC, sector_size, ignore_magic)?;

        let sequence_number = LittleEndian::read_u16(&buf[16..18]);
        let hard_link_count = LittleEndian::read_u16(&buf[18..20]);
        let first_attribute_offset = LittleEndian::read_u16(&buf[20..22]) as usize;
        let flags = LittleEndian::read_u16(&buf[22..24]);
        let real_size = LittleEndian::read_u32(&buf[24..28]) as usize;
        let mut base_bytes = [0u8; 8];
        base_bytes.copy_from_slice(&buf[32..40]);
        let base_file_record = FileRecordReference::from_le_bytes(base_bytes);
        let next_attribute_id = LittleEndian::read_u16(&buf[40..42]);
        let mft_record_number = if buf.len() >= 48 { LittleEndian::read_u32(&buf[44..48]) } else { 0 };

        if real_size > buf.len() {
            return Err(NtfsError::corrupt("FileRecord real_size exceeds buffer"));
        }

        let mut attributes = Vec::new();
        let mut pos = first_attribute_offset;
        while pos < real_size {
            match AttributeRecord::parse(&buf[pos..])? {
                None => break,
                Some((attr, len)) => {
                    pos += len;
                    attributes.push(attr);
                }
            }
        }

        Ok(FileRecord {
            sequence_number,
            hard_link_count,
            flags,
            base_file_record,
            next_attribute_id,
            mft_record_number,
            attributes,
            fixup,
        })
    }

    /// Serialize, apply fixups, and pad to `allocated_size`.
    pub fn to_bytes(&mut self, allocated_size: usize, sector_size: usize) -> Result<Vec<u8>> {
        let sectors = Self::sector_count(allocated_size, sector_size);
        let usa_count = sectors + 1;
        let usa_offset = HEADER_SIZE;
        let header_len = (usa_offset + usa_count * 2 + 7) & !7;

        let mut attr_bytes = Vec::new();
        for attr in &self.attributes {
            attr_bytes.extend_from_slice(&attr.to_bytes());
        }

        let real_size_unpadded = header_len + attr_bytes.len() + 8;
        let real_size = (real_size_unpadded + 7) & !7;
        if real_size > allocated_size {
            return Err(NtfsError::invalid(format!(
                "FileRecord {} exceeds its allocated size ({real_size} > {allocated_size})",
                self.mft_record_number
            )));
        }

        let mut buf = vec![0u8; allocated_size];
        buf[0..4].copy_from_slice(MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], usa_offset as u16);
        LittleEndian::write_u16(&mut buf[6..8], usa_count as u16);
        // bytes 8..16: $LogFile sequence number, left zero (no $LogFile replay).
        LittleEndian::write_u16(&mut buf[16..18], self.sequence_number);
        LittleEndian::write_u16(&mut buf[18..20], self.hard_link_count);
        LittleEndian::write_u16(&mut buf[20..22], header_len as u16);
        LittleEndian::write_u16(&mut buf[22..24], self.flags);
        LittleEndian::write_u32(&mut buf[24..28], real_size as u32);
        LittleEndian::write_u32(&mut buf[28..32], allocated_size as u32);
        buf[32..40].copy_from_slice(&self.base_file_record.to_le_bytes());
        LittleEndian::write_u16(&mut buf[40..42], self.next_attribute_id);
        if buf.len() >= 48 {
            LittleEndian::write_u32(&mut buf[44..48], self.mft_record_number);
        }

        buf[header_len..header_len + attr_bytes.len()].copy_from_slice(&attr_bytes);
        let end_marker_offset = header_len + attr_bytes.len();
        LittleEndian::write_u32(&mut buf[end_marker_offset..end_marker_offset + 4], crate::structures::attr_type::END);

        self.fixup.store(&mut buf, sector_size)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_record::AttributeBody;
    use crate::structures::attr_type;

    #[test]
    fn empty_record_roundtrips() {
        let mut rec = FileRecord::new_empty(24, 1);
        let bytes = rec.to_bytes(1024, 512).unwrap();
        let mut bytes2 = bytes.clone();
        let parsed = FileRecord::parse(&mut bytes2, 512, false).unwrap();
        assert_eq!(parsed.sequence_number, 1);
        assert!(parsed.is_in_use());
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn record_with_resident_attribute_roundtrips() {
        let mut rec = FileRecord::new_empty(30, 2);
        rec.insert(AttributeRecord {
            type_code: attr_type::STANDARD_INFORMATION,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident {
                data: vec![0u8; 48],
                indexed: false,
            },
        });
        rec.insert(AttributeRecord {
            type_code: attr_type::FILE_NAME,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident {
                data: vec![1u8; 70],
                indexed: true,
            },
        });

        let bytes = rec.to_bytes(1024, 512).unwrap();
        let mut bytes2 = bytes.clone();
        let parsed = FileRecord::parse(&mut bytes2, 512, false).unwrap();
        assert_eq!(parsed.attributes.len(), 2);
        assert_eq!(parsed.attributes[0].type_code, attr_type::STANDARD_INFORMATION);
        assert_eq!(parsed.attributes[1].type_code, attr_type::FILE_NAME);
    }

    #[test]
    fn oversized_attributes_are_rejected_at_serialize_time() {
        let mut rec = FileRecord::new_empty(30, 1);
        rec.insert(AttributeRecord {
            type_code: attr_type::DATA,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident {
                data: vec![0u8; 2000],
                indexed: false,
            },
        });
        assert!(rec.to_bytes(1024, 512).is_err());
    }

    #[test]
    fn insert_keeps_attributes_sorted_by_type_then_name() {
        let mut rec = FileRecord::new_empty(30, 1);
        rec.insert(AttributeRecord {
            type_code: attr_type::DATA,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident { data: vec![], indexed: false },
        });
        rec.insert(AttributeRecord {
            type_code: attr_type::STANDARD_INFORMATION,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::Resident { data: vec![], indexed: false },
        });
        assert_eq!(rec.attributes[0].type_code, attr_type::STANDARD_INFORMATION);
        assert_eq!(rec.attributes[1].type_code, attr_type::DATA);
    }
}
