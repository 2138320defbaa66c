//! `AttributeRecord`: the wire format for a single attribute extent inside
//! an MFT record.

use crate::error::{NtfsError, Result};
use crate::structures::attr_flags;
use byteorder::{ByteOrder, LittleEndian};

const RESIDENT_HEADER_SIZE: usize = 24;
const NON_RESIDENT_HEADER_SIZE: usize = 64;
const NON_RESIDENT_COMPRESSED_HEADER_SIZE: usize = 72;

fn round_up_8(n: usize) -> usize {
    (n + 7) & !7
}

fn utf16_bytes(name: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() * 2);
    for &c in name {
        out.extend_from_slice(&c.to_le_bytes());
    }
    out
}

fn utf16_from_bytes(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return Err(NtfsError::corrupt("attribute name has odd byte length"));
    }
    Ok(bytes.chunks_exact(2).map(|c| LittleEndian::read_u16(c)).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeBody {
    Resident {
        data: Vec<u8>,
        indexed: bool,
    },
    NonResident {
        start_vcn: u64,
        last_vcn: u64,
        /// `2^k` clusters per compression unit; 0 means uncompressed.
        compression_unit_size: u8,
        allocated_length: u64,
        data_length: u64,
        initialized_length: u64,
        compressed_data_size: Option<u64>,
        run_list_bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub type_code: u32,
    pub name: Vec<u16>,
    pub id: u16,
    pub flags: u16,
    pub body: AttributeBody,
}

impl AttributeRecord {
    pub fn is_non_resident(&self) -> bool {
        matches!(self.body, AttributeBody::NonResident { .. })
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & attr_flags::COMPRESSED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.flags & attr_flags::SPARSE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & attr_flags::ENCRYPTED != 0
    }

    pub fn name_matches(&self, other: &[u16]) -> bool {
        // NTFS compares attribute names via the volume's $UpCase table in
        // the general case; names in this engine's own use (streams, index
        // names) are ASCII-range and plain equality suffices. See
        // directory.rs for the full upcase-aware collator used for
        // filenames.
        self.name == other
    }

    /// Parse one attribute record starting at `buf[0]`. `buf` may extend
    /// past the end of this record; only `length` bytes (read from the
    /// header) are consumed. Returns `None` if `buf` starts with the `END`
    /// marker (type code `0xFFFFFFFF`), signalling the end of the
    /// attribute list.
    pub fn parse(buf: &[u8]) -> Result<Option<(AttributeRecord, usize)>> {
        if buf.len() < 4 {
            return Err(NtfsError::corrupt("attribute record header truncated"));
        }
        let type_code = LittleEndian::read_u32(&buf[0..4]);
        if type_code == crate::structures::attr_type::END {
            return Ok(None);
        }
        if buf.len() < 16 {
            return Err(NtfsError::corrupt("attribute record header truncated"));
        }
        let length = LittleEndian::read_u32(&buf[4..8]) as usize;
        if length < 16 || length > buf.len() {
            return Err(NtfsError::corrupt("attribute record length out of range"));
        }
        let non_resident = buf[8] != 0;
        let name_length = buf[9] as usize;
        let name_offset = LittleEndian::read_u16(&buf[10..12]) as usize;
        let flags = LittleEndian::read_u16(&buf[12..14]);
        let id = LittleEndian::read_u16(&buf[14..16]);

        let name = if name_length > 0 {
            let end = name_offset + name_length * 2;
            if end > length {
                return Err(NtfsError::corrupt("attribute name runs past record"));
            }
            utf16_from_bytes(&buf[name_offset..end])?
        } else {
            Vec::new()
        };

        let body = if non_resident {
            if length < NON_RESIDENT_HEADER_SIZE {
                return Err(NtfsError::corrupt("non-resident attribute header truncated"));
            }
            let start_vcn = LittleEndian::read_u64(&buf[16..24]);
            let last_vcn = LittleEndian::read_u64(&buf[24..32]);
            let mapping_pairs_offset = LittleEndian::read_u16(&buf[32..34]) as usize;
            let compression_unit_size = buf[34];
            let allocated_length = LittleEndian::read_u64(&buf[40..48]);
            let data_length = LittleEndian::read_u64(&buf[48..56]);
            let initialized_length = LittleEndian::read_u64(&buf[56..64]);
            let compressed = compression_unit_size != 0 || flags & attr_flags::SPARSE != 0;
            let compressed_data_size = if compressed {
                if length < NON_RESIDENT_COMPRESSED_HEADER_SIZE {
                    return Err(NtfsError::corrupt("compressed attribute missing compressed size field"));
                }
                Some(LittleEndian::read_u64(&buf[64..72]))
            } else {
                None
            };
            if mapping_pairs_offset > length {
                return Err(NtfsError::corrupt("mapping pairs offset past record"));
            }
            let run_list_bytes = buf[mapping_pairs_offset..length].to_vec();
            AttributeBody::NonResident {
                start_vcn,
                last_vcn,
                compression_unit_size,
                allocated_length,
                data_length,
                initialized_length,
                compressed_data_size,
                run_list_bytes,
            }
        } else {
            if length < RESIDENT_HEADER_SIZE {
                return Err(NtfsError::corrupt("resident attribute header truncated"));
            }
            let data_length = LittleEndian::read_u32(&buf[16..20]) as usize;
            let data_offset = LittleEndian::read_u16(&buf[20..22]) as usize;
            let indexed = buf[22] != 0;
            if data_offset + data_length > length {
                return Err(NtfsError::corrupt("resident attribute data runs past record"));
            }
            let data = buf[data_offset..data_offset + data_length].to_vec();
            AttributeBody::Resident { data, indexed }
        };

        Ok(Some((
            AttributeRecord {
                type_code,
                name,
                id,
                flags,
                body,
            },
            length,
        )))
    }

    /// Serialize to the on-disk form, header size rounded up to 8 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let name_bytes = utf16_bytes(&self.name);
        match &self.body {
            AttributeBody::Resident { data, indexed } => {
                let header_len = RESIDENT_HEADER_SIZE + name_bytes.len();
                let data_offset = round_up_8(header_len);
                let total_len = round_up_8(data_offset + data.len());
                let mut buf = vec![0u8; total_len];
                LittleEndian::write_u32(&mut buf[0..4], self.type_code);
                LittleEndian::write_u32(&mut buf[4..8], total_len as u32);
                buf[8] = 0;
                buf[9] = self.name.len() as u8;
                LittleEndian::write_u16(&mut buf[10..12], RESIDENT_HEADER_SIZE as u16);
                LittleEndian::write_u16(&mut buf[12..14], self.flags);
                LittleEndian::write_u16(&mut buf[14..16], self.id);
                LittleEndian::write_u32(&mut buf[16..20], data.len() as u32);
                LittleEndian::write_u16(&mut buf[20..22], data_offset as u16);
                buf[22] = *indexed as u8;
                buf[23] = 0;
                if !name_bytes.is_empty() {
                    buf[RESIDENT_HEADER_SIZE..RESIDENT_HEADER_SIZE + name_bytes.len()]
                        .copy_from_slice(&name_bytes);
                }
                buf[data_offset..data_offset + data.len()].copy_from_slice(data);
                buf
            }
            AttributeBody::NonResident {
                start_vcn,
                last_vcn,
                compression_unit_size,
                allocated_length,
                data_length,
                initialized_length,
                compressed_data_size,
                run_list_bytes,
            } => {
                let fixed_header_size = if compressed_data_size.is_some() {
                    NON_RESIDENT_COMPRESSED_HEADER_SIZE
                } else {
                    NON_RESIDENT_HEADER_SIZE
                };
                let header_len = fixed_header_size + name_bytes.len();
                let mapping_pairs_offset = round_up_8(header_len);
                let total_len = round_up_8(mapping_pairs_offset + run_list_bytes.len());
                let mut buf = vec![0u8; total_len];
                LittleEndian::write_u32(&mut buf[0..4], self.type_code);
                LittleEndian::write_u32(&mut buf[4..8], total_len as u32);
                buf[8] = 1;
                buf[9] = self.name.len() as u8;
                LittleEndian::write_u16(&mut buf[10..12], fixed_header_size as u16);
                LittleEndian::write_u16(&mut buf[12..14], self.flags);
                LittleEndian::write_u16(&mut buf[14..16], self.id);
                LittleEndian::write_u64(&mut buf[16..24], *start_vcn);
                LittleEndian::write_u64(&mut buf[24..32], *last_vcn);
                LittleEndian::write_u16(&mut buf[32..34], mapping_pairs_offset as u16);
                buf[34] = *compression_unit_size;
                LittleEndian::write_u64(&mut buf[40..48], *allocated_length);
                LittleEndian::write_u64(&mut buf[48..56], *data_length);
                LittleEndian::write_u64(&mut buf[56..64], *initialized_length);
                if let Some(compressed_size) = compressed_data_size {
                    LittleEndian::write_u64(&mut buf[64..72], *compressed_size);
                }
                if !name_bytes.is_empty() {
                    buf[fixed_header_size..fixed_header_size + name_bytes.len()]
                        .copy_from_slice(&name_bytes);
                }
                buf[mapping_pairs_offset..mapping_pairs_offset + run_list_bytes.len()]
                    .copy_from_slice(run_list_bytes);
                buf
            }
        }
    }
}

/// Comparator for the `(type_code ASC, name ASC, start_vcn ASC)` ordering
/// attribute records within a FileRecord must follow. Name
/// comparison here is plain UTF-16 code unit order: attribute names in
/// practice are ASCII (`$I30`, stream names) so this coincides with the
/// NTFS upcase collation used for real filenames.
pub fn sort_key(record: &AttributeRecord) -> (u32, Vec<u16>, u64) {
    let start_vcn = match &record.body {
        AttributeBody::Resident { .. } => 0,
        AttributeBody::NonResident { start_vcn, .. } => *start_vcn,
    };
    (record.type_code, record.name.clone(), start_vcn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resident_roundtrip() {
        let rec = AttributeRecord {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            id: 3,
            flags: 0,
            body: AttributeBody::Resident {
                data: vec![0x68, 0x69],
                indexed: false,
            },
        };
        let bytes = rec.to_bytes();
        let (parsed, len) = AttributeRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed, rec);
    }

    #[test]
    fn non_resident_roundtrip_with_name() {
        let rec = AttributeRecord {
            type_code: crate::structures::attr_type::DATA,
            name: "stream".encode_utf16().collect(),
            id: 5,
            flags: attr_flags::SPARSE,
            body: AttributeBody::NonResident {
                start_vcn: 0,
                last_vcn: 9,
                compression_unit_size: 0,
                allocated_length: 40960,
                data_length: 40000,
                initialized_length: 40000,
                compressed_data_size: Some(40000),
                run_list_bytes: vec![0x21, 0x0A, 0x64, 0x00, 0x00],
            },
        };
        let bytes = rec.to_bytes();
        let (parsed, len) = AttributeRecord::parse(&bytes).unwrap().unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed, rec);
    }

    #[test]
    fn end_marker_parses_to_none() {
        let mut buf = vec![0u8; 16];
        LittleEndian::write_u32(&mut buf[0..4], crate::structures::attr_type::END);
        assert!(AttributeRecord::parse(&buf).unwrap().is_none());
    }

    #[test]
    fn records_sort_by_type_then_name_then_vcn() {
        let a = AttributeRecord {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            id: 0,
            flags: 0,
            body: AttributeBody::NonResident {
                start_vcn: 0,
                last_vcn: 9,
                compression_unit_size: 0,
                allocated_length: 0,
                data_length: 0,
                initialized_length: 0,
                compressed_data_size: None,
                run_list_bytes: vec![0],
            },
        };
        let mut b = a.clone();
        if let AttributeBody::NonResident { start_vcn, .. } = &mut b.body {
            *start_vcn = 10;
        }
        let mut records = vec![b.clone(), a.clone()];
        records.sort_by_key(sort_key);
        assert_eq!(records[0], a);
        assert_eq!(records[1], b);
    }
}
