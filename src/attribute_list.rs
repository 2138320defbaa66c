//! `$ATTRIBUTE_LIST` content: maps `(type, name, start_vcn)` to the
//! `(base_record, attribute_id)` extent that actually holds the data, for
//! attributes that have spilled into extension records.

use crate::error::{NtfsError, Result};
use crate::structures::FileRecordReference;
use byteorder::{ByteOrder, LittleEndian};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub name: Vec<u16>,
    pub start_vcn: u64,
    pub base_record: FileRecordReference,
    pub attribute_id: u16,
}

impl AttributeListEntry {
    fn encoded_len(&self) -> usize {
        let base = 26 + self.name.len() * 2;
        (base + 7) & !7
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        let len = self.encoded_len();
        out.resize(start + len, 0);
        let buf = &mut out[start..start + len];
        LittleEndian::write_u32(&mut buf[0..4], self.type_code);
        LittleEndian::write_u16(&mut buf[4..6], len as u16);
        buf[6] = self.name.len() as u8;
        buf[7] = if self.name.is_empty() { 0 } else { 26 };
        LittleEndian::write_u64(&mut buf[8..16], self.start_vcn);
        buf[16..24].copy_from_slice(&self.base_record.to_le_bytes());
        LittleEndian::write_u16(&mut buf[24..26], self.attribute_id);
        for (i, &c) in self.name.iter().enumerate() {
            LittleEndian::write_u16(&mut buf[26 + i * 2..26 + i * 2 + 2], c);
        }
    }

    fn read_from(buf: &[u8]) -> Result<(AttributeListEntry, usize)> {
        if buf.len() < 26 {
            return Err(NtfsError::corrupt("attribute list entry truncated"));
        }
        let type_code = LittleEndian::read_u32(&buf[0..4]);
        let record_length = LittleEndian::read_u16(&buf[4..6]) as usize;
        if record_length < 26 || record_length > buf.len() {
            return Err(NtfsError::corrupt("attribute list entry length out of range"));
        }
        let name_length = buf[6] as usize;
        let name_offset = buf[7] as usize;
        let start_vcn = LittleEndian::read_u64(&buf[8..16]);
        let mut base_bytes = [0u8; 8];
        base_bytes.copy_from_slice(&buf[16..24]);
        let base_record = FileRecordReference::from_le_bytes(base_bytes);
        let attribute_id = LittleEndian::read_u16(&buf[24..26]);
        let name = if name_length > 0 {
            let end = name_offset + name_length * 2;
            if end > record_length {
                return Err(NtfsError::corrupt("attribute list entry name runs past record"));
            }
            buf[name_offset..end]
                .chunks_exact(2)
                .map(LittleEndian::read_u16)
                .collect()
        } else {
            Vec::new()
        };
        Ok((
            AttributeListEntry {
                type_code,
                name,
                start_vcn,
                base_record,
                attribute_id,
            },
            record_length,
        ))
    }
}

/// The fully decoded content of an `$ATTRIBUTE_LIST` attribute.
#[derive(Debug, Clone, Default)]
pub struct AttributeList {
    entries: Vec<AttributeListEntry>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn entries(&self) -> &[AttributeListEntry] {
        &self.entries
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (entry, len) = AttributeListEntry::read_from(&data[pos..])?;
            entries.push(entry);
            pos += len;
        }
        Ok(AttributeList { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| {
            (a.type_code, &a.name, a.start_vcn).cmp(&(b.type_code, &b.name, b.start_vcn))
        });
        let mut out = Vec::new();
        for entry in &sorted {
            entry.write_to(&mut out);
        }
        out
    }

    pub fn insert(&mut self, entry: AttributeListEntry) {
        self.entries.retain(|e| {
            !(e.type_code == entry.type_code && e.name == entry.name && e.start_vcn == entry.start_vcn)
        });
        self.entries.push(entry);
    }

    pub fn remove(&mut self, type_code: u32, name: &[u16], start_vcn: u64) {
        self.entries
            .retain(|e| !(e.type_code == type_code && e.name == name && e.start_vcn == start_vcn));
    }

    /// Find the extent that holds `(type_code, name)` at `vcn`: the entry
    /// with the greatest `start_vcn <= vcn` among matching type/name.
    pub fn lookup(&self, type_code: u32, name: &[u16], vcn: u64) -> Option<&AttributeListEntry> {
        self.entries
            .iter()
            .filter(|e| e.type_code == type_code && e.name == name && e.start_vcn <= vcn)
            .max_by_key(|e| e.start_vcn)
    }

    /// All extents recorded for `(type_code, name)`, in VCN order.
    pub fn extents_for(&self, type_code: u32, name: &[u16]) -> Vec<&AttributeListEntry> {
        let mut found: Vec<&AttributeListEntry> = self
            .entries
            .iter()
            .filter(|e| e.type_code == type_code && e.name == name)
            .collect();
        found.sort_by_key(|e| e.start_vcn);
        found
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(idx: u64) -> FileRecordReference {
        FileRecordReference::new(idx, 1)
    }

    #[test]
    fn entry_roundtrip_with_name() {
        let entry = AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: "stream".encode_utf16().collect(),
            start_vcn: 0,
            base_record: base(30),
            attribute_id: 4,
        };
        let mut bytes = Vec::new();
        entry.write_to(&mut bytes);
        let (parsed, len) = AttributeListEntry::read_from(&bytes).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed, entry);
    }

    #[test]
    fn list_roundtrip_preserves_entries() {
        let mut list = AttributeList::new();
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 0,
            base_record: base(20),
            attribute_id: 0,
        });
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 100,
            base_record: base(40),
            attribute_id: 0,
        });
        let bytes = list.to_bytes();
        let reparsed = AttributeList::parse(&bytes).unwrap();
        assert_eq!(reparsed.entries().len(), 2);
    }

    #[test]
    fn lookup_picks_extent_covering_vcn() {
        let mut list = AttributeList::new();
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 0,
            base_record: base(20),
            attribute_id: 0,
        });
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 100,
            base_record: base(40),
            attribute_id: 0,
        });
        let found = list.lookup(crate::structures::attr_type::DATA, &[], 150).unwrap();
        assert_eq!(found.base_record, base(40));
        let found = list.lookup(crate::structures::attr_type::DATA, &[], 50).unwrap();
        assert_eq!(found.base_record, base(20));
    }

    #[test]
    fn insert_replaces_existing_entry_for_same_key() {
        let mut list = AttributeList::new();
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 0,
            base_record: base(20),
            attribute_id: 0,
        });
        list.insert(AttributeListEntry {
            type_code: crate::structures::attr_type::DATA,
            name: Vec::new(),
            start_vcn: 0,
            base_record: base(99),
            attribute_id: 0,
        });
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].base_record, base(99));
    }
}
