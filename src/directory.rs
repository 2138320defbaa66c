//! `Directory`: the `$I30` index view keyed by `FileNameRecord`, compared
//! in NTFS-uppercase order of the UTF-16 name.
//!
//! Attribute-level orchestration (creating the `FileName` attribute on the
//! target record, bumping its hard-link count) lives above this, in the
//! file layer: `Directory` only owns the index's key/value pairs and the
//! 8.3 short-name and alias bookkeeping that are pure functions of those
//! pairs.

use crate::error::{NtfsError, Result};
use crate::index::{Collator, Index, RawEntry};
use crate::structures::{FileRecordReference, Namespace};
use crate::upcase::UpCaseTable;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

/// Fixed portion of an on-disk `$FILE_NAME` attribute, ahead of the name
/// itself: parent ref (8) + 4 FILETIMEs (32) + allocated
/// size (8) + real size (8) + file attributes (4) + ea-size-or-reparse-tag
/// (4) + name length in UTF-16 units (1) + namespace (1).
const FIXED_HEADER_LEN: usize = 8 + 32 + 8 + 8 + 4 + 4 + 1 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameRecord {
    pub parent: FileRecordReference,
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub file_attributes: u32,
    pub ea_size_or_reparse_tag: u32,
    pub namespace: Namespace,
    pub name: Vec<u16>,
}

impl FileNameRecord {
    pub fn is_hidden_dos_alias(&self) -> bool {
        matches!(self.namespace, Namespace::Dos)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FIXED_HEADER_LEN + self.name.len() * 2];
        buf[0..8].copy_from_slice(&self.parent.to_le_bytes());
        LittleEndian::write_u64(&mut buf[8..16], self.creation_time);
        LittleEndian::write_u64(&mut buf[16..24], self.modification_time);
        LittleEndian::write_u64(&mut buf[24..32], self.mft_modification_time);
        LittleEndian::write_u64(&mut buf[32..40], self.access_time);
        LittleEndian::write_u64(&mut buf[40..48], self.allocated_size);
        LittleEndian::write_u64(&mut buf[48..56], self.real_size);
        LittleEndian::write_u32(&mut buf[56..60], self.file_attributes);
        LittleEndian::write_u32(&mut buf[60..64], self.ea_size_or_reparse_tag);
        buf[64] = self.name.len() as u8;
        buf[65] = self.namespace as u8;
        for (i, &unit) in self.name.iter().enumerate() {
            LittleEndian::write_u16(&mut buf[FIXED_HEADER_LEN + i * 2..FIXED_HEADER_LEN + i * 2 + 2], unit);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(NtfsError::corrupt("FileNameRecord key shorter than fixed header"));
        }
        let mut parent_bytes = [0u8; 8];
        parent_bytes.copy_from_slice(&buf[0..8]);
        let name_len = buf[64] as usize;
        let namespace = Namespace::from_u8(buf[65])?;
        let name_end = FIXED_HEADER_LEN + name_len * 2;
        if name_end > buf.len() {
            return Err(NtfsError::corrupt("FileNameRecord name runs past key"));
        }
        let mut name = vec![0u16; name_len];
        for (i, unit) in name.iter_mut().enumerate() {
            *unit = LittleEndian::read_u16(&buf[FIXED_HEADER_LEN + i * 2..FIXED_HEADER_LEN + i * 2 + 2]);
        }
        Ok(FileNameRecord {
            parent: FileRecordReference::from_le_bytes(parent_bytes),
            creation_time: LittleEndian::read_u64(&buf[8..16]),
            modification_time: LittleEndian::read_u64(&buf[16..24]),
            mft_modification_time: LittleEndian::read_u64(&buf[24..32]),
            access_time: LittleEndian::read_u64(&buf[32..40]),
            allocated_size: LittleEndian::read_u64(&buf[40..48]),
            real_size: LittleEndian::read_u64(&buf[48..56]),
            file_attributes: LittleEndian::read_u32(&buf[56..60]),
            ea_size_or_reparse_tag: LittleEndian::read_u32(&buf[60..64]),
            namespace,
            name,
        })
    }

    fn name_bytes(buf: &[u8]) -> &[u8] {
        &buf[FIXED_HEADER_LEN.min(buf.len())..]
    }
}

/// Compares two encoded `FileNameRecord` keys by their name field alone,
/// folded through `$UpCase`.
pub struct FileNameCollator<'a> {
    pub upcase: &'a UpCaseTable,
}

impl<'a> Collator for FileNameCollator<'a> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let name_a = bytes_to_u16(FileNameRecord::name_bytes(a));
        let name_b = bytes_to_u16(FileNameRecord::name_bytes(b));
        self.upcase.compare(&name_a, &name_b)
    }
}

fn bytes_to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|c| LittleEndian::read_u16(c)).collect()
}

fn probe_key(name: &[u16]) -> Vec<u8> {
    let mut key = vec![0u8; FIXED_HEADER_LEN];
    key.extend(name.iter().flat_map(|u| u.to_le_bytes()));
    key
}

/// `name_length` is stored as a single byte, and the validity rule bounds
/// it further than that byte's own range.
pub fn validate_name(name: &[u16]) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(NtfsError::invalid("file name must be 1..=255 UTF-16 code units"));
    }
    if name.contains(&0) || name.contains(&('/' as u16)) {
        return Err(NtfsError::invalid("file name contains a forbidden character"));
    }
    Ok(())
}

pub struct Directory<'u> {
    index: Index,
    upcase: &'u UpCaseTable,
}

impl<'u> Directory<'u> {
    pub fn new_empty(index_block_size: u32, upcase: &'u UpCaseTable) -> Self {
        Directory {
            index: Index::new_empty(crate::structures::attr_type::FILE_NAME, 1, index_block_size),
            upcase,
        }
    }

    pub fn parse(root_data: &[u8], allocation_data: Option<&[u8]>, sector_size: usize, upcase: &'u UpCaseTable) -> Result<Self> {
        Ok(Directory {
            index: Index::parse(root_data, allocation_data, sector_size)?,
            upcase,
        })
    }

    pub fn to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.index.to_attributes(sector_size)
    }

    pub fn shrink_root(&mut self) -> bool {
        self.index.shrink_root()
    }

    fn collator(&self) -> FileNameCollator<'_> {
        FileNameCollator { upcase: self.upcase }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, name: &[u16]) -> Option<(FileNameRecord, FileRecordReference)> {
        let probe = probe_key(name);
        let entry = self.index.lookup(&probe, &self.collator())?;
        decode_entry(entry).ok()
    }

    /// Insert a new `(name, child)` index entry. Does not touch the
    /// target record's attribute list or hard-link count; the file layer
    /// does that before or after calling this.
    pub fn add_entry(&mut self, name: FileNameRecord, child: FileRecordReference) -> Result<()> {
        validate_name(&name.name)?;
        let entry = RawEntry {
            key: name.encode(),
            data: child.to_le_bytes().to_vec(),
        };
        self.index.insert(entry, &self.collator())
    }

    pub fn remove_entry(&mut self, name: &[u16]) -> Result<(FileNameRecord, FileRecordReference)> {
        let probe = probe_key(name);
        let removed = self.index.remove(&probe, &self.collator())?;
        decode_entry(&removed)
    }

    pub fn list(&self) -> impl Iterator<Item = (FileNameRecord, FileRecordReference)> + '_ {
        self.index.range_scan().filter_map(|e| decode_entry(e).ok())
    }

    /// All entries whose child reference is `target` — a Win32 entry and
    /// its Dos alias share one, and removing either must remove both
    ///.
    pub fn find_aliases_for(&self, target: FileRecordReference) -> Vec<(FileNameRecord, FileRecordReference)> {
        self.list().filter(|(_, r)| *r == target).collect()
    }

    /// Generate a unique `BASE~N.EXT` 8.3 short name for `long_name`,
    /// trying `N = 1, 2, 3, ...` until no existing Dos/Win32AndDos entry
    /// collides.
    pub fn create_short_name(&self, long_name: &[u16]) -> String {
        let long_name = String::from_utf16_lossy(long_name);
        let (base, ext) = match long_name.rsplit_once('.') {
            Some((b, e)) if !b.is_empty() => (b, e),
            _ => (long_name.as_str(), ""),
        };
        let sanitized_base = sanitize_83(base);
        let sanitized_ext: String = sanitize_83(ext).chars().take(3).collect();

        let existing: std::collections::HashSet<String> = self
            .list()
            .filter(|(fnr, _)| matches!(fnr.namespace, Namespace::Dos | Namespace::Win32AndDos))
            .map(|(fnr, _)| String::from_utf16_lossy(&fnr.name).to_ascii_uppercase())
            .collect();

        for n in 1u32.. {
            let suffix = format!("~{n}");
            let prefix_len = sanitized_base.chars().count().min(8usize.saturating_sub(suffix.len()));
            let prefix: String = sanitized_base.chars().take(prefix_len).collect();
            let candidate = if sanitized_ext.is_empty() {
                format!("{prefix}{suffix}")
            } else {
                format!("{prefix}{suffix}.{sanitized_ext}")
            };
            if !existing.contains(&candidate) {
                return candidate;
            }
        }
        unreachable!("u32 short-name suffix space exhausted")
    }
}

fn decode_entry(entry: &RawEntry) -> Result<(FileNameRecord, FileRecordReference)> {
    let fnr = FileNameRecord::decode(&entry.key)?;
    if entry.data.len() != 8 {
        return Err(NtfsError::corrupt("directory index entry data is not an 8-byte file reference"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&entry.data);
    Ok((fnr, FileRecordReference::from_le_bytes(bytes)))
}

fn sanitize_83(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || "$%'-_@~`!(){}^#&".contains(*c))
        .collect::<String>()
        .to_ascii_uppercase()
}
