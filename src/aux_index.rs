//! Minor `IndexView`s over the auxiliary system files under `$Extend`:
//! `$ObjId`'s object-id index, `$Reparse`'s reparse-point index, and
//! `$Quota`'s owner/quota-entry index pair.
//!
//! Same layering as `Directory`: each of these owns only its `Index`
//! content in memory. Wiring a view to the owning FileRecord's
//! attributes, and updating a file's `$OBJECT_ID`/`$REPARSE_POINT`
//! attribute alongside it, is the file layer's job.

use crate::error::{NtfsError, Result};
use crate::index::collation::{MultipleUnsignedLongs, Sid, UnsignedLong};
use crate::index::{Index, RawEntry};
use crate::structures::FileRecordReference;
use byteorder::{ByteOrder, LittleEndian};

const COLLATION_ULONGS: u32 = 0x13;
const COLLATION_SID: u32 = 0x11;
const COLLATION_ULONG: u32 = 0x10;

fn decode_reference(data: &[u8]) -> Result<FileRecordReference> {
    if data.len() != 8 {
        return Err(NtfsError::corrupt("index entry data is not an 8-byte file reference"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(data);
    Ok(FileRecordReference::from_le_bytes(bytes))
}

/// `$ObjId`'s `$O` index: 16-byte object id (GUID) -> owning file.
/// Collated as four little-endian `u32`s, like any other `$ObjId`-style
/// key (see `index::collation::MultipleUnsignedLongs`).
pub struct ObjectIdIndex {
    index: Index,
}

impl ObjectIdIndex {
    pub fn new_empty(index_block_size: u32) -> Self {
        ObjectIdIndex { index: Index::new_empty(0, COLLATION_ULONGS, index_block_size) }
    }

    pub fn parse(root_data: &[u8], allocation_data: Option<&[u8]>, sector_size: usize) -> Result<Self> {
        Ok(ObjectIdIndex { index: Index::parse(root_data, allocation_data, sector_size)? })
    }

    pub fn to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.index.to_attributes(sector_size)
    }

    fn collator(&self) -> MultipleUnsignedLongs {
        MultipleUnsignedLongs
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, object_id: &[u8; 16]) -> Option<FileRecordReference> {
        let entry = self.index.lookup(object_id, &self.collator())?;
        decode_reference(&entry.data).ok()
    }

    pub fn insert(&mut self, object_id: [u8; 16], target: FileRecordReference) -> Result<()> {
        let collator = self.collator();
        self.index.insert(RawEntry { key: object_id.to_vec(), data: target.to_le_bytes().to_vec() }, &collator)
    }

    pub fn remove(&mut self, object_id: &[u8; 16]) -> Result<FileRecordReference> {
        let collator = self.collator();
        let removed = self.index.remove(object_id, &collator)?;
        decode_reference(&removed.data)
    }
}

/// `$Reparse`'s `$R` index: `(reparse_tag, file_reference)` -> nothing;
/// the file reference is already the key's tail, so the index exists to
/// let `Checker`/cleanup enumerate every reparse point by tag without
/// walking the whole volume.
pub struct ReparsePointIndex {
    index: Index,
}

impl ReparsePointIndex {
    pub fn new_empty(index_block_size: u32) -> Self {
        ReparsePointIndex { index: Index::new_empty(0, COLLATION_ULONGS, index_block_size) }
    }

    pub fn parse(root_data: &[u8], allocation_data: Option<&[u8]>, sector_size: usize) -> Result<Self> {
        Ok(ReparsePointIndex { index: Index::parse(root_data, allocation_data, sector_size)? })
    }

    pub fn to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.index.to_attributes(sector_size)
    }

    fn collator(&self) -> MultipleUnsignedLongs {
        MultipleUnsignedLongs
    }

    fn key(tag: u32, target: FileRecordReference) -> Vec<u8> {
        let mut key = vec![0u8; 12];
        LittleEndian::write_u32(&mut key[0..4], tag);
        key[4..12].copy_from_slice(&target.to_le_bytes());
        key
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn insert(&mut self, tag: u32, target: FileRecordReference) -> Result<()> {
        let collator = self.collator();
        self.index.insert(RawEntry { key: Self::key(tag, target), data: Vec::new() }, &collator)
    }

    pub fn remove(&mut self, tag: u32, target: FileRecordReference) -> Result<()> {
        let collator = self.collator();
        self.index.remove(&Self::key(tag, target), &collator)?;
        Ok(())
    }

    /// Every file reference currently reparse-pointed with `tag`.
    pub fn list_by_tag(&self, tag: u32) -> Vec<FileRecordReference> {
        self.index
            .range_scan()
            .filter(|e| LittleEndian::read_u32(&e.key[0..4]) == tag)
            .map(|e| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&e.key[4..12]);
                FileRecordReference::from_le_bytes(bytes)
            })
            .collect()
    }
}

/// One `$Quota` accounting record: usage, threshold/limit, and the last
/// time the threshold was crossed. Real NTFS additionally trails the
/// owning SID on non-default entries; omitted here since `QuotaIndex`'s
/// owner index already maps a SID to its quota id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaEntry {
    pub bytes_used: u64,
    pub bytes_threshold: u64,
    pub bytes_limit: u64,
    pub change_time: u64,
}

const QUOTA_ENTRY_LEN: usize = 32;

impl QuotaEntry {
    fn encode(&self) -> [u8; QUOTA_ENTRY_LEN] {
        let mut buf = [0u8; QUOTA_ENTRY_LEN];
        LittleEndian::write_u64(&mut buf[0..8], self.bytes_used);
        LittleEndian::write_u64(&mut buf[8..16], self.bytes_threshold);
        LittleEndian::write_u64(&mut buf[16..24], self.bytes_limit);
        LittleEndian::write_u64(&mut buf[24..32], self.change_time);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != QUOTA_ENTRY_LEN {
            return Err(NtfsError::corrupt("quota entry is not 32 bytes"));
        }
        Ok(QuotaEntry {
            bytes_used: LittleEndian::read_u64(&buf[0..8]),
            bytes_threshold: LittleEndian::read_u64(&buf[8..16]),
            bytes_limit: LittleEndian::read_u64(&buf[16..24]),
            change_time: LittleEndian::read_u64(&buf[24..32]),
        })
    }
}

/// `$Quota`'s index pair: `$O` (owner SID -> quota id) and `$Q` (quota id
/// -> `QuotaEntry`).
pub struct QuotaIndex {
    owners: Index,
    entries: Index,
}

impl QuotaIndex {
    pub fn new_empty(index_block_size: u32) -> Self {
        QuotaIndex {
            owners: Index::new_empty(0, COLLATION_SID, index_block_size),
            entries: Index::new_empty(0, COLLATION_ULONG, index_block_size),
        }
    }

    pub fn parse(
        owners_root: &[u8],
        owners_allocation: Option<&[u8]>,
        entries_root: &[u8],
        entries_allocation: Option<&[u8]>,
        sector_size: usize,
    ) -> Result<Self> {
        Ok(QuotaIndex {
            owners: Index::parse(owners_root, owners_allocation, sector_size)?,
            entries: Index::parse(entries_root, entries_allocation, sector_size)?,
        })
    }

    pub fn owners_to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.owners.to_attributes(sector_size)
    }

    pub fn entries_to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.entries.to_attributes(sector_size)
    }

    fn owners_collator(&self) -> Sid {
        Sid
    }

    fn entries_collator(&self) -> UnsignedLong {
        UnsignedLong
    }

    pub fn quota_id_for_owner(&self, sid: &[u8]) -> Option<u32> {
        let entry = self.owners.lookup(sid, &self.owners_collator())?;
        if entry.data.len() != 4 {
            return None;
        }
        Some(LittleEndian::read_u32(&entry.data[0..4]))
    }

    pub fn entry(&self, quota_id: u32) -> Option<QuotaEntry> {
        let mut key = [0u8; 4];
        LittleEndian::write_u32(&mut key[0..4], quota_id);
        let entry = self.entries.lookup(&key, &self.entries_collator())?;
        QuotaEntry::decode(&entry.data).ok()
    }

    pub fn set_owner(&mut self, sid: Vec<u8>, quota_id: u32) -> Result<()> {
        let mut data = [0u8; 4];
        LittleEndian::write_u32(&mut data[0..4], quota_id);
        let collator = self.owners_collator();
        self.owners.insert(RawEntry { key: sid, data: data.to_vec() }, &collator)
    }

    pub fn set_entry(&mut self, quota_id: u32, entry: QuotaEntry) -> Result<()> {
        let mut key = [0u8; 4];
        LittleEndian::write_u32(&mut key[0..4], quota_id);
        let collator = self.entries_collator();
        self.entries.insert(RawEntry { key: key.to_vec(), data: entry.encode().to_vec() }, &collator)
    }
}
