//! `$Secure`: the volume-wide deduplicated security descriptor store
//!. Two indexes over one `$SDS` data stream: `$SDH`
//! (keyed by `(hash, id)`, used to find an existing descriptor by
//! content) and `$SII` (keyed by `id` alone, used to fetch one by id).
//!
//! Like `Directory`, this owns only the index/stream content in memory;
//! wiring it to `$Secure`'s actual attributes is the file layer's job.

use crate::error::{NtfsError, Result};
use crate::index::collation::{SecurityHash, UnsignedLong};
use crate::index::{Index, RawEntry};
use byteorder::{ByteOrder, LittleEndian};

const COLLATION_SECURITY_HASH: u32 = 0x12;
const COLLATION_ULONG: u32 = 0x10;

/// Every `$SDS` record is written twice, `BLOCK_SIZE` apart, for
/// media-failure redundancy.
const BLOCK_SIZE: u64 = 0x4_0000;
const PAIR_SIZE: u64 = BLOCK_SIZE * 2;

/// Security ids below this are reserved; the store hands out its own
/// starting here.
const FIRST_ASSIGNED_ID: u32 = 256;

/// Fixed header ahead of each `$SDS` record's descriptor bytes: hash (4)
/// + security id (4) + this record's own stream offset (8) + descriptor
/// length (4).
const RECORD_HEADER_LEN: usize = 20;

fn round_up_16(n: u64) -> u64 {
    (n + 15) & !15
}

/// `fold(b) = for each little-endian u32 word w: h = w + rotate_left(h, 3)`
///. Trailing bytes short of a full word are zero-padded.
fn fold(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for word in bytes.chunks(4) {
        let mut buf = [0u8; 4];
        buf[..word.len()].copy_from_slice(word);
        let w = LittleEndian::read_u32(&buf);
        h = w.wrapping_add(h.rotate_left(3));
    }
    h
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordPointer {
    hash: u32,
    id: u32,
    offset: u64,
    length: u32,
}

impl RecordPointer {
    fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.hash);
        LittleEndian::write_u32(&mut buf[4..8], self.id);
        LittleEndian::write_u64(&mut buf[8..16], self.offset);
        LittleEndian::write_u32(&mut buf[16..20], self.length);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != RECORD_HEADER_LEN {
            return Err(NtfsError::corrupt("security index pointer is not 20 bytes"));
        }
        Ok(RecordPointer {
            hash: LittleEndian::read_u32(&buf[0..4]),
            id: LittleEndian::read_u32(&buf[4..8]),
            offset: LittleEndian::read_u64(&buf[8..16]),
            length: LittleEndian::read_u32(&buf[16..20]),
        })
    }
}

/// Fixed offsets into a self-relative `SECURITY_DESCRIPTOR` header
///: Revision (1) + Sbz1 (1) + Control (2), then four
/// `u32` offsets to Owner, Group, Sacl, Dacl in that field order.
const SD_FIXED_HEADER_LEN: usize = 20;

/// Reassemble an already-split self-relative security descriptor into
/// NTFS's canonical on-disk order — header, then DACL, SACL, Owner,
/// Group — so identical descriptors serialize identically regardless of
/// how the caller built them. Any of `dacl`/`sacl`
/// `owner`/`group` may be empty, in which case its header offset is left
/// 0 (absent).
pub fn reorder_descriptor(header: &[u8], dacl: &[u8], sacl: &[u8], owner: &[u8], group: &[u8]) -> Result<Vec<u8>> {
    if header.len() < SD_FIXED_HEADER_LEN {
        return Err(NtfsError::invalid("security descriptor header shorter than fixed part"));
    }
    let mut out = header.to_vec();
    let dacl_offset = out.len() as u32;
    out.extend_from_slice(dacl);
    let sacl_offset = out.len() as u32;
    out.extend_from_slice(sacl);
    let owner_offset = out.len() as u32;
    out.extend_from_slice(owner);
    let group_offset = out.len() as u32;
    out.extend_from_slice(group);

    LittleEndian::write_u32(&mut out[4..8], if owner.is_empty() { 0 } else { owner_offset });
    LittleEndian::write_u32(&mut out[8..12], if group.is_empty() { 0 } else { group_offset });
    LittleEndian::write_u32(&mut out[12..16], if sacl.is_empty() { 0 } else { sacl_offset });
    LittleEndian::write_u32(&mut out[16..20], if dacl.is_empty() { 0 } else { dacl_offset });
    Ok(out)
}

pub struct SecurityStore {
    sds: Vec<u8>,
    sdh: Index,
    sii: Index,
    next_offset: u64,
    next_id: u32,
}

impl SecurityStore {
    pub fn new_empty(index_block_size: u32) -> Self {
        SecurityStore {
            sds: Vec::new(),
            sdh: Index::new_empty(0, COLLATION_SECURITY_HASH, index_block_size),
            sii: Index::new_empty(0, COLLATION_ULONG, index_block_size),
            next_offset: 0,
            next_id: FIRST_ASSIGNED_ID,
        }
    }

    pub fn parse(
        sds: Vec<u8>,
        sdh_root: &[u8],
        sdh_allocation: Option<&[u8]>,
        sii_root: &[u8],
        sii_allocation: Option<&[u8]>,
        sector_size: usize,
    ) -> Result<Self> {
        let sdh = Index::parse(sdh_root, sdh_allocation, sector_size)?;
        let sii = Index::parse(sii_root, sii_allocation, sector_size)?;

        let mut next_id = FIRST_ASSIGNED_ID;
        let mut next_offset = 0u64;
        for entry in sii.range_scan() {
            let ptr = RecordPointer::decode(&entry.data)?;
            next_id = next_id.max(ptr.id.saturating_add(1));
            next_offset = next_offset.max(ptr.offset + ptr.length as u64);
        }

        Ok(SecurityStore { sds, sdh, sii, next_offset, next_id })
    }

    pub fn sds_bytes(&self) -> &[u8] {
        &self.sds
    }

    pub fn sdh_to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.sdh.to_attributes(sector_size)
    }

    pub fn sii_to_attributes(&mut self, sector_size: usize) -> (Vec<u8>, Option<Vec<u8>>) {
        self.sii.to_attributes(sector_size)
    }

    fn sdh_collator(&self) -> SecurityHash {
        SecurityHash
    }

    fn sii_collator(&self) -> UnsignedLong {
        UnsignedLong
    }

    /// Reserve `len` bytes for a record's primary copy, honoring the
    /// dual-block layout: 16-byte aligned, and bumped to the start of the
    /// next block pair if it would otherwise cross into the duplicate
    /// half of its own pair.
    fn reserve(&mut self, len: u64) -> u64 {
        let mut offset = round_up_16(self.next_offset);
        let in_pair = offset % PAIR_SIZE;
        if in_pair + len > BLOCK_SIZE {
            offset = (offset / PAIR_SIZE + 1) * PAIR_SIZE;
        }
        self.next_offset = offset + len;
        offset
    }

    fn read_record(&self, ptr: &RecordPointer) -> Result<Vec<u8>> {
        let start = ptr.offset as usize + RECORD_HEADER_LEN;
        let end = start + ptr.length as usize;
        self.sds
            .get(start..end)
            .map(|s| s.to_vec())
            .ok_or_else(|| NtfsError::corrupt("$SDS record runs past stream"))
    }

    /// Find an existing descriptor byte-for-byte equal to `raw_sd`, or
    /// assign a new id and append it, writing both redundant copies
    ///.
    pub fn add_descriptor(&mut self, raw_sd: &[u8]) -> Result<u32> {
        let hash = fold(raw_sd);

        // Collect candidates first: `range_scan` borrows `self.sdh`, and
        // `read_record` below needs `&self` as a whole, so the two
        // borrows can't overlap.
        let mut candidates = Vec::new();
        for entry in self.sdh.range_scan() {
            if LittleEndian::read_u32(&entry.key[0..4]) == hash {
                candidates.push(RecordPointer::decode(&entry.data)?);
            }
        }
        for ptr in candidates {
            if self.read_record(&ptr)? == raw_sd {
                return Ok(ptr.id);
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        let record_len = (RECORD_HEADER_LEN + raw_sd.len()) as u64;
        let padded_len = round_up_16(record_len);
        let offset = self.reserve(padded_len);

        let ptr = RecordPointer { hash, id, offset, length: raw_sd.len() as u32 };
        let mut record = vec![0u8; padded_len as usize];
        record[0..RECORD_HEADER_LEN].copy_from_slice(&ptr.encode());
        record[RECORD_HEADER_LEN..RECORD_HEADER_LEN + raw_sd.len()].copy_from_slice(raw_sd);

        let needed = (offset + BLOCK_SIZE + padded_len) as usize;
        if self.sds.len() < needed {
            self.sds.resize(needed, 0);
        }
        self.sds[offset as usize..offset as usize + record.len()].copy_from_slice(&record);
        self.sds[offset as usize + BLOCK_SIZE as usize..offset as usize + BLOCK_SIZE as usize + record.len()].copy_from_slice(&record);

        let mut sdh_key = [0u8; 8];
        LittleEndian::write_u32(&mut sdh_key[0..4], hash);
        LittleEndian::write_u32(&mut sdh_key[4..8], id);
        let sdh_collator = self.sdh_collator();
        self.sdh.insert(RawEntry { key: sdh_key.to_vec(), data: ptr.encode().to_vec() }, &sdh_collator)?;

        let mut sii_key = [0u8; 4];
        LittleEndian::write_u32(&mut sii_key[0..4], id);
        let sii_collator = self.sii_collator();
        self.sii.insert(RawEntry { key: sii_key.to_vec(), data: ptr.encode().to_vec() }, &sii_collator)?;

        Ok(id)
    }

    /// Check that every `$SII` entry's primary `$SDS` record matches its
    /// redundant copy at `offset + 0x40000`, and that the content hashes
    /// back to the value stored alongside it.
    pub fn verify_dual_block_integrity(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        for entry in self.sii.range_scan() {
            let ptr = RecordPointer::decode(&entry.data)?;
            let primary = self.read_record(&ptr)?;

            let mirror_start = ptr.offset as usize + BLOCK_SIZE as usize + RECORD_HEADER_LEN;
            let mirror_end = mirror_start + ptr.length as usize;
            match self.sds.get(mirror_start..mirror_end) {
                Some(mirror) if mirror == primary.as_slice() => {}
                Some(_) => problems.push(format!("security id {}: primary and mirrored $SDS records differ", ptr.id)),
                None => problems.push(format!("security id {}: mirrored $SDS record runs past stream", ptr.id)),
            }

            if fold(&primary) != ptr.hash {
                problems.push(format!("security id {}: fold(sds_bytes) does not match the hash stored in $SII", ptr.id));
            }
        }
        Ok(problems)
    }

    /// Fetch a previously-added descriptor's bytes by id.
    pub fn get(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let mut key = [0u8; 4];
        LittleEndian::write_u32(&mut key[0..4], id);
        match self.sii.lookup(&key, &self.sii_collator()) {
            None => Ok(None),
            Some(entry) => {
                let ptr = RecordPointer::decode(&entry.data)?;
                Ok(Some(self.read_record(&ptr)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_is_deterministic_and_order_sensitive() {
        let a = fold(b"hello world!!!!");
        let b = fold(b"hello world!!!!");
        let c = fold(b"world hello!!!!");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn add_descriptor_assigns_increasing_ids_and_dedups_identical_content() {
        let mut store = SecurityStore::new_empty(4096);
        let sd1 = vec![1u8; 40];
        let sd2 = vec![2u8; 40];

        let id1 = store.add_descriptor(&sd1).unwrap();
        let id2 = store.add_descriptor(&sd2).unwrap();
        assert_eq!(id1, 256);
        assert_eq!(id2, 257);

        let id1_again = store.add_descriptor(&sd1).unwrap();
        assert_eq!(id1_again, id1);
    }

    #[test]
    fn get_roundtrips_added_descriptor_bytes() {
        let mut store = SecurityStore::new_empty(4096);
        let sd = (0u8..200).collect::<Vec<u8>>();
        let id = store.add_descriptor(&sd).unwrap();

        let fetched = store.get(id).unwrap().unwrap();
        assert_eq!(fetched, sd);
        assert!(store.get(id + 1).unwrap().is_none());
    }

    #[test]
    fn every_record_is_present_at_both_redundant_offsets() {
        let mut store = SecurityStore::new_empty(4096);
        let sd = vec![7u8; 64];
        let id = store.add_descriptor(&sd).unwrap();

        let mut key = [0u8; 4];
        LittleEndian::write_u32(&mut key[0..4], id);
        let entry = store.sii.lookup(&key, &store.sii_collator()).unwrap();
        let ptr = RecordPointer::decode(&entry.data).unwrap();

        let primary = &store.sds[ptr.offset as usize + RECORD_HEADER_LEN..ptr.offset as usize + RECORD_HEADER_LEN + sd.len()];
        let mirror_start = ptr.offset as usize + BLOCK_SIZE as usize + RECORD_HEADER_LEN;
        let mirror = &store.sds[mirror_start..mirror_start + sd.len()];
        assert_eq!(primary, sd.as_slice());
        assert_eq!(mirror, sd.as_slice());
    }

    #[test]
    fn reserve_skips_to_next_block_pair_when_record_would_straddle_the_mirror() {
        let mut store = SecurityStore::new_empty(4096);
        store.next_offset = BLOCK_SIZE - 8;
        let offset = store.reserve(32);
        assert_eq!(offset, PAIR_SIZE);
    }

    #[test]
    fn reorder_descriptor_places_acls_before_owner_and_group() {
        let header = vec![0u8; SD_FIXED_HEADER_LEN];
        let dacl = vec![1u8; 12];
        let sacl = vec![2u8; 8];
        let owner = vec![3u8; 16];
        let group = vec![4u8; 16];

        let out = reorder_descriptor(&header, &dacl, &sacl, &owner, &group).unwrap();
        let owner_off = LittleEndian::read_u32(&out[4..8]) as usize;
        let group_off = LittleEndian::read_u32(&out[8..12]) as usize;
        let sacl_off = LittleEndian::read_u32(&out[12..16]) as usize;
        let dacl_off = LittleEndian::read_u32(&out[16..20]) as usize;

        assert_eq!(dacl_off, SD_FIXED_HEADER_LEN);
        assert_eq!(sacl_off, SD_FIXED_HEADER_LEN + dacl.len());
        assert_eq!(owner_off, sacl_off + sacl.len());
        assert_eq!(group_off, owner_off + owner.len());
        assert_eq!(&out[dacl_off..dacl_off + dacl.len()], dacl.as_slice());
        assert_eq!(&out[owner_off..owner_off + owner.len()], owner.as_slice());
    }
}
