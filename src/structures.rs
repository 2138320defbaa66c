//! On-disk constants and small value types shared across the engine.
//!
//! Numeric attribute type codes and flags below are the fixed NTFS wire
//! values (unchanged since NTFS 3.0); they are not something the formatter
//! gets to choose.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Attribute type codes, in their fixed on-disk order: records within a
/// FileRecord sort by `type_code ASC`, so the numeric order here doubles
/// as the sort order.
pub mod attr_type {
    pub const STANDARD_INFORMATION: u32 = 0x10;
    pub const ATTRIBUTE_LIST: u32 = 0x20;
    pub const FILE_NAME: u32 = 0x30;
    pub const OBJECT_ID: u32 = 0x40;
    pub const SECURITY_DESCRIPTOR: u32 = 0x50;
    pub const VOLUME_NAME: u32 = 0x60;
    pub const VOLUME_INFORMATION: u32 = 0x70;
    pub const DATA: u32 = 0x80;
    pub const INDEX_ROOT: u32 = 0x90;
    pub const INDEX_ALLOCATION: u32 = 0xA0;
    pub const BITMAP: u32 = 0xB0;
    pub const REPARSE_POINT: u32 = 0xC0;
    pub const EA_INFORMATION: u32 = 0xD0;
    pub const EA: u32 = 0xE0;
    pub const PROPERTY_SET: u32 = 0xF0;
    pub const LOGGED_UTILITY_STREAM: u32 = 0x100;
    pub const END: u32 = 0xFFFF_FFFF;
}

/// Attribute-record-level flags (AttributeRecord header).
pub mod attr_flags {
    pub const COMPRESSED: u16 = 0x0001;
    pub const ENCRYPTED: u16 = 0x4000;
    pub const SPARSE: u16 = 0x8000;
}

/// FileRecord header flags.
pub mod record_flags {
    pub const IN_USE: u16 = 0x0001;
    pub const IS_DIRECTORY: u16 = 0x0002;
    pub const IS_EXTENSION: u16 = 0x0004;
    pub const SPECIAL_INDEX: u16 = 0x0008;
}

/// Reserved MFT record indices.
pub mod reserved_records {
    pub const MFT: u64 = 0;
    pub const MFT_MIRROR: u64 = 1;
    pub const LOG_FILE: u64 = 2;
    pub const VOLUME: u64 = 3;
    pub const ATTR_DEF: u64 = 4;
    pub const ROOT: u64 = 5;
    pub const BITMAP: u64 = 6;
    pub const BOOT: u64 = 7;
    pub const BAD_CLUS: u64 = 8;
    pub const SECURE: u64 = 9;
    pub const UP_CASE: u64 = 10;
    pub const EXTEND: u64 = 11;
    /// First record index available for ordinary files.
    pub const FIRST_USER_RECORD: u64 = 16;
}

/// A `(MftIndex: 48 bits, SequenceNumber: 16 bits)` reference to an MFT
/// record, packed the way it is stored on disk (a single `u64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRecordReference(pub u64);

impl FileRecordReference {
    pub const NULL: FileRecordReference = FileRecordReference(0);

    pub fn new(mft_index: u64, sequence_number: u16) -> Self {
        debug_assert!(mft_index < (1 << 48));
        FileRecordReference((sequence_number as u64) << 48 | (mft_index & 0xFFFF_FFFF_FFFF))
    }

    pub fn mft_index(&self) -> u64 {
        self.0 & 0xFFFF_FFFF_FFFF
    }

    pub fn sequence_number(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        FileRecordReference(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for FileRecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.mft_index(), self.sequence_number())
    }
}

/// Filename namespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl Namespace {
    pub fn from_u8(v: u8) -> crate::error::Result<Self> {
        match v {
            0 => Ok(Namespace::Posix),
            1 => Ok(Namespace::Win32),
            2 => Ok(Namespace::Dos),
            3 => Ok(Namespace::Win32AndDos),
            other => Err(crate::error::NtfsError::corrupt(format!(
                "invalid filename namespace byte {other}"
            ))),
        }
    }
}

/// FILE_ATTRIBUTE_* bits relevant to the engine (a subset; most are opaque
/// pass-through bits the façade interprets).
pub mod file_attr {
    pub const READONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const SPARSE_FILE: u32 = 0x0200;
    pub const REPARSE_POINT: u32 = 0x0400;
    pub const COMPRESSED: u32 = 0x0800;
}

/// `StandardInformation` attribute content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: u32,
    pub security_id: u32,
    pub quota_charged: u64,
    pub usn: u64,
}

impl Default for StandardInformation {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            mft_modification_time: 0,
            access_time: 0,
            file_attributes: 0,
            max_versions: 0,
            version_number: 0,
            class_id: 0,
            owner_id: 0,
            security_id: 0,
            quota_charged: 0,
            usn: 0,
        }
    }
}

const STANDARD_INFORMATION_LEN: usize = 72;

impl StandardInformation {
    pub fn encode(&self) -> [u8; STANDARD_INFORMATION_LEN] {
        let mut buf = [0u8; STANDARD_INFORMATION_LEN];
        LittleEndian::write_u64(&mut buf[0..8], self.creation_time);
        LittleEndian::write_u64(&mut buf[8..16], self.modification_time);
        LittleEndian::write_u64(&mut buf[16..24], self.mft_modification_time);
        LittleEndian::write_u64(&mut buf[24..32], self.access_time);
        LittleEndian::write_u32(&mut buf[32..36], self.file_attributes);
        LittleEndian::write_u32(&mut buf[36..40], self.max_versions);
        LittleEndian::write_u32(&mut buf[40..44], self.version_number);
        LittleEndian::write_u32(&mut buf[44..48], self.class_id);
        LittleEndian::write_u32(&mut buf[48..52], self.owner_id);
        LittleEndian::write_u32(&mut buf[52..56], self.security_id);
        LittleEndian::write_u64(&mut buf[56..64], self.quota_charged);
        LittleEndian::write_u64(&mut buf[64..72], self.usn);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() < STANDARD_INFORMATION_LEN {
            return Err(crate::error::NtfsError::corrupt("StandardInformation shorter than 72 bytes"));
        }
        Ok(StandardInformation {
            creation_time: LittleEndian::read_u64(&buf[0..8]),
            modification_time: LittleEndian::read_u64(&buf[8..16]),
            mft_modification_time: LittleEndian::read_u64(&buf[16..24]),
            access_time: LittleEndian::read_u64(&buf[24..32]),
            file_attributes: LittleEndian::read_u32(&buf[32..36]),
            max_versions: LittleEndian::read_u32(&buf[36..40]),
            version_number: LittleEndian::read_u32(&buf[40..44]),
            class_id: LittleEndian::read_u32(&buf[44..48]),
            owner_id: LittleEndian::read_u32(&buf[48..52]),
            security_id: LittleEndian::read_u32(&buf[52..56]),
            quota_charged: LittleEndian::read_u64(&buf[56..64]),
            usn: LittleEndian::read_u64(&buf[64..72]),
        })
    }
}
