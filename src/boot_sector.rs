//! BIOS Parameter Block: parse/emit the boot sector.

use crate::error::{NtfsError, Result};
use byteorder::{ByteOrder, LittleEndian};

const OEM_ID: &[u8; 8] = b"NTFS    ";
const END_OF_SECTOR_MARKER: u16 = 0xAA55;

/// Either a literal cluster count or an encoded `2^k` byte size, as used by
/// both "sectors per cluster" and "MFT record / index buffer size" fields:
/// values 1..128 are literal, values above are interpreted as
/// `1 << (-signed_byte)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterSize {
    Sectors(u8),
    Bytes(u32),
}

impl ClusterSize {
    pub fn decode(raw: u8) -> Self {
        let signed = raw as i8;
        if signed > 0 {
            ClusterSize::Sectors(signed as u8)
        } else {
            ClusterSize::Bytes(1u32 << (-(signed as i32)))
        }
    }

    pub fn encode(self) -> u8 {
        match self {
            ClusterSize::Sectors(n) => n,
            ClusterSize::Bytes(n) => {
                let k = n.trailing_zeros();
                debug_assert_eq!(1u32 << k, n, "ClusterSize::Bytes must be a power of two");
                (-(k as i32)) as i8 as u8
            }
        }
    }

    pub fn resolve(self, bytes_per_sector: u32) -> u32 {
        match self {
            ClusterSize::Sectors(n) => n as u32 * bytes_per_sector,
            ClusterSize::Bytes(n) => n,
        }
    }
}

/// Parsed boot sector fields (selected fields only — bootstrap code and
/// geometry fields the engine never reads are not modeled).
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster_raw: u8,
    pub media_descriptor: u8,
    pub hidden_sectors: u32,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub file_record_size_raw: u8,
    pub index_buffer_size_raw: u8,
    pub volume_serial_number: u64,
}

impl BootSector {
    pub fn bytes_per_cluster(&self) -> u32 {
        ClusterSize::decode(self.sectors_per_cluster_raw).resolve(self.bytes_per_sector as u32)
    }

    pub fn mft_record_size(&self) -> u32 {
        ClusterSize::decode(self.file_record_size_raw).resolve(self.bytes_per_cluster())
    }

    pub fn index_buffer_size(&self) -> u32 {
        ClusterSize::decode(self.index_buffer_size_raw).resolve(self.bytes_per_cluster())
    }

    /// Parse the 512-byte boot sector at LBA 0. Validity checks: OEM id,
    /// `TotalSectors16 = TotalSectors32 = 0`, `TotalSectors64 > 0`, and
    /// that the MFT offset lies within the volume.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 512 {
            return Err(NtfsError::corrupt("boot sector shorter than 512 bytes"));
        }
        if &buf[0x03..0x0B] != OEM_ID {
            return Err(NtfsError::corrupt("boot sector OEM id is not 'NTFS    '"));
        }

        let total_sectors_16 = LittleEndian::read_u16(&buf[0x13..0x15]);
        let total_sectors_32 = LittleEndian::read_u32(&buf[0x20..0x24]);
        if total_sectors_16 != 0 || total_sectors_32 != 0 {
            return Err(NtfsError::corrupt("non-NTFS FAT-style total sector fields set"));
        }

        let bytes_per_sector = LittleEndian::read_u16(&buf[0x0B..0x0D]);
        let sectors_per_cluster_raw = buf[0x0D];
        let media_descriptor = buf[0x15];
        let hidden_sectors = LittleEndian::read_u32(&buf[0x1C..0x20]);
        let total_sectors = LittleEndian::read_u64(&buf[0x28..0x30]);
        let mft_lcn = LittleEndian::read_u64(&buf[0x30..0x38]);
        let mft_mirror_lcn = LittleEndian::read_u64(&buf[0x38..0x40]);
        let file_record_size_raw = buf[0x40];
        let index_buffer_size_raw = buf[0x44];
        let volume_serial_number = LittleEndian::read_u64(&buf[0x48..0x50]);

        if total_sectors == 0 {
            return Err(NtfsError::corrupt("total sectors is zero"));
        }

        let boot = BootSector {
            bytes_per_sector,
            sectors_per_cluster_raw,
            media_descriptor,
            hidden_sectors,
            total_sectors,
            mft_lcn,
            mft_mirror_lcn,
            file_record_size_raw,
            index_buffer_size_raw,
            volume_serial_number,
        };

        let bytes_per_cluster = boot.bytes_per_cluster() as u64;
        let mft_offset = mft_lcn
            .checked_mul(bytes_per_cluster)
            .ok_or_else(|| NtfsError::corrupt("MFT LCN overflows volume offset"))?;
        let volume_bytes = total_sectors * bytes_per_sector as u64;
        if mft_offset >= volume_bytes {
            return Err(NtfsError::corrupt("MFT offset lies outside the volume"));
        }

        Ok(boot)
    }

    /// Serialize into a fresh 512-byte sector with the `0xAA55` end marker
    /// and a minimal x86 jump stub, suitable for both LBA 0 and the
    /// duplicate copy at the last sector of the volume.
    pub fn to_bytes(&self) -> [u8; 512] {
        let mut buf = [0u8; 512];
        buf[0] = 0xEB;
        buf[1] = 0x52;
        buf[2] = 0x90;
        buf[0x03..0x0B].copy_from_slice(OEM_ID);
        LittleEndian::write_u16(&mut buf[0x0B..0x0D], self.bytes_per_sector);
        buf[0x0D] = self.sectors_per_cluster_raw;
        buf[0x15] = self.media_descriptor;
        LittleEndian::write_u32(&mut buf[0x1C..0x20], self.hidden_sectors);
        LittleEndian::write_u64(&mut buf[0x28..0x30], self.total_sectors);
        LittleEndian::write_u64(&mut buf[0x30..0x38], self.mft_lcn);
        LittleEndian::write_u64(&mut buf[0x38..0x40], self.mft_mirror_lcn);
        buf[0x40] = self.file_record_size_raw;
        buf[0x44] = self.index_buffer_size_raw;
        LittleEndian::write_u64(&mut buf[0x48..0x50], self.volume_serial_number);
        LittleEndian::write_u16(&mut buf[510..512], END_OF_SECTOR_MARKER);
        buf
    }

    /// Cheap validity check used by `Detect()` without bootstrapping the
    /// MFT.
    pub fn looks_like_ntfs(buf: &[u8]) -> bool {
        buf.len() >= 512 && &buf[0x03..0x0B] == OEM_ID && LittleEndian::read_u16(&buf[510..512]) == END_OF_SECTOR_MARKER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootSector {
        BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster_raw: 8,
            media_descriptor: 0xF8,
            hidden_sectors: 0,
            total_sectors: 131_072,
            mft_lcn: 4,
            mft_mirror_lcn: 8192,
            file_record_size_raw: (-10i8) as u8,
            index_buffer_size_raw: 1,
            volume_serial_number: 0x1C74_1BC9_741B_A514,
        }
    }

    #[test]
    fn cluster_size_encoding() {
        assert_eq!(ClusterSize::decode(8), ClusterSize::Sectors(8));
        assert_eq!(ClusterSize::decode((-10i8) as u8), ClusterSize::Bytes(1024));
        assert_eq!(ClusterSize::Bytes(1024).encode(), (-10i8) as u8);
    }

    #[test]
    fn roundtrip_parse_and_emit() {
        let boot = sample();
        let bytes = boot.to_bytes();
        let parsed = BootSector::parse(&bytes).unwrap();
        assert_eq!(parsed.bytes_per_sector, boot.bytes_per_sector);
        assert_eq!(parsed.mft_lcn, boot.mft_lcn);
        assert_eq!(parsed.bytes_per_cluster(), 4096);
        assert_eq!(parsed.mft_record_size(), 1024);
        assert_eq!(parsed.index_buffer_size(), 4096);
    }

    #[test]
    fn rejects_bad_oem_id() {
        let mut bytes = sample().to_bytes();
        bytes[0x03] = b'X';
        assert!(BootSector::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_mft_outside_volume() {
        let mut boot = sample();
        boot.mft_lcn = boot.total_sectors * 2;
        let bytes = boot.to_bytes();
        assert!(BootSector::parse(&bytes).is_err());
    }

    #[test]
    fn detect_is_cheap_and_matches_full_parse() {
        let bytes = sample().to_bytes();
        assert!(BootSector::looks_like_ntfs(&bytes));
        assert!(BootSector::parse(&bytes).is_ok());
    }
}
