//! Cheap volume-type sniffing: `detect` answers "is this NTFS" without
//! mounting anything.

use crate::boot_sector::BootSector;
use crate::error::Result;
use crate::volume::RawVolume;

/// Read the first sector of `volume` and check it against the NTFS boot
/// sector signature. A positive result is not a guarantee the volume is
/// otherwise well-formed; it only means `BootSector::parse` is likely to
/// succeed.
pub fn detect(volume: &mut dyn RawVolume) -> Result<bool> {
    let mut sector = [0u8; 512];
    volume.read_at(0, &mut sector)?;
    Ok(BootSector::looks_like_ntfs(&sector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_volume_is_not_ntfs() {
        let mut volume: Vec<u8> = vec![0u8; 4096];
        assert!(!detect(&mut volume).unwrap());
    }

    #[test]
    fn formatted_boot_sector_is_detected() {
        let boot = BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster_raw: 8,
            media_descriptor: 0xF8,
            hidden_sectors: 0,
            total_sectors: 131_072,
            mft_lcn: 4,
            mft_mirror_lcn: 8192,
            file_record_size_raw: (-10i8) as u8,
            index_buffer_size_raw: 1,
            volume_serial_number: 0x1122_3344_5566_7788,
        };
        let mut volume: Vec<u8> = vec![0u8; 131_072 * 512];
        volume[0..512].copy_from_slice(&boot.to_bytes());
        assert!(detect(&mut volume).unwrap());
    }
}
