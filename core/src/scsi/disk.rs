//! RAM-backed SCSI hard disk drive (block device)

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::scsi::STATUS_GOOD;
use crate::scsi::target::{ASC_INVALID_COMMAND, SENSE_ILLEGAL_REQUEST};
use crate::scsi::target::{ScsiCmdResult, ScsiTarget};

pub const DISK_BLOCKSIZE: usize = 512;

#[derive(Serialize, Deserialize)]
pub struct ScsiTargetDisk {
    /// Disk contents
    disk: Vec<u8>,

    /// Check condition code
    cc_code: u8,

    /// Check condition ASC
    cc_asc: u16,
}

impl ScsiTargetDisk {
    /// Creates a zero-filled disk of the given amount of blocks
    pub fn new(blocks: usize) -> Self {
        Self {
            disk: vec![0; blocks * DISK_BLOCKSIZE],
            cc_code: 0,
            cc_asc: 0,
        }
    }

    /// Wraps an existing disk image
    pub fn from_image(disk: Vec<u8>) -> Result<Self> {
        if disk.is_empty() {
            bail!("Cannot load disk image: image is empty");
        }
        if disk.len() % DISK_BLOCKSIZE != 0 {
            bail!(
                "Cannot load disk image: {} bytes is not a multiple of {}",
                disk.len(),
                DISK_BLOCKSIZE
            );
        }

        Ok(Self {
            disk,
            cc_code: 0,
            cc_asc: 0,
        })
    }

    /// Try to load a disk image, given the filename of the image.
    pub fn load_disk(filename: &Path) -> Result<Self> {
        if !filename.exists() {
            bail!("File not found: {}", filename.display());
        }

        let disk = std::fs::read(filename)
            .with_context(|| format!("Failed to open file {}", filename.display()))?;
        Self::from_image(disk).with_context(|| filename.display().to_string())
    }

    /// Disk contents
    pub fn image(&self) -> &[u8] {
        &self.disk
    }
}

#[typetag::serde]
impl ScsiTarget for ScsiTargetDisk {
    fn req_sense(&mut self) -> (u8, u16) {
        (self.cc_code, self.cc_asc)
    }

    fn set_cc(&mut self, code: u8, asc: u16) {
        self.cc_code = code;
        self.cc_asc = asc;
    }

    fn unit_ready(&mut self) -> Result<ScsiCmdResult> {
        Ok(ScsiCmdResult::Status(STATUS_GOOD))
    }

    fn inquiry(&mut self, _cmd: &[u8]) -> Result<ScsiCmdResult> {
        let mut result = vec![0; 36];

        // 0 Peripheral qualifier (5-7), peripheral device type (4-0)
        result[0] = 0; // Magnetic disk

        // SCSI version compliance
        result[2] = 0x02; // ANSI-2
        result[3] = 0x02; // ANSI-2

        // 4 Additional length (N-4), min. 32
        result[4] = result.len() as u8 - 5;

        // 8..16 Vendor identification
        result[8..(8 + 3)].copy_from_slice(b"NCR");

        // 16..32 Product identification
        result[16..(16 + 11)].copy_from_slice(b"VIRTUAL HDD");

        // 32..36 Revision
        result[32..35].copy_from_slice(b"1.0");

        Ok(ScsiCmdResult::DataIn(result))
    }

    fn mode_sense(&mut self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x01 => {
                // Read/write error recovery page
                Some(vec![
                    0x01,        // Page code
                    0x0A,        // Page length
                    0b1100_0000, // DCR, DTE, PER, EER, RC, TB, ARRE, AWRE
                    8,           // Read retry count
                    0,           // Correction span
                    0,           // Head offset count
                    0,           // Data strobe offset count
                    0,           // Reserved
                    0,           // Write retry count
                    0,           // Reserved
                    0,           // Recovery time limit (MSB)
                    0,           // Recovery time limit (LSB)
                ])
            }
            0x03 => {
                // Format device page
                let mut page = vec![0; 24];
                page[0] = 0x03;
                page[1] = 0x16;
                page[12..14].copy_from_slice(&(DISK_BLOCKSIZE as u16).to_be_bytes());
                Some(page)
            }
            _ => None,
        }
    }

    fn blocksize(&self) -> Option<usize> {
        Some(DISK_BLOCKSIZE)
    }

    fn blocks(&self) -> Option<usize> {
        Some(self.disk.len() / DISK_BLOCKSIZE)
    }

    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8> {
        self.disk[(block_offset * DISK_BLOCKSIZE)..((block_offset + block_count) * DISK_BLOCKSIZE)]
            .to_vec()
    }

    fn write(&mut self, block_offset: usize, data: &[u8]) {
        let offset = block_offset * DISK_BLOCKSIZE;
        self.disk[offset..(offset + data.len())].copy_from_slice(data);
    }

    fn specific_cmd(&mut self, cmd: &[u8], _outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        log::error!("Unknown command {:02X}", cmd[0]);
        self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::STATUS_CHECK_CONDITION;
    use crate::scsi::target::{ASC_MEDIUM_NOT_PRESENT, SENSE_NOT_READY};

    #[test]
    fn inquiry_allocation_length() {
        let mut disk = ScsiTargetDisk::new(8);
        let r = disk.cmd(&[0x12, 0, 0, 0, 4, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::DataIn(vec![0, 0, 2, 2]));

        let ScsiCmdResult::DataIn(full) = disk.cmd(&[0x12, 0, 0, 0, 0xFF, 0], None).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(full.len(), 36);
        assert_eq!(&full[8..11], b"NCR");
    }

    #[test]
    fn read_capacity() {
        let mut disk = ScsiTargetDisk::new(100);
        let r = disk.cmd(&[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::DataIn(vec![0, 0, 0, 99, 0, 0, 2, 0]));
    }

    #[test]
    fn write_then_read() {
        let mut disk = ScsiTargetDisk::new(4);
        let cdb = [0x0A, 0, 0, 2, 1, 0];
        assert_eq!(
            disk.cmd(&cdb, None).unwrap(),
            ScsiCmdResult::DataOut(DISK_BLOCKSIZE)
        );
        let data = vec![0xA5; DISK_BLOCKSIZE];
        assert_eq!(
            disk.cmd(&cdb, Some(&data)).unwrap(),
            ScsiCmdResult::Status(STATUS_GOOD)
        );

        let r = disk.cmd(&[0x28, 0, 0, 0, 0, 2, 0, 0, 1, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::DataIn(data));
        assert!(disk.image()[..2 * DISK_BLOCKSIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_sets_sense() {
        let mut disk = ScsiTargetDisk::new(4);
        let r = disk.cmd(&[0x08, 0, 0, 4, 1, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::Status(STATUS_CHECK_CONDITION));

        let ScsiCmdResult::DataIn(sense) = disk.cmd(&[0x03, 0, 0, 0, 14, 0], None).unwrap() else {
            panic!("expected sense data");
        };
        assert_eq!(sense[2], SENSE_ILLEGAL_REQUEST);
        assert_eq!(&sense[12..14], &[0x21, 0x00]);

        // Sense is cleared after being reported
        let ScsiCmdResult::DataIn(sense) = disk.cmd(&[0x03, 0, 0, 0, 14, 0], None).unwrap() else {
            panic!("expected sense data");
        };
        assert_eq!(sense[2], 0);
    }

    #[test]
    fn unknown_command() {
        let mut disk = ScsiTargetDisk::new(1);
        let r = disk.cmd(&[0xC0, 0, 0, 0, 0, 0, 0, 0, 0, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        assert_eq!(disk.req_sense(), (SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND));
    }

    #[test]
    fn mode_sense_header() {
        let mut disk = ScsiTargetDisk::new(16);
        let ScsiCmdResult::DataIn(d) = disk.cmd(&[0x1A, 0, 0x01, 0, 0xFF, 0], None).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(d.len(), 12 + 12);
        assert_eq!(d[0] as usize, d.len() - 1);
        assert_eq!(d[3], 8);
        assert_eq!(&d[9..12], &[0, 2, 0]);
        assert_eq!(d[12], 0x01);

        let r = disk.cmd(&[0x1A, 0, 0x22, 0, 0xFF, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
    }

    #[test]
    fn bad_image_size() {
        assert!(ScsiTargetDisk::from_image(vec![0; 100]).is_err());
        assert!(ScsiTargetDisk::from_image(vec![]).is_err());
    }

    #[test]
    fn read_capacity_empty() {
        let mut disk = ScsiTargetDisk::new(0);
        let r = disk.cmd(&[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], None).unwrap();
        assert_eq!(r, ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        assert_eq!(disk.req_sense(), (SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT));
    }

    #[test]
    fn load_disk_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("scsichip_disk_{}.img", std::process::id()));
        std::fs::write(&path, vec![0x5A; 4 * DISK_BLOCKSIZE]).unwrap();

        let disk = ScsiTargetDisk::load_disk(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(disk.blocks(), Some(4));
        assert!(disk.image().iter().all(|&b| b == 0x5A));

        assert!(ScsiTargetDisk::load_disk(&path).is_err());
    }
}
