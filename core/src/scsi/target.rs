//! SCSI target generic/shared code

use anyhow::Result;

use crate::scsi::{STATUS_CHECK_CONDITION, STATUS_GOOD};

/// Sense key: illegal request
pub const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
/// ASC/ASCQ: invalid command operation code
pub const ASC_INVALID_COMMAND: u16 = 0x2000;
/// ASC/ASCQ: logical block address out of range
pub const ASC_LBA_OUT_OF_RANGE: u16 = 0x2100;
/// ASC/ASCQ: invalid field in CDB
pub const ASC_INVALID_FIELD: u16 = 0x2400;
/// Sense key: not ready
pub const SENSE_NOT_READY: u8 = 0x02;
/// ASC/ASCQ: medium not present
pub const ASC_MEDIUM_NOT_PRESENT: u16 = 0x3A00;

/// Result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScsiCmdResult {
    /// Immediately turn to the Status phase
    Status(u8),
    /// Returns data to the initiator
    DataIn(Vec<u8>),
    /// Expects data written to target
    DataOut(usize),
}

/// Truncates a response to the allocation length of the CDB
fn allocation(mut data: Vec<u8>, alloc: usize) -> Vec<u8> {
    data.truncate(alloc);
    data
}

/// An abstraction of a generic SCSI target, on command level
#[typetag::serde]
pub trait ScsiTarget {
    fn unit_ready(&mut self) -> Result<ScsiCmdResult>;
    fn inquiry(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult>;

    /// Mode page contents, `None` for unsupported pages
    fn mode_sense(&mut self, page: u8) -> Option<Vec<u8>>;

    /// Request sense result (code, asc)
    fn req_sense(&mut self) -> (u8, u16);
    /// Latches a check condition for the next REQUEST SENSE
    fn set_cc(&mut self, code: u8, asc: u16);

    // For block devices
    fn blocksize(&self) -> Option<usize>;
    fn blocks(&self) -> Option<usize>;
    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8>;
    fn write(&mut self, block_offset: usize, data: &[u8]);

    /// Device-specific commands
    fn specific_cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult>;

    /// Returns the drives total capacity in bytes
    fn capacity(&self) -> Option<usize> {
        Some(self.blocksize()? * self.blocks()?)
    }

    /// Fails the command with a check condition
    fn check_condition(&mut self, code: u8, asc: u16) -> Result<ScsiCmdResult> {
        self.set_cc(code, asc);
        Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION))
    }

    /// Common block read path for READ(6) and READ(10)
    fn cmd_read(&mut self, blocknum: usize, blockcnt: usize) -> Result<ScsiCmdResult> {
        let Some(blocks) = self.blocks() else {
            log::warn!("READ command to non-block device");
            return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND);
        };
        if blocknum + blockcnt > blocks {
            log::error!("Reading beyond disk");
            return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE);
        }
        Ok(ScsiCmdResult::DataIn(self.read(blocknum, blockcnt)))
    }

    /// Common block write path for WRITE(6) and WRITE(10)
    fn cmd_write(
        &mut self,
        blocknum: usize,
        blockcnt: usize,
        outdata: Option<&[u8]>,
    ) -> Result<ScsiCmdResult> {
        let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
            log::warn!("WRITE command to non-block device");
            return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND);
        };
        if blocknum + blockcnt > blocks {
            log::error!("Writing beyond disk");
            return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE);
        }

        if let Some(data) = outdata {
            self.write(blocknum, data);
            Ok(ScsiCmdResult::Status(STATUS_GOOD))
        } else {
            Ok(ScsiCmdResult::DataOut(blockcnt * blocksize))
        }
    }

    /// Executes a command. `outdata` is `None` on first invocation; commands
    /// that return [`ScsiCmdResult::DataOut`] are invoked again with the
    /// data received from the initiator.
    fn cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        match cmd[0] {
            0x00 => {
                // TEST UNIT READY
                self.unit_ready()
            }
            0x03 => {
                // REQUEST SENSE
                let (key, asc) = self.req_sense();
                let mut result = vec![0; 14];
                result[0] = 0x70;
                result[2] = key & 0x0F;
                result[7] = result.len() as u8 - 8;
                result[12..14].copy_from_slice(&asc.to_be_bytes());
                self.set_cc(0, 0);
                Ok(ScsiCmdResult::DataIn(allocation(result, cmd[4].into())))
            }
            0x04 => {
                // FORMAT UNIT(6)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x08 => {
                // READ(6)
                let blocknum = (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                let blockcnt = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                self.cmd_read(blocknum, blockcnt)
            }
            0x0A => {
                // WRITE(6)
                let blocknum = (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                let blockcnt = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                self.cmd_write(blocknum, blockcnt, outdata)
            }
            0x12 => {
                // INQUIRY
                match self.inquiry(cmd)? {
                    ScsiCmdResult::DataIn(data) => {
                        Ok(ScsiCmdResult::DataIn(allocation(data, cmd[4].into())))
                    }
                    r => Ok(r),
                }
            }
            0x1A => {
                // MODE SENSE(6)
                let page = cmd[2] & 0x3F;
                let pages = if page == 0x3F {
                    let mut all = vec![];
                    for p in 0x01..0x3F {
                        if let Some(d) = self.mode_sense(p) {
                            all.extend(d);
                        }
                    }
                    all
                } else if let Some(d) = self.mode_sense(page) {
                    d
                } else {
                    log::warn!("Unsupported mode page {:02X}", page);
                    return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_FIELD);
                };

                // Header + one block descriptor
                let mut result = vec![0; 4 + 8];
                result[3] = 8;
                let blocks = self.blocks().unwrap_or(0) as u32;
                result[5..8].copy_from_slice(&blocks.to_be_bytes()[1..4]);
                let blocksize = self.blocksize().unwrap_or(0) as u32;
                result[9..12].copy_from_slice(&blocksize.to_be_bytes()[1..4]);
                result.extend(pages);
                result[0] = (result.len() - 1) as u8;
                Ok(ScsiCmdResult::DataIn(allocation(result, cmd[4].into())))
            }
            0x25 => {
                // READ CAPACITY(10)
                let mut result = vec![0; 8];
                let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
                    log::warn!("READ CAPACITY(10) command to non-block device");
                    return self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND);
                };

                let Some(last) = blocks.checked_sub(1) else {
                    log::warn!("READ CAPACITY(10) on empty medium");
                    return self.check_condition(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT);
                };

                result[0..4].copy_from_slice(&(last as u32).to_be_bytes());
                result[4..8].copy_from_slice(&(blocksize as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x28 => {
                // READ(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                self.cmd_read(blocknum, blockcnt)
            }
            0x2A => {
                // WRITE(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                self.cmd_write(blocknum, blockcnt, outdata)
            }
            0x2F => {
                // VERIFY(10)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            _ => self.specific_cmd(cmd, outdata),
        }
    }
}
