//! Save states of a complete SCSI subsystem

use std::io::Read;

use anyhow::{Result, bail};
use binrw::io::NoSeek;
use binrw::{BinRead, BinWrite, NullString, binrw};

use crate::scsi::subsystem::ScsiSubsystem;

#[binrw]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SaveCompression {
    #[brw(magic = 1u8)]
    None,
    #[brw(magic = 2u8)]
    Zstd,
}

#[binrw]
#[brw(little, magic = b"NCRSS")]
struct SaveHeader {
    /// Header/file version
    pub version: u16,
    /// Type of compression used
    pub compression: SaveCompression,
    /// Level of compression
    pub compression_level: u8,
    /// Chip variant as string
    pub variant: NullString,
    /// Crate version that wrote the state
    pub crate_version: NullString,
}

const END_OF_CHUNK: &[u8] = b"EOFC";

/// Writes a save state to the given writer
pub fn save_state_to<W: std::io::Write + std::io::Seek>(
    mut writer: W,
    subsystem: &ScsiSubsystem,
) -> Result<()> {
    let compression_level = 0; // library default

    let header = SaveHeader {
        version: 1,
        compression: SaveCompression::Zstd,
        compression_level,
        variant: subsystem.controller().variant().to_string().into(),
        crate_version: crate::build_version().into(),
    };
    header.write(&mut writer)?;

    let compressor =
        NoSeek::new(zstd::stream::Encoder::new(writer, compression_level.into())?.auto_finish());
    let mut compressor = postcard::to_io(subsystem, compressor)?;
    END_OF_CHUNK.write(&mut compressor)?;

    Ok(())
}

/// Loads a save state from a given reader
pub fn load_state_from<R: std::io::Read + std::io::Seek>(mut reader: R) -> Result<ScsiSubsystem> {
    let header = SaveHeader::read(&mut reader)?;

    if header.version != 1 {
        bail!("Invalid state file version {}", header.version);
    }

    if header.compression != SaveCompression::Zstd {
        bail!("Unsupported compression method {:?}", header.compression);
    }

    log::debug!(
        "Loading {} state written by version {}",
        header.variant,
        header.crate_version
    );

    let decompressor = NoSeek::new(zstd::stream::Decoder::new(reader)?);

    let mut buf = [0; 1024];
    let (subsystem, (mut decompressor, _)) =
        postcard::from_io::<ScsiSubsystem, _>((decompressor, &mut buf))?;

    let mut eofcbuf = [0; END_OF_CHUNK.len()];
    decompressor.read_exact(&mut eofcbuf)?;
    if eofcbuf != END_OF_CHUNK {
        bail!("Expected end of chunk but did not find it");
    }

    if decompressor.bytes().next().is_some() {
        bail!("Expected EOF but found more data");
    }

    Ok(subsystem)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::ControllerConfig;

    #[test]
    fn bad_magic() {
        let data = b"SNOWS\x01\x00\x02\x00".to_vec();
        assert!(load_state_from(Cursor::new(data)).is_err());
    }

    #[test]
    fn bad_version() {
        let mut data = Cursor::new(vec![]);
        save_state_to(&mut data, &ScsiSubsystem::new(&ControllerConfig::default())).unwrap();
        let mut data = data.into_inner();
        data[5] = 2;
        assert!(load_state_from(Cursor::new(data)).is_err());
    }

    #[test]
    fn truncated() {
        let mut data = Cursor::new(vec![]);
        save_state_to(&mut data, &ScsiSubsystem::new(&ControllerConfig::default())).unwrap();
        let mut data = data.into_inner();
        data.truncate(data.len() - 4);
        assert!(load_state_from(Cursor::new(data)).is_err());
    }
}
