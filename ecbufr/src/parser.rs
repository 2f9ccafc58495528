use crate::block::BUFRFile;
use crate::config::{CodecConfig, global_config};
use crate::errors::{Error, Result};
use crate::structs::versions::BUFRMessage;
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::{fs::File, io::Read, path::Path};

const BUFR_PATTERN: &[u8] = b"BUFR";
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Parses every message of a file, inflating gzip input on the fly.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<BUFRFile> {
    parse_with(path, global_config())
}

pub fn parse_with<P: AsRef<Path>>(path: P, config: &CodecConfig) -> Result<BUFRFile> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(BUFRFile::new());
    }
    // SAFETY: the map is read only and dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.starts_with(&GZIP_MAGIC) {
        let mut gz_decoder = GzDecoder::new(&mmap[..]);
        let mut bytes = vec![];
        gz_decoder.read_to_end(&mut bytes)?;
        parse_bytes(&bytes, config)
    } else {
        parse_bytes(&mmap, config)
    }
}

fn find_bufr_offsets(bytes: &[u8]) -> Vec<usize> {
    bytes
        .windows(BUFR_PATTERN.len())
        .enumerate()
        .filter(|(_, w)| *w == BUFR_PATTERN)
        .map(|(i, _)| i)
        .collect()
}

fn message_at_offset(bytes: &[u8], offset: usize) -> Result<&[u8]> {
    let section0 = bytes
        .get(offset..offset + 8)
        .ok_or(Error::Truncated { section: 0 })?;
    let total_length = u32::from_be_bytes([0, section0[4], section0[5], section0[6]]) as usize;
    bytes
        .get(offset..offset + total_length)
        .ok_or(Error::LengthMismatch {
            declared: total_length,
            actual: bytes.len() - offset,
        })
}

/// Parses every message found in `bytes`. Markers inside a message already
/// parsed are skipped; a marker that does not start a valid message is
/// logged and skipped.
pub fn parse_bytes(bytes: &[u8], config: &CodecConfig) -> Result<BUFRFile> {
    let mut file_block = BUFRFile::new();
    let mut next_free = 0usize;

    for offset in find_bufr_offsets(bytes) {
        if offset < next_free {
            continue;
        }
        match message_at_offset(bytes, offset).and_then(BUFRMessage::parse) {
            Ok(mut message) => {
                message.header = bytes[next_free..offset]
                    .iter()
                    .copied()
                    .filter(|b| *b != 0x04)
                    .collect();
                if config.verbose {
                    let tables = message.table_info();
                    tracing::info!(
                        "BUFR edition {} at offset {}, {} bytes, centre {}/{}, tables {}/{}",
                        message.edition(),
                        offset,
                        message.total_length(),
                        tables.center_id,
                        tables.subcenter_id,
                        tables.master_table_version,
                        tables.local_table_version
                    );
                }
                next_free = offset + message.total_length();
                file_block.push_message(offset, message);
            }
            Err(e) => {
                tracing::warn!("Failed to parse BUFR message at offset {}: {}", offset, e);
            }
        }
    }

    Ok(file_block)
}
