use bytes::{BufMut, BytesMut};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::core::config::{BasicType, CollectionType, PredicateParams, TensorType};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SerialNum;

const MAGIC: u32 = 0x4154_5231; // "ATR1"
const VERSION: u32 = 1;

/// Header written ahead of every attribute snapshot payload. The
/// initializer compares it against the configured type before loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeHeader {
    pub name: String,
    pub basic_type: BasicType,
    pub collection: CollectionType,
    pub tensor_type: Option<TensorType>,
    pub predicate_params: Option<PredicateParams>,
    pub create_serial: SerialNum,
    pub docid_limit: u32,
}

impl AttributeHeader {
    /// Type check between a persisted header and the configured attribute:
    /// basic type, collection (incl. weighted-set flags), tensor type and
    /// predicate params must all agree.
    pub fn type_matches(&self, cfg: &crate::core::config::AttributeConfig) -> bool {
        if self.basic_type != cfg.basic_type || self.collection != cfg.collection {
            return false;
        }
        if cfg.basic_type == BasicType::Tensor && self.tensor_type != cfg.tensor_type {
            return false;
        }
        if cfg.basic_type == BasicType::Predicate && self.predicate_params != cfg.predicate_params {
            return false;
        }
        true
    }
}

/// One attribute snapshot in memory: typed header plus the attribute's
/// serialized payload (opaque to the directory layer).
#[derive(Debug)]
pub struct SnapshotData {
    pub header: AttributeHeader,
    pub payload: Vec<u8>,
}

/// Writes `<dir>/<name>.dat`: magic, version, bincode header, crc32 and
/// lz4-compressed payload. The file is synced; directory syncs are the
/// caller's (flush protocol) responsibility.
pub fn write_snapshot_file(path: &Path, data: &SnapshotData) -> Result<()> {
    let header_bytes = bincode::serialize(&data.header)?;
    let compressed = lz4_flex::compress_prepend_size(&data.payload);
    let checksum = crc32fast::hash(&compressed);

    let mut buf = BytesMut::with_capacity(20 + header_bytes.len() + compressed.len());
    buf.put_u32_le(MAGIC);
    buf.put_u32_le(VERSION);
    buf.put_u32_le(header_bytes.len() as u32);
    buf.put_slice(&header_bytes);
    buf.put_u32_le(compressed.len() as u32);
    buf.put_u32_le(checksum);
    buf.put_slice(&compressed);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

struct RawSnapshot {
    mmap: Mmap,
    header: AttributeHeader,
    payload_offset: usize,
    payload_len: usize,
    checksum: u32,
}

fn open_raw(path: &Path) -> Result<RawSnapshot> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    if mmap.len() < 20 {
        return Err(Error::new(ErrorKind::Parse, format!("snapshot file too short: {}", path.display())));
    }
    let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
    if magic != MAGIC || version != VERSION {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("bad snapshot magic/version in {}", path.display()),
        ));
    }
    let header_len = u32::from_le_bytes(mmap[8..12].try_into().unwrap()) as usize;
    let header_end = 12 + header_len;
    if mmap.len() < header_end + 8 {
        return Err(Error::new(ErrorKind::Parse, format!("truncated snapshot header: {}", path.display())));
    }
    let header: AttributeHeader = bincode::deserialize(&mmap[12..header_end])?;
    let payload_len = u32::from_le_bytes(mmap[header_end..header_end + 4].try_into().unwrap()) as usize;
    let checksum = u32::from_le_bytes(mmap[header_end + 4..header_end + 8].try_into().unwrap());
    let payload_offset = header_end + 8;
    if mmap.len() < payload_offset + payload_len {
        return Err(Error::new(ErrorKind::Parse, format!("truncated snapshot payload: {}", path.display())));
    }
    Ok(RawSnapshot { mmap, header, payload_offset, payload_len, checksum })
}

/// Reads only the header; used by the initializer to vet a snapshot before
/// paying for the payload.
pub fn read_header(path: &Path) -> Result<AttributeHeader> {
    Ok(open_raw(path)?.header)
}

/// Reads and verifies a complete snapshot file.
pub fn read_snapshot_file(path: &Path) -> Result<SnapshotData> {
    let raw = open_raw(path)?;
    let compressed = &raw.mmap[raw.payload_offset..raw.payload_offset + raw.payload_len];
    if crc32fast::hash(compressed) != raw.checksum {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("snapshot checksum mismatch: {}", path.display()),
        ));
    }
    let payload = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| Error::new(ErrorKind::Parse, format!("snapshot decompression failed: {}", e)))?;
    Ok(SnapshotData { header: raw.header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AttributeConfig;

    fn header() -> AttributeHeader {
        AttributeHeader {
            name: "price".into(),
            basic_type: BasicType::Int32,
            collection: CollectionType::Single,
            tensor_type: None,
            predicate_params: None,
            create_serial: 7,
            docid_limit: 100,
        }
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("price.dat");
        let data = SnapshotData { header: header(), payload: vec![1, 2, 3, 250] };
        write_snapshot_file(&path, &data).unwrap();

        let loaded_header = read_header(&path).unwrap();
        assert_eq!(loaded_header, data.header);
        let loaded = read_snapshot_file(&path).unwrap();
        assert_eq!(loaded.payload, data.payload);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("price.dat");
        let data = SnapshotData { header: header(), payload: vec![9; 64] };
        write_snapshot_file(&path, &data).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(read_snapshot_file(&path).is_err());
        // header still readable
        assert!(read_header(&path).is_ok());
    }

    #[test]
    fn header_type_check() {
        let h = header();
        let cfg = AttributeConfig::single(BasicType::Int32);
        assert!(h.type_matches(&cfg));
        let cfg64 = AttributeConfig::single(BasicType::Int64);
        assert!(!h.type_matches(&cfg64));
    }
}
