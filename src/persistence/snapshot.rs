//! Snapshot Codec
//!
//! A snapshot is a plain sequence of records:
//! `u32 BE key length | key bytes | u32 BE value length | value bytes`.

use crate::error::{NearCacheError, Result};

const LENGTH_PREFIX: usize = 4;

/// Appends one record to `buf`.
pub fn encode_record(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> Result<()> {
    for chunk in [key, value] {
        let len = u32::try_from(chunk.len()).map_err(|_| {
            NearCacheError::Serialization(format!("record part of {} bytes is too large", chunk.len()))
        })?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(chunk);
    }
    Ok(())
}

// == Snapshot Reader ==
/// Iterates the records of an in-memory snapshot without copying.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_chunk(&mut self) -> Option<&'a [u8]> {
        let prefix_end = self.pos.checked_add(LENGTH_PREFIX)?;
        let prefix: [u8; LENGTH_PREFIX] = self.data.get(self.pos..prefix_end)?.try_into().ok()?;
        let len = u32::from_be_bytes(prefix) as usize;
        let end = prefix_end.checked_add(len)?;
        let chunk = self.data.get(prefix_end..end)?;
        self.pos = end;
        Some(chunk)
    }
}

impl<'a> Iterator for SnapshotReader<'a> {
    type Item = Result<(&'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        match (self.read_chunk(), self.read_chunk()) {
            (Some(key), Some(value)) => Some(Ok((key, value))),
            _ => {
                self.pos = self.data.len();
                Some(Err(NearCacheError::CorruptSnapshot(format!(
                    "truncated record at byte {}",
                    start
                ))))
            }
        }
    }
}
