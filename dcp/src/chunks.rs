//! Reassembly of property values the firmware sends in pieces.
use alloc::vec::Vec;
use snafu::{ensure, OptionExt, Snafu};

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum ChunkError {
    #[snafu(display("a property transfer is already in progress"))]
    AlreadyActive,
    #[snafu(display("no property transfer is in progress"))]
    NotActive,
    #[snafu(display("chunk of {len} bytes at {offset} overruns a {length} byte transfer"))]
    OutOfBounds {
        offset: usize,
        len: usize,
        length: usize,
    },
    #[snafu(display("could not allocate {length} bytes for a property transfer"))]
    Alloc { length: usize },
}

/// At most one transfer is active at a time.
#[derive(Debug, Default)]
pub struct ChunkedTransfer {
    data: Option<Vec<u8>>,
}

impl ChunkedTransfer {
    pub fn is_active(&self) -> bool {
        self.data.is_some()
    }

    /// Begin a transfer of `length` bytes.
    pub fn start(&mut self, length: usize) -> Result<(), ChunkError> {
        ensure!(self.data.is_none(), AlreadyActiveSnafu);
        let mut data = Vec::new();
        data.try_reserve_exact(length)
            .map_err(|_| ChunkError::Alloc { length })?;
        data.resize(length, 0);
        self.data = Some(data);
        Ok(())
    }

    /// Copy `bytes` to `offset` within the transfer.
    pub fn append(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ChunkError> {
        let data = self.data.as_mut().context(NotActiveSnafu)?;
        let length = data.len();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= length)
            .context(OutOfBoundsSnafu {
                offset,
                len: bytes.len(),
                length,
            })?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// End the transfer, handing over the reassembled value.
    pub fn finish(&mut self) -> Result<Vec<u8>, ChunkError> {
        self.data.take().context(NotActiveSnafu)
    }

    /// Drop any transfer in progress.
    pub fn abort(&mut self) {
        self.data = None;
    }
}
