//! The memory region shared between host and coprocessor.
use alloc::{boxed::Box, vec, vec::Vec};
use bytemuck::AnyBitPattern;
use iomfb::SHMEM_SIZE;
use snafu::{ensure, Snafu};
use spin::Mutex;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum ShmemError {
    #[snafu(display("access of {len} bytes at {offset:#x} is outside shared memory"))]
    OutOfBounds { offset: usize, len: usize },
    #[snafu(display("shared memory must be {SHMEM_SIZE:#x} bytes, got {len:#x}"))]
    WrongSize { len: usize },
}

/// Backing storage of the shared region and the device virtual address the firmware sees it at.
///
/// Every access is bounds checked, the firmware supplies offsets and lengths.
pub struct SharedMemory {
    dva: u64,
    buf: Mutex<Box<[u8]>>,
}

impl SharedMemory {
    /// Allocate a zeroed region that the embedder has mapped at `dva`.
    pub fn new(dva: u64) -> SharedMemory {
        SharedMemory {
            dva,
            buf: Mutex::new(vec![0u8; SHMEM_SIZE].into_boxed_slice()),
        }
    }

    /// Wrap storage the embedder allocated itself, e.g. device-coherent memory.
    pub fn from_storage(storage: Box<[u8]>, dva: u64) -> Result<SharedMemory, ShmemError> {
        ensure!(
            storage.len() == SHMEM_SIZE,
            WrongSizeSnafu { len: storage.len() }
        );
        Ok(SharedMemory {
            dva,
            buf: Mutex::new(storage),
        })
    }

    pub fn dva(&self) -> u64 {
        self.dva
    }

    fn check(offset: usize, len: usize) -> Result<core::ops::Range<usize>, ShmemError> {
        match offset.checked_add(len) {
            Some(end) if end <= SHMEM_SIZE => Ok(offset..end),
            _ => Err(ShmemError::OutOfBounds { offset, len }),
        }
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), ShmemError> {
        let r = Self::check(offset, out.len())?;
        out.copy_from_slice(&self.buf.lock()[r]);
        Ok(())
    }

    pub fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, ShmemError> {
        let mut v = vec![0u8; len];
        self.read(offset, &mut v)?;
        Ok(v)
    }

    /// Read a fixed-layout record.
    pub fn read_pod<T: AnyBitPattern>(&self, offset: usize) -> Result<T, ShmemError> {
        let r = Self::check(offset, core::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&self.buf.lock()[r]))
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), ShmemError> {
        let r = Self::check(offset, data.len())?;
        self.buf.lock()[r].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&self, offset: usize, len: usize, byte: u8) -> Result<(), ShmemError> {
        let r = Self::check(offset, len)?;
        self.buf.lock()[r].fill(byte);
        Ok(())
    }
}
