//! Memory descriptors handed out to the firmware.
//!
//! The firmware asks the host to allocate buffers and to map register ranges for it. Each such
//! mapping is identified towards the firmware by a small index into a fixed table; index 0 is
//! never handed out.

use bitvec::{array::BitArray, order::Lsb0, BitArr};
use snafu::{ensure, Snafu};

/// Number of descriptor slots.
pub const MAX_MAPPINGS: usize = 128;

/// Allocation granularity of descriptor buffers.
pub const PAGE_SIZE: u64 = 0x1000;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum MemDescError {
    #[snafu(display("all {MAX_MAPPINGS} memory descriptors are in use"))]
    TableFull,
    #[snafu(display("memory descriptor {id} is out of range"))]
    OutOfRange { id: u32 },
    #[snafu(display("memory descriptor {id} is not live"))]
    NotLive { id: u32 },
}

/// A device-coherent allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaBuffer {
    /// Address of the buffer as seen by the coprocessor's own mapper.
    pub dva: u64,
    pub size: u64,
    /// Embedder-defined handle, passed back on free.
    pub handle: u64,
}

/// The DMA mapping services the memory descriptor callbacks are built on.
pub trait Dma: Send + Sync {
    fn alloc_coherent(&self, size: u64) -> Option<DmaBuffer>;
    fn free_coherent(&self, buf: DmaBuffer);

    /// Map a physical range (registers) for the coprocessor, returning its device address.
    fn map_resource(&self, paddr: u64, size: u64) -> Option<u64>;
    fn unmap_resource(&self, dva: u64, size: u64);

    /// Map a buffer into the PIODMA address space, returning its address there.
    fn map_piodma(&self, buf: &DmaBuffer) -> Option<u64>;
    fn unmap_piodma(&self, buf: &DmaBuffer, dva: u64);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemDesc {
    /// A buffer allocated on the firmware's behalf.
    Buffer {
        buf: DmaBuffer,
        /// PIODMA address, if the buffer is currently mapped there.
        piodma: Option<u64>,
    },
    /// A mapped register range.
    Register { paddr: u64, size: u64, dva: u64 },
}

/// Table of live descriptors.
pub struct MemDescTable {
    live: BitArr!(for MAX_MAPPINGS, in u64, Lsb0),
    slots: [Option<MemDesc>; MAX_MAPPINGS],
}

impl Default for MemDescTable {
    fn default() -> Self {
        let mut live = BitArray::ZERO;
        // id 0 is reserved
        live.set(0, true);
        MemDescTable {
            live,
            slots: [None; MAX_MAPPINGS],
        }
    }
}

impl MemDescTable {
    /// Store `desc` in a free slot and return its id.
    pub fn insert(&mut self, desc: MemDesc) -> Result<u32, MemDescError> {
        let id = self.live.first_zero().ok_or(MemDescError::TableFull)?;
        self.live.set(id, true);
        self.slots[id] = Some(desc);
        Ok(id as u32)
    }

    fn index(&self, id: u32) -> Result<usize, MemDescError> {
        let i = id as usize;
        ensure!(i > 0 && i < MAX_MAPPINGS, OutOfRangeSnafu { id });
        ensure!(self.live[i], NotLiveSnafu { id });
        Ok(i)
    }

    pub fn get(&self, id: u32) -> Result<&MemDesc, MemDescError> {
        let i = self.index(id)?;
        self.slots[i].as_ref().ok_or(MemDescError::NotLive { id })
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut MemDesc, MemDescError> {
        let i = self.index(id)?;
        self.slots[i].as_mut().ok_or(MemDescError::NotLive { id })
    }

    /// Free the slot of `id`, returning what it held.
    pub fn remove(&mut self, id: u32) -> Result<MemDesc, MemDescError> {
        let i = self.index(id)?;
        self.live.set(i, false);
        self.slots[i].take().ok_or(MemDescError::NotLive { id })
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.live.count_ones() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every descriptor, for session teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = MemDesc> + '_ {
        self.live = BitArray::ZERO;
        self.live.set(0, true);
        self.slots.iter_mut().filter_map(Option::take)
    }
}

/// Round a buffer request up to the allocation granularity.
pub fn round_up_to_page(size: u64) -> Option<u64> {
    Some(size.checked_add(PAGE_SIZE - 1)? & !(PAGE_SIZE - 1))
}
