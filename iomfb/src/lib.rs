//! Wire definitions for the IOMFB service of the Apple display coprocessor (DCP).
//!
//! Everything in here describes bytes as the firmware sees them: the 64-bit doorbell messages,
//! the layout of the shared-memory region, packet headers, method tags and the fixed-layout
//! records that are exchanged inside packets. No protocol state lives here.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod context;
pub mod message;
pub mod methods;
pub mod packet;
pub mod records;
pub mod swap;

pub use context::ContextId;
pub use message::{Message, MessageType};
pub use methods::{FirmwareVersion, Method};
pub use packet::{CallbackId, PacketHeader};

/// Mailbox endpoint of the IOMFB service.
pub const IOMFB_ENDPOINT: u8 = 0x37;

/// Size of the region shared between host and coprocessor.
pub const SHMEM_SIZE: usize = 0x10_0000;

/// Maximum number of nested calls outstanding on one channel.
pub const MAX_CALL_DEPTH: usize = 8;

/// Packets on a channel are placed back to back on this alignment.
pub const PACKET_ALIGNMENT: usize = 0x40;

/// Number of surfaces that can be attached to one swap.
pub const SWAP_SURFACES: usize = 4;

/// Largest notch height that can be hidden from the reported modes.
pub const MAX_NOTCH_HEIGHT: u32 = 160;
