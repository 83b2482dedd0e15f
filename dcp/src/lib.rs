//! Host side of the IOMFB protocol spoken by the Apple display coprocessor (DCP).
//!
//! The [Dcp] engine multiplexes nested calls over a shared memory region, answers the callbacks
//! the firmware makes while it boots and swaps, and extracts the display modes the panel
//! supports. It does not touch hardware itself: the embedder supplies the mailbox, DMA mapper,
//! clock and DRM layer through the traits in [transport], [memdesc] and [display].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod channel;
pub mod chunks;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod memdesc;
pub mod modes;
pub mod parser;
pub mod rpc;
pub mod shmem;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::Error;
pub use rpc::Dcp;
