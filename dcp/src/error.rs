//! Driver-wide error type.

use alloc::string::String;
use iomfb::ContextId;
use snafu::Snafu;

use crate::{
    channel::ChannelError, chunks::ChunkError, config::ConfigError, memdesc::MemDescError,
    modes::Timing, parser::ParseError, shmem::ShmemError,
};

/// Errors surfaced by the engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A property document from the firmware could not be parsed.
    Parse { reason: String, source: ParseError },
    /// A channel's call stack was violated.
    Channel { reason: String, source: ChannelError },
    /// A packet reached outside the shared region.
    SharedMemory { reason: String, source: ShmemError },
    /// A memory descriptor request could not be served.
    MemDesc { reason: String, source: MemDescError },
    /// A chunked property transfer went wrong.
    Chunk { reason: String, source: ChunkError },
    /// The configuration is invalid.
    Config { source: ConfigError },

    /// The firmware sent something the engine cannot reconcile with its own state.
    #[snafu(display("protocol desync: {reason}"))]
    Desync { reason: String },

    /// The coprocessor crashed or the session was torn down after a desync.
    #[snafu(display("coprocessor has crashed"))]
    Crashed,

    /// The boot sequence has not completed.
    #[snafu(display("coprocessor is not active"))]
    NotReady,

    #[snafu(display("timed out waiting for {what}"))]
    Timeout { what: &'static str },

    /// A new outer call was attempted while another one is outstanding.
    #[snafu(display("{context} has a call outstanding"))]
    ChannelBusy { context: ContextId },

    #[snafu(display("no display mode matches {timing:?}"))]
    NoMatchingMode { timing: Timing },
}

impl Error {
    /// True for errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Channel { .. } | Error::SharedMemory { .. } | Error::Desync { .. }
        )
    }
}
