//! Per-context call stacks.
//!
//! Every context keeps a stack of outstanding packets. Replies are strictly nested, so a packet
//! is always acked after the packets pushed above it. The stack also decides where the next
//! packet goes: packets on one context are placed back to back, each one starting at the end of
//! the packet below it.
use iomfb::{ContextId, MAX_CALL_DEPTH};
use smallvec::SmallVec;
use snafu::Snafu;

/// Size of the region each context places its packets in.
pub const REGION_SIZE: usize = 0x8000;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum ChannelError {
    #[snafu(display("{context} nested deeper than {MAX_CALL_DEPTH} calls"))]
    Overflow { context: ContextId },
    #[snafu(display("ack on {context} with nothing outstanding"))]
    Underflow { context: ContextId },
    #[snafu(display("packet of {length} bytes at {offset:#x} on {context} does not fit"))]
    PacketTooLarge {
        context: ContextId,
        offset: u16,
        length: u32,
    },
    #[snafu(display("no calls can be made on {context}"))]
    ReceiveOnly { context: ContextId },
}

/// An outstanding packet.
pub struct Frame<C> {
    /// Run when the packet is acked.
    pub continuation: Option<C>,
    /// Absolute shared memory offset of the response area.
    pub output: usize,
    /// Size of the response area.
    pub output_len: usize,
    /// Offset, relative to the context's region, just past this packet.
    pub end: u16,
}

/// The stack of one context.
pub struct Channel<C> {
    context: ContextId,
    frames: SmallVec<[Frame<C>; MAX_CALL_DEPTH]>,
}

impl<C> Channel<C> {
    /// An empty stack for `context`.
    pub fn new(context: ContextId) -> Self {
        Channel {
            context,
            frames: SmallVec::new(),
        }
    }

    /// The context this stack belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Number of outstanding packets.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// A channel with outstanding packets must not be given a new outer call.
    pub fn busy(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Where a packet pushed at `depth` starts.
    pub fn packet_start_offset(&self, depth: usize) -> u16 {
        match depth {
            0 => 0,
            d => self.frames.get(d - 1).map_or(0, |f| f.end),
        }
    }

    /// Where the next packet on this channel starts.
    pub fn next_packet_offset(&self) -> u16 {
        self.packet_start_offset(self.depth())
    }

    /// Record a new outstanding packet, returning the depth it was pushed at.
    pub fn push(&mut self, frame: Frame<C>) -> Result<usize, ChannelError> {
        let depth = self.depth();
        if depth >= MAX_CALL_DEPTH {
            return Err(ChannelError::Overflow {
                context: self.context,
            });
        }
        self.frames.push(frame);
        Ok(depth)
    }

    /// Remove the innermost outstanding packet.
    pub fn pop(&mut self) -> Result<Frame<C>, ChannelError> {
        self.frames.pop().ok_or(ChannelError::Underflow {
            context: self.context,
        })
    }

    /// Forget every outstanding packet, for session teardown.
    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

/// The stacks of every context.
pub struct Channels<C> {
    cb: Channel<C>,
    cmd: Channel<C>,
    async_: Channel<C>,
    oobcb: Channel<C>,
    oobcmd: Channel<C>,
}

impl<C> Default for Channels<C> {
    fn default() -> Self {
        Channels {
            cb: Channel::new(ContextId::Callback),
            cmd: Channel::new(ContextId::Command),
            async_: Channel::new(ContextId::Async),
            oobcb: Channel::new(ContextId::OobCallback),
            oobcmd: Channel::new(ContextId::OobCommand),
        }
    }
}

impl<C> Channels<C> {
    pub fn get_mut(&mut self, context: ContextId) -> &mut Channel<C> {
        match context {
            ContextId::Callback => &mut self.cb,
            ContextId::Command => &mut self.cmd,
            ContextId::Async => &mut self.async_,
            ContextId::OobCallback => &mut self.oobcb,
            ContextId::OobCommand => &mut self.oobcmd,
        }
    }

    /// The command channel outer calls are made on.
    pub fn command(&self, oob: bool) -> &Channel<C> {
        if oob {
            &self.oobcmd
        } else {
            &self.cmd
        }
    }

    /// The context the next call uses: the command context when no command is outstanding,
    /// otherwise the matching callback context.
    pub fn call_context(&self, oob: bool) -> ContextId {
        ContextId::for_call(oob, self.command(oob).busy())
    }

    pub fn reset(&mut self) {
        for ctx in ContextId::ALL {
            self.get_mut(ctx).reset();
        }
    }
}
