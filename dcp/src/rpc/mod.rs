//! The RPC engine.
//!
//! All protocol state lives in one [State] behind a lock. Firmware messages are handled under
//! that lock by [Dcp::receive]; host calls take it, write their packet and ring the doorbell, and
//! leave a continuation behind that runs when the firmware acks. The engine never blocks while
//! holding the lock: the blocking entry points (readiness, modeset, power) release it and wait on
//! a [Completion] that a continuation signals.

mod boot;
mod callbacks;
mod calls;
mod power;
mod swap;

use alloc::{boxed::Box, format, sync::Arc, vec::Vec};
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use iomfb::{
    packet::{align_packet, HEADER_SIZE},
    CallbackId, ContextId, Message, MessageType, Method, PacketHeader, IOMFB_ENDPOINT,
};
use snafu::{ensure, OptionExt, ResultExt};
use spin::{Mutex, Once};

use crate::{
    channel::{ChannelError, Channels, Frame, REGION_SIZE},
    chunks::ChunkedTransfer,
    config::Config,
    display::{DrmClient, FramebufferId},
    error::*,
    memdesc::{Dma, MemDesc, MemDescTable},
    modes::{DisplayMode, PanelSize, Timing},
    shmem::SharedMemory,
    sync::Completion,
    transport::{Clock, Transport},
};

use callbacks::CallbackReply;

/// Run when the firmware acks a host call, with the bytes it wrote into the response area.
pub type Continuation = Box<dyn FnOnce(&Dcp, &mut State, &[u8]) -> Result<(), Error> + Send>;

/// Everything the engine mutates while handling a message.
pub struct State {
    channels: Channels<Continuation>,
    /// Set while a firmware message is handled; host calls made meanwhile are nested calls.
    dispatching: bool,
    memdesc: MemDescTable,
    transfer: ChunkedTransfer,
    modes: Vec<DisplayMode>,
    panel: PanelSize,
    main_display: bool,
    connected: bool,
    valid_mode: bool,
    surfaces_cleared: bool,
    /// Framebuffers replaced since the last submitted swap.
    swapped_out: Vec<FramebufferId>,
    /// Framebuffers replaced by each submitted swap, released when that swap completes.
    in_flight: Vec<(u32, Vec<FramebufferId>)>,
}

impl State {
    fn new() -> State {
        State {
            channels: Channels::default(),
            dispatching: false,
            memdesc: MemDescTable::default(),
            transfer: ChunkedTransfer::default(),
            modes: Vec::new(),
            panel: PanelSize::default(),
            main_display: false,
            connected: false,
            valid_mode: false,
            surfaces_cleared: false,
            swapped_out: Vec::new(),
            in_flight: Vec::new(),
        }
    }
}

/// One IOMFB session with a display coprocessor.
pub struct Dcp {
    config: Config,
    transport: Arc<dyn Transport>,
    dma: Arc<dyn Dma>,
    clock: Arc<dyn Clock>,
    client: Once<Arc<dyn DrmClient>>,
    state: Mutex<State>,
    start_done: Completion,
    active: AtomicBool,
    crashed: AtomicBool,
}

impl Dcp {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        dma: Arc<dyn Dma>,
        clock: Arc<dyn Clock>,
    ) -> Result<Dcp, Error> {
        config.validate().context(ConfigSnafu)?;
        Ok(Dcp {
            config,
            transport,
            dma,
            clock,
            client: Once::new(),
            state: Mutex::new(State::new()),
            start_done: Completion::new(),
            active: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        })
    }

    /// Connect the DRM layer. Only the first client is kept.
    pub fn link(&self, client: Arc<dyn DrmClient>) {
        self.client.call_once(|| client);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn with_client(&self, f: impl FnOnce(&dyn DrmClient)) {
        if let Some(c) = self.client.get() {
            f(c.as_ref());
        }
    }

    fn shmem(&self) -> &SharedMemory {
        self.transport.shared_memory()
    }

    fn vblank_delay(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.vblank_delay_ms)
    }

    /// Announce the shared memory region, starting the handshake.
    pub fn start(&self) {
        let dva = self.shmem().dva() | self.config.asc_dram_mask;
        log::info!("starting IOMFB with shared memory at {dva:#x}");
        self.transport
            .send_message(IOMFB_ENDPOINT, Message::set_shmem(dva).into());
    }

    /// Handle a message the coprocessor sent on `endpoint`.
    pub fn receive(&self, endpoint: u8, message: u64) {
        if endpoint != IOMFB_ENDPOINT {
            log::warn!("ignoring message {message:#x} for endpoint {endpoint:#x}");
            return;
        }
        let msg = Message::from(message);
        let mut st = self.state.lock();
        if self.is_crashed() {
            log::debug!("dropping {msg:?}, session has crashed");
            return;
        }

        st.dispatching = true;
        let res = match msg.message_type() {
            Ok(MessageType::Initialized) => self.start_signal(&mut st),
            Ok(MessageType::Msg) => self.handle_packet(&mut st, msg),
            _ => {
                log::warn!("ignoring unknown message {message:#x}");
                Ok(())
            }
        };
        st.dispatching = false;

        if let Err(e) = res {
            self.fail(&mut st, e);
        }
    }

    fn handle_packet(&self, st: &mut State, msg: Message) -> Result<(), Error> {
        let context = msg.context_id().map_err(|raw| Error::Desync {
            reason: format!("message for unknown context {raw}"),
        })?;
        if msg.ack() {
            self.handle_ack(st, context)
        } else {
            self.handle_callback(st, context, msg.offset(), msg.length())
        }
    }

    /// Log an error from message handling, tearing the session down if it cannot continue.
    fn fail(&self, st: &mut State, e: Error) {
        if e.is_fatal() {
            log::error!("{e}; session is no longer usable");
            self.mark_crashed(st);
        } else {
            log::warn!("{e}");
        }
    }

    /// Write a packet for `method` and ring the doorbell.
    ///
    /// Outside of message handling only outer calls are possible, and they are refused while the
    /// command channel has a call outstanding.
    pub fn push(
        &self,
        st: &mut State,
        oob: bool,
        method: Method,
        input: &[u8],
        out_len: usize,
        continuation: Option<Continuation>,
    ) -> Result<(), Error> {
        ensure!(!self.is_crashed(), CrashedSnafu);
        if !st.dispatching {
            let cmd = st.channels.command(oob);
            ensure!(
                !cmd.busy(),
                ChannelBusySnafu {
                    context: cmd.context()
                }
            );
        }

        let context = st.channels.call_context(oob);
        let entry = method.entry(self.config.firmware);
        let header = PacketHeader::for_name(&entry.tag, input.len() as u32, out_len as u32);
        let ch = st.channels.get_mut(context);
        let offset = ch.next_packet_offset();
        let len = header.packet_len();
        let end = offset as usize + align_packet(len);
        if end > REGION_SIZE {
            return Err(ChannelError::PacketTooLarge {
                context,
                offset,
                length: len as u32,
            })
            .context(ChannelSnafu { reason: entry.name });
        }
        let base = context
            .tx_offset()
            .context(crate::channel::ReceiveOnlySnafu { context })
            .context(ChannelSnafu { reason: entry.name })?;

        let start = base + offset as usize;
        let output = start + HEADER_SIZE + input.len();
        self.shmem()
            .write(start, &header.to_bytes())
            .and_then(|_| self.shmem().write(start + HEADER_SIZE, input))
            .context(SharedMemorySnafu { reason: entry.name })?;

        ch.push(Frame {
            continuation,
            output,
            output_len: out_len,
            end: end as u16,
        })
        .context(ChannelSnafu { reason: entry.name })?;

        log::trace!("push {} on {context} at {offset:#x}", entry.name);
        self.transport.send_message(
            IOMFB_ENDPOINT,
            Message::packet(context, offset, len as u32).into(),
        );
        Ok(())
    }

    /// Make an outer call on behalf of the embedder.
    pub fn call(
        &self,
        oob: bool,
        method: Method,
        input: &[u8],
        out_len: usize,
        continuation: Option<Continuation>,
    ) -> Result<(), Error> {
        let mut st = self.state.lock();
        self.push(&mut st, oob, method, input, out_len, continuation)
    }

    fn handle_ack(&self, st: &mut State, context: ContextId) -> Result<(), Error> {
        let frame = st
            .channels
            .get_mut(context)
            .pop()
            .context(ChannelSnafu { reason: "ack" })?;
        log::trace!("ack on {context}");
        match frame.continuation {
            Some(cont) => {
                let resp = self
                    .shmem()
                    .read_vec(frame.output, frame.output_len)
                    .context(SharedMemorySnafu {
                        reason: "reading response",
                    })?;
                cont(self, st, &resp)
            }
            None => Ok(()),
        }
    }

    fn handle_callback(
        &self,
        st: &mut State,
        context: ContextId,
        offset: u16,
        length: u32,
    ) -> Result<(), Error> {
        let start = context.rx_offset() + offset as usize;
        let mut raw = [0u8; HEADER_SIZE];
        self.shmem().read(start, &mut raw).context(SharedMemorySnafu {
            reason: "reading callback header",
        })?;
        let header = PacketHeader::read(&raw).context(DesyncSnafu {
            reason: "short callback header",
        })?;

        let Some(id) = CallbackId::parse(header.tag) else {
            log::warn!(
                "unrecognized callback tag {:?} on {context}",
                header.name()
            );
            return Ok(());
        };
        let Some((name, handler)) = callbacks::lookup(id) else {
            log::warn!("no handler for callback {id} on {context}");
            return Ok(());
        };

        let input_start = start + HEADER_SIZE;
        let input = self
            .shmem()
            .read_vec(input_start, header.in_len as usize)
            .context(SharedMemorySnafu { reason: name })?;
        let end = offset as usize + align_packet(length as usize);
        if end > u16::MAX as usize {
            return Err(ChannelError::PacketTooLarge {
                context,
                offset,
                length,
            })
            .context(ChannelSnafu { reason: name });
        }

        st.channels
            .get_mut(context)
            .push(Frame {
                continuation: None,
                output: input_start + header.in_len as usize,
                output_len: header.out_len as usize,
                end: end as u16,
            })
            .context(ChannelSnafu { reason: name })?;

        log::trace!("callback {id} {name} on {context}");
        match handler(self, st, context, &input)? {
            CallbackReply::Reply(bytes) => self.reply(st, context, &bytes),
            CallbackReply::Deferred => Ok(()),
        }
    }

    /// Answer the innermost callback on `context` and ack it.
    pub(crate) fn reply(
        &self,
        st: &mut State,
        context: ContextId,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let frame = st
            .channels
            .get_mut(context)
            .pop()
            .context(ChannelSnafu { reason: "reply" })?;
        if bytes.len() > frame.output_len {
            log::warn!(
                "reply of {} bytes truncated to {} on {context}",
                bytes.len(),
                frame.output_len
            );
        }
        let n = bytes.len().min(frame.output_len);
        self.shmem()
            .write(frame.output, &bytes[..n])
            .context(SharedMemorySnafu { reason: "reply" })?;
        self.transport
            .send_message(IOMFB_ENDPOINT, Message::ack_for(context).into());
        Ok(())
    }

    /// The coprocessor crashed. Every later call fails with [Error::Crashed].
    pub fn crashed(&self) {
        let mut st = self.state.lock();
        log::error!("coprocessor crashed");
        self.mark_crashed(&mut st);
    }

    fn mark_crashed(&self, st: &mut State) {
        if self.crashed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.active.store(false, Ordering::Release);
        st.channels.reset();
        st.transfer.abort();
        st.valid_mode = false;
        let mut held: Vec<FramebufferId> = st
            .in_flight
            .drain(..)
            .flat_map(|(_, fbs)| fbs)
            .collect();
        held.append(&mut st.swapped_out);
        let was_connected = core::mem::replace(&mut st.connected, false);
        self.with_client(|c| {
            for fb in held {
                c.release_framebuffer(fb);
            }
            if was_connected {
                c.hotplug(false);
            }
        });
        self.start_done.complete();
    }

    /// Block until the boot sequence has finished, at most `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), Error> {
        if !self.is_active() && !self.is_crashed() {
            self.start_done.wait_timeout(self.clock.as_ref(), timeout);
        }
        ensure!(!self.is_crashed(), CrashedSnafu);
        ensure!(self.is_active(), NotReadySnafu);
        Ok(())
    }

    /// Resolves once the boot sequence has finished or the session crashed.
    pub async fn ready(&self) -> Result<(), Error> {
        self.start_done.wait().await;
        ensure!(!self.is_crashed(), CrashedSnafu);
        ensure!(self.is_active(), NotReadySnafu);
        Ok(())
    }

    /// Make a call under the lock, then wait for `done` without it.
    fn call_and_wait(
        &self,
        what: &'static str,
        timeout: Duration,
        start: impl FnOnce(&Dcp, &mut State, Completion) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let done = Completion::new();
        {
            let mut st = self.state.lock();
            start(self, &mut st, done.clone())?;
        }
        if done.wait_timeout(self.clock.as_ref(), timeout) {
            Ok(())
        } else {
            ensure!(!self.is_crashed(), CrashedSnafu);
            Err(Error::Timeout { what })
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Acquire)
    }

    pub fn is_main_display(&self) -> bool {
        self.state.lock().main_display
    }

    pub fn connected(&self) -> bool {
        self.state.lock().connected
    }

    /// The usable modes from the last `TimingElements` transfer.
    pub fn modes(&self) -> Vec<DisplayMode> {
        self.state.lock().modes.clone()
    }

    /// True if `timing` matches a known mode exactly.
    pub fn mode_valid(&self, timing: &Timing) -> bool {
        self.state.lock().modes.iter().any(|m| m.timing == *timing)
    }

    pub fn dimensions(&self) -> PanelSize {
        self.state.lock().panel
    }
}

impl Drop for Dcp {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        for desc in st.memdesc.drain() {
            match desc {
                MemDesc::Buffer { buf, piodma } => {
                    if let Some(dva) = piodma {
                        self.dma.unmap_piodma(&buf, dva);
                    }
                    self.dma.free_coherent(buf);
                }
                MemDesc::Register { size, dva, .. } => self.dma.unmap_resource(dva, size),
            }
        }
    }
}
