//! A scripted firmware that speaks the IOMFB protocol to a [Dcp] through shared memory.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use bytemuck::{bytes_of, Pod, Zeroable};
use dcp::{
    config::{Config, RegisterRange},
    display::{DrmClient, FramebufferId},
    memdesc::{Dma, DmaBuffer},
    parser::Value,
    shmem::SharedMemory,
    transport::{Clock, Transport},
    Dcp,
};
use iomfb::{
    packet::{align_packet, HEADER_SIZE},
    records::{set_fixed_str, PropChunkReq, PropEndReq},
    swap::{SwapCompleteReq, SwapStartResp},
    CallbackId, ContextId, Message, MessageType, PacketHeader, IOMFB_ENDPOINT,
};

pub const SHMEM_DVA: u64 = 0x4_0000_0000;

pub struct RecordingTransport {
    shmem: SharedMemory,
    outbox: Mutex<VecDeque<u64>>,
    sent: Mutex<Vec<u64>>,
}

impl RecordingTransport {
    fn new() -> RecordingTransport {
        RecordingTransport {
            shmem: SharedMemory::new(SHMEM_DVA),
            outbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn pop(&self) -> Option<u64> {
        self.outbox.lock().unwrap().pop_front()
    }

    /// Every message the engine sent so far.
    pub fn sent(&self) -> Vec<u64> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn send_message(&self, endpoint: u8, message: u64) {
        assert_eq!(endpoint, IOMFB_ENDPOINT);
        self.outbox.lock().unwrap().push_back(message);
        self.sent.lock().unwrap().push(message);
    }

    fn shared_memory(&self) -> &SharedMemory {
        &self.shmem
    }
}

pub struct TestClock {
    start: Instant,
}

pub const REALTIME_NS: u64 = 1_700_000_000_123_456_789;

impl Clock for TestClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn realtime_ns(&self) -> u64 {
        REALTIME_NS
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Vblank,
    ScheduledVblank,
    Hotplug(bool),
    Released(FramebufferId),
    Dimensions(u32, u32),
}

#[derive(Default)]
pub struct RecordingClient {
    events: Mutex<Vec<Event>>,
}

impl RecordingClient {
    /// Events since the last call.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

impl DrmClient for RecordingClient {
    fn vblank(&self) {
        self.push(Event::Vblank);
    }

    fn schedule_vblank(&self, _delay: Duration) {
        self.push(Event::ScheduledVblank);
    }

    fn hotplug(&self, connected: bool) {
        self.push(Event::Hotplug(connected));
    }

    fn release_framebuffer(&self, fb: FramebufferId) {
        self.push(Event::Released(fb));
    }

    fn set_dimensions(&self, width_mm: u32, height_mm: u32) {
        self.push(Event::Dimensions(width_mm, height_mm));
    }
}

#[derive(Default)]
pub struct FakeDma {
    next: AtomicU64,
    pub fail_alloc: AtomicBool,
    pub buffers: Mutex<Vec<DmaBuffer>>,
    pub resources: Mutex<Vec<(u64, u64)>>,
    pub piodma: Mutex<Vec<u64>>,
}

pub const DMA_BASE: u64 = 0x8000_0000;
pub const PIODMA_BASE: u64 = 0xa000_0000;

impl Dma for FakeDma {
    fn alloc_coherent(&self, size: u64) -> Option<DmaBuffer> {
        if self.fail_alloc.load(Ordering::Relaxed) {
            return None;
        }
        let off = self.next.fetch_add(size, Ordering::Relaxed);
        let buf = DmaBuffer {
            dva: DMA_BASE + off,
            size,
            handle: off,
        };
        self.buffers.lock().unwrap().push(buf);
        Some(buf)
    }

    fn free_coherent(&self, buf: DmaBuffer) {
        self.buffers.lock().unwrap().retain(|b| *b != buf);
    }

    fn map_resource(&self, paddr: u64, size: u64) -> Option<u64> {
        self.resources.lock().unwrap().push((paddr, size));
        Some(paddr | 0x1_0000_0000)
    }

    fn unmap_resource(&self, dva: u64, _size: u64) {
        self.resources
            .lock()
            .unwrap()
            .retain(|(p, _)| *p | 0x1_0000_0000 != dva);
    }

    fn map_piodma(&self, buf: &DmaBuffer) -> Option<u64> {
        let dva = PIODMA_BASE + buf.handle;
        self.piodma.lock().unwrap().push(dva);
        Some(dva)
    }

    fn unmap_piodma(&self, _buf: &DmaBuffer, dva: u64) {
        self.piodma.lock().unwrap().retain(|d| *d != dva);
    }
}

/// A host call as the firmware saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub context: ContextId,
    pub name: String,
    pub input: Vec<u8>,
}

/// A callback for the firmware to make.
#[derive(Debug, Clone)]
pub struct Callback {
    pub context: ContextId,
    pub id: u16,
    pub input: Vec<u8>,
    pub out_len: usize,
}

impl Callback {
    pub fn new(id: u16, input: &[u8], out_len: usize) -> Callback {
        Callback {
            context: ContextId::Callback,
            id,
            input: input.to_vec(),
            out_len,
        }
    }

    pub fn on(mut self, context: ContextId) -> Callback {
        self.context = context;
        self
    }
}

struct Pending {
    context: ContextId,
    name: String,
    output: usize,
    out_len: usize,
    callbacks: VecDeque<Callback>,
    waiting: bool,
    held: bool,
}

struct Outstanding {
    seq: usize,
    context: ContextId,
    output: usize,
    out_len: usize,
    end: usize,
}

/// The firmware side of a session.
///
/// Host calls are acked in stack order once the callbacks scripted for them have been answered.
/// Replies default to zeros.
pub struct Firmware {
    pub dcp: Arc<Dcp>,
    pub transport: Arc<RecordingTransport>,
    pub client: Arc<RecordingClient>,
    pub dma: Arc<FakeDma>,
    pub calls: Vec<Call>,
    pub main_display: bool,
    pub complete_swaps: bool,
    pub submit_status: u32,
    script: HashMap<String, VecDeque<Callback>>,
    held: HashSet<String>,
    pending: Vec<Pending>,
    outstanding: Vec<Outstanding>,
    answered: HashMap<usize, Vec<u8>>,
    next_seq: usize,
    next_swap_id: u32,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.clock_rate_hz = 24_000_000;
    config.disp_registers = (0..7)
        .map(|i| RegisterRange {
            start: 0x2_3000_0000 + i * 0x10_0000,
            size: 0x4000,
        })
        .collect();
    config
}

impl Firmware {
    pub fn new(config: Config) -> Firmware {
        let transport = Arc::new(RecordingTransport::new());
        let dma = Arc::new(FakeDma::default());
        let client = Arc::new(RecordingClient::default());
        let clock = Arc::new(TestClock {
            start: Instant::now(),
        });
        let dcp = Arc::new(Dcp::new(config, transport.clone(), dma.clone(), clock).unwrap());
        dcp.link(client.clone());
        Firmware {
            dcp,
            transport,
            client,
            dma,
            calls: Vec::new(),
            main_display: false,
            complete_swaps: true,
            submit_status: 0,
            script: HashMap::new(),
            held: HashSet::new(),
            pending: Vec::new(),
            outstanding: Vec::new(),
            answered: HashMap::new(),
            next_seq: 0,
            next_swap_id: 1,
        }
    }

    /// Make `callbacks` the first time the host calls `name`, before acking it.
    pub fn script(&mut self, name: &str, callbacks: impl IntoIterator<Item = Callback>) {
        self.script
            .entry(name.into())
            .or_default()
            .extend(callbacks);
    }

    /// Withhold the ack of every later call to `name`. Scripted callbacks are still made.
    pub fn hold(&mut self, name: &str) {
        self.held.insert(name.into());
    }

    /// Ack the held calls to `name`.
    pub fn release(&mut self, name: &str) {
        self.held.remove(name);
        for p in self.pending.iter_mut().filter(|p| p.name == name) {
            p.held = false;
        }
        self.pump();
    }

    /// Run the handshake. `timing_elements` is transferred while the host waits for
    /// `start_signal`, like real firmware does.
    pub fn boot(&mut self, main_display: bool, timing_elements: Option<Vec<u8>>) {
        self.main_display = main_display;
        let mut cbs = Vec::new();
        if let Some(doc) = timing_elements {
            cbs.extend(property_transfer("TimingElements", &doc, 0x1000));
        }
        cbs.push(Callback::new(116, &[], 1));
        self.script("A401", cbs);
        self.dcp.start();
        self.pump();
    }

    /// Names of the host calls seen so far.
    pub fn call_names(&self) -> Vec<String> {
        self.calls.iter().map(|c| c.name.clone()).collect()
    }

    pub fn take_calls(&mut self) -> Vec<String> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    /// Make a callback outside of any host call and return the host's reply, if it acked.
    pub fn callback(&mut self, cb: Callback) -> Option<Vec<u8>> {
        let seq = self.send_callback(cb);
        self.pump();
        self.answered.remove(&seq)
    }

    /// Make a callback and decode the reply as `T`.
    pub fn callback_as<T: Pod>(&mut self, cb: Callback) -> T {
        let reply = self.callback(cb).expect("callback was not acked");
        let mut v = T::zeroed();
        let n = reply.len().min(std::mem::size_of::<T>());
        bytemuck::bytes_of_mut(&mut v)[..n].copy_from_slice(&reply[..n]);
        v
    }

    /// Run `f` on another thread, serving the firmware side until it returns.
    pub fn run_blocking<T: Send + 'static>(
        &mut self,
        f: impl FnOnce(&Dcp) -> T + Send + 'static,
    ) -> T {
        let dcp = self.dcp.clone();
        let h = std::thread::spawn(move || f(&dcp));
        let deadline = Instant::now() + Duration::from_secs(10);
        while !h.is_finished() {
            self.pump();
            assert!(Instant::now() < deadline, "blocking call never returned");
            std::thread::yield_now();
        }
        self.pump();
        h.join().unwrap()
    }

    /// Handle everything the host sent until the session is quiet.
    pub fn pump(&mut self) {
        loop {
            if let Some(raw) = self.transport.pop() {
                self.handle(Message::from(raw));
            } else if !self.advance() {
                break;
            }
        }
    }

    fn deliver(&self, msg: Message) {
        self.dcp.receive(IOMFB_ENDPOINT, msg.into());
    }

    fn shmem(&self) -> &SharedMemory {
        self.transport.shared_memory()
    }

    fn handle(&mut self, msg: Message) {
        match msg.message_type() {
            Ok(MessageType::SetShmem) => self.deliver(Message::initialized()),
            Ok(MessageType::Msg) if msg.ack() => {
                let ctx = msg.context_id().unwrap();
                let i = self
                    .outstanding
                    .iter()
                    .rposition(|o| o.context == ctx)
                    .expect("host acked a callback that was never made");
                let o = self.outstanding.remove(i);
                let reply = self.shmem().read_vec(o.output, o.out_len).unwrap();
                self.answered.insert(o.seq, reply);
                let cb_ctx = ctx;
                if let Some(p) = self
                    .pending
                    .iter_mut()
                    .rev()
                    .find(|p| p.waiting && ContextId::for_call(p.context.is_oob(), true) == cb_ctx)
                {
                    p.waiting = false;
                }
            }
            Ok(MessageType::Msg) => self.host_call(msg),
            other => panic!("unexpected message {msg:?} ({other:?})"),
        }
    }

    fn host_call(&mut self, msg: Message) {
        let context = msg.context_id().unwrap();
        let start = context.tx_offset().unwrap() + msg.offset() as usize;
        let mut raw = [0u8; HEADER_SIZE];
        self.shmem().read(start, &mut raw).unwrap();
        let header = PacketHeader::read(&raw).unwrap();
        assert_eq!(header.packet_len(), msg.length() as usize);
        let name = String::from_utf8(header.name().to_vec()).unwrap();
        let input = self
            .shmem()
            .read_vec(start + HEADER_SIZE, header.in_len as usize)
            .unwrap();

        self.calls.push(Call {
            context,
            name: name.clone(),
            input,
        });
        self.pending.push(Pending {
            context,
            callbacks: self.script.remove(&name).unwrap_or_default(),
            held: self.held.contains(&name),
            name,
            output: start + HEADER_SIZE + header.in_len as usize,
            out_len: header.out_len as usize,
            waiting: false,
        });
    }

    /// Make progress on the innermost host call. Returns false if there is nothing to do.
    fn advance(&mut self) -> bool {
        let Some(top) = self.pending.last_mut() else {
            return false;
        };
        if top.waiting {
            return false;
        }
        if let Some(mut cb) = top.callbacks.pop_front() {
            cb.context = ContextId::for_call(top.context.is_oob(), true);
            top.waiting = true;
            self.send_callback(cb);
            return true;
        }
        if top.held {
            return false;
        }

        let p = self.pending.pop().unwrap();
        let mut reply = self.reply_for(&p.name);
        reply.resize(p.out_len, 0);
        self.shmem().write(p.output, &reply).unwrap();
        self.deliver(Message::ack_for(p.context));

        if p.name == "A408" && self.complete_swaps && self.submit_status == 0 {
            let id = self.next_swap_id - 1;
            let req = SwapCompleteReq::new(id);
            self.send_callback(Callback::new(589, bytes_of(&req), 0).on(ContextId::Async));
        }
        true
    }

    fn reply_for(&mut self, name: &str) -> Vec<u8> {
        match name {
            "A407" => {
                let mut resp = SwapStartResp::zeroed();
                resp.swap_id = self.next_swap_id;
                self.next_swap_id += 1;
                bytes_of(&resp).to_vec()
            }
            "A408" => bytes_of(&iomfb::swap::SwapSubmitResp::new(self.submit_status)).to_vec(),
            "A411" => (self.main_display as u32).to_le_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    fn send_callback(&mut self, cb: Callback) -> usize {
        let base = cb.context.rx_offset();
        let offset = self
            .outstanding
            .iter()
            .rev()
            .find(|o| o.context == cb.context)
            .map_or(0, |o| o.end);
        let header = PacketHeader {
            tag: CallbackId(cb.id).wire_tag(),
            in_len: cb.input.len() as u32,
            out_len: cb.out_len as u32,
        };
        let start = base + offset;
        let shmem = self.shmem();
        shmem.write(start, &header.to_bytes()).unwrap();
        shmem.write(start + HEADER_SIZE, &cb.input).unwrap();
        let output = start + HEADER_SIZE + cb.input.len();
        shmem.fill(output, cb.out_len, 0).unwrap();

        let seq = self.next_seq;
        self.next_seq += 1;
        let len = header.packet_len();
        self.outstanding.push(Outstanding {
            seq,
            context: cb.context,
            output,
            out_len: cb.out_len,
            end: offset + align_packet(len),
        });
        self.deliver(Message::packet(cb.context, offset as u16, len as u32));
        seq
    }
}

/// The callbacks that transfer `doc` as property `key`, `chunk` bytes at a time.
pub fn property_transfer(key: &str, doc: &[u8], chunk: usize) -> Vec<Callback> {
    let mut cbs = vec![Callback::new(122, &(doc.len() as u32).to_le_bytes(), 1)];
    for (i, part) in doc.chunks(chunk).enumerate() {
        cbs.push(Callback::new(123, bytes_of(&chunk_req(i * chunk, part)), 1));
    }
    cbs.push(Callback::new(124, bytes_of(&end_req(key)), 1));
    cbs
}

pub fn chunk_req(offset: usize, part: &[u8]) -> PropChunkReq {
    let mut req = PropChunkReq::zeroed();
    let mut data = [0u8; 0x1000];
    data[..part.len()].copy_from_slice(part);
    req.data = data;
    req.offset = offset as u32;
    req.length = part.len() as u32;
    req
}

pub fn end_req(key: &str) -> PropEndReq {
    let mut req = PropEndReq::zeroed();
    let mut k = [0u8; 0x40];
    set_fixed_str(&mut k, key);
    req.key = k;
    req
}

fn dim(active: i64, blank: i64, rate_hz: i64) -> Value {
    Value::dict([
        ("Active", Value::Int(active)),
        ("FrontPorch", Value::Int(4)),
        ("SyncWidth", Value::Int(8)),
        ("Total", Value::Int(active + blank)),
        ("PreciseSyncRate", Value::Int(rate_hz << 16)),
    ])
}

/// A `TimingElements` document with one usable mode per `(width, height, refresh)`.
/// Earlier modes score higher.
pub fn timing_elements(modes: &[(i64, i64, i64)]) -> Vec<u8> {
    let elements = modes
        .iter()
        .enumerate()
        .map(|(i, &(w, h, hz))| {
            Value::dict([
                ("HorizontalAttributes", dim(w, 48, hz)),
                ("VerticalAttributes", dim(h, 36, hz)),
                (
                    "ColorModes",
                    Value::Array(vec![Value::dict([
                        ("ID", Value::Int(3)),
                        ("Score", Value::Int(1)),
                        ("IsVirtual", Value::Bool(false)),
                    ])]),
                ),
                ("ID", Value::Int(i as i64 + 10)),
                ("IsVirtual", Value::Bool(false)),
                ("Score", Value::Int(100 - i as i64)),
            ])
        })
        .collect();
    Value::Array(elements).to_document()
}

/// A `DisplayAttributes` document for a panel of the given size in centimetres.
pub fn display_attributes(width_cm: i64, height_cm: i64) -> Vec<u8> {
    Value::dict([
        ("MaxHorizontalImageSize", Value::Int(width_cm)),
        ("MaxVerticalImageSize", Value::Int(height_cm)),
        ("ProductName", Value::String("Test Panel".into())),
    ])
    .to_document()
}

/// A booted external display with two modes.
pub fn booted() -> Firmware {
    booted_with(test_config())
}

pub fn booted_with(config: Config) -> Firmware {
    let mut fw = Firmware::new(config);
    fw.boot(
        false,
        Some(timing_elements(&[(1920, 1080, 60), (1280, 720, 60)])),
    );
    fw.dcp.wait_ready(Duration::ZERO).unwrap();
    fw.calls.clear();
    fw.client.take();
    fw
}
