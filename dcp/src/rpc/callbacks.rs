//! Handlers for the callbacks the firmware makes.
//!
//! Most callbacks are answered immediately from the handler's return value. A few make nested
//! calls first and answer later through [Dcp::reply]; those return [CallbackReply::Deferred].
use alloc::vec::Vec;

use bytemuck::{bytes_of, Pod, Zeroable};
use iomfb::{
    records::{
        fixed_str, AllocateBufferReq, AllocateBufferResp, GetUintPropReq, GetUintPropResp,
        MapBufReq, MapBufResp, MapPhysicalReq, MapPhysicalResp, MapRegReq, MapRegResp,
        PropChunkReq, PropEndReq, ReadEdtDataReq, ReadEdtDataResp, RtBandwidth,
        SwapCompleteIntentGated, UnmapBufReq,
    },
    swap::SwapCompleteReq,
    CallbackId, ContextId,
};

use super::{boot::boot_1, calls::decode, Dcp, State};
use crate::{
    error::Error,
    memdesc::{round_up_to_page, MemDesc, MAX_MAPPINGS},
    modes::{parse_display_attributes, parse_timing_elements, ModePolicy},
};

/// What to answer a callback with.
pub(crate) enum CallbackReply {
    /// Copy these bytes into the response area and ack now.
    Reply(Vec<u8>),
    /// The handler replies later, once its nested calls return.
    Deferred,
}

impl CallbackReply {
    fn record<T: Pod>(v: &T) -> CallbackReply {
        CallbackReply::Reply(bytes_of(v).to_vec())
    }

    fn flag(v: bool) -> CallbackReply {
        CallbackReply::Reply(Vec::from([v as u8]))
    }
}

pub(crate) type Handler =
    fn(&Dcp, &mut State, ContextId, &[u8]) -> Result<CallbackReply, Error>;

type CallbackResult = Result<CallbackReply, Error>;

/// Find the handler for callback `id`, with a name for logging.
pub(crate) fn lookup(id: CallbackId) -> Option<(&'static str, Handler)> {
    let entry: (&'static str, Handler) = match id.0 {
        0 => ("did_boot_signal", cb_true),
        1 => ("did_power_on_signal", cb_true),
        2 => ("will_power_off_signal", cb_nop),
        3 => ("rt_bandwidth_setup", rt_bandwidth),
        100 => ("match_pmu_service", match_pmu_service),
        101 => ("get_display_default_stride", cb_zero),
        102 => ("set_number_property", cb_nop),
        103 => ("set_boolean_property", cb_nop),
        106 => ("remove_property", cb_nop),
        107 => ("create_provider_service", cb_true),
        108 => ("create_product_service", cb_true),
        109 => ("create_pmu_service", cb_true),
        110 => ("create_iomfb_service", cb_true),
        111 => ("create_backlight_service", cb_true),
        116 => ("start_hardware_boot", boot_1),
        117 => ("is_dark_boot", cb_false),
        118 => ("is_waking_from_hibernate", cb_false),
        120 => ("read_edt_data", read_edt_data),
        122 => ("prop_start", prop_start),
        123 => ("prop_chunk", prop_chunk),
        124 => ("prop_end", prop_end),
        201 => ("map_piodma", map_piodma),
        202 => ("unmap_piodma", unmap_piodma),
        206 => ("match_pmu_service_2", match_pmu_service_2),
        207 => ("match_backlight_service", match_backlight_service),
        208 => ("get_calendar_time_ms", get_time),
        211 => ("update_backlight_factor_prop", cb_nop),
        300 => ("pr_publish", cb_nop),
        401 => ("sr_get_uint_prop", get_uint_prop),
        404 => ("sr_set_uint_prop", cb_nop),
        406 => ("set_fx_prop", cb_nop),
        408 => ("get_frequency", get_frequency),
        411 => ("map_reg", map_reg),
        413 => ("sr_set_property_dict", cb_true),
        414 => ("sr_set_property_int", cb_true),
        415 => ("sr_set_property_bool", cb_true),
        451 => ("allocate_buffer", allocate_buffer),
        452 => ("map_physical", map_physical),
        456 => ("release_mem_desc", release_mem_desc),
        552 => ("set_property_dict_0", cb_true),
        561 => ("set_property_dict", cb_true),
        563 => ("set_property_int", cb_true),
        565 => ("set_property_bool", cb_true),
        567 => ("set_property_str", cb_true),
        574 => ("power_up_dart", cb_zero),
        576 => ("hotplug_notify_gated", hotplug),
        577 => ("powerstate_notify", cb_nop),
        582 => ("create_default_fb_surface", cb_true),
        589 => ("swap_complete_ap_gated", swap_complete),
        591 => ("swap_complete_intent_gated", swap_complete_intent),
        593 => ("enable_backlight_message_ap_gated", cb_nop),
        598 => ("find_swap_function_gated", cb_nop),
        _ => return None,
    };
    Some(entry)
}

fn cb_nop(_: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    Ok(CallbackReply::Reply(Vec::new()))
}

fn cb_true(_: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    Ok(CallbackReply::flag(true))
}

fn cb_false(_: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    Ok(CallbackReply::flag(false))
}

fn cb_zero(_: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    Ok(CallbackReply::record(&0u32))
}

/// Offset of the scratch register in display register range 5.
const REG_SCRATCH: u64 = 0x14;
/// Offset of the scratch register in range 4 on T600x.
const REG_SCRATCH_T600X: u64 = 0x988;
/// Offset of the doorbell register in range 6.
const REG_DOORBELL: u64 = 0;
const REG_DOORBELL_BIT: u32 = 2;

fn rt_bandwidth(dcp: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    let regs = &dcp.config.disp_registers;
    let mut bw = RtBandwidth::zeroed();
    if let (Some(scratch), Some(doorbell)) = (regs.get(5), regs.get(6)) {
        bw.reg_scratch = scratch.start + REG_SCRATCH;
        bw.reg_doorbell = doorbell.start + REG_DOORBELL;
        bw.doorbell_bit = REG_DOORBELL_BIT;
        let mut padding = bw.padding;
        // required by 11.x firmware
        padding[3] = 4;
        bw.padding = padding;
    } else if let Some(scratch) = regs.get(4) {
        bw.reg_scratch = scratch.start + REG_SCRATCH_T600X;
    }
    Ok(CallbackReply::record(&bw))
}

fn match_pmu_service(dcp: &Dcp, st: &mut State, ctx: ContextId, _: &[u8]) -> CallbackResult {
    dcp.set_temperature_hint(st, false, move |dcp, st, _| dcp.reply(st, ctx, &[]))?;
    Ok(CallbackReply::Deferred)
}

fn match_pmu_service_2(dcp: &Dcp, st: &mut State, ctx: ContextId, _: &[u8]) -> CallbackResult {
    dcp.pmu_service_matched(st, false, move |dcp, st, _| dcp.reply(st, ctx, &[1]))?;
    Ok(CallbackReply::Deferred)
}

fn match_backlight_service(
    dcp: &Dcp,
    st: &mut State,
    ctx: ContextId,
    _: &[u8],
) -> CallbackResult {
    dcp.backlight_service_matched(st, false, move |dcp, st, _| dcp.reply(st, ctx, &[1]))?;
    Ok(CallbackReply::Deferred)
}

fn read_edt_data(_: &Dcp, _: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: ReadEdtDataReq = decode(input);
    let defaults = req.value;
    let mut value = [0u32; 8];
    value[0] = defaults[0];
    Ok(CallbackReply::record(&ReadEdtDataResp { value, ret: 0 }))
}

fn prop_start(_: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let length: u32 = decode(input);
    match st.transfer.start(length as usize) {
        Ok(()) => Ok(CallbackReply::flag(true)),
        Err(e) => {
            log::warn!("ignoring transfer start: {e}");
            Ok(CallbackReply::flag(false))
        }
    }
}

fn prop_chunk(_: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: PropChunkReq = decode(input);
    let data = req.data;
    let len = (req.length as usize).min(data.len());
    match st.transfer.append(req.offset as usize, &data[..len]) {
        Ok(()) => Ok(CallbackReply::flag(true)),
        Err(e) => {
            log::warn!("ignoring chunk: {e}");
            Ok(CallbackReply::flag(false))
        }
    }
}

fn prop_end(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: PropEndReq = decode(input);
    let data = match st.transfer.finish() {
        Ok(data) => data,
        Err(e) => {
            log::warn!("ignoring transfer end: {e}");
            return Ok(CallbackReply::flag(false));
        }
    };
    let key = req.key;
    Ok(CallbackReply::flag(dcp.property(st, fixed_str(&key), &data)))
}

impl Dcp {
    /// Apply a completed property transfer, returning whether it was understood.
    fn property(&self, st: &mut State, key: &str, data: &[u8]) -> bool {
        match key {
            "TimingElements" => {
                let policy = ModePolicy {
                    notch_height: self.config.hidden_notch_height(),
                    width_mm: st.panel.width_mm,
                    height_mm: st.panel.height_mm,
                    deny_list: &self.config.mode_deny_list,
                };
                match parse_timing_elements(data, &policy) {
                    Ok(modes) => {
                        log::info!("{} usable modes", modes.len());
                        st.modes = modes;
                        true
                    }
                    Err(e) => {
                        log::warn!("failed to parse modes: {e}");
                        false
                    }
                }
            }
            "DisplayAttributes" => match parse_display_attributes(data) {
                Ok(size) => {
                    log::debug!("panel is {}x{} mm", size.width_mm, size.height_mm);
                    st.panel = size;
                    for m in st.modes.iter_mut() {
                        m.width_mm = size.width_mm;
                        m.height_mm = size.height_mm;
                    }
                    self.with_client(|c| c.set_dimensions(size.width_mm, size.height_mm));
                    true
                }
                Err(e) => {
                    log::warn!("failed to parse display attributes: {e}");
                    false
                }
            },
            _ => {
                log::debug!("discarding property {key:?} ({} bytes)", data.len());
                true
            }
        }
    }
}

const EINVAL: u32 = 22;

fn map_piodma(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: MapBufReq = decode(input);
    let id = req.buffer;
    let mapped = u32::try_from(id)
        .ok()
        .and_then(|id| st.memdesc.get_mut(id).ok())
        .and_then(|desc| match desc {
            MemDesc::Buffer {
                piodma: Some(dva), ..
            } => Some(*dva),
            MemDesc::Buffer { buf, piodma } => {
                let dva = dcp.dma.map_piodma(buf)?;
                *piodma = Some(dva);
                Some(dva)
            }
            MemDesc::Register { .. } => None,
        });

    let mut resp = MapBufResp::zeroed();
    match mapped {
        Some(dva) => resp.dva = dva,
        None => {
            log::error!("denying PIODMA map of invalid buffer {id:#x}");
            resp.ret = EINVAL;
        }
    }
    Ok(CallbackReply::record(&resp))
}

fn unmap_piodma(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: UnmapBufReq = decode(input);
    let (id, dva) = (req.buffer, req.dva);
    let desc = u32::try_from(id)
        .ok()
        .and_then(|id| st.memdesc.get_mut(id).ok());
    match desc {
        Some(MemDesc::Buffer { buf, piodma }) if *piodma == Some(dva) => {
            dcp.dma.unmap_piodma(buf, dva);
            *piodma = None;
        }
        Some(MemDesc::Buffer { piodma, .. }) => {
            log::warn!("PIODMA unmap of buffer {id} at {dva:#x}, mapped at {piodma:x?}");
        }
        _ => log::warn!("PIODMA unmap of invalid buffer {id}"),
    }
    Ok(CallbackReply::Reply(Vec::new()))
}

fn allocate_buffer(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: AllocateBufferReq = decode(input);
    let mut resp = AllocateBufferResp::zeroed();
    let Some(size) = round_up_to_page(req.size) else {
        log::warn!("refusing buffer of {:#x} bytes", { req.size });
        return Ok(CallbackReply::record(&resp));
    };
    if st.memdesc.len() + 1 >= MAX_MAPPINGS {
        log::warn!("memory descriptor table is full");
        return Ok(CallbackReply::record(&resp));
    }
    let Some(buf) = dcp.dma.alloc_coherent(size) else {
        log::warn!("failed to allocate {size:#x} bytes for the firmware");
        return Ok(CallbackReply::record(&resp));
    };
    match st.memdesc.insert(MemDesc::Buffer { buf, piodma: None }) {
        Ok(id) => {
            resp.dva = buf.dva;
            resp.dva_size = size;
            resp.mem_desc_id = id;
        }
        Err(e) => {
            log::warn!("{e}");
            dcp.dma.free_coherent(buf);
        }
    }
    Ok(CallbackReply::record(&resp))
}

fn map_physical(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: MapPhysicalReq = decode(input);
    let (paddr, size) = (req.paddr, req.size);
    let mut resp = MapPhysicalResp::zeroed();
    let size = match round_up_to_page(size) {
        Some(size) if dcp.config.is_disp_register(paddr, size) => size,
        _ => {
            log::error!("refusing to map physical range {paddr:#x}+{size:#x}");
            return Ok(CallbackReply::record(&resp));
        }
    };
    let Some(dva) = dcp.dma.map_resource(paddr, size) else {
        log::warn!("failed to map physical range {paddr:#x}+{size:#x}");
        return Ok(CallbackReply::record(&resp));
    };
    match st.memdesc.insert(MemDesc::Register { paddr, size, dva }) {
        Ok(id) => {
            resp.dva = dva;
            resp.dva_size = size;
            resp.mem_desc_id = id;
        }
        Err(e) => {
            log::warn!("{e}");
            dcp.dma.unmap_resource(dva, size);
        }
    }
    Ok(CallbackReply::record(&resp))
}

fn release_mem_desc(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let id: u32 = decode(input);
    match st.memdesc.remove(id) {
        Ok(MemDesc::Buffer { buf, piodma }) => {
            if let Some(dva) = piodma {
                dcp.dma.unmap_piodma(&buf, dva);
            }
            dcp.dma.free_coherent(buf);
            Ok(CallbackReply::flag(true))
        }
        Ok(MemDesc::Register { size, dva, .. }) => {
            dcp.dma.unmap_resource(dva, size);
            Ok(CallbackReply::flag(true))
        }
        Err(e) => {
            log::warn!("release request: {e}");
            Ok(CallbackReply::flag(false))
        }
    }
}

fn get_time(dcp: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    let ms = dcp.clock.realtime_ns() / 1_000_000;
    Ok(CallbackReply::record(&ms))
}

/// No properties are known, the firmware falls back to its default.
fn get_uint_prop(_: &Dcp, _: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: GetUintPropReq = decode(input);
    log::trace!(
        "get_uint_prop {}.{}",
        fixed_str(&req.obj),
        fixed_str(&req.key)
    );
    Ok(CallbackReply::record(&GetUintPropResp::zeroed()))
}

fn get_frequency(dcp: &Dcp, _: &mut State, _: ContextId, _: &[u8]) -> CallbackResult {
    Ok(CallbackReply::record(&dcp.config.clock_rate_hz))
}

fn map_reg(dcp: &Dcp, _: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: MapRegReq = decode(input);
    let index = req.index;
    let mut resp = MapRegResp::zeroed();
    match dcp.config.disp_registers.get(index as usize) {
        Some(r) => {
            resp.addr = r.start;
            resp.length = r.size;
        }
        None => {
            log::warn!("firmware asked for invalid register range {index}");
            resp.ret = 1;
        }
    }
    Ok(CallbackReply::record(&resp))
}

fn hotplug(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let connected: u64 = decode(input);
    dcp.hotplug_report(st, connected != 0);
    Ok(CallbackReply::Reply(Vec::new()))
}

fn swap_complete(dcp: &Dcp, st: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: SwapCompleteReq = decode(input);
    let swap_id = req.swap_id;
    log::trace!("swap {swap_id} complete");
    dcp.swap_finished(st, swap_id);
    Ok(CallbackReply::Reply(Vec::new()))
}

fn swap_complete_intent(_: &Dcp, _: &mut State, _: ContextId, input: &[u8]) -> CallbackResult {
    let req: SwapCompleteIntentGated = decode(input);
    log::trace!(
        "swap {} intent {}x{}",
        { req.swap_id },
        { req.width },
        { req.height }
    );
    Ok(CallbackReply::Reply(Vec::new()))
}
