//! Modesets and swaps.
use alloc::{boxed::Box, vec::Vec};
use core::time::Duration;

use bytemuck::{bytes_of, Zeroable};
use iomfb::{
    records::SetDigitalOutModeReq,
    swap::{v12_3, SwapEnabled, SwapStartReq, SwapStartResp, COLORSPACE_NATIVE, XFER_FUNC_SDR},
    ContextId, FirmwareVersion, SWAP_SURFACES,
};
use snafu::{ensure, OptionExt};

use super::{Dcp, State};
use crate::{
    display::{DrmRect, FlushRequest, Framebuffer, FramebufferId, MAX_PLANES},
    error::*,
    modes::Timing,
};

/// A swap submit request in the layout the running firmware expects.
pub(crate) enum SwapSubmit {
    V12_3(Box<v12_3::SwapSubmitReq>),
}

impl SwapSubmit {
    /// An empty request with every surface slot absent.
    pub(crate) fn new(fw: FirmwareVersion) -> SwapSubmit {
        match fw {
            FirmwareVersion::V12_3 => {
                let mut req = Box::new(v12_3::SwapSubmitReq::zeroed());
                req.surf_null = [1; SWAP_SURFACES];
                SwapSubmit::V12_3(req)
            }
        }
    }

    /// A request that removes every layer.
    pub(crate) fn clear_all(fw: FirmwareVersion) -> SwapSubmit {
        let mut s = SwapSubmit::new(fw);
        s.set_enabled(SwapEnabled::REMOVE_LAYERS | SwapEnabled::ALL_SURFACES);
        s
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            SwapSubmit::V12_3(req) => bytes_of(req.as_ref()),
        }
    }

    pub(crate) fn set_swap_id(&mut self, swap_id: u32) {
        match self {
            SwapSubmit::V12_3(req) => req.swap.swap_id = swap_id,
        }
    }

    /// The enabled and completed masks are always set together.
    pub(crate) fn set_enabled(&mut self, flags: SwapEnabled) {
        match self {
            SwapSubmit::V12_3(req) => {
                req.swap.swap_enabled = flags.bits();
                req.swap.swap_completed = flags.bits();
            }
        }
    }

    pub(crate) fn set_clear(&mut self) {
        match self {
            SwapSubmit::V12_3(req) => req.clear = 1,
        }
    }

    /// Scan `fb` out of surface `slot`.
    pub(crate) fn attach(&mut self, slot: usize, fb: &Framebuffer, src: DrmRect, dst: DrmRect) {
        match self {
            SwapSubmit::V12_3(req) => {
                req.swap.src_rect[slot] = src.to_rect();
                req.swap.dst_rect[slot] = dst.to_rect();
                req.surf_null[slot] = 0;
                let mut iova = req.surf_iova;
                iova[slot] = fb.iova;
                req.surf_iova = iova;
                let surf_ids = req.swap.surf_ids;

                let mut surf = v12_3::Surface::zeroed();
                surf.opaque = fb.format.is_opaque() as u8;
                surf.format = fb.format.fourcc();
                surf.xfer_func = XFER_FUNC_SDR;
                surf.colorspace = COLORSPACE_NATIVE;
                surf.stride = fb.stride;
                surf.width = fb.width;
                surf.height = fb.height;
                surf.buf_size = fb.height.saturating_mul(fb.stride);
                surf.surface_id = surf_ids[slot];
                // only meaningful for compressed or multiplanar surfaces
                surf.pix_size = 1;
                surf.pel_w = 1;
                surf.pel_h = 1;
                surf.has_comp = 1;
                surf.has_planes = 1;
                req.surf[slot] = surf;
            }
        }
    }
}

impl Dcp {
    /// Present a commit.
    ///
    /// This never fails towards the caller: a commit that cannot be swapped (busy channel,
    /// unknown mode, no connector) gets a synthesized vblank after a short delay instead.
    pub fn flush(&self, req: &FlushRequest) {
        if let Err(e) = self.try_flush(req) {
            log::warn!("flush not swapped: {e}");
            let delay = self.vblank_delay();
            self.with_client(|c| c.schedule_vblank(delay));
        }
    }

    fn try_flush(&self, req: &FlushRequest) -> Result<(), Error> {
        ensure!(!self.is_crashed(), CrashedSnafu);
        ensure!(self.is_active(), NotReadySnafu);
        let modeset = {
            let st = self.state.lock();
            ensure!(
                !st.channels.command(false).busy(),
                ChannelBusySnafu {
                    context: ContextId::Command
                }
            );
            req.mode_changed || !st.valid_mode
        };

        if modeset {
            self.modeset(&req.timing)?;
        }

        let mut st = self.state.lock();
        let mut swap = SwapSubmit::new(self.config.firmware);
        let mut enabled = SwapEnabled::empty();

        // the boot framebuffer in slot 0 sticks around unless removed once
        if !st.surfaces_cleared {
            enabled = SwapEnabled::REMOVE_LAYERS | SwapEnabled::ALL_SURFACES;
            st.surfaces_cleared = true;
        }

        let notch = self.config.hidden_notch_height() as i32;
        let mut has_surface = false;
        for (i, plane) in req.planes.iter().take(MAX_PLANES).enumerate() {
            let slot = i + 1;
            enabled |= SwapEnabled::surface(slot);

            if let Some(old) = plane.old_fb {
                if plane.fb.map(|f| f.id) != Some(old) {
                    st.swapped_out.push(old);
                }
            }

            let Some(fb) = &plane.fb else { continue };
            has_surface = true;
            let mut dst = plane.dst;
            dst.y1 += notch;
            dst.y2 += notch;
            swap.attach(slot, fb, plane.src, dst);
        }

        if !has_surface && !req.color_mgmt_changed {
            if req.enabled && req.active && !req.planes_changed {
                let delay = self.vblank_delay();
                self.with_client(|c| c.schedule_vblank(delay));
                return Ok(());
            }
            enabled |= SwapEnabled::REMOVE_LAYERS;
            swap.set_clear();
        }
        swap.set_enabled(enabled);

        if !st.connected {
            log::debug!("connector is disconnected, not swapping");
            self.with_client(|c| c.vblank());
            return Ok(());
        }

        self.swap_start(&mut st, false, &SwapStartReq::new(), move |dcp, st, resp| {
            dcp.swap_started(st, swap, resp)
        })
    }

    fn modeset(&self, timing: &Timing) -> Result<(), Error> {
        let req = {
            let st = self.state.lock();
            let mode = st
                .modes
                .iter()
                .find(|m| m.timing == *timing)
                .context(NoMatchingModeSnafu { timing: *timing })?;
            SetDigitalOutModeReq {
                color_mode_id: mode.color_mode_id,
                timing_mode_id: mode.timing_mode_id,
            }
        };
        log::info!(
            "set_digital_out_mode(color:{} timing:{})",
            { req.color_mode_id },
            { req.timing_mode_id }
        );

        self.call_and_wait(
            "set_digital_out_mode",
            Duration::from_millis(self.config.timeouts.modeset_ms),
            |dcp, st, done| {
                dcp.set_digital_out_mode(st, false, &req, move |_, _, _| {
                    done.complete();
                    Ok(())
                })
            },
        )?;

        self.state.lock().valid_mode = true;
        Ok(())
    }

    fn swap_started(
        &self,
        st: &mut State,
        mut swap: SwapSubmit,
        resp: SwapStartResp,
    ) -> Result<(), Error> {
        let swap_id = resp.swap_id;
        log::trace!("submitting swap {swap_id}");
        swap.set_swap_id(swap_id);
        // the completion may be reported before the submit is acked
        let held = core::mem::take(&mut st.swapped_out);
        st.in_flight.push((swap_id, held));
        self.swap_submit(st, &swap, move |dcp, st, resp| {
            if resp.ret != 0 {
                log::error!("swap {swap_id} failed with status {}", { resp.ret });
                dcp.swap_finished(st, swap_id);
            }
            Ok(())
        })
    }

    /// Release what swap `swap_id` replaced and report the vblank.
    pub(crate) fn swap_finished(&self, st: &mut State, swap_id: u32) {
        let released = match st.in_flight.iter().position(|(id, _)| *id == swap_id) {
            Some(i) => st.in_flight.remove(i).1,
            None => Vec::new(),
        };
        self.release(released);
        self.with_client(|c| c.vblank());
    }

    pub(crate) fn release(&self, fbs: Vec<FramebufferId>) {
        self.with_client(|c| {
            for fb in fbs {
                c.release_framebuffer(fb);
            }
        });
    }

    /// A connector state report from the firmware.
    pub(crate) fn hotplug_report(&self, st: &mut State, connected: bool) {
        // reported after power state changes on built-in panels, must not unplug them
        if st.main_display {
            return;
        }
        if !connected {
            st.valid_mode = false;
            // swaps will not complete until the next modeset
            let delay = self.vblank_delay();
            self.with_client(|c| c.schedule_vblank(delay));
        }
        if st.connected != connected {
            log::info!("hotplug: connected {connected}");
            st.connected = connected;
            st.valid_mode = false;
            self.with_client(|c| c.hotplug(connected));
        }
    }
}
