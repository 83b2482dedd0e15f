//! The boot handshake.
//!
//! Once the firmware reports itself initialized the host sends `start_signal`. Before acking it
//! the firmware calls back (D116) and expects the host to create the default framebuffer and
//! signal late init, all as calls nested in that callback. After `start_signal` returns the host
//! queries the colour remap mode, opens the first client and asks whether it is driving the
//! built-in panel.
use core::sync::atomic::Ordering;

use iomfb::{records::GetColorRemapModeReq, ContextId};

use super::{callbacks::CallbackReply, Dcp, State};
use crate::error::Error;

/// Colour remap mode queried right after `start_signal`.
const COLOR_REMAP_MODE: u32 = 6;

impl Dcp {
    pub(crate) fn start_signal(&self, st: &mut State) -> Result<(), Error> {
        log::info!("firmware initialized, sending start_signal");
        self.start_signal_call(st, false, |dcp, st, _| dcp.started(st))
    }

    fn started(&self, st: &mut State) -> Result<(), Error> {
        log::debug!("start_signal returned");
        let remap = GetColorRemapModeReq::new(COLOR_REMAP_MODE);
        self.get_color_remap_mode(st, false, &remap, |dcp, st, resp| {
            log::debug!("color remap mode {}", { resp.mode });
            dcp.enable_disable_video_power_savings(st, false, &0, |dcp, st, _| {
                dcp.first_client_open(st, false, |dcp, st| {
                    dcp.is_main_display_call(st, false, |dcp, st, main| {
                        dcp.boot_finished(st, main != 0);
                        Ok(())
                    })
                })
            })
        })
    }

    fn boot_finished(&self, st: &mut State, main: bool) {
        log::info!("is_main_display: {main}");
        st.main_display = main;
        st.connected = !st.modes.is_empty();
        let connected = st.connected;
        self.with_client(|c| c.hotplug(connected));
        self.active.store(true, Ordering::Release);
        self.start_done.complete();
    }
}

/// D116: bring up the default framebuffer, answering once late init has been signaled.
pub(crate) fn boot_1(
    dcp: &Dcp,
    st: &mut State,
    ctx: ContextId,
    _: &[u8],
) -> Result<CallbackReply, Error> {
    dcp.set_create_dfb(st, false, move |dcp, st| {
        dcp.create_default_fb(st, false, move |dcp, st, _| boot_2(dcp, st, ctx))
    })?;
    Ok(CallbackReply::Deferred)
}

fn boot_2(dcp: &Dcp, st: &mut State, ctx: ContextId) -> Result<(), Error> {
    dcp.setup_video_limits(st, false, move |dcp, st| {
        dcp.flush_supports_power(st, false, &1, move |dcp, st| boot_3(dcp, st, ctx))
    })
}

fn boot_3(dcp: &Dcp, st: &mut State, ctx: ContextId) -> Result<(), Error> {
    dcp.late_init_signal(st, false, move |dcp, st, _| {
        dcp.set_display_refresh_properties(st, false, move |dcp, st, _| {
            log::debug!("boot done");
            dcp.reply(st, ctx, &[1u8])
        })
    })
}
