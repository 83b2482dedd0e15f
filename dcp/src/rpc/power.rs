//! Display power sequencing.
use core::{sync::atomic::Ordering, time::Duration};

use iomfb::{
    records::{SetParameterDcpReq, SetPowerStateReq},
    swap::SwapStartReq,
};

use super::{swap::SwapSubmit, Dcp, State};
use crate::{error::Error, sync::Completion};

/// Parameter set on external displays before they are powered on.
const PARAM_EXTERNAL_DISPLAY: u32 = 14;

impl Dcp {
    fn power_state(&self, st: &mut State, state: u64, done: Completion) -> Result<(), Error> {
        self.set_power_state(st, false, &SetPowerStateReq::new(state), move |_, _, resp| {
            if resp.ret != 0 {
                log::warn!("set_power_state({state}) returned {}", { resp.ret });
            }
            done.complete();
            Ok(())
        })
    }

    /// Power the display on, waiting a bounded time for the firmware to confirm.
    pub fn poweron(&self) -> Result<(), Error> {
        log::debug!("powering on");
        let main = self.is_main_display();
        let handle: u32 = if main { 0 } else { 2 };

        self.call_and_wait(
            "power on",
            Duration::from_millis(self.config.timeouts.power_on_ms),
            move |dcp, st, done| {
                dcp.set_display_device(st, false, &handle, move |dcp, st, _| {
                    if main {
                        return dcp.power_state(st, 1, done);
                    }
                    let param = SetParameterDcpReq {
                        param: PARAM_EXTERNAL_DISPLAY,
                        value: [0; 8],
                        count: 1,
                    };
                    dcp.set_parameter_dcp(st, false, &param, move |dcp, st, _| {
                        dcp.power_state(st, 1, done)
                    })
                })
            },
        )
    }

    /// Remove every layer, then power the display off.
    ///
    /// If the clearing swap does not go through in time the coprocessor is considered crashed.
    pub fn poweroff(&self) -> Result<(), Error> {
        log::debug!("powering off");
        let fw = self.config.firmware;
        let cleared = self.call_and_wait(
            "clearing swap",
            Duration::from_millis(self.config.timeouts.power_off_swap_ms),
            move |dcp, st, done| {
                dcp.swap_start(st, false, &SwapStartReq::new(), move |dcp, st, resp| {
                    let swap_id = resp.swap_id;
                    let mut swap = SwapSubmit::clear_all(fw);
                    swap.set_swap_id(swap_id);
                    let held = core::mem::take(&mut st.swapped_out);
                    st.in_flight.push((swap_id, held));
                    dcp.swap_submit(st, &swap, move |dcp, st, resp| {
                        done.complete();
                        if resp.ret != 0 {
                            log::error!("clearing swap failed with status {}", { resp.ret });
                            dcp.swap_finished(st, swap_id);
                        }
                        Ok(())
                    })
                })
            },
        );
        if let Err(e) = cleared {
            if matches!(e, Error::Timeout { .. }) {
                log::error!("{e}; assuming the coprocessor crashed");
                let mut st = self.state.lock();
                self.mark_crashed(&mut st);
            }
            return Err(e);
        }

        self.call_and_wait(
            "power off",
            Duration::from_millis(self.config.timeouts.power_off_ms),
            |dcp, st, done| dcp.power_state(st, 0, done),
        )
    }

    /// Going down: stop presenting and ask the firmware to power off, without waiting.
    pub fn shutdown(&self) -> Result<(), Error> {
        log::debug!("shutting down");
        let mut st = self.state.lock();
        self.active.store(false, Ordering::Release);
        st.valid_mode = false;
        self.set_power_state(&mut st, false, &SetPowerStateReq::new(0), |_, _, _| Ok(()))
    }
}
