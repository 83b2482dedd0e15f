//! Typed wrappers around [Dcp::push] for every method the host calls.
use alloc::boxed::Box;
use core::mem::size_of;

use bytemuck::{bytes_of, Pod};
use iomfb::{
    records::{
        GetColorRemapModeReq, GetColorRemapModeResp, SetDigitalOutModeReq, SetParameterDcpReq,
        SetPowerStateReq, SetPowerStateResp,
    },
    swap::{SwapStartReq, SwapStartResp, SwapSubmitResp},
    Method,
};

use super::{swap::SwapSubmit, Dcp, State};
use crate::error::Error;

/// Decode a fixed-layout record, zero-filling whatever the firmware did not provide.
pub(crate) fn decode<T: Pod>(bytes: &[u8]) -> T {
    let mut v = T::zeroed();
    let dst = bytemuck::bytes_of_mut(&mut v);
    let n = dst.len().min(bytes.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    v
}

macro_rules! method {
    ($(#[$m:meta])* $name:ident => $method:ident, void) => {
        $(#[$m])*
        pub(crate) fn $name(
            &self,
            st: &mut State,
            oob: bool,
            then: impl FnOnce(&Dcp, &mut State) -> Result<(), Error> + Send + 'static,
        ) -> Result<(), Error> {
            self.push(
                st,
                oob,
                Method::$method,
                &[],
                0,
                Some(Box::new(move |dcp: &Dcp, st: &mut State, _: &[u8]| then(dcp, st))),
            )
        }
    };
    ($(#[$m:meta])* $name:ident => $method:ident, out $out:ty) => {
        $(#[$m])*
        pub(crate) fn $name(
            &self,
            st: &mut State,
            oob: bool,
            then: impl FnOnce(&Dcp, &mut State, $out) -> Result<(), Error> + Send + 'static,
        ) -> Result<(), Error> {
            self.push(
                st,
                oob,
                Method::$method,
                &[],
                size_of::<$out>(),
                Some(Box::new(move |dcp: &Dcp, st: &mut State, resp: &[u8]| {
                    then(dcp, st, decode::<$out>(resp))
                })),
            )
        }
    };
    ($(#[$m:meta])* $name:ident => $method:ident, in $in:ty) => {
        $(#[$m])*
        pub(crate) fn $name(
            &self,
            st: &mut State,
            oob: bool,
            req: &$in,
            then: impl FnOnce(&Dcp, &mut State) -> Result<(), Error> + Send + 'static,
        ) -> Result<(), Error> {
            self.push(
                st,
                oob,
                Method::$method,
                bytes_of(req),
                0,
                Some(Box::new(move |dcp: &Dcp, st: &mut State, _: &[u8]| then(dcp, st))),
            )
        }
    };
    ($(#[$m:meta])* $name:ident => $method:ident, inout $in:ty => $out:ty) => {
        $(#[$m])*
        pub(crate) fn $name(
            &self,
            st: &mut State,
            oob: bool,
            req: &$in,
            then: impl FnOnce(&Dcp, &mut State, $out) -> Result<(), Error> + Send + 'static,
        ) -> Result<(), Error> {
            self.push(
                st,
                oob,
                Method::$method,
                bytes_of(req),
                size_of::<$out>(),
                Some(Box::new(move |dcp: &Dcp, st: &mut State, resp: &[u8]| {
                    then(dcp, st, decode::<$out>(resp))
                })),
            )
        }
    };
}

impl Dcp {
    method!(late_init_signal => LateInitSignal, out u32);
    method!(setup_video_limits => SetupVideoLimits, void);
    method!(set_create_dfb => SetCreateDfb, void);
    method!(start_signal_call => StartSignal, out u32);
    method!(swap_start => SwapStart, inout SwapStartReq => SwapStartResp);
    method!(
        /// `handle` is 0 for the built-in panel and 2 for external displays.
        set_display_device => SetDisplayDevice, inout u32 => u32
    );
    method!(set_digital_out_mode => SetDigitalOutMode, inout SetDigitalOutModeReq => u32);
    method!(create_default_fb => CreateDefaultFb, out u32);
    method!(set_display_refresh_properties => SetDisplayRefreshProperties, out u32);
    method!(flush_supports_power => FlushSupportsPower, in u32);
    method!(set_power_state => SetPowerState, inout SetPowerStateReq => SetPowerStateResp);
    method!(first_client_open => FirstClientOpen, void);
    method!(set_parameter_dcp => SetParameterDcp, inout SetParameterDcpReq => u32);
    method!(
        enable_disable_video_power_savings => EnableDisableVideoPowerSavings,
        inout u32 => i32
    );
    method!(is_main_display_call => IsMainDisplay, out u32);
    method!(pmu_service_matched => PmuServiceMatched, out u32);
    method!(backlight_service_matched => BacklightServiceMatched, out u32);
    method!(set_temperature_hint => SetTemperatureHint, out u32);
    method!(
        get_color_remap_mode => GetColorRemapMode,
        inout GetColorRemapModeReq => GetColorRemapModeResp
    );

    /// The submit request's layout depends on the firmware, so it is not generated.
    pub(crate) fn swap_submit(
        &self,
        st: &mut State,
        req: &SwapSubmit,
        then: impl FnOnce(&Dcp, &mut State, SwapSubmitResp) -> Result<(), Error> + Send + 'static,
    ) -> Result<(), Error> {
        self.push(
            st,
            false,
            Method::SwapSubmit,
            req.as_bytes(),
            size_of::<SwapSubmitResp>(),
            Some(Box::new(move |dcp: &Dcp, st: &mut State, resp: &[u8]| {
                then(dcp, st, decode::<SwapSubmitResp>(resp))
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_responses_are_zero_extended() {
        assert_eq!(decode::<u32>(&[1, 2]), 0x0201);
        assert_eq!(decode::<u32>(&[1, 2, 3, 4, 5]), 0x0403_0201);
        let resp: SetPowerStateResp = decode(&[]);
        assert_eq!({ resp.ret }, 0);
    }
}
