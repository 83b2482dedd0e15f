//! Host-to-firmware methods and their tags.
use serde::Deserialize;

/// Firmware protocol revisions with a known method table and record layout.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum FirmwareVersion {
    /// macOS 12.3 firmware.
    #[default]
    V12_3,
}

/// Methods the host can call on the IOMFB service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Method {
    LateInitSignal,
    SetupVideoLimits,
    SetCreateDfb,
    StartSignal,
    SwapStart,
    SwapSubmit,
    SetDisplayDevice,
    SetDigitalOutMode,
    CreateDefaultFb,
    SetDisplayRefreshProperties,
    FlushSupportsPower,
    SetPowerState,
    FirstClientOpen,
    SetParameterDcp,
    EnableDisableVideoPowerSavings,
    IsMainDisplay,
    PmuServiceMatched,
    BacklightServiceMatched,
    SetTemperatureHint,
    GetColorRemapMode,
}

/// One row of a method table.
#[derive(Debug, Copy, Clone)]
pub struct MethodEntry {
    /// The method this row describes.
    pub method: Method,
    /// Firmware-side name, for logging.
    pub name: &'static str,
    /// Tag in reading order.
    pub tag: [u8; 4],
}

const fn entry(method: Method, name: &'static str, tag: &[u8; 4]) -> MethodEntry {
    MethodEntry {
        method,
        name,
        tag: *tag,
    }
}

/// Method table for [FirmwareVersion::V12_3], in [Method] declaration order.
pub static V12_3: [MethodEntry; 20] = [
    entry(Method::LateInitSignal, "late_init_signal", b"A000"),
    entry(Method::SetupVideoLimits, "setup_video_limits", b"A029"),
    entry(Method::SetCreateDfb, "set_create_dfb", b"A357"),
    entry(Method::StartSignal, "start_signal", b"A401"),
    entry(Method::SwapStart, "swap_start", b"A407"),
    entry(Method::SwapSubmit, "swap_submit", b"A408"),
    entry(Method::SetDisplayDevice, "set_display_device", b"A410"),
    entry(Method::SetDigitalOutMode, "set_digital_out_mode", b"A412"),
    entry(Method::CreateDefaultFb, "create_default_fb", b"A443"),
    entry(
        Method::SetDisplayRefreshProperties,
        "set_display_refresh_properties",
        b"A460",
    ),
    entry(Method::FlushSupportsPower, "flush_supports_power", b"A463"),
    entry(Method::SetPowerState, "set_power_state", b"A468"),
    entry(Method::FirstClientOpen, "first_client_open", b"A454"),
    entry(Method::SetParameterDcp, "set_parameter_dcp", b"A439"),
    entry(
        Method::EnableDisableVideoPowerSavings,
        "enable_disable_video_power_savings",
        b"A447",
    ),
    entry(Method::IsMainDisplay, "is_main_display", b"A411"),
    entry(Method::PmuServiceMatched, "pmu_service_matched", b"A131"),
    entry(
        Method::BacklightServiceMatched,
        "backlight_service_matched",
        b"A132",
    ),
    entry(Method::SetTemperatureHint, "vi_set_temperature_hint", b"A358"),
    entry(Method::GetColorRemapMode, "get_color_remap_mode", b"A426"),
];

impl FirmwareVersion {
    /// The method table for this firmware.
    pub fn methods(self) -> &'static [MethodEntry] {
        match self {
            FirmwareVersion::V12_3 => &V12_3,
        }
    }
}

impl Method {
    /// Look up this method's row for firmware `fw`.
    pub fn entry(self, fw: FirmwareVersion) -> &'static MethodEntry {
        let e = &fw.methods()[self as usize];
        debug_assert_eq!(e.method, self);
        e
    }
}
