//! Display modes from the firmware's `TimingElements` and `DisplayAttributes` properties.
use alloc::vec::Vec;

use crate::{
    config::DeniedMode,
    parser::{self, Cursor, ParseError},
};

/// One axis of a timing element.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Dimension {
    /// Pixels (or lines) per period, blanking included.
    pub total: i64,
    /// Blanking between the active area and the sync pulse.
    pub front_porch: i64,
    /// Length of the sync pulse.
    pub sync_width: i64,
    /// Visible pixels (or lines).
    pub active: i64,
    /// Refresh rate in 16.16 fixed point Hz.
    pub precise_sync_rate: i64,
}

impl Dimension {
    /// Refresh rate in whole Hz.
    pub fn refresh_hz(&self) -> i64 {
        self.precise_sync_rate >> 16
    }

    /// Hide `notch_height` rows at the top of the panel by moving them into the sync period.
    pub fn hide_notch(&mut self, notch_height: u32) {
        self.active -= i64::from(notch_height);
        self.sync_width += i64::from(notch_height);
    }
}

/// Display timing in the conventional layout, clock in kHz.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Timing {
    /// Pixel clock in kHz.
    pub clock: u32,
    /// Visible width.
    pub hdisplay: u32,
    /// First pixel of the horizontal sync pulse.
    pub hsync_start: u32,
    /// End of the horizontal sync pulse.
    pub hsync_end: u32,
    /// Pixels per line, blanking included.
    pub htotal: u32,
    /// Visible height.
    pub vdisplay: u32,
    /// First line of the vertical sync pulse.
    pub vsync_start: u32,
    /// End of the vertical sync pulse.
    pub vsync_end: u32,
    /// Lines per frame, blanking included.
    pub vtotal: u32,
}

impl Timing {
    /// Lay out the two axes as display, sync start, sync end, total. `None` if any value does
    /// not fit.
    pub fn from_dimensions(horiz: &Dimension, vert: &Dimension, clock: u32) -> Option<Timing> {
        let axis = |d: &Dimension| -> Option<[u32; 4]> {
            let display = d.active;
            let sync_start = display.checked_add(d.front_porch)?;
            let sync_end = sync_start.checked_add(d.sync_width)?;
            Some([
                u32::try_from(display).ok()?,
                u32::try_from(sync_start).ok()?,
                u32::try_from(sync_end).ok()?,
                u32::try_from(d.total).ok()?,
            ])
        };
        let [hdisplay, hsync_start, hsync_end, htotal] = axis(horiz)?;
        let [vdisplay, vsync_start, vsync_end, vtotal] = axis(vert)?;
        Some(Timing {
            clock,
            hdisplay,
            hsync_start,
            hsync_end,
            htotal,
            vdisplay,
            vsync_start,
            vsync_end,
            vtotal,
        })
    }
}

/// Pixel clock in kHz, rounded to nearest.
pub fn calculate_clock(horiz: &Dimension, vert: &Dimension) -> Option<u32> {
    let pixels = u64::try_from(horiz.total)
        .ok()?
        .checked_mul(u64::try_from(vert.total).ok()?)?;
    let hz = pixels.checked_mul(u64::try_from(vert.precise_sync_rate).ok()?)? >> 16;
    u32::try_from((hz + 500) / 1000).ok()
}

/// A mode the display supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub timing: Timing,
    /// Colour mode requested when this mode is set.
    pub color_mode_id: u32,
    /// Timing mode requested when this mode is set.
    pub timing_mode_id: u32,
    /// Firmware ranking; higher is better.
    pub score: i64,
    /// Set on the single highest non-negative score.
    pub preferred: bool,
    /// Physical panel size, zero if unknown.
    pub width_mm: u32,
    pub height_mm: u32,
}

/// Host policy applied while extracting modes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModePolicy<'c> {
    /// Rows to hide at the top of the panel.
    pub notch_height: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub deny_list: &'c [DeniedMode],
}

impl ModePolicy<'_> {
    fn denies(&self, horiz: &Dimension, vert: &Dimension) -> bool {
        self.deny_list.iter().any(|d| {
            i64::from(d.width) == horiz.active
                && i64::from(d.height) == vert.active
                && i64::from(d.refresh_hz) == vert.refresh_hz()
        })
    }
}

fn parse_dimension(c: &mut Cursor) -> Result<Dimension, ParseError> {
    let mut dim = Dimension::default();
    let mut it = c.iter_dict()?;
    while let Some(key) = it.next_key() {
        let v = it.value();
        match key? {
            "Active" => dim.active = v.read_int()?,
            "Total" => dim.total = v.read_int()?,
            "FrontPorch" => dim.front_porch = v.read_int()?,
            "SyncWidth" => dim.sync_width = v.read_int()?,
            "PreciseSyncRate" => dim.precise_sync_rate = v.read_int()?,
            _ => v.skip()?,
        }
    }
    Ok(dim)
}

/// Pick the best usable color mode, returning its id.
///
/// Virtual entries and entries with a negative id or score are ignored. On equal scores the
/// first entry wins.
fn parse_color_modes(c: &mut Cursor) -> Result<Option<u32>, ParseError> {
    let mut best: Option<(u32, i64)> = None;
    let mut modes = c.iter_array()?;
    while let Some(entry) = modes.next_element() {
        let (mut id, mut score, mut is_virtual) = (-1i64, -1i64, false);
        let mut it = entry.iter_dict()?;
        while let Some(key) = it.next_key() {
            let v = it.value();
            match key? {
                "ID" => id = v.read_int()?,
                "Score" => score = v.read_int()?,
                "IsVirtual" => is_virtual = v.read_bool()?,
                _ => v.skip()?,
            }
        }
        let Ok(id) = u32::try_from(id) else { continue };
        if is_virtual || score < 0 {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((id, score));
        }
    }
    Ok(best.map(|(id, _)| id))
}

/// Parse one timing element. `Ok(None)` means the element is well formed but rejected.
fn parse_mode(c: &mut Cursor, policy: &ModePolicy) -> Result<Option<DisplayMode>, ParseError> {
    let mut horiz = Dimension::default();
    let mut vert = Dimension::default();
    let mut color_mode = None;
    let mut id = 0i64;
    let mut is_virtual = false;
    let mut score = 0i64;

    let mut it = c.iter_dict()?;
    while let Some(key) = it.next_key() {
        let v = it.value();
        match key? {
            "HorizontalAttributes" => horiz = parse_dimension(v)?,
            "VerticalAttributes" => vert = parse_dimension(v)?,
            "ColorModes" => color_mode = parse_color_modes(v)?,
            "ID" => id = v.read_int()?,
            "IsVirtual" => is_virtual = v.read_bool()?,
            "Score" => score = v.read_int()?,
            _ => v.skip()?,
        }
    }

    let Some(color_mode_id) = color_mode else {
        log::trace!("mode {id}: no usable color mode");
        return Ok(None);
    };
    if is_virtual {
        log::trace!("mode {id}: virtual");
        return Ok(None);
    }
    if policy.denies(&horiz, &vert) {
        log::debug!(
            "mode {id}: {}x{}@{} denied by policy",
            horiz.active,
            vert.active,
            vert.refresh_hz()
        );
        return Ok(None);
    }
    let Ok(timing_mode_id) = u32::try_from(id) else {
        return Ok(None);
    };

    if policy.notch_height > 0 {
        vert.hide_notch(policy.notch_height);
    }

    let Some(timing) = calculate_clock(&horiz, &vert)
        .and_then(|clock| Timing::from_dimensions(&horiz, &vert, clock))
    else {
        log::warn!("mode {id}: timing out of range");
        return Ok(None);
    };

    Ok(Some(DisplayMode {
        timing,
        color_mode_id,
        timing_mode_id,
        score,
        preferred: false,
        width_mm: policy.width_mm,
        height_mm: policy.height_mm,
    }))
}

/// Extract the usable modes from a `TimingElements` array.
///
/// A malformed element is dropped and the walk continues with its sibling, as long as the
/// element's extent can still be determined. The highest scoring mode (first on ties) is marked
/// preferred. Modes with a negative score are reported but never preferred.
pub fn enumerate_modes(c: &mut Cursor, policy: &ModePolicy) -> Result<Vec<DisplayMode>, ParseError> {
    // every element takes at least one tag
    let room = c.remaining_bytes() / 4;
    let mut elements = c.iter_array()?;
    let mut modes = Vec::with_capacity((elements.remaining() as usize).min(room));
    let mut best: Option<(usize, i64)> = None;

    while let Some(el) = elements.next_element() {
        let mut entry = el.clone();
        el.skip()?;
        match parse_mode(&mut entry, policy) {
            Ok(Some(mode)) => {
                if mode.score > best.map_or(-1, |(_, s)| s) {
                    best = Some((modes.len(), mode.score));
                }
                modes.push(mode);
            }
            Ok(None) => {}
            Err(e) => log::warn!("dropping malformed timing element: {e}"),
        }
    }

    if let Some((i, _)) = best {
        modes[i].preferred = true;
    }
    Ok(modes)
}

/// Parse a complete `TimingElements` document.
pub fn parse_timing_elements(
    buf: &[u8],
    policy: &ModePolicy,
) -> Result<Vec<DisplayMode>, ParseError> {
    enumerate_modes(&mut parser::parse(buf)?, policy)
}

/// Physical panel size in millimetres. Zero means unknown.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PanelSize {
    pub width_mm: u32,
    pub height_mm: u32,
}

fn cm_to_mm(cm: i64) -> u32 {
    cm.saturating_mul(10).clamp(0, i64::from(u32::MAX)) as u32
}

/// Parse a complete `DisplayAttributes` document.
pub fn parse_display_attributes(buf: &[u8]) -> Result<PanelSize, ParseError> {
    let mut c = parser::parse(buf)?;
    let mut size = PanelSize::default();
    let mut it = c.iter_dict()?;
    while let Some(key) = it.next_key() {
        let v = it.value();
        match key? {
            "MaxHorizontalImageSize" => size.width_mm = cm_to_mm(v.read_int()?),
            "MaxVerticalImageSize" => size.height_mm = cm_to_mm(v.read_int()?),
            _ => v.skip()?,
        }
    }
    Ok(size)
}
