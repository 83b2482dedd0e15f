//! Swap records.
//!
//! The swap submit request changes shape between firmware generations, so each known layout
//! lives in its own module and the driver picks one when it binds.
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Value of the `swap_enabled`/`swap_completed` fields.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct SwapEnabled: u32 {
        /// Surface slot 0.
        const SURFACE0 = 1 << 0;
        /// Surface slot 1.
        const SURFACE1 = 1 << 1;
        /// Surface slot 2.
        const SURFACE2 = 1 << 2;
        /// Surface slot 3.
        const SURFACE3 = 1 << 3;
        /// Remove layers missing from this swap instead of keeping their previous content.
        const REMOVE_LAYERS = 1 << 31;
    }
}

impl SwapEnabled {
    /// Every surface slot.
    pub const ALL_SURFACES: SwapEnabled = SwapEnabled::from_bits_truncate(0xf);

    /// The flag for surface slot `slot`.
    pub fn surface(slot: usize) -> SwapEnabled {
        SwapEnabled::from_bits_truncate(1 << slot)
    }
}

/// A rectangle as the firmware expects it: origin plus size.
#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Zeroable, Pod)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

/// Handle of the user client a swap is attributed to.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct IoUserClient {
    /// Client handle, an opaque kernel address on macOS.
    pub handle: u64,
    unk: u32,
    /// Unknown, set to 1.
    pub flag1: u8,
    /// Unknown, set to 1.
    pub flag2: u8,
    padding: [u8; 2],
}

/// Request for `swap_start`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SwapStartReq {
    /// Zero, the firmware assigns the id.
    pub swap_id: u32,
    /// Client attribution.
    pub client: IoUserClient,
    swap_id_null: u8,
    client_null: u8,
    padding: [u8; 2],
}

impl SwapStartReq {
    /// The request the host always sends.
    pub fn new() -> SwapStartReq {
        let mut req = SwapStartReq::zeroed();
        req.client.handle = 2;
        req.client.flag1 = 1;
        req.client.flag2 = 1;
        req
    }
}

impl Default for SwapStartReq {
    fn default() -> Self {
        SwapStartReq::new()
    }
}

/// Response to `swap_start`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SwapStartResp {
    /// Id assigned to the swap.
    pub swap_id: u32,
    /// Client attribution.
    pub client: IoUserClient,
    /// Non-zero on failure.
    pub ret: u32,
}

/// Response to `swap_submit`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SwapSubmitResp {
    unkoutbool: u8,
    /// Non-zero on failure.
    pub ret: u32,
    padding: [u8; 3],
}

impl SwapSubmitResp {
    /// A response carrying `ret`.
    pub fn new(ret: u32) -> SwapSubmitResp {
        SwapSubmitResp {
            ret,
            ..Zeroable::zeroed()
        }
    }
}

/// Request of the `swap_complete` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SwapCompleteReq {
    /// The swap that finished.
    pub swap_id: u32,
    unkbool: u8,
    swap_data: u64,
    swap_info: [u8; 0x6c4],
    unkint: u32,
    swap_info_null: u8,
}

impl SwapCompleteReq {
    /// A completion for `swap_id`.
    pub fn new(swap_id: u32) -> SwapCompleteReq {
        SwapCompleteReq {
            swap_id,
            ..Zeroable::zeroed()
        }
    }
}

/// Transfer function for standard dynamic range content.
pub const XFER_FUNC_SDR: u8 = 13;
/// Native panel colorspace.
pub const COLORSPACE_NATIVE: u8 = 1;

/// Layout used by macOS 12.3 firmware.
pub mod v12_3 {
    use bytemuck::{Pod, Zeroable};

    use super::Rect;
    use crate::SWAP_SURFACES;

    /// Planes per surface.
    pub const MAX_PLANES: usize = 3;

    /// Swap description shared by all surfaces.
    #[repr(C, packed)]
    #[derive(Debug, Copy, Clone, Zeroable, Pod)]
    pub struct Swap {
        ts1: u64,
        ts2: u64,
        unk_10: [u64; 6],
        flags1: u64,
        flags2: u64,
        /// Id handed out by `swap_start`.
        pub swap_id: u32,
        /// Ids of the attached surfaces.
        pub surf_ids: [u32; SWAP_SURFACES],
        /// Source rectangles, in framebuffer coordinates.
        pub src_rect: [Rect; SWAP_SURFACES],
        /// Per-surface flags.
        pub surf_flags: [u32; SWAP_SURFACES],
        surf_unk: [u32; SWAP_SURFACES],
        /// Destination rectangles, in display coordinates.
        pub dst_rect: [Rect; SWAP_SURFACES],
        /// Raw [super::SwapEnabled].
        pub swap_enabled: u32,
        /// Raw [super::SwapEnabled].
        pub swap_completed: u32,
        unk_10c: u32,
        unk_110: [u8; 0x1b8],
        unk_2c8: u32,
        unk_2cc: [u8; 0x14],
        unk_2e0: u32,
        unk_2e4: [u8; 0x3c],
    }

    const _: () = assert!(core::mem::size_of::<Swap>() == 0x320);

    /// Plane of a planar or compressed surface.
    #[repr(C, packed)]
    #[derive(Debug, Copy, Clone, Zeroable, Pod)]
    pub struct PlaneInfo {
        /// Width in pixels.
        pub width: u32,
        /// Height in pixels.
        pub height: u32,
        /// Base offset.
        pub base: u32,
        /// Offset of the plane.
        pub offset: u32,
        /// Bytes per row.
        pub stride: u32,
        /// Bytes in the plane.
        pub size: u32,
        /// Tile size.
        pub tile_size: u16,
        /// Tile width.
        pub tile_w: u8,
        /// Tile height.
        pub tile_h: u8,
        unk: [u32; 13],
    }

    /// Component types of a plane.
    #[repr(C, packed)]
    #[derive(Debug, Copy, Clone, Zeroable, Pod)]
    pub struct ComponentTypes {
        /// Number of valid entries in `types`.
        pub count: u8,
        /// Component types.
        pub types: [u8; 7],
    }

    /// A surface attached to a swap.
    #[repr(C, packed)]
    #[derive(Debug, Copy, Clone, Zeroable, Pod)]
    pub struct Surface {
        /// Non-zero for tiled layouts.
        pub is_tiled: u8,
        unk_1: u8,
        /// Ignore alpha.
        pub opaque: u8,
        /// Number of planes.
        pub plane_cnt: u32,
        /// Number of planes, again.
        pub plane_cnt2: u32,
        /// Pixel format as a fourcc.
        pub format: u32,
        unk_f: u32,
        /// Transfer function.
        pub xfer_func: u8,
        /// Colorspace.
        pub colorspace: u8,
        /// Bytes per row.
        pub stride: u32,
        /// Bytes per pixel.
        pub pix_size: u16,
        /// Pixel element width.
        pub pel_w: u8,
        /// Pixel element height.
        pub pel_h: u8,
        /// Offset of the first pixel.
        pub offset: u32,
        /// Width in pixels.
        pub width: u32,
        /// Height in pixels.
        pub height: u32,
        /// Size of the backing buffer.
        pub buf_size: u32,
        unk_2d: u32,
        unk_31: u32,
        /// Surface id.
        pub surface_id: u32,
        /// Component types per plane.
        pub comp_types: [ComponentTypes; MAX_PLANES],
        /// Non-zero if `comp_types` is valid.
        pub has_comp: u64,
        /// Plane descriptions.
        pub planes: [PlaneInfo; MAX_PLANES],
        /// Non-zero if `planes` is valid.
        pub has_planes: u64,
        /// Compression metadata.
        pub compression_info: [[u32; 13]; MAX_PLANES],
        /// Non-zero if `compression_info` is valid.
        pub has_compr_info: u64,
        unk_1f5: u64,
        padding: [u8; 7],
    }

    /// Request for `swap_submit`.
    #[repr(C, packed)]
    #[derive(Debug, Copy, Clone, Zeroable, Pod)]
    pub struct SwapSubmitReq {
        /// The swap.
        pub swap: Swap,
        /// Attached surfaces.
        pub surf: [Surface; SWAP_SURFACES],
        /// Device addresses of the surfaces.
        pub surf_iova: [u64; SWAP_SURFACES],
        unkbool: u8,
        unkdouble: u64,
        /// Non-zero to clear the screen.
        pub clear: u32,
        /// Non-zero if `swap` is absent.
        pub swap_null: u8,
        /// Non-zero for surface slots that are absent.
        pub surf_null: [u8; SWAP_SURFACES],
        unkoutbool_null: u8,
        padding: [u8; 1],
    }
}
