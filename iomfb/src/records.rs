//! Fixed-layout request and response records carried inside packets.
//!
//! Records are packed and plain-old-data, so they can be copied straight out of and into shared
//! memory with [bytemuck]. Fields whose meaning is unknown are kept private: they occupy their
//! wire offsets and are always zero when a record is built with [bytemuck::Zeroable::zeroed].
use bytemuck::{Pod, Zeroable};

/// The prefix of a fixed-size, NUL padded string field.
pub fn fixed_str(field: &[u8]) -> &str {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..end]).unwrap_or("")
}

/// Copy `s` into a fixed-size, NUL padded string field, truncating if needed.
pub fn set_fixed_str(field: &mut [u8], s: &str) {
    field.fill(0);
    let n = s.len().min(field.len().saturating_sub(1));
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
}

/// Request for `set_digital_out_mode`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SetDigitalOutModeReq {
    /// Color mode selected from the mode's `ColorModes`.
    pub color_mode_id: u32,
    /// The mode's timing id.
    pub timing_mode_id: u32,
}

/// Request for `set_parameter_dcp`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SetParameterDcpReq {
    /// Parameter number.
    pub param: u32,
    /// Parameter values, `count` of which are meaningful.
    pub value: [u32; 8],
    /// Number of values.
    pub count: u32,
}

/// Request for `set_power_state`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SetPowerStateReq {
    /// 1 to power the display on, 0 to power it off.
    pub state: u64,
    unkbool: u8,
    unkint_null: u8,
    padding: [u8; 2],
}

impl SetPowerStateReq {
    /// A request for `state`.
    pub fn new(state: u64) -> SetPowerStateReq {
        SetPowerStateReq {
            state,
            ..Zeroable::zeroed()
        }
    }
}

/// Response to `set_power_state`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SetPowerStateResp {
    unkint: u32,
    /// Non-zero on failure.
    pub ret: u32,
}

/// Request for `get_color_remap_mode`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct GetColorRemapModeReq {
    /// Remap mode to query.
    pub mode: u32,
    mode_null: u8,
    padding: [u8; 3],
}

impl GetColorRemapModeReq {
    /// A query for `mode`.
    pub fn new(mode: u32) -> GetColorRemapModeReq {
        GetColorRemapModeReq {
            mode,
            ..Zeroable::zeroed()
        }
    }
}

/// Response to `get_color_remap_mode`.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct GetColorRemapModeResp {
    /// Mode the firmware reports back.
    pub mode: u32,
    /// Non-zero on failure.
    pub ret: u32,
}

/// Request of the `map_piodma` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapBufReq {
    /// Memory descriptor id of the buffer.
    pub buffer: u64,
    unk: u8,
    buf_null: u8,
    vaddr_null: u8,
    dva_null: u8,
}

impl MapBufReq {
    /// A request to map `buffer`.
    pub fn new(buffer: u64) -> MapBufReq {
        MapBufReq {
            buffer,
            ..Zeroable::zeroed()
        }
    }
}

/// Response of the `map_piodma` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapBufResp {
    /// Host virtual address, unused.
    pub vaddr: u64,
    /// Address of the buffer in the PIODMA address space.
    pub dva: u64,
    /// Errno on failure.
    pub ret: u32,
}

/// Request of the `unmap_piodma` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct UnmapBufReq {
    /// Memory descriptor id of the buffer.
    pub buffer: u64,
    /// Host virtual address, unused.
    pub vaddr: u64,
    /// Address the buffer was mapped at.
    pub dva: u64,
    unk: u8,
    buf_null: u8,
}

impl UnmapBufReq {
    /// A request to unmap `buffer` from `dva`.
    pub fn new(buffer: u64, dva: u64) -> UnmapBufReq {
        UnmapBufReq {
            buffer,
            dva,
            ..Zeroable::zeroed()
        }
    }
}

/// Request of the `allocate_buffer` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct AllocateBufferReq {
    unk0: u32,
    /// Requested size in bytes.
    pub size: u64,
    unk2: u32,
    paddr_null: u8,
    dva_null: u8,
    dva_size_null: u8,
    padding: u8,
}

impl AllocateBufferReq {
    /// A request for `size` bytes.
    pub fn new(size: u64) -> AllocateBufferReq {
        AllocateBufferReq {
            size,
            ..Zeroable::zeroed()
        }
    }
}

/// Response of the `allocate_buffer` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct AllocateBufferResp {
    /// Physical address, unused.
    pub paddr: u64,
    /// Device virtual address of the buffer.
    pub dva: u64,
    /// Mapped size, rounded up to pages.
    pub dva_size: u64,
    /// Memory descriptor id tracking the buffer.
    pub mem_desc_id: u32,
}

/// Request of the `map_physical` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapPhysicalReq {
    /// Physical address to map.
    pub paddr: u64,
    /// Size of the range.
    pub size: u64,
    /// Mapping flags.
    pub flags: u32,
    dva_null: u8,
    dva_size_null: u8,
    padding: [u8; 2],
}

impl MapPhysicalReq {
    /// A request to map `size` bytes at `paddr`.
    pub fn new(paddr: u64, size: u64) -> MapPhysicalReq {
        MapPhysicalReq {
            paddr,
            size,
            ..Zeroable::zeroed()
        }
    }
}

/// Response of the `map_physical` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapPhysicalResp {
    /// Device virtual address of the mapping.
    pub dva: u64,
    /// Mapped size.
    pub dva_size: u64,
    /// Memory descriptor id tracking the mapping.
    pub mem_desc_id: u32,
}

/// Request of the `map_reg` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapRegReq {
    /// Reversed object name.
    pub obj: [u8; 4],
    /// Index into the display register ranges.
    pub index: u32,
    /// Mapping flags.
    pub flags: u32,
    addr_null: u8,
    length_null: u8,
    padding: [u8; 2],
}

impl MapRegReq {
    /// A request for register range `index`.
    pub fn new(index: u32) -> MapRegReq {
        MapRegReq {
            index,
            ..Zeroable::zeroed()
        }
    }
}

/// Response of the `map_reg` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct MapRegResp {
    /// Physical start of the range.
    pub addr: u64,
    /// Length of the range.
    pub length: u64,
    /// Non-zero if the index is invalid.
    pub ret: u32,
}

/// Request of the `get_uint_prop` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct GetUintPropReq {
    /// Reversed object name.
    pub obj: [u8; 4],
    /// Property key.
    pub key: [u8; 0x40],
    /// Default value.
    pub value: u64,
    value_null: u8,
    padding: [u8; 3],
}

/// Response of the `get_uint_prop` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct GetUintPropResp {
    /// Property value.
    pub value: u64,
    /// Non-zero if the property is known.
    pub ret: u8,
    padding: [u8; 3],
}

/// Request of the `prop_chunk` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct PropChunkReq {
    /// Chunk payload, `length` bytes of which are valid.
    pub data: [u8; 0x1000],
    /// Offset of this chunk in the property.
    pub offset: u32,
    /// Length of this chunk.
    pub length: u32,
}

/// Request of the `prop_end` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct PropEndReq {
    /// Name of the completed property.
    pub key: [u8; 0x40],
}

/// Request of the `read_edt_data` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct ReadEdtDataReq {
    /// Entry name.
    pub key: [u8; 0x40],
    /// Number of values.
    pub count: u32,
    /// Default values.
    pub value: [u32; 8],
}

/// Response of the `read_edt_data` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct ReadEdtDataResp {
    /// Values.
    pub value: [u32; 8],
    /// Non-zero if the entry was found.
    pub ret: u8,
}

/// Response of the `rt_bandwidth` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct RtBandwidth {
    unk1: u64,
    /// Physical address of the scratch register.
    pub reg_scratch: u64,
    /// Physical address of the doorbell register.
    pub reg_doorbell: u64,
    unk2: u32,
    /// Bit to ring in the doorbell register.
    pub doorbell_bit: u32,
    /// Reserved, word 3 must be 4 when a doorbell is advertised.
    pub padding: [u32; 7],
}

/// Request of the `swap_complete_intent_gated` callback.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct SwapCompleteIntentGated {
    /// Swap the intent belongs to.
    pub swap_id: u32,
    unk_bool: u8,
    unk_int: u32,
    /// Width of the swapped frame.
    pub width: u32,
    /// Height of the swapped frame.
    pub height: u32,
}
