//! Packet headers and callback tags.
use byteorder::{ByteOrder, LittleEndian};
use derive_more::Display;

use crate::PACKET_ALIGNMENT;

/// Size of [PacketHeader] on the wire.
pub const HEADER_SIZE: usize = 12;

/// Header preceding every packet in shared memory.
///
/// The tag holds the four character method or callback name with its bytes reversed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Reversed four character tag.
    pub tag: [u8; 4],
    /// Bytes of request payload following the header.
    pub in_len: u32,
    /// Bytes reserved after the request for the response.
    pub out_len: u32,
}

impl PacketHeader {
    /// Build a header for a call named `name` (in reading order, e.g. `b"A401"`).
    pub fn for_name(name: &[u8; 4], in_len: u32, out_len: u32) -> PacketHeader {
        let mut tag = *name;
        tag.reverse();
        PacketHeader {
            tag,
            in_len,
            out_len,
        }
    }

    /// Decode a header from the start of `buf`.
    pub fn read(buf: &[u8]) -> Option<PacketHeader> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(PacketHeader {
            tag: [buf[0], buf[1], buf[2], buf[3]],
            in_len: LittleEndian::read_u32(&buf[4..]),
            out_len: LittleEndian::read_u32(&buf[8..]),
        })
    }

    /// Encode this header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.tag);
        LittleEndian::write_u32(&mut buf[4..], self.in_len);
        LittleEndian::write_u32(&mut buf[8..], self.out_len);
        buf
    }

    /// The tag in reading order.
    pub fn name(&self) -> [u8; 4] {
        let mut n = self.tag;
        n.reverse();
        n
    }

    /// Length of the whole packet: header, request and response area.
    pub fn packet_len(&self) -> usize {
        HEADER_SIZE + self.in_len as usize + self.out_len as usize
    }
}

/// Round a packet length up to the placement alignment.
pub const fn align_packet(len: usize) -> usize {
    (len + PACKET_ALIGNMENT - 1) & !(PACKET_ALIGNMENT - 1)
}

/// Marker in the last tag position of every firmware callback.
pub const CALLBACK_MARKER: u8 = b'D';

/// Exclusive upper bound of callback numbers.
pub const MAX_CALLBACK: u16 = 1000;

/// Number of a firmware-to-host callback, e.g. 576 for `D576`.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "D{:03}", _0)]
pub struct CallbackId(pub u16);

impl CallbackId {
    /// Parse a callback number from a wire tag (reversed, so `D123` arrives as `b"321D"`).
    ///
    /// Returns `None` unless the first three bytes are ASCII digits and the last is the marker.
    pub fn parse(tag: [u8; 4]) -> Option<CallbackId> {
        if tag[3] != CALLBACK_MARKER {
            return None;
        }
        let mut id = 0u16;
        for (i, d) in tag[..3].iter().enumerate() {
            if !d.is_ascii_digit() {
                return None;
            }
            id += u16::from(d - b'0') * 10u16.pow(i as u32);
        }
        Some(CallbackId(id))
    }

    /// Wire tag for this callback, the inverse of [CallbackId::parse].
    pub fn wire_tag(self) -> [u8; 4] {
        let n = self.0 % MAX_CALLBACK;
        [
            b'0' + (n % 10) as u8,
            b'0' + (n / 10 % 10) as u8,
            b'0' + (n / 100) as u8,
            CALLBACK_MARKER,
        ]
    }
}
