//! 64-bit doorbell messages.
use bitfield::bitfield;

use crate::ContextId;

/// Kinds of doorbell message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Host to firmware: address of the shared memory region.
    SetShmem = 0,
    /// Firmware to host: the service is up and ready to be started.
    Initialized = 1,
    /// A packet (or packet acknowledgement) on one of the contexts.
    Msg = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::SetShmem,
            1 => MessageType::Initialized,
            2 => MessageType::Msg,
            v => return Err(v),
        })
    }
}

/// Value of the flag nibble that accompanies `SET_SHMEM`.
pub const SHMEM_FLAG_VALUE: u8 = 4;

bitfield! {
    /// A doorbell message exchanged with the IOMFB endpoint.
    pub struct Message(u64);
    impl Debug;
    /// Raw message type, see [MessageType].
    pub u8, kind, set_kind: 3, 0;
    /// Flag nibble of a `SET_SHMEM` message.
    pub u8, shmem_flag, set_shmem_flag: 7, 4;
    /// Set when the message acknowledges the packet at the top of the context's stack.
    pub ack, set_ack: 6;
    /// Raw context id, see [ContextId].
    pub u8, context, set_context: 11, 8;
    /// Offset of the packet inside the context's region.
    pub u16, offset, set_offset: 31, 16;
    /// Length of the packet, header included.
    pub u32, length, set_length: 63, 32;
    /// Device virtual address carried by `SET_SHMEM`.
    pub u64, shmem_dva, set_shmem_dva: 63, 16;
}

impl Clone for Message {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for Message {}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Message {}

impl From<u64> for Message {
    fn from(raw: u64) -> Self {
        Message(raw)
    }
}

impl From<Message> for u64 {
    fn from(m: Message) -> Self {
        m.0
    }
}

impl Message {
    /// Build the `SET_SHMEM` handshake for a region mapped at `dva`.
    pub fn set_shmem(dva: u64) -> Message {
        let mut m = Message(0);
        m.set_kind(MessageType::SetShmem as u8);
        m.set_shmem_flag(SHMEM_FLAG_VALUE);
        m.set_shmem_dva(dva);
        m
    }

    /// Build the message the firmware sends once the service is initialized.
    pub fn initialized() -> Message {
        let mut m = Message(0);
        m.set_kind(MessageType::Initialized as u8);
        m
    }

    /// Announce a packet of `length` bytes at `offset` on `context`.
    pub fn packet(context: ContextId, offset: u16, length: u32) -> Message {
        let mut m = Message(0);
        m.set_kind(MessageType::Msg as u8);
        m.set_context(context as u8);
        m.set_offset(offset);
        m.set_length(length);
        m
    }

    /// Acknowledge the innermost outstanding packet on `context`.
    pub fn ack_for(context: ContextId) -> Message {
        let mut m = Message::packet(context, 0, 0);
        m.set_ack(true);
        m
    }

    /// Decoded message type, if it is one we know.
    pub fn message_type(&self) -> Result<MessageType, u8> {
        MessageType::try_from(self.kind())
    }

    /// Decoded context id, if valid.
    pub fn context_id(&self) -> Result<ContextId, u8> {
        ContextId::try_from(self.context())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_fields_are_bit_exact() {
        let m = Message::packet(ContextId::OobCommand, 0x1240, 0xabcd);
        assert_eq!(m.0, 2 | (6 << 8) | (0x1240 << 16) | (0xabcd << 32));
        assert!(!m.ack());
        assert_eq!(m.context_id(), Ok(ContextId::OobCommand));
    }

    #[test]
    fn ack_sets_bit_six() {
        let m = Message::ack_for(ContextId::Callback);
        assert_eq!(m.0, 2 | (1 << 6));
        assert_eq!(m.length(), 0);
    }

    #[test]
    fn set_shmem_carries_dva() {
        let m = Message::set_shmem(0xf_0000_4000);
        assert_eq!(m.message_type(), Ok(MessageType::SetShmem));
        assert_eq!(m.shmem_flag(), 4);
        assert_eq!(m.0 >> 16, 0xf_0000_4000);
    }
}
