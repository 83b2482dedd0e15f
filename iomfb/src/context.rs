//! Logical channels ("contexts") multiplexed over the shared-memory region.

use derive_more::Display;

/// Identifies which logical channel a message belongs to.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContextId {
    /// Firmware-initiated calls into the host (and host calls nested inside them).
    #[display(fmt = "cb")]
    Callback = 0,
    /// Host-initiated calls.
    #[display(fmt = "cmd")]
    Command = 2,
    /// Asynchronous firmware notifications.
    #[display(fmt = "async")]
    Async = 3,
    /// Out-of-band firmware-initiated calls.
    #[display(fmt = "oobcb")]
    OobCallback = 4,
    /// Out-of-band host-initiated calls.
    #[display(fmt = "oobcmd")]
    OobCommand = 6,
}

impl TryFrom<u8> for ContextId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ContextId::Callback,
            2 => ContextId::Command,
            3 => ContextId::Async,
            4 => ContextId::OobCallback,
            6 => ContextId::OobCommand,
            v => return Err(v),
        })
    }
}

impl ContextId {
    /// Every context, in wire-id order.
    pub const ALL: [ContextId; 5] = [
        ContextId::Callback,
        ContextId::Command,
        ContextId::Async,
        ContextId::OobCallback,
        ContextId::OobCommand,
    ];

    /// Base offset of the region the host writes its calls into when using this context.
    ///
    /// The asynchronous context is receive-only and has no transmit region.
    pub const fn tx_offset(self) -> Option<usize> {
        match self {
            ContextId::Callback | ContextId::Command => Some(0x00000),
            ContextId::OobCallback | ContextId::OobCommand => Some(0x08000),
            ContextId::Async => None,
        }
    }

    /// Base offset of the region the firmware writes packets for this context into.
    pub const fn rx_offset(self) -> usize {
        match self {
            ContextId::Async => 0x40000,
            ContextId::Callback => 0x60000,
            ContextId::OobCallback => 0x68000,
            ContextId::Command => 0x00000,
            ContextId::OobCommand => 0x08000,
        }
    }

    /// True for the out-of-band contexts.
    pub const fn is_oob(self) -> bool {
        matches!(self, ContextId::OobCallback | ContextId::OobCommand)
    }

    /// The context a host call uses, given whether the call is out-of-band and whether it is
    /// nested inside an outstanding command.
    pub const fn for_call(oob: bool, nested: bool) -> ContextId {
        match (oob, nested) {
            (false, false) => ContextId::Command,
            (false, true) => ContextId::Callback,
            (true, false) => ContextId::OobCommand,
            (true, true) => ContextId::OobCallback,
        }
    }
}
