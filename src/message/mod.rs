//! Handling of messages/frames

use crate::reg::fields::MailboxId;
use core::cmp::min;
use embedded_can::{ExtendedId, Id, StandardId};

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Frame header exchanged with [`Can::message_send`] and
/// [`Can::message_read`]
///
/// [`Can::message_send`]: crate::bus::Can::message_send
/// [`Can::message_read`]: crate::bus::Can::message_read
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageInfo {
    /// Standard or extended identifier
    pub id: Id,
    /// Remote transmission request
    pub rtr: bool,
    /// Data length code. For data frames this is derived from the payload on
    /// transmission; for remote frames it is sent as given.
    pub dlc: u8,
}

impl MessageInfo {
    /// Header of a data frame
    pub fn data(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            rtr: false,
            dlc: 0,
        }
    }

    /// Header of a remote frame requesting `dlc` bytes
    pub fn remote(id: impl Into<Id>, dlc: u8) -> Self {
        Self {
            id: id.into(),
            rtr: true,
            dlc,
        }
    }
}

/// Identifier register contents for `id`, without the request bit.
pub(crate) fn encode_id(id: Id) -> MailboxId {
    let mut reg = MailboxId::default();
    match id {
        Id::Standard(id) => reg.set_stid(id.as_raw()),
        Id::Extended(id) => {
            reg.set_exid(id.as_raw());
            reg.set_ide(true);
        }
    }
    reg
}

pub(crate) fn decode_id(reg: MailboxId) -> Id {
    if reg.ide() {
        // The mask ensures the ID is in range for a 29-bit integer
        Id::Extended(unsafe { ExtendedId::new_unchecked(reg.exid() & ExtendedId::MAX.as_raw()) })
    } else {
        // The mask ensures the ID is in range for a 11-bit integer
        Id::Standard(unsafe { StandardId::new_unchecked(reg.stid() & StandardId::MAX.as_raw()) })
    }
}

/// Packs up to 8 bytes into the two little endian mailbox data words,
/// zero padded.
/// Writes the raw identifier and its format. `embedded_can::Id` has no
/// `defmt::Format` implementation of its own.
#[cfg(feature = "defmt")]
pub(crate) fn format_id(fmt: defmt::Formatter<'_>, id: Id) {
    match id {
        Id::Standard(id) => defmt::write!(fmt, "Standard({=u16:#x})", id.as_raw()),
        Id::Extended(id) => defmt::write!(fmt, "Extended({=u32:#x})", id.as_raw()),
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MessageInfo {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        defmt::write!(fmt, "MessageInfo {{ id: ");
        format_id(fmt, self.id);
        defmt::write!(fmt, ", rtr: {=bool}, dlc: {=u8} }}", self.rtr, self.dlc);
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        defmt::write!(
            fmt,
            "Frame {{ info: {}, data: {=[u8]} }}",
            self.info,
            &self.data[..usize::from(self.len)]
        );
    }
}

pub(crate) fn pack_data(data: &[u8]) -> (u32, u32) {
    let mut bytes = [0; MAX_DATA_LEN];
    let len = min(data.len(), MAX_DATA_LEN);
    bytes[..len].copy_from_slice(&data[..len]);
    let [a, b, c, d, e, f, g, h] = bytes;
    (u32::from_le_bytes([a, b, c, d]), u32::from_le_bytes([e, f, g, h]))
}

pub(crate) fn unpack_data(low: u32, high: u32) -> [u8; MAX_DATA_LEN] {
    let [a, b, c, d] = low.to_le_bytes();
    let [e, f, g, h] = high.to_le_bytes();
    [a, b, c, d, e, f, g, h]
}

/// Classic CAN frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    info: MessageInfo,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Frame {
    pub(crate) fn from_parts(info: MessageInfo, data: &[u8]) -> Self {
        let len = if info.rtr {
            0
        } else {
            min(data.len(), MAX_DATA_LEN)
        };
        let mut bytes = [0; MAX_DATA_LEN];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            info,
            len: len as u8,
            data: bytes,
        }
    }

    /// Frame header
    pub fn info(&self) -> &MessageInfo {
        &self.info
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        let mut info = MessageInfo::data(id);
        info.dlc = data.len() as u8;
        Some(Self::from_parts(info, data))
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Self::from_parts(MessageInfo::remote(id, dlc as u8), &[]))
    }

    fn is_extended(&self) -> bool {
        matches!(self.info.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.info.rtr
    }

    fn id(&self) -> Id {
        self.info.id
    }

    fn dlc(&self) -> usize {
        self.info.dlc.into()
    }

    fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }
}
