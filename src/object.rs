//! Communication objects
//!
//! Objects `0..RX_OBJECTS` are bound to the receive FIFOs (object `n` to FIFO
//! `n`), objects `RX_OBJECTS..OBJECTS` to the transmit mailboxes (object
//! `RX_OBJECTS + n` to mailbox `n`).

use crate::reg::{RX_FIFOS, TX_MAILBOXES};
use crate::rx_fifo::Fifo;

/// Number of receive objects
pub const RX_OBJECTS: usize = RX_FIFOS;
/// Number of transmit objects
pub const TX_OBJECTS: usize = TX_MAILBOXES;
/// Total number of objects
pub const OBJECTS: usize = RX_OBJECTS + TX_OBJECTS;

/// What an object is currently used for
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Not in use
    #[default]
    Inactive,
    /// Sends frames
    Transmit,
    /// Receives frames
    Receive,
    /// Receives remote requests and answers them automatically, not available
    /// on this controller
    RxRtrTxData,
    /// Sends remote requests and receives the answers automatically, not
    /// available on this controller
    TxRtrRxData,
}

/// Numeric role value without a corresponding [`Role`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownRole(pub u32);

impl TryFrom<u32> for Role {
    type Error = UnknownRole;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use Role::*;
        let ret = match value {
            0 => Inactive,
            1 => Transmit,
            2 => Receive,
            3 => RxRtrTxData,
            4 => TxRtrRxData,
            5.. => Err(UnknownRole(value))?,
        };
        Ok(ret)
    }
}

/// Hardware resource behind an object index
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Binding {
    /// Receive FIFO
    Fifo(Fifo),
    /// Transmit mailbox index
    Mailbox(usize),
}

impl Binding {
    /// Resource bound to `object`, `None` if the index is out of range.
    pub fn of(object: usize) -> Option<Self> {
        match object {
            0 => Some(Binding::Fifo(Fifo::Fifo0)),
            1 => Some(Binding::Fifo(Fifo::Fifo1)),
            n if n < OBJECTS => Some(Binding::Mailbox(n - RX_OBJECTS)),
            _ => None,
        }
    }
}

/// Receive FIFO of a receive object
pub(crate) fn fifo_of(object: usize) -> Option<Fifo> {
    match Binding::of(object)? {
        Binding::Fifo(fifo) => Some(fifo),
        Binding::Mailbox(_) => None,
    }
}

/// Transmit mailbox of a transmit object
pub(crate) fn mailbox_of(object: usize) -> Option<usize> {
    match Binding::of(object)? {
        Binding::Mailbox(mailbox) => Some(mailbox),
        Binding::Fifo(_) => None,
    }
}

/// Roles of all objects
#[derive(Clone, Debug, Default)]
pub(crate) struct Roles([Role; OBJECTS]);

impl Roles {
    pub fn get(&self, object: usize) -> Role {
        self.0.get(object).copied().unwrap_or_default()
    }

    pub fn set(&mut self, object: usize, role: Role) {
        if let Some(slot) = self.0.get_mut(object) {
            *slot = role;
        }
    }

    pub fn reset(&mut self) {
        self.0 = Default::default();
    }
}

/// What an object supports
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectCapabilities {
    /// Can transmit
    pub tx: bool,
    /// Can receive
    pub rx: bool,
    /// Can answer remote requests automatically
    pub rx_rtr_tx_data: bool,
    /// Can send remote requests and receive the answer automatically
    pub tx_rtr_rx_data: bool,
    /// More than one filter can be attached
    pub multiple_filters: bool,
    /// Exact identifier filters are supported
    pub exact_filtering: bool,
    /// Identifier range filters are supported
    pub range_filtering: bool,
    /// Identifier mask filters are supported
    pub mask_filtering: bool,
    /// Number of frames the object can hold
    pub message_depth: u8,
}

impl ObjectCapabilities {
    /// Capabilities of `object`; all unset for an out of range index.
    pub fn of(object: usize) -> Self {
        match Binding::of(object) {
            Some(Binding::Fifo(_)) => Self {
                rx: true,
                multiple_filters: true,
                exact_filtering: true,
                mask_filtering: true,
                message_depth: 3,
                ..Default::default()
            },
            Some(Binding::Mailbox(_)) => Self {
                tx: true,
                message_depth: 1,
                ..Default::default()
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_partition() {
        assert_eq!(Binding::of(0), Some(Binding::Fifo(Fifo::Fifo0)));
        assert_eq!(Binding::of(1), Some(Binding::Fifo(Fifo::Fifo1)));
        assert_eq!(Binding::of(2), Some(Binding::Mailbox(0)));
        assert_eq!(Binding::of(4), Some(Binding::Mailbox(2)));
        assert_eq!(Binding::of(5), None);
        assert_eq!(fifo_of(3), None);
        assert_eq!(mailbox_of(1), None);
    }

    #[test]
    fn capabilities_follow_partition() {
        assert!(ObjectCapabilities::of(1).rx);
        assert!(!ObjectCapabilities::of(1).tx);
        assert_eq!(ObjectCapabilities::of(3).message_depth, 1);
        assert_eq!(ObjectCapabilities::of(9), ObjectCapabilities::default());
    }

    #[test]
    fn roles_ignore_out_of_range_indices() {
        let mut roles = Roles::default();
        roles.set(2, Role::Transmit);
        roles.set(7, Role::Receive);
        assert_eq!(roles.get(2), Role::Transmit);
        assert_eq!(roles.get(7), Role::Inactive);
        roles.reset();
        assert_eq!(roles.get(2), Role::Inactive);
    }
}
