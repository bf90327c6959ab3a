//! Interrupt sources and event dispatching
//!
//! The peripheral raises a single interrupt for transmit completion, receive
//! FIFO activity and error state changes. [`Can::on_interrupt`] drains the
//! hardware flags and reports them through the callbacks registered with
//! [`Can::initialize`].
//!
//! [`Can::on_interrupt`]: crate::bus::Can::on_interrupt
//! [`Can::initialize`]: crate::bus::Can::initialize

use crate::fmt::debug;
use crate::object::{Role, Roles, RX_OBJECTS};
use crate::periph::Peripheral;
use crate::reg::{RegisterAccess, TX_MAILBOXES};
use crate::reg::fields::Tsr;
use crate::rx_fifo::Fifo;
use bitfield::bitfield;

bitfield! {
    /// A set of interrupt sources, laid out as the interrupt enable register.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Transmit mailbox empty
    pub tme, set_tme: 0;
    /// FIFO 0 message pending
    pub fmp0, set_fmp0: 1;
    /// FIFO 0 full
    pub ff0, set_ff0: 2;
    /// FIFO 0 overrun
    pub fov0, set_fov0: 3;
    /// FIFO 1 message pending
    pub fmp1, set_fmp1: 4;
    /// FIFO 1 full
    pub ff1, set_ff1: 5;
    /// FIFO 1 overrun
    pub fov1, set_fov1: 6;
    /// Error warning
    pub ewg, set_ewg: 8;
    /// Error passive
    pub epv, set_epv: 9;
    /// Bus-off
    pub bof, set_bof: 10;
    /// Last error code
    pub lec, set_lec: 11;
    /// Error (gates the four sources above)
    pub err, set_err: 15;
    /// Wakeup
    pub wku, set_wku: 16;
    /// Sleep
    pub slk, set_slk: 17;
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl From<u32> for InterruptSet {
    fn from(value: u32) -> Self {
        InterruptSet(value)
    }
}

impl From<InterruptSet> for u32 {
    fn from(value: InterruptSet) -> Self {
        value.0
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        for int in self.iter() {
            write!(f, "{:?} ", int)?;
        }
        write!(f, "}}")
    }
}

/// A single interrupt source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// TMEIE
    TxMailboxEmpty = 0,
    /// FMPIE0
    Fifo0MessagePending = 1,
    /// FFIE0
    Fifo0Full = 2,
    /// FOVIE0
    Fifo0Overrun = 3,
    /// FMPIE1
    Fifo1MessagePending = 4,
    /// FFIE1
    Fifo1Full = 5,
    /// FOVIE1
    Fifo1Overrun = 6,
    /// EWGIE
    ErrorWarning = 8,
    /// EPVIE
    ErrorPassive = 9,
    /// BOFIE
    BusOff = 10,
    /// LECIE
    LastErrorCode = 11,
    /// ERRIE
    Error = 15,
    /// WKUIE
    Wakeup = 16,
    /// SLKIE
    Sleep = 17,
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// Bit position that is reserved or out of range
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, InvalidInterruptNumber> {
        use Interrupt::*;
        let ret = match value {
            0 => TxMailboxEmpty,
            1 => Fifo0MessagePending,
            2 => Fifo0Full,
            3 => Fifo0Overrun,
            4 => Fifo1MessagePending,
            5 => Fifo1Full,
            6 => Fifo1Overrun,
            8 => ErrorWarning,
            9 => ErrorPassive,
            10 => BusOff,
            11 => LastErrorCode,
            15 => Error,
            16 => Wakeup,
            17 => Sleep,
            7 | 12..=14 | 18.. => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

impl InterruptSet {
    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }

    /// Sources contained in either set
    pub fn union(self, other: Self) -> Self {
        InterruptSet(self.0 | other.0)
    }

    /// Sources enabled while the driver is powered
    pub fn powered() -> Self {
        use Interrupt::*;
        [
            TxMailboxEmpty,
            Fifo0MessagePending,
            Fifo0Overrun,
            Fifo1MessagePending,
            Fifo1Overrun,
            ErrorWarning,
            ErrorPassive,
            BusOff,
            Error,
        ]
        .into_iter()
        .collect()
    }

    /// Error state changes the dispatcher disarms after reporting them once
    pub fn error_states() -> Self {
        [Interrupt::ErrorWarning, Interrupt::ErrorPassive, Interrupt::BusOff]
            .into_iter()
            .collect()
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        // Reserved positions are skipped, the set ends at bit 17
        while self.index < 18 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                if let Ok(int) = Interrupt::try_from(i) {
                    return Some(int);
                }
            }
        }
        None
    }
}

/// Controller level event
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnitEvent {
    /// Error active, participating in bus traffic
    Active,
    /// An error counter reached the warning limit
    Warning,
    /// Error passive, or silent by mode
    Passive,
    /// Off the bus
    BusOff,
}

bitfield! {
    /// Events reported for a communication object
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct ObjectEvents(u8);

    /// A transmission request completed successfully
    pub send_complete, set_send_complete: 0;
    /// A frame is waiting to be read
    pub receive, set_receive: 1;
    /// At least one frame was lost because the FIFO was full
    pub receive_overrun, set_receive_overrun: 2;
}

impl ObjectEvents {
    fn send_completed() -> Self {
        let mut events = Self::default();
        events.set_send_complete(true);
        events
    }

    fn received(overrun: bool) -> Self {
        let mut events = Self::default();
        events.set_receive(true);
        events.set_receive_overrun(overrun);
        events
    }
}

impl core::fmt::Debug for ObjectEvents {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectEvents")
            .field("send_complete", &self.send_complete())
            .field("receive", &self.receive())
            .field("receive_overrun", &self.receive_overrun())
            .finish()
    }
}

/// Receives controller level events
pub type UnitCallback = fn(UnitEvent);
/// Receives events of the communication object at the given index
pub type ObjectCallback = fn(usize, ObjectEvents);

/// Registered event sinks
#[derive(Copy, Clone, Default)]
pub(crate) struct Callbacks {
    pub unit: Option<UnitCallback>,
    pub object: Option<ObjectCallback>,
}

impl Callbacks {
    pub fn any(&self) -> bool {
        self.unit.is_some() || self.object.is_some()
    }

    pub fn unit(&self, event: UnitEvent) {
        if let Some(f) = self.unit {
            f(event)
        }
    }

    fn object(&self, index: usize, events: ObjectEvents) {
        if let Some(f) = self.object {
            f(index, events)
        }
    }
}

/// Services every pending interrupt source once.
pub(crate) fn dispatch<R: RegisterAccess>(
    periph: &Peripheral<R>,
    roles: &Roles,
    callbacks: &Callbacks,
) {
    for mailbox in 0..TX_MAILBOXES {
        let tsr = periph.tx_status();
        if !tsr.rqcp(mailbox) {
            continue;
        }
        let object = RX_OBJECTS + mailbox;
        if tsr.txok(mailbox) && roles.get(object) == Role::Transmit {
            callbacks.object(object, ObjectEvents::send_completed());
        }
        periph.acknowledge_tx(Tsr::rqcp_mask(mailbox));
    }

    for fifo in Fifo::ALL {
        let object = fifo.index();
        if roles.get(object) != Role::Receive {
            // Nobody reads this FIFO, drop its frames so it cannot stall
            periph.release_fifo(fifo);
            continue;
        }
        let rfr = periph.fifo_status(fifo);
        if rfr.fovr() {
            periph.clear_fifo_overrun(fifo);
            callbacks.object(object, ObjectEvents::received(true));
        } else if rfr.fmp() != 0 {
            callbacks.object(object, ObjectEvents::received(false));
        }
    }

    if callbacks.unit.is_some() {
        let esr = periph.error_status();
        let mut ier = periph.interrupts_enabled();
        periph.clear_error_interrupt();
        // Reported once per assertion; a mode change re-arms the source
        let event = if esr.boff() && ier.bof() {
            ier.set_bof(false);
            Some(UnitEvent::BusOff)
        } else if esr.epvf() && ier.epv() {
            ier.set_epv(false);
            Some(UnitEvent::Passive)
        } else if esr.ewgf() && ier.ewg() {
            ier.set_ewg(false);
            Some(UnitEvent::Warning)
        } else {
            None
        };
        if let Some(event) = event {
            periph.set_interrupts_enabled(ier);
            debug!("unit event {}", event);
            callbacks.unit(event);
        }
    }
}
