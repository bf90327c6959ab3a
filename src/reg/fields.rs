//! Bit field views over individual registers
//!
//! Each view wraps the raw register word; conversions to and from `u32` are
//! provided so views can be read from and written back through
//! [`RegisterAccess`](super::RegisterAccess).

use bitfield::bitfield;

macro_rules! impl_raw {
    ($($t:ident),* $(,)?) => {
        $(
            impl From<u32> for $t {
                fn from(value: u32) -> Self {
                    Self(value)
                }
            }

            impl From<$t> for u32 {
                fn from(value: $t) -> Self {
                    value.0
                }
            }
        )*
    };
}

bitfield! {
    /// Master control register (MCR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Mcr(u32);
    impl Debug;
    /// Initialization request
    pub inrq, set_inrq: 0;
    /// Sleep mode request
    pub sleep, set_sleep: 1;
    /// Transmit FIFO priority
    pub txfp, set_txfp: 2;
    /// Receive FIFO locked mode
    pub rflm, set_rflm: 3;
    /// No automatic retransmission
    pub nart, set_nart: 4;
    /// Automatic wakeup mode
    pub awum, set_awum: 5;
    /// Automatic bus-off management
    pub abom, set_abom: 6;
    /// Time triggered communication mode
    pub ttcm, set_ttcm: 7;
    /// Software master reset
    pub reset, set_reset: 15;
    /// Debug freeze
    pub dbf, set_dbf: 16;
}

bitfield! {
    /// Master status register (MSR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Msr(u32);
    impl Debug;
    /// Initialization acknowledge
    pub inak, _: 0;
    /// Sleep acknowledge
    pub slak, _: 1;
    /// Error interrupt pending, write 1 to clear
    pub erri, set_erri: 2;
    /// Wakeup interrupt pending, write 1 to clear
    pub wkui, set_wkui: 3;
    /// Sleep acknowledge interrupt pending, write 1 to clear
    pub slaki, set_slaki: 4;
}

/// Transmit status register (TSR)
///
/// Per-mailbox flags repeat every 8 bits; the mailbox empty flags sit at the
/// top of the word.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct Tsr(u32);

impl Tsr {
    const RQCP: u32 = 1 << 0;
    const TXOK: u32 = 1 << 1;
    const ALST: u32 = 1 << 2;
    const TERR: u32 = 1 << 3;
    const ABRQ: u32 = 1 << 7;
    const TME0: u32 = 26;

    /// Request completed flag of `mailbox`
    pub fn rqcp_mask(mailbox: usize) -> u32 {
        Self::RQCP << (8 * mailbox)
    }

    /// Abort request flag of `mailbox`
    pub fn abrq_mask(mailbox: usize) -> u32 {
        Self::ABRQ << (8 * mailbox)
    }

    /// Last request of `mailbox` has completed (successfully or not)
    pub fn rqcp(&self, mailbox: usize) -> bool {
        self.0 & Self::rqcp_mask(mailbox) != 0
    }

    /// Last request of `mailbox` was transmitted successfully
    pub fn txok(&self, mailbox: usize) -> bool {
        self.0 & (Self::TXOK << (8 * mailbox)) != 0
    }

    /// `mailbox` lost arbitration
    pub fn alst(&self, mailbox: usize) -> bool {
        self.0 & (Self::ALST << (8 * mailbox)) != 0
    }

    /// `mailbox` failed because of an error
    pub fn terr(&self, mailbox: usize) -> bool {
        self.0 & (Self::TERR << (8 * mailbox)) != 0
    }

    /// `mailbox` holds no pending request
    pub fn tme(&self, mailbox: usize) -> bool {
        self.0 & (1 << (Self::TME0 as usize + mailbox)) != 0
    }
}

bitfield! {
    /// Receive FIFO register (RF0R / RF1R)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Rfr(u32);
    impl Debug;
    /// Number of pending messages
    pub u8, fmp, _: 1, 0;
    /// FIFO full, write 1 to clear
    pub full, set_full: 3;
    /// FIFO overrun, write 1 to clear
    pub fovr, set_fovr: 4;
    /// Release the output mailbox
    pub rfom, set_rfom: 5;
}

bitfield! {
    /// Error status register (ESR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Esr(u32);
    impl Debug;
    /// Error warning flag
    pub ewgf, _: 0;
    /// Error passive flag
    pub epvf, _: 1;
    /// Bus-off flag
    pub boff, _: 2;
    /// Last error code
    pub u8, lec, set_lec: 6, 4;
    /// Transmit error counter
    pub u8, tec, _: 23, 16;
    /// Receive error counter
    pub u8, rec, _: 31, 24;
}

bitfield! {
    /// Bit timing register (BTR)
    ///
    /// Every field holds its value minus one.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Btr(u32);
    impl Debug;
    /// Baud rate prescaler
    pub u16, brp, set_brp: 9, 0;
    /// Time segment 1 (propagation plus phase segment 1)
    pub u8, ts1, set_ts1: 19, 16;
    /// Time segment 2
    pub u8, ts2, set_ts2: 22, 20;
    /// Resynchronization jump width
    pub u8, sjw, set_sjw: 25, 24;
    /// Loop back mode
    pub lbkm, set_lbkm: 30;
    /// Silent mode
    pub silm, set_silm: 31;
}

bitfield! {
    /// Mailbox identifier register (TIxR / RIxR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct MailboxId(u32);
    impl Debug;
    /// Transmit request (TX mailboxes only)
    pub txrq, set_txrq: 0;
    /// Remote transmission request
    pub rtr, set_rtr: 1;
    /// Identifier extension
    pub ide, set_ide: 2;
    /// Extended identifier (29 bits)
    pub u32, exid, set_exid: 31, 3;
    /// Standard identifier (11 bits)
    pub u16, stid, set_stid: 31, 21;
}

bitfield! {
    /// Mailbox length and time stamp register (TDTxR / RDTxR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct MailboxLength(u32);
    impl Debug;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
    /// Filter match index (RX only)
    pub u8, fmi, _: 15, 8;
    /// Message time stamp
    pub u16, time, _: 31, 16;
}

bitfield! {
    /// Filter master register (FMR)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Fmr(u32);
    impl Debug;
    /// Filter initialization mode
    pub finit, set_finit: 0;
}

impl_raw!(Mcr, Msr, Tsr, Rfr, Esr, Btr, MailboxId, MailboxLength, Fmr);
