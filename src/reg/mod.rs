//! Register level view of the bxCAN peripheral

pub mod fields;

use bxcan_driver_core::CanId;
use core::marker::PhantomData;
use vcell::VolatileCell;

/// Number of transmit mailboxes
pub const TX_MAILBOXES: usize = 3;
/// Number of receive FIFOs
pub const RX_FIFOS: usize = 2;
/// Number of filter banks assigned to this controller
pub const FILTER_BANKS: usize = 14;

/// Transmit mailbox
#[repr(C)]
pub struct TxMailbox {
    /// Identifier
    pub tir: VolatileCell<u32>,
    /// Length and time stamp
    pub tdtr: VolatileCell<u32>,
    /// Data bytes 0..4
    pub tdlr: VolatileCell<u32>,
    /// Data bytes 4..8
    pub tdhr: VolatileCell<u32>,
}

/// Receive FIFO output mailbox
#[repr(C)]
pub struct RxMailbox {
    /// Identifier
    pub rir: VolatileCell<u32>,
    /// Length, filter match index and time stamp
    pub rdtr: VolatileCell<u32>,
    /// Data bytes 0..4
    pub rdlr: VolatileCell<u32>,
    /// Data bytes 4..8
    pub rdhr: VolatileCell<u32>,
}

/// Filter bank
#[repr(C)]
pub struct FilterBank {
    /// First filter register
    pub fr1: VolatileCell<u32>,
    /// Second filter register
    pub fr2: VolatileCell<u32>,
}

/// Memory layout of the bxCAN register block
#[repr(C)]
pub struct RegisterBlock {
    /// 0x000: Master control
    pub mcr: VolatileCell<u32>,
    /// 0x004: Master status
    pub msr: VolatileCell<u32>,
    /// 0x008: Transmit status
    pub tsr: VolatileCell<u32>,
    /// 0x00C..0x014: Receive FIFO 0 and 1
    pub rfr: [VolatileCell<u32>; RX_FIFOS],
    /// 0x014: Interrupt enable
    pub ier: VolatileCell<u32>,
    /// 0x018: Error status
    pub esr: VolatileCell<u32>,
    /// 0x01C: Bit timing
    pub btr: VolatileCell<u32>,
    _reserved0: [VolatileCell<u32>; 88],
    /// 0x180: Transmit mailboxes
    pub tx: [TxMailbox; TX_MAILBOXES],
    /// 0x1B0: Receive FIFO mailboxes
    pub rx: [RxMailbox; RX_FIFOS],
    _reserved1: [VolatileCell<u32>; 12],
    /// 0x200: Filter master
    pub fmr: VolatileCell<u32>,
    /// 0x204: Filter mode
    pub fm1r: VolatileCell<u32>,
    _reserved2: VolatileCell<u32>,
    /// 0x20C: Filter scale
    pub fs1r: VolatileCell<u32>,
    _reserved3: VolatileCell<u32>,
    /// 0x214: Filter FIFO assignment
    pub ffa1r: VolatileCell<u32>,
    _reserved4: VolatileCell<u32>,
    /// 0x21C: Filter activation
    pub fa1r: VolatileCell<u32>,
    _reserved5: [VolatileCell<u32>; 8],
    /// 0x240: Filter banks
    pub fb: [FilterBank; 28],
}

/// Addressable 32-bit registers
///
/// Indexed variants carry the mailbox, FIFO or filter bank number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Master control
    Mcr,
    /// Master status
    Msr,
    /// Transmit status
    Tsr,
    /// Receive FIFO status
    Rfr(usize),
    /// Interrupt enable
    Ier,
    /// Error status
    Esr,
    /// Bit timing
    Btr,
    /// TX mailbox identifier
    Tir(usize),
    /// TX mailbox length
    Tdtr(usize),
    /// TX mailbox low data word
    Tdlr(usize),
    /// TX mailbox high data word
    Tdhr(usize),
    /// RX FIFO mailbox identifier
    Rir(usize),
    /// RX FIFO mailbox length
    Rdtr(usize),
    /// RX FIFO mailbox low data word
    Rdlr(usize),
    /// RX FIFO mailbox high data word
    Rdhr(usize),
    /// Filter master
    Fmr,
    /// Filter mode
    Fm1r,
    /// Filter scale
    Fs1r,
    /// Filter FIFO assignment
    Ffa1r,
    /// Filter activation
    Fa1r,
    /// Filter bank register 1
    Fr1(usize),
    /// Filter bank register 2
    Fr2(usize),
}

/// Word access to the peripheral registers.
///
/// Implemented by [`Mmio`] for the real peripheral. Writes go through a shared
/// reference since the registers are interiorly mutable.
pub trait RegisterAccess {
    /// Read the current value of `reg`
    fn read(&self, reg: Reg) -> u32;
    /// Overwrite `reg` with `value`
    fn write(&self, reg: Reg, value: u32);
    /// Read-modify-write of `reg`
    fn modify<F: FnOnce(u32) -> u32>(&self, reg: Reg, f: F) {
        self.write(reg, f(self.read(reg)));
    }
}

impl<T: RegisterAccess> RegisterAccess for &T {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Memory mapped registers of the peripheral identified by `Id`
pub struct Mmio<Id>(PhantomData<Id>);

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The returned value assumes exclusive ownership of the whole register
    /// block of `Id`. Do not instantiate more than once and do not access the
    /// registers through any other path while it exists.
    pub(crate) unsafe fn new() -> Self {
        Self(PhantomData)
    }

    fn block(&self) -> &RegisterBlock {
        // Safety: `CanId::ADDRESS` points to a valid register block and the
        // constructor contract makes this the only owner.
        unsafe { &*(Id::ADDRESS as *const RegisterBlock) }
    }

    fn cell(&self, reg: Reg) -> &VolatileCell<u32> {
        let b = self.block();
        match reg {
            Reg::Mcr => &b.mcr,
            Reg::Msr => &b.msr,
            Reg::Tsr => &b.tsr,
            Reg::Rfr(n) => &b.rfr[n],
            Reg::Ier => &b.ier,
            Reg::Esr => &b.esr,
            Reg::Btr => &b.btr,
            Reg::Tir(n) => &b.tx[n].tir,
            Reg::Tdtr(n) => &b.tx[n].tdtr,
            Reg::Tdlr(n) => &b.tx[n].tdlr,
            Reg::Tdhr(n) => &b.tx[n].tdhr,
            Reg::Rir(n) => &b.rx[n].rir,
            Reg::Rdtr(n) => &b.rx[n].rdtr,
            Reg::Rdlr(n) => &b.rx[n].rdlr,
            Reg::Rdhr(n) => &b.rx[n].rdhr,
            Reg::Fmr => &b.fmr,
            Reg::Fm1r => &b.fm1r,
            Reg::Fs1r => &b.fs1r,
            Reg::Ffa1r => &b.ffa1r,
            Reg::Fa1r => &b.fa1r,
            Reg::Fr1(n) => &b.fb[n].fr1,
            Reg::Fr2(n) => &b.fb[n].fr2,
        }
    }
}

impl<Id: CanId> RegisterAccess for Mmio<Id> {
    fn read(&self, reg: Reg) -> u32 {
        self.cell(reg).get()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.cell(reg).set(value)
    }
}
