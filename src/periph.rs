//! Named hardware operations
//!
//! [`Peripheral`] turns register bit twiddling into operations such as
//! "request initialization mode" or "load filter bank half", so the mode
//! controller, filter allocator and dispatcher never handle raw bit positions.

use crate::filter::{Half, UNUSED_HALF};
use crate::fmt::warning;
use crate::interrupt::InterruptSet;
use crate::reg::fields::{Btr, Esr, Fmr, MailboxId, MailboxLength, Mcr, Msr, Rfr, Tsr};
use crate::reg::{Reg, RegisterAccess};
use crate::rx_fifo::Fifo;

/// A hardware acknowledgment was not observed within the polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AckTimeout;

/// Register owner exposing named operations.
pub(crate) struct Peripheral<R> {
    regs: R,
}

impl<R: RegisterAccess> Peripheral<R> {
    pub(crate) fn new(regs: R) -> Self {
        Self { regs }
    }

    fn poll(&self, budget: u32, mut done: impl FnMut(&Self) -> bool) -> Result<(), AckTimeout> {
        for _ in 0..budget.max(1) {
            if done(self) {
                return Ok(());
            }
        }
        warning!("hardware acknowledgment timed out");
        Err(AckTimeout)
    }

    // Control and status

    pub fn control(&self) -> Mcr {
        self.regs.read(Reg::Mcr).into()
    }

    pub fn set_control(&self, mcr: Mcr) {
        self.regs.write(Reg::Mcr, mcr.into());
    }

    pub fn modify_control(&self, f: impl FnOnce(&mut Mcr)) {
        let mut mcr = self.control();
        f(&mut mcr);
        self.set_control(mcr);
    }

    pub fn status(&self) -> Msr {
        self.regs.read(Reg::Msr).into()
    }

    /// Overwrites the control register with only the initialization request
    /// set, leaving sleep mode.
    pub fn request_init(&self) {
        let mut mcr = Mcr::default();
        mcr.set_inrq(true);
        self.set_control(mcr);
    }

    /// Polls until the initialization acknowledgment reads `entered`.
    pub fn await_init_ack(&self, entered: bool, budget: u32) -> Result<(), AckTimeout> {
        self.poll(budget, |p| p.status().inak() == entered)
    }

    /// Triggers a software master reset and waits for it to finish.
    pub fn reset(&self, budget: u32) -> Result<(), AckTimeout> {
        let mut mcr = Mcr::default();
        mcr.set_reset(true);
        self.set_control(mcr);
        self.poll(budget, |p| !p.control().reset())
    }

    pub fn timing(&self) -> Btr {
        self.regs.read(Reg::Btr).into()
    }

    pub fn set_timing(&self, btr: Btr) {
        self.regs.write(Reg::Btr, btr.into());
    }

    /// Sets the loop back and silent bits of the timing register.
    pub fn set_test_mode(&self, loopback: bool, silent: bool) {
        let mut btr = self.timing();
        btr.set_lbkm(loopback);
        btr.set_silm(silent);
        self.set_timing(btr);
    }

    pub fn error_status(&self) -> Esr {
        self.regs.read(Reg::Esr).into()
    }

    /// Sets the last error code to the value hardware never produces, so a
    /// later read only shows errors that happened in between.
    pub fn reset_last_error_code(&self) {
        let mut esr = Esr::default();
        esr.set_lec(7);
        self.regs.write(Reg::Esr, esr.into());
    }

    pub fn interrupts_enabled(&self) -> InterruptSet {
        self.regs.read(Reg::Ier).into()
    }

    pub fn set_interrupts_enabled(&self, set: InterruptSet) {
        self.regs.write(Reg::Ier, set.into());
    }

    /// Clears the pending error interrupt.
    pub fn clear_error_interrupt(&self) {
        let mut msr = Msr::default();
        msr.set_erri(true);
        self.regs.write(Reg::Msr, msr.into());
    }

    // Transmit mailboxes

    pub fn tx_status(&self) -> Tsr {
        self.regs.read(Reg::Tsr).into()
    }

    /// Writes `mask` to the transmit status register. All flags are write 1
    /// to clear or write 1 to trigger, so bits outside `mask` are untouched.
    pub fn acknowledge_tx(&self, mask: u32) {
        self.regs.write(Reg::Tsr, mask);
    }

    pub fn tx_pending(&self, mailbox: usize) -> bool {
        MailboxId::from(self.regs.read(Reg::Tir(mailbox))).txrq()
    }

    /// Loads `mailbox` and requests its transmission. The identifier register
    /// is written last since it carries the request bit.
    pub fn load_tx(&self, mailbox: usize, mut id: MailboxId, length: MailboxLength, data: (u32, u32)) {
        self.regs.write(Reg::Tdlr(mailbox), data.0);
        self.regs.write(Reg::Tdhr(mailbox), data.1);
        self.regs.write(Reg::Tdtr(mailbox), length.into());
        id.set_txrq(true);
        self.regs.write(Reg::Tir(mailbox), id.into());
    }

    // Receive FIFOs

    pub fn fifo_status(&self, fifo: Fifo) -> Rfr {
        self.regs.read(Reg::Rfr(fifo.index())).into()
    }

    /// Releases the output mailbox of `fifo`.
    pub fn release_fifo(&self, fifo: Fifo) {
        let mut rfr = Rfr::default();
        rfr.set_rfom(true);
        self.regs.write(Reg::Rfr(fifo.index()), rfr.into());
    }

    pub fn clear_fifo_overrun(&self, fifo: Fifo) {
        let mut rfr = Rfr::default();
        rfr.set_fovr(true);
        self.regs.write(Reg::Rfr(fifo.index()), rfr.into());
    }

    /// Output mailbox of `fifo`: identifier, length and both data words.
    pub fn rx_mailbox(&self, fifo: Fifo) -> (MailboxId, MailboxLength, (u32, u32)) {
        let n = fifo.index();
        (
            self.regs.read(Reg::Rir(n)).into(),
            self.regs.read(Reg::Rdtr(n)).into(),
            (self.regs.read(Reg::Rdlr(n)), self.regs.read(Reg::Rdhr(n))),
        )
    }

    // Filter banks

    /// Enters filter initialization mode and returns whether it was already
    /// entered before.
    pub fn enter_filter_init(&self) -> bool {
        let mut fmr = Fmr::from(self.regs.read(Reg::Fmr));
        let was = fmr.finit();
        fmr.set_finit(true);
        self.regs.write(Reg::Fmr, fmr.into());
        was
    }

    /// Leaves filter initialization mode unless `keep` is set.
    pub fn leave_filter_init(&self, keep: bool) {
        if !keep {
            self.regs.modify(Reg::Fmr, |r| {
                let mut fmr = Fmr::from(r);
                fmr.set_finit(false);
                fmr.into()
            });
        }
    }

    #[cfg(test)]
    pub fn filter_init(&self) -> bool {
        Fmr::from(self.regs.read(Reg::Fmr)).finit()
    }

    fn bank_bit(&self, reg: Reg, bank: usize) -> bool {
        self.regs.read(reg) & (1 << bank) != 0
    }

    fn set_bank_bit(&self, reg: Reg, bank: usize, value: bool) {
        self.regs.modify(reg, |r| if value { r | 1 << bank } else { r & !(1 << bank) });
    }

    pub fn bank_active(&self, bank: usize) -> bool {
        self.bank_bit(Reg::Fa1r, bank)
    }

    pub fn set_bank_active(&self, bank: usize, active: bool) {
        self.set_bank_bit(Reg::Fa1r, bank, active)
    }

    /// `true` for identifier list mode, `false` for mask mode
    pub fn bank_list_mode(&self, bank: usize) -> bool {
        self.bank_bit(Reg::Fm1r, bank)
    }

    pub fn set_bank_list_mode(&self, bank: usize, list: bool) {
        self.set_bank_bit(Reg::Fm1r, bank, list)
    }

    /// `true` for a single 32-bit filter, `false` for two 16-bit filters
    pub fn bank_wide(&self, bank: usize) -> bool {
        self.bank_bit(Reg::Fs1r, bank)
    }

    pub fn set_bank_wide(&self, bank: usize, wide: bool) {
        self.set_bank_bit(Reg::Fs1r, bank, wide)
    }

    pub fn bank_fifo(&self, bank: usize) -> Fifo {
        if self.bank_bit(Reg::Ffa1r, bank) {
            Fifo::Fifo1
        } else {
            Fifo::Fifo0
        }
    }

    pub fn set_bank_fifo(&self, bank: usize, fifo: Fifo) {
        self.set_bank_bit(Reg::Ffa1r, bank, fifo == Fifo::Fifo1)
    }

    pub fn bank_half(&self, bank: usize, half: Half) -> u32 {
        self.regs.read(match half {
            Half::First => Reg::Fr1(bank),
            Half::Second => Reg::Fr2(bank),
        })
    }

    pub fn set_bank_half(&self, bank: usize, half: Half, value: u32) {
        self.regs.write(
            match half {
                Half::First => Reg::Fr1(bank),
                Half::Second => Reg::Fr2(bank),
            },
            value,
        )
    }

    /// Deactivates every bank and resets it to mask mode, 16-bit scale,
    /// FIFO 0 with both halves unused.
    pub fn clear_banks(&self, banks: usize) {
        self.regs.write(Reg::Fa1r, 0);
        self.regs.write(Reg::Fm1r, 0);
        self.regs.write(Reg::Fs1r, 0);
        self.regs.write(Reg::Ffa1r, 0);
        for bank in 0..banks {
            self.set_bank_half(bank, Half::First, UNUSED_HALF);
            self.set_bank_half(bank, Half::Second, UNUSED_HALF);
        }
    }
}
