//! Simulated peripheral for unit tests
//!
//! [`SimRegisters`] models the register file closely enough for the driver
//! logic: initialization handshake, software reset, write 1 to clear flags,
//! three deep receive FIFOs and loop back delivery of transmit requests
//! through the configured acceptance filters.

use crate::reg::{Reg, RegisterAccess, FILTER_BANKS, RX_FIFOS, TX_MAILBOXES};
use bxcan_driver_core::{CanId, Dependencies};
use fugit::{HertzU32, RateExtU32};
use std::cell::RefCell;
use std::collections::VecDeque;

const MCR_INRQ: u32 = 1 << 0;
const MCR_SLEEP: u32 = 1 << 1;
const MCR_RESET: u32 = 1 << 15;
const MSR_INAK: u32 = 1 << 0;
const MSR_SLAK: u32 = 1 << 1;
const MSR_W1C: u32 = 0b1_1100;
const TSR_MAILBOX: u32 = 0x8f;
const TSR_RQCP: u32 = 1 << 0;
const TSR_TXOK: u32 = 1 << 1;
const TSR_ABRQ: u32 = 1 << 7;
const RFR_FULL: u32 = 1 << 3;
const RFR_FOVR: u32 = 1 << 4;
const RFR_RFOM: u32 = 1 << 5;
const ESR_LEC: u32 = 0b111 << 4;
const BTR_LBKM: u32 = 1 << 30;
const TIR_TXRQ: u32 = 1 << 0;
const FIFO_DEPTH: usize = 3;

/// Identifier, length and data words of a mailbox
type Mailbox = [u32; 4];

struct State {
    mcr: u32,
    msr: u32,
    tsr: u32,
    rfr: [u32; RX_FIFOS],
    ier: u32,
    esr: u32,
    btr: u32,
    tx: [Mailbox; TX_MAILBOXES],
    fifo: [VecDeque<Mailbox>; RX_FIFOS],
    fmr: u32,
    fm1r: u32,
    fs1r: u32,
    ffa1r: u32,
    fa1r: u32,
    fb: [[u32; 2]; 28],
    stuck_init_ack: bool,
    stuck_reset: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            mcr: 0x0001_0002,
            msr: 0x0000_0c02,
            tsr: 0,
            rfr: [0; RX_FIFOS],
            ier: 0,
            esr: 0,
            btr: 0x0123_0000,
            tx: [[0; 4]; TX_MAILBOXES],
            fifo: Default::default(),
            fmr: 1,
            fm1r: 0,
            fs1r: 0,
            ffa1r: 0,
            fa1r: 0,
            fb: [[0; 2]; 28],
            stuck_init_ack: false,
            stuck_reset: false,
        }
    }
}

fn bit(reg: u32, n: usize) -> bool {
    reg & (1 << n) != 0
}

/// 16-bit scale image of an identifier register
fn half_word(rir: u32) -> u32 {
    (rir >> 21) << 5 | (rir >> 1 & 1) << 4 | (rir >> 2 & 1) << 3 | (rir >> 18) & 0b111
}

impl State {
    fn reset(&mut self) {
        let (stuck_init_ack, stuck_reset) = (self.stuck_init_ack, self.stuck_reset);
        *self = Self {
            stuck_init_ack,
            stuck_reset,
            ..Default::default()
        };
    }

    fn write_mcr(&mut self, value: u32) {
        if value & MCR_RESET != 0 {
            if self.stuck_reset {
                self.mcr = value;
            } else {
                self.reset();
            }
            return;
        }
        self.mcr = value;
        if !self.stuck_init_ack {
            self.msr &= !(MSR_INAK | MSR_SLAK);
            if value & MCR_INRQ != 0 {
                self.msr |= MSR_INAK;
            } else if value & MCR_SLEEP != 0 {
                self.msr |= MSR_SLAK;
            }
        }
        for mailbox in 0..TX_MAILBOXES {
            self.try_transmit(mailbox);
        }
    }

    fn write_tsr(&mut self, value: u32) {
        for mailbox in 0..TX_MAILBOXES {
            let shift = 8 * mailbox;
            if value & (TSR_RQCP << shift) != 0 {
                self.tsr &= !(TSR_MAILBOX << shift);
            }
            if value & (TSR_ABRQ << shift) != 0 && self.tx[mailbox][0] & TIR_TXRQ != 0 {
                self.tx[mailbox][0] &= !TIR_TXRQ;
                self.tsr |= TSR_RQCP << shift;
            }
        }
    }

    fn write_rfr(&mut self, fifo: usize, value: u32) {
        if value & RFR_RFOM != 0 {
            self.fifo[fifo].pop_front();
        }
        self.rfr[fifo] &= !(value & (RFR_FULL | RFR_FOVR));
    }

    fn read_rfr(&self, fifo: usize) -> u32 {
        let pending = self.fifo[fifo].len() as u32;
        let full = if pending as usize == FIFO_DEPTH { RFR_FULL } else { 0 };
        self.rfr[fifo] | full | pending
    }

    fn read_tsr(&self) -> u32 {
        (0..TX_MAILBOXES)
            .filter(|&mailbox| self.tx[mailbox][0] & TIR_TXRQ == 0)
            .fold(self.tsr, |tsr, mailbox| tsr | 1 << (26 + mailbox))
    }

    fn rx_word(&self, fifo: usize, word: usize) -> u32 {
        self.fifo[fifo].front().map_or(0, |mailbox| mailbox[word])
    }

    /// Sends the mailbox if it is requested and the controller can reach
    /// itself through loop back.
    fn try_transmit(&mut self, mailbox: usize) {
        let frame = self.tx[mailbox];
        if frame[0] & TIR_TXRQ == 0
            || self.mcr & (MCR_INRQ | MCR_SLEEP) != 0
            || self.btr & BTR_LBKM == 0
        {
            return;
        }
        self.tx[mailbox][0] &= !TIR_TXRQ;
        self.tsr |= (TSR_RQCP | TSR_TXOK) << (8 * mailbox);
        self.deliver([frame[0] & !TIR_TXRQ, frame[1] & 0xf, frame[2], frame[3]]);
    }

    fn bank_matches(&self, bank: usize, rir: u32) -> bool {
        let [fr1, fr2] = self.fb[bank];
        let list = bit(self.fm1r, bank);
        if bit(self.fs1r, bank) {
            if list {
                rir == fr1 || rir == fr2
            } else {
                (rir ^ fr1) & fr2 == 0
            }
        } else {
            let frame = half_word(rir);
            let (lo1, hi1, lo2, hi2) = (fr1 & 0xffff, fr1 >> 16, fr2 & 0xffff, fr2 >> 16);
            if list {
                [lo1, hi1, lo2, hi2].contains(&frame)
            } else {
                (frame ^ lo1) & hi1 == 0 || (frame ^ lo2) & hi2 == 0
            }
        }
    }

    fn deliver(&mut self, frame: Mailbox) {
        if self.fmr & 1 != 0 {
            return;
        }
        let Some(bank) = (0..FILTER_BANKS)
            .find(|&bank| bit(self.fa1r, bank) && self.bank_matches(bank, frame[0]))
        else {
            return;
        };
        let fifo = usize::from(bit(self.ffa1r, bank));
        self.push(fifo, frame);
    }

    fn push(&mut self, fifo: usize, frame: Mailbox) {
        if self.fifo[fifo].len() == FIFO_DEPTH {
            self.rfr[fifo] |= RFR_FOVR;
        } else {
            self.fifo[fifo].push_back(frame);
        }
    }
}

/// Register file of a simulated controller, starting out in its reset state.
#[derive(Default)]
pub struct SimRegisters {
    state: RefCell<State>,
}

impl SimRegisters {
    /// Never acknowledge initialization requests
    pub fn set_stuck_init_ack(&self, stuck: bool) {
        self.state.borrow_mut().stuck_init_ack = stuck;
    }

    /// Never finish a software reset
    pub fn set_stuck_reset(&self, stuck: bool) {
        self.state.borrow_mut().stuck_reset = stuck;
    }

    /// Overwrites the error status register, including the read only flags
    /// and counters.
    pub fn set_error_status(&self, esr: u32) {
        self.state.borrow_mut().esr = esr;
    }

    /// Places a received frame into `fifo`, bypassing the filters.
    pub fn inject(&self, fifo: usize, rir: u32, dlc: u32, data: (u32, u32)) {
        self.state.borrow_mut().push(fifo, [rir, dlc, data.0, data.1]);
    }

    /// Number of frames held by `fifo`
    pub fn pending(&self, fifo: usize) -> usize {
        self.state.borrow().fifo[fifo].len()
    }
}

impl RegisterAccess for SimRegisters {
    fn read(&self, reg: Reg) -> u32 {
        let s = self.state.borrow();
        match reg {
            Reg::Mcr => s.mcr,
            Reg::Msr => s.msr,
            Reg::Tsr => s.read_tsr(),
            Reg::Rfr(n) => s.read_rfr(n),
            Reg::Ier => s.ier,
            Reg::Esr => s.esr,
            Reg::Btr => s.btr,
            Reg::Tir(n) => s.tx[n][0],
            Reg::Tdtr(n) => s.tx[n][1],
            Reg::Tdlr(n) => s.tx[n][2],
            Reg::Tdhr(n) => s.tx[n][3],
            Reg::Rir(n) => s.rx_word(n, 0),
            Reg::Rdtr(n) => s.rx_word(n, 1),
            Reg::Rdlr(n) => s.rx_word(n, 2),
            Reg::Rdhr(n) => s.rx_word(n, 3),
            Reg::Fmr => s.fmr,
            Reg::Fm1r => s.fm1r,
            Reg::Fs1r => s.fs1r,
            Reg::Ffa1r => s.ffa1r,
            Reg::Fa1r => s.fa1r,
            Reg::Fr1(n) => s.fb[n][0],
            Reg::Fr2(n) => s.fb[n][1],
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let mut s = self.state.borrow_mut();
        match reg {
            Reg::Mcr => s.write_mcr(value),
            Reg::Msr => s.msr &= !(value & MSR_W1C),
            Reg::Tsr => s.write_tsr(value),
            Reg::Rfr(n) => s.write_rfr(n, value),
            Reg::Ier => s.ier = value,
            Reg::Esr => s.esr = s.esr & !ESR_LEC | value & ESR_LEC,
            Reg::Btr => s.btr = value,
            Reg::Tir(n) => {
                s.tx[n][0] = value;
                s.try_transmit(n);
            }
            Reg::Tdtr(n) => s.tx[n][1] = value,
            Reg::Tdlr(n) => s.tx[n][2] = value,
            Reg::Tdhr(n) => s.tx[n][3] = value,
            Reg::Rir(_) | Reg::Rdtr(_) | Reg::Rdlr(_) | Reg::Rdhr(_) => {}
            Reg::Fmr => s.fmr = value,
            Reg::Fm1r => s.fm1r = value,
            Reg::Fs1r => s.fs1r = value,
            Reg::Ffa1r => s.ffa1r = value,
            Reg::Fa1r => s.fa1r = value,
            Reg::Fr1(n) => s.fb[n][0] = value,
            Reg::Fr2(n) => s.fb[n][1] = value,
        }
    }
}

/// Marker for the simulated controller. Its address is never dereferenced.
pub struct SimCan;

unsafe impl CanId for SimCan {
    const ADDRESS: *const () = core::ptr::null();
}

/// Clock and power control of the simulated controller
pub struct SimDeps {
    pub host_clock: HertzU32,
    pub can_clock: HertzU32,
    pub powered: bool,
    pub interrupt_enabled: bool,
}

impl Default for SimDeps {
    fn default() -> Self {
        Self {
            host_clock: 48.MHz(),
            can_clock: 48.MHz(),
            powered: false,
            interrupt_enabled: false,
        }
    }
}

unsafe impl Dependencies<SimCan> for SimDeps {
    fn host_clock(&self) -> HertzU32 {
        self.host_clock
    }

    fn can_clock(&self) -> HertzU32 {
        self.can_clock
    }

    fn power_up(&mut self) {
        self.powered = true;
    }

    fn power_down(&mut self) {
        self.powered = false;
    }

    fn enable_interrupt(&mut self) {
        self.interrupt_enabled = true;
    }

    fn disable_interrupt(&mut self) {
        self.interrupt_enabled = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn half_word_image() {
        // Standard 0x123, data frame
        assert_eq!(half_word(0x123 << 21), 0x123 << 5);
        // Standard 0x123, remote frame
        assert_eq!(half_word(0x123 << 21 | 0b010), 0x123 << 5 | 1 << 4);
        // Extended identifier bits 17:15 land in the low bits
        assert_eq!(half_word(0b101 << 18 | 0b100), 1 << 3 | 0b101);
    }

    #[test]
    fn reset_restores_power_on_values() {
        let sim = SimRegisters::default();
        sim.write(Reg::Mcr, MCR_INRQ);
        sim.write(Reg::Btr, 0);
        sim.write(Reg::Mcr, MCR_RESET);
        assert_eq!(sim.read(Reg::Mcr), 0x0001_0002);
        assert_eq!(sim.read(Reg::Btr), 0x0123_0000);
        assert_eq!(sim.read(Reg::Tsr), 0x1c00_0000);
    }
}
