//! Receive FIFOs

use crate::message::{decode_id, unpack_data, MessageInfo, MAX_DATA_LEN};
use crate::periph::Peripheral;
use crate::reg::RegisterAccess;
use core::cmp::min;
use core::convert::Infallible;

/// One of the two hardware receive queues
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fifo {
    /// FIFO 0
    Fifo0,
    /// FIFO 1
    Fifo1,
}

impl Fifo {
    /// Both FIFOs in index order
    pub const ALL: [Fifo; 2] = [Fifo::Fifo0, Fifo::Fifo1];

    /// Hardware index of the FIFO
    pub fn index(self) -> usize {
        match self {
            Fifo::Fifo0 => 0,
            Fifo::Fifo1 => 1,
        }
    }
}

/// Receive FIFO `fifo` of the peripheral.
pub(crate) struct RxFifo<'a, R> {
    periph: &'a Peripheral<R>,
    fifo: Fifo,
}

impl<'a, R: RegisterAccess> RxFifo<'a, R> {
    pub(crate) fn new(periph: &'a Peripheral<R>, fifo: Fifo) -> Self {
        Self { periph, fifo }
    }

    /// Number of frames waiting in the FIFO
    pub fn pending(&self) -> u8 {
        self.periph.fifo_status(self.fifo).fmp()
    }

    /// Frees the output mailbox so the next pending frame moves into it.
    pub fn release(&mut self) {
        self.periph.release_fifo(self.fifo)
    }

    /// Copies the oldest frame into `data` and releases it.
    ///
    /// Returns the header and the number of payload bytes copied, which is
    /// bounded by the length of `data`, the data length code and 8. Remote
    /// frames never copy anything.
    pub fn receive(&mut self, data: &mut [u8]) -> nb::Result<(MessageInfo, usize), Infallible> {
        if self.pending() == 0 {
            return Err(nb::Error::WouldBlock);
        }
        let (id, length, words) = self.periph.rx_mailbox(self.fifo);
        let info = MessageInfo {
            id: decode_id(id),
            rtr: id.rtr(),
            dlc: length.dlc(),
        };
        let size = if info.rtr {
            0
        } else {
            min(data.len(), min(usize::from(info.dlc), MAX_DATA_LEN))
        };
        if size > 0 {
            let bytes = unpack_data(words.0, words.1);
            data[..size].copy_from_slice(&bytes[..size]);
        }
        self.release();
        Ok((info, size))
    }
}
