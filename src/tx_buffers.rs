//! Transmit mailboxes

use crate::message::{encode_id, pack_data, MessageInfo, MAX_DATA_LEN};
use crate::periph::Peripheral;
use crate::reg::fields::{MailboxLength, Tsr};
use crate::reg::RegisterAccess;
use core::cmp::min;

/// The mailbox still holds a pending transmission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MailboxBusy;

/// Transmit mailbox `index` of the peripheral.
pub(crate) struct TxMailbox<'a, R> {
    periph: &'a Peripheral<R>,
    index: usize,
}

impl<'a, R: RegisterAccess> TxMailbox<'a, R> {
    pub(crate) fn new(periph: &'a Peripheral<R>, index: usize) -> Self {
        Self { periph, index }
    }

    /// Loads the mailbox and requests transmission.
    ///
    /// At most 8 bytes of `data` are taken; remote frames take none and send
    /// the data length code from `info` instead. Returns the number of
    /// payload bytes accepted.
    pub fn transmit(&mut self, info: &MessageInfo, data: &[u8]) -> Result<usize, MailboxBusy> {
        if self.periph.tx_pending(self.index) {
            return Err(MailboxBusy);
        }
        let mut id = encode_id(info.id);
        let mut length = MailboxLength::default();
        let (size, words) = if info.rtr {
            id.set_rtr(true);
            length.set_dlc(info.dlc & 0xf);
            (0, (0, 0))
        } else {
            let size = min(data.len(), MAX_DATA_LEN);
            length.set_dlc(size as u8);
            (size, pack_data(&data[..size]))
        };
        self.periph.load_tx(self.index, id, length, words);
        Ok(size)
    }

    /// Requests the hardware to abort a pending transmission. Has no effect
    /// on an empty mailbox.
    pub fn abort(&mut self) {
        self.periph.acknowledge_tx(Tsr::abrq_mask(self.index))
    }
}
