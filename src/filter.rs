//! Acceptance filter bank allocation
//!
//! The controller has [`FILTER_BANKS`] banks. Each bank is configured either as
//! one 32-bit filter or as two 16-bit filters (one per [`Half`]), in identifier
//! list or mask mode, and routes matches to one of the two receive FIFOs.
//!
//! Extended identifiers only fit the 32-bit scale and always take a whole
//! bank. Standard identifiers use the 16-bit scale and share a bank with
//! another standard filter when mode and FIFO agree. An unused half holds
//! [`UNUSED_HALF`].
//!
//! Filter layout in the 16-bit scale, per half word:
//!
//! ```text
//! 15        5   4     3     2     0
//! | STID[10:0] | RTR | IDE | EXID[17:15] |
//! ```

use crate::fmt::{trace, warning};
use crate::periph::Peripheral;
use crate::reg::{RegisterAccess, FILTER_BANKS};
use crate::rx_fifo::Fifo;
use embedded_can::{ExtendedId, Id, StandardId};

/// Content of an unused filter bank half
pub const UNUSED_HALF: u32 = 0xffff_ffff;

/// Flag in the mask of a standard [`Filter::Maskable`] requiring the received
/// frame to carry a standard identifier.
pub const MASK_IDE: u32 = 1 << 31;

// 32-bit scale
const IDE: u32 = 1 << 2;
const RTR: u32 = 1 << 1;
// 16-bit scale, upper half word
const HIGH_RTR: u32 = 1 << 20;
const HIGH_IDE: u32 = 1 << 19;

/// Half of a filter bank, i.e. one of its two filter registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    /// FR1
    First,
    /// FR2
    Second,
}

impl Half {
    const BOTH: [Half; 2] = [Half::First, Half::Second];

    fn other(self) -> Self {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }
}

/// Acceptance filter of a receive object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Accept exactly `Id`, as data and as remote frame
    Exact(Id),
    /// Accept identifiers that equal `id` in every bit set in `mask`
    ///
    /// For standard identifiers, [`MASK_IDE`] in `mask` additionally rejects
    /// frames with extended identifiers.
    Maskable {
        /// Identifier to compare against
        id: Id,
        /// Bits of the identifier that must match
        mask: u32,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for Filter {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        match *self {
            Filter::Exact(id) => {
                defmt::write!(fmt, "Exact(");
                crate::message::format_id(fmt, id);
                defmt::write!(fmt, ")");
            }
            Filter::Maskable { id, mask } => {
                defmt::write!(fmt, "Maskable {{ id: ");
                crate::message::format_id(fmt, id);
                defmt::write!(fmt, ", mask: {=u32:#x} }}", mask);
            }
        }
    }
}

/// Filter manipulation requested through [`Can::object_set_filter`]
///
/// [`Can::object_set_filter`]: crate::bus::Can::object_set_filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterOperation {
    /// Add an exact identifier filter
    ExactAdd,
    /// Remove an exact identifier filter
    ExactRemove,
    /// Add an identifier range filter, not available on this controller
    RangeAdd,
    /// Remove an identifier range filter, not available on this controller
    RangeRemove,
    /// Add a maskable identifier filter
    MaskableAdd,
    /// Remove a maskable identifier filter
    MaskableRemove,
}

/// Part of a bank occupied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    /// The whole bank in 32-bit scale
    Wide,
    /// One half of a bank in 16-bit scale
    Half(Half),
}

/// Location of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Placement {
    /// Bank index
    pub bank: usize,
    /// Part of the bank
    pub slot: Slot,
}

/// Filter allocation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// Every bank that could hold the filter is in use
    NoFreeBank,
    /// No bank holds the filter to remove
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Words {
    Wide(u32, u32),
    Half(u32),
}

/// Bank configuration and content a filter needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Encoded {
    list: bool,
    fifo: Fifo,
    words: Words,
}

impl Encoded {
    fn wide(&self) -> bool {
        matches!(self.words, Words::Wide(..))
    }
}

fn extended(id: ExtendedId) -> u32 {
    id.as_raw() << 3 | IDE
}

fn standard(id: StandardId) -> u32 {
    u32::from(id.as_raw())
}

fn encode(filter: &Filter, fifo: Fifo) -> Encoded {
    let (list, words) = match *filter {
        Filter::Exact(Id::Extended(id)) => (true, Words::Wide(extended(id), extended(id) | RTR)),
        Filter::Maskable {
            id: Id::Extended(id),
            mask,
        } => (
            false,
            Words::Wide(extended(id), (mask & ExtendedId::MAX.as_raw()) << 3 | IDE),
        ),
        // Both half words hold the identifier, the upper one as remote frame
        Filter::Exact(Id::Standard(id)) => {
            let id = standard(id);
            (true, Words::Half(id << 5 | id << 21 | HIGH_RTR))
        }
        // Lower half word holds the identifier, upper one the mask
        Filter::Maskable {
            id: Id::Standard(id),
            mask,
        } => {
            let mut value = standard(id) << 5 | (mask & u32::from(StandardId::MAX.as_raw())) << 21;
            if mask & MASK_IDE != 0 {
                value |= HIGH_IDE;
            }
            (false, Words::Half(value))
        }
    };
    Encoded { list, fifo, words }
}

/// Filter bank allocator on top of the filter registers
pub(crate) struct FilterBanks<'a, R> {
    periph: &'a Peripheral<R>,
}

impl<'a, R: RegisterAccess> FilterBanks<'a, R> {
    pub(crate) fn new(periph: &'a Peripheral<R>) -> Self {
        Self { periph }
    }

    /// Runs `f` in filter initialization mode, restoring the previous mode
    /// afterwards.
    fn configure<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let keep = self.periph.enter_filter_init();
        let ret = f(self);
        self.periph.leave_filter_init(keep);
        ret
    }

    /// Installs `filter` routing matches to `fifo`.
    pub fn add(&mut self, fifo: Fifo, filter: &Filter) -> Result<Placement, FilterError> {
        let encoded = encode(filter, fifo);
        let ret = self.configure(|banks| match encoded.words {
            Words::Half(value) => banks
                .add_to_shared(&encoded, value)
                .map(Ok)
                .unwrap_or_else(|| banks.add_to_unused(&encoded)),
            Words::Wide(..) => banks.add_to_unused(&encoded),
        });
        match ret {
            Ok(placement) => trace!("filter added at {}", placement),
            Err(_) => warning!("no free filter bank"),
        }
        ret
    }

    /// Removes a filter previously installed with [`Self::add`] using the same
    /// arguments.
    pub fn remove(&mut self, fifo: Fifo, filter: &Filter) -> Result<Placement, FilterError> {
        let encoded = encode(filter, fifo);
        self.configure(|banks| {
            let periph = banks.periph;
            for bank in 0..FILTER_BANKS {
                if !banks.compatible(bank, &encoded) {
                    continue;
                }
                match encoded.words {
                    Words::Wide(fr1, fr2) => {
                        if periph.bank_half(bank, Half::First) == fr1
                            && periph.bank_half(bank, Half::Second) == fr2
                        {
                            banks.release(bank, Half::BOTH);
                            return Ok(Placement {
                                bank,
                                slot: Slot::Wide,
                            });
                        }
                    }
                    Words::Half(value) => {
                        for half in Half::BOTH {
                            if periph.bank_half(bank, half) != value {
                                continue;
                            }
                            periph.set_bank_half(bank, half, UNUSED_HALF);
                            if periph.bank_half(bank, half.other()) == UNUSED_HALF {
                                periph.set_bank_active(bank, false);
                            }
                            return Ok(Placement {
                                bank,
                                slot: Slot::Half(half),
                            });
                        }
                    }
                }
            }
            Err(FilterError::NotFound)
        })
    }

    /// Deactivates and empties every bank.
    pub fn clear(&mut self) {
        self.configure(|banks| banks.periph.clear_banks(FILTER_BANKS))
    }

    /// Bank is active with the scale, mode and FIFO `encoded` needs.
    fn compatible(&self, bank: usize, encoded: &Encoded) -> bool {
        let periph = self.periph;
        periph.bank_active(bank)
            && periph.bank_wide(bank) == encoded.wide()
            && periph.bank_list_mode(bank) == encoded.list
            && periph.bank_fifo(bank) == encoded.fifo
    }

    fn add_to_shared(&mut self, encoded: &Encoded, value: u32) -> Option<Placement> {
        let periph = self.periph;
        let (bank, half) = (0..FILTER_BANKS)
            .filter(|&bank| self.compatible(bank, encoded))
            .find_map(|bank| {
                Half::BOTH
                    .into_iter()
                    .find(|&half| periph.bank_half(bank, half) == UNUSED_HALF)
                    .map(|half| (bank, half))
            })?;
        periph.set_bank_half(bank, half, value);
        Some(Placement {
            bank,
            slot: Slot::Half(half),
        })
    }

    fn add_to_unused(&mut self, encoded: &Encoded) -> Result<Placement, FilterError> {
        let periph = self.periph;
        let bank = (0..FILTER_BANKS)
            .find(|&bank| !periph.bank_active(bank))
            .ok_or(FilterError::NoFreeBank)?;
        periph.set_bank_wide(bank, encoded.wide());
        periph.set_bank_list_mode(bank, encoded.list);
        periph.set_bank_fifo(bank, encoded.fifo);
        let (fr1, fr2, slot) = match encoded.words {
            Words::Wide(fr1, fr2) => (fr1, fr2, Slot::Wide),
            Words::Half(value) => (value, UNUSED_HALF, Slot::Half(Half::First)),
        };
        periph.set_bank_half(bank, Half::First, fr1);
        periph.set_bank_half(bank, Half::Second, fr2);
        // Activation last, a half configured bank never goes live
        periph.set_bank_active(bank, true);
        Ok(Placement { bank, slot })
    }

    fn release(&mut self, bank: usize, halves: [Half; 2]) {
        for half in halves {
            self.periph.set_bank_half(bank, half, UNUSED_HALF);
        }
        self.periph.set_bank_active(bank, false);
    }
}
