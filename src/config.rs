//! Driver and bus timing configuration

use crate::reg::fields::Btr;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Driver wide tunables
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    /// Largest accepted deviation between the requested and the achievable
    /// bitrate, in units of 1/1024 of the peripheral clock.
    pub clock_tolerance: u32,
    /// Hardware acknowledgments are polled at most
    /// `host_clock / timeout_divider` times before giving up.
    pub timeout_divider: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            // Roughly 1.5 %
            clock_tolerance: 15,
            timeout_divider: 64,
        }
    }
}

impl DriverConfig {
    pub(crate) fn timeout_budget(&self, host_clock: HertzU32) -> u32 {
        host_clock.to_Hz() / self.timeout_divider.max(1)
    }
}

/// Bit-timing parameters
///
/// A bit is made of one synchronization quantum followed by the propagation
/// segment, phase segment 1 and phase segment 2, all expressed in time
/// quanta. The sample point sits between phase segment 1 and phase segment 2.
///
/// This struct expects *real* values, the minus-one encoding of the register
/// is handled by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Propagation segment
    pub prop_seg: u8,
    /// Phase segment 1
    pub phase_seg_1: u8,
    /// Phase segment 2
    pub phase_seg_2: u8,
    /// Synchronization jump width
    pub sjw: u8,
    /// Requested bitrate of the bus
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance
    ///
    /// Bitrate value must be provided, the segments default to 16 time quanta
    /// per bit with the sample point at 87.5 %.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            prop_seg: 5,
            phase_seg_1: 8,
            phase_seg_2: 2,
            sjw: 1,
            bitrate,
        }
    }

    /// Returns the number of time quanta that make up one bit time
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.prop_seg) + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    fn time_segment_1(&self) -> u32 {
        u32::from(self.prop_seg) + u32::from(self.phase_seg_1)
    }

    fn check(&self) -> Result<(), BitTimingError> {
        let valid = &BIT_TIMING_RANGES;
        if !valid.time_segment_1.contains(&self.time_segment_1()) {
            Err(BitTimingError::PropPhaseSeg1OutOfRange(
                valid.time_segment_1.clone(),
            ))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(
                valid.phase_seg_2.clone(),
            ))
        } else if !valid.sjw.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else {
            Ok(())
        }
    }

    /// Computes the baud rate prescaler for `can_clock`.
    ///
    /// The prescaler is rounded down; the remaining deviation from the
    /// requested bitrate must be within `tolerance` (in 1/1024 of the clock).
    pub fn prescaler(&self, can_clock: HertzU32, tolerance: u32) -> Result<u16, BitTimingError> {
        self.check()?;
        let clock = u64::from(can_clock.to_Hz());
        if clock == 0 {
            return Err(BitTimingError::NoClock);
        }
        let bit_time_quanta = self.time_quanta_per_bit();
        let f_q = u64::from(bit_time_quanta) * u64::from(self.bitrate.to_Hz());
        let valid = &BIT_TIMING_RANGES.prescaler;
        let prescaler = clock.checked_div(f_q).unwrap_or(0);
        if !valid.contains(&(prescaler as u32)) || prescaler > u64::from(*valid.end()) {
            return Err(BitTimingError::PrescalerOutOfRange(valid.clone()));
        }
        let achieved = prescaler * f_q;
        let error = (clock.abs_diff(achieved) * 1024 / clock) as u32;
        if error > tolerance {
            Err(BitTimingError::ToleranceExceeded {
                can_clock,
                bitrate: self.bitrate,
                bit_time_quanta,
                error,
            })
        } else {
            Ok(prescaler as u16)
        }
    }

    /// Bit timing register value for `prescaler`, keeping the silent and loop
    /// back bits of `current`.
    pub(crate) fn register(&self, prescaler: u16, current: Btr) -> Btr {
        let mut btr = Btr::default();
        btr.set_lbkm(current.lbkm());
        btr.set_silm(current.silm());
        btr.set_brp(prescaler - 1);
        btr.set_sjw(self.sjw - 1);
        btr.set_ts2(self.phase_seg_2 - 1);
        btr.set_ts1(self.prop_seg + self.phase_seg_1 - 1);
        btr
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitTimingError {
    /// Propagation segment plus phase segment 1 is outside the wrapped
    /// `RangeInclusive`
    PropPhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// The closest achievable bitrate deviates too much
    ToleranceExceeded {
        /// Provided peripheral clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
        /// Deviation in 1/1024 of the peripheral clock
        error: u32,
    },
    /// The peripheral clock frequency is not known
    NoClock,
}

/// Valid values of a BitTiming struct
struct BitTimingRanges {
    time_segment_1: RangeInclusive<u32>,
    phase_seg_2: RangeInclusive<u32>,
    sjw: RangeInclusive<u32>,
    prescaler: RangeInclusive<u32>,
}

const BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    time_segment_1: 1..=16,
    phase_seg_2: 1..=8,
    sjw: 1..=4,
    prescaler: 1..=1024,
};

/// Which bit timing a bitrate change applies to
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitrateSelect {
    /// Arbitration (and, for classic frames, the whole frame)
    Nominal,
    /// FD data phase, not available on this controller
    FdData,
}

/// Operating mode of the controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Off the bus, configuration allowed
    Initialization,
    /// Regular bus participation
    Normal,
    /// Receive only without acknowledging; not available on this controller
    Restricted,
    /// Silent bus monitoring
    Monitor,
    /// Transmissions are looped back internally and never reach the bus
    LoopbackInternal,
    /// Transmissions are looped back and also driven onto the bus
    LoopbackExternal,
}

/// Numeric mode value without a corresponding [`Mode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownMode(pub u32);

impl TryFrom<u32> for Mode {
    type Error = UnknownMode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use Mode::*;
        let ret = match value {
            0 => Initialization,
            1 => Normal,
            2 => Restricted,
            3 => Monitor,
            4 => LoopbackInternal,
            5 => LoopbackExternal,
            6.. => Err(UnknownMode(value))?,
        };
        Ok(ret)
    }
}
