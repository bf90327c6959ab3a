//! The CAN bus driver
//!
//! [`Can`] owns the peripheral and every piece of driver state: lifecycle,
//! object roles and the registered callbacks. A typical bring up looks like
//!
//! ```no_run
//! # use bxcan_driver::bus::{Can, PowerState};
//! # use bxcan_driver::config::{BitTiming, DriverConfig, Mode};
//! # use bxcan_driver::config::BitrateSelect;
//! # use bxcan_driver::object::Role;
//! # use bxcan_driver::filter::Filter;
//! # use bxcan_driver::fugit::RateExtU32;
//! # use bxcan_driver::embedded_can::StandardId;
//! # fn run<Id: bxcan_driver::core::CanId, D: bxcan_driver::core::Dependencies<Id>>(
//! #     dependencies: D,
//! # ) -> bxcan_driver::bus::Result<()> {
//! let mut can: Can<Id, D> = Can::new(dependencies, DriverConfig::default());
//! can.initialize(None, None)?;
//! can.power_control(PowerState::Full)?;
//! can.set_mode(Mode::Initialization)?;
//! can.set_bitrate(BitrateSelect::Nominal, &BitTiming::new(500.kHz()))?;
//! can.object_configure(0, Role::Receive)?;
//! can.object_configure(2, Role::Transmit)?;
//! let id = StandardId::new(0x123).unwrap();
//! can.add_filter(0, &Filter::Exact(id.into()))?;
//! can.set_mode(Mode::Normal)?;
//! # Ok(())
//! # }
//! ```

use crate::config::{BitTiming, BitTimingError, BitrateSelect, DriverConfig, Mode, UnknownMode};
use crate::filter::{Filter, FilterBanks, FilterError, FilterOperation, Placement};
use crate::fmt::{debug, warning};
use crate::interrupt::{self, Callbacks, InterruptSet, ObjectCallback, UnitCallback, UnitEvent};
use crate::message::{Frame, MessageInfo, MAX_DATA_LEN};
use crate::object::{fifo_of, mailbox_of, ObjectCapabilities, Role, Roles, UnknownRole, OBJECTS};
use crate::periph::{AckTimeout, Peripheral};
use crate::reg::fields::Mcr;
use crate::reg::{Mmio, RegisterAccess};
use crate::rx_fifo::RxFifo;
use crate::tx_buffers::{MailboxBusy, TxMailbox};
use bxcan_driver_core::{CanId, Dependencies};
use core::marker::PhantomData;
use embedded_can::Frame as _;
use fugit::HertzU32;

/// Errors returned by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An argument is out of range or names an unknown value
    Parameter,
    /// The driver is not in the lifecycle state, or the object not in the
    /// role, the operation requires
    State,
    /// The transmit mailbox still holds a pending request
    Busy,
    /// The peripheral did not acknowledge a request in time
    Timeout,
    /// The feature exists in the interface but not on this controller
    Unsupported,
    /// No filter bank can hold the filter
    NoFreeBank,
    /// The filter to remove is not installed
    FilterNotFound,
    /// The requested bit timing cannot be realized
    BitTiming(BitTimingError),
}

impl From<BitTimingError> for Error {
    fn from(err: BitTimingError) -> Self {
        Self::BitTiming(err)
    }
}

impl From<FilterError> for Error {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::NoFreeBank => Self::NoFreeBank,
            FilterError::NotFound => Self::FilterNotFound,
        }
    }
}

impl From<AckTimeout> for Error {
    fn from(_: AckTimeout) -> Self {
        Self::Timeout
    }
}

impl From<MailboxBusy> for Error {
    fn from(_: MailboxBusy) -> Self {
        Self::Busy
    }
}

impl From<UnknownMode> for Error {
    fn from(_: UnknownMode) -> Self {
        Self::Parameter
    }
}

impl From<UnknownRole> for Error {
    fn from(_: UnknownRole) -> Self {
        Self::Parameter
    }
}

/// CAN bus results
pub type Result<T> = core::result::Result<T, Error>;

/// Requested power state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Peripheral clock off, all configuration lost
    Off,
    /// Low power operation, not available on this controller
    Low,
    /// Peripheral clocked and reset to a known configuration
    Full,
}

/// Operation for [`Can::control`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlOp {
    /// Abort the pending transmission of a transmit object
    AbortSend(usize),
    /// Enable or disable automatic retransmission
    Retransmission(bool),
    /// Enable FD framing, not available on this controller
    FdMode(bool),
    /// Set the transceiver delay compensation, not available on this
    /// controller
    TransceiverDelay(u32),
}

/// Participation of the controller in bus traffic
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnitState {
    /// Not participating (initialization mode or bus-off)
    Inactive,
    /// Error active
    Active,
    /// Error passive, or silent by mode
    Passive,
}

/// Kind of the last error observed on the bus
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastErrorCode {
    /// No error since the last status read
    None,
    /// Bit stuffing error
    Stuff,
    /// Form error
    Form,
    /// Missing acknowledgment
    Ack,
    /// Recessive or dominant bit error
    Bit,
    /// CRC mismatch
    Crc,
}

impl LastErrorCode {
    fn from_lec(lec: u8) -> Self {
        match lec {
            1 => Self::Stuff,
            2 => Self::Form,
            3 => Self::Ack,
            4 | 5 => Self::Bit,
            6 => Self::Crc,
            _ => Self::None,
        }
    }
}

/// Snapshot returned by [`Can::status`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// Bus participation
    pub unit_state: UnitState,
    /// Last error since the previous snapshot
    pub last_error_code: LastErrorCode,
    /// Transmit error counter
    pub tx_error_count: u8,
    /// Receive error counter
    pub rx_error_count: u8,
}

/// What the controller supports
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// Number of communication objects
    pub num_objects: usize,
    /// Send, read, object and filter operations may be called from several
    /// call sites as long as they address different objects
    pub reentrant_operation: bool,
    /// FD framing
    pub fd_mode: bool,
    /// [`Mode::Restricted`]
    pub restricted_mode: bool,
    /// [`Mode::Monitor`]
    pub monitor_mode: bool,
    /// [`Mode::LoopbackInternal`]
    pub internal_loopback: bool,
    /// [`Mode::LoopbackExternal`]
    pub external_loopback: bool,
}

/// Interface and implementation versions, major in the high byte
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverVersion {
    /// Version of the driver interface
    pub api: u16,
    /// Version of this implementation
    pub driver: u16,
}

const CAPABILITIES: Capabilities = Capabilities {
    num_objects: OBJECTS,
    reentrant_operation: true,
    fd_mode: false,
    restricted_mode: false,
    monitor_mode: true,
    internal_loopback: true,
    external_loopback: true,
};

const VERSION: DriverVersion = DriverVersion {
    api: 0x0103,
    driver: 0x0103,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DriverState {
    Uninitialized,
    Initialized,
    Powered,
}

/// A CAN bus
///
/// `R` is the register access path, [`Mmio`] for the real peripheral.
///
/// The interrupt service routine of the peripheral must call
/// [`Can::on_interrupt`]. Roles must not be changed while the interrupt may
/// fire for the object in question; the dispatcher reads them without
/// synchronization.
pub struct Can<Id, D, R = Mmio<Id>> {
    periph: Peripheral<R>,
    dependencies: D,
    config: DriverConfig,
    state: DriverState,
    roles: Roles,
    callbacks: Callbacks,
    _id: PhantomData<Id>,
}

impl<Id: CanId, D: Dependencies<Id>> Can<Id, D> {
    /// Creates the driver for the peripheral behind `Id`. Nothing is
    /// touched until [`Can::power_control`].
    pub fn new(dependencies: D, config: DriverConfig) -> Self {
        // Safety: `Dependencies<Id>` is only implemented by the exclusive
        // owner of the `Id` peripheral, which is moved into the driver.
        let regs = unsafe { Mmio::new() };
        Self::with_registers(regs, dependencies, config)
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: RegisterAccess> Can<Id, D, R> {
    /// Creates the driver on top of an arbitrary register access path.
    pub fn with_registers(regs: R, dependencies: D, config: DriverConfig) -> Self {
        Self {
            periph: Peripheral::new(regs),
            dependencies,
            config,
            state: DriverState::Uninitialized,
            roles: Roles::default(),
            callbacks: Callbacks::default(),
            _id: PhantomData,
        }
    }

    /// Powers the peripheral off and hands back its dependencies.
    pub fn release(mut self) -> D {
        self.power_off();
        self.dependencies
    }

    /// Dependencies the driver was created with
    pub fn dependencies(&self) -> &D {
        &self.dependencies
    }

    /// What the controller supports
    pub fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    /// Interface and implementation versions
    pub fn version(&self) -> DriverVersion {
        VERSION
    }

    fn budget(&self) -> u32 {
        self.config.timeout_budget(self.dependencies.host_clock())
    }

    fn ensure_powered(&self) -> Result<()> {
        match self.state {
            DriverState::Powered => Ok(()),
            _ => Err(Error::State),
        }
    }

    /// Registers the event callbacks.
    ///
    /// Calling it again before [`Can::uninitialize`] succeeds without
    /// replacing the callbacks.
    pub fn initialize(
        &mut self,
        unit: Option<UnitCallback>,
        object: Option<ObjectCallback>,
    ) -> Result<()> {
        if self.state != DriverState::Uninitialized {
            return Ok(());
        }
        self.callbacks = Callbacks { unit, object };
        self.state = DriverState::Initialized;
        Ok(())
    }

    /// Powers the peripheral off if needed and forgets the callbacks.
    pub fn uninitialize(&mut self) -> Result<()> {
        self.power_off();
        self.callbacks = Callbacks::default();
        self.state = DriverState::Uninitialized;
        Ok(())
    }

    fn power_off(&mut self) {
        self.dependencies.disable_interrupt();
        if self.state == DriverState::Powered {
            FilterBanks::new(&self.periph).clear();
            self.state = DriverState::Initialized;
        }
        self.roles.reset();
        self.dependencies.power_down();
        debug!("powered off");
    }

    fn power_on(&mut self) -> Result<()> {
        self.dependencies.power_up();
        self.periph.reset(self.budget())?;
        self.periph.enter_filter_init();
        FilterBanks::new(&self.periph).clear();
        self.roles.reset();
        self.periph.set_interrupts_enabled(InterruptSet::powered());
        self.state = DriverState::Powered;
        if self.callbacks.any() {
            self.dependencies.enable_interrupt();
        }
        debug!("powered on");
        Ok(())
    }

    /// Switches the peripheral power.
    ///
    /// [`PowerState::Full`] requires [`Can::initialize`] first and resets the
    /// peripheral, leaving it in sleep mode with every filter bank inactive
    /// and every object [`Role::Inactive`]. Repeating it while powered does
    /// nothing. [`PowerState::Off`] is accepted in any state.
    pub fn power_control(&mut self, state: PowerState) -> Result<()> {
        match state {
            PowerState::Off => {
                self.power_off();
                Ok(())
            }
            PowerState::Low => Err(Error::Unsupported),
            PowerState::Full => match self.state {
                DriverState::Uninitialized => Err(Error::State),
                DriverState::Powered => Ok(()),
                DriverState::Initialized => self.power_on(),
            },
        }
    }

    /// Frequency of the peripheral clock
    pub fn get_clock(&self) -> HertzU32 {
        self.dependencies.can_clock()
    }

    /// Programs the bit timing.
    ///
    /// The controller passes through initialization mode for the register
    /// write and is returned to its previous mode; silent and loop back
    /// settings are kept.
    pub fn set_bitrate(&mut self, select: BitrateSelect, timing: &BitTiming) -> Result<()> {
        if select != BitrateSelect::Nominal {
            return Err(Error::Unsupported);
        }
        self.ensure_powered()?;
        let prescaler = timing.prescaler(self.dependencies.can_clock(), self.config.clock_tolerance)?;
        let budget = self.budget();
        let periph = &self.periph;

        let saved = periph.control();
        periph.request_init();
        periph.await_init_ack(true, budget)?;
        periph.set_timing(timing.register(prescaler, periph.timing()));
        periph.set_control(saved);
        periph.await_init_ack(saved.inrq(), budget)?;
        debug!("bitrate {} with prescaler {}", timing.bitrate, prescaler);
        Ok(())
    }

    /// Switches the operating mode.
    ///
    /// Every mode change re-arms the error state interrupts disarmed by the
    /// dispatcher and reports the resulting unit state: `BusOff` for
    /// initialization, `Active` for normal and external loop back, `Passive`
    /// for monitor and internal loop back.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.ensure_powered()?;
        let budget = self.budget();
        let periph = &self.periph;

        let (loopback, silent, event) = match mode {
            Mode::Restricted => return Err(Error::Unsupported),
            Mode::Initialization => {
                periph.enter_filter_init();
                periph.request_init();
                periph.await_init_ack(true, budget)?;
                self.arm_error_states();
                debug!("mode {}", mode);
                self.callbacks.unit(UnitEvent::BusOff);
                return Ok(());
            }
            Mode::Normal => (false, false, UnitEvent::Active),
            Mode::Monitor => (false, true, UnitEvent::Passive),
            Mode::LoopbackInternal => (true, true, UnitEvent::Passive),
            Mode::LoopbackExternal => (true, false, UnitEvent::Active),
        };

        periph.modify_control(|mcr| mcr.set_inrq(true));
        periph.await_init_ack(true, budget)?;
        periph.set_test_mode(loopback, silent);
        if mode == Mode::Normal {
            let mut mcr = Mcr::default();
            mcr.set_abom(true);
            mcr.set_awum(true);
            periph.set_control(mcr);
        } else {
            periph.modify_control(|mcr| {
                mcr.set_inrq(false);
                mcr.set_sleep(false);
            });
        }
        periph.await_init_ack(false, budget)?;
        periph.leave_filter_init(false);

        self.arm_error_states();
        debug!("mode {}", mode);
        self.callbacks.unit(event);
        Ok(())
    }

    fn arm_error_states(&self) {
        let armed = self.periph.interrupts_enabled().union(InterruptSet::error_states());
        self.periph.set_interrupts_enabled(armed);
    }

    /// Capabilities of the object at `index`
    pub fn object_get_capabilities(&self, index: usize) -> ObjectCapabilities {
        ObjectCapabilities::of(index)
    }

    /// Adds or removes an acceptance filter of receive object `index`.
    ///
    /// `arg` is the mask of maskable filters and ignored otherwise.
    pub fn object_set_filter(
        &mut self,
        index: usize,
        operation: FilterOperation,
        id: embedded_can::Id,
        arg: u32,
    ) -> Result<Placement> {
        fifo_of(index).ok_or(Error::Parameter)?;
        self.ensure_powered()?;
        match operation {
            FilterOperation::ExactAdd => self.add_filter(index, &Filter::Exact(id)),
            FilterOperation::ExactRemove => self.remove_filter(index, &Filter::Exact(id)),
            FilterOperation::MaskableAdd => {
                self.add_filter(index, &Filter::Maskable { id, mask: arg })
            }
            FilterOperation::MaskableRemove => {
                self.remove_filter(index, &Filter::Maskable { id, mask: arg })
            }
            FilterOperation::RangeAdd | FilterOperation::RangeRemove => Err(Error::Unsupported),
        }
    }

    /// Installs `filter` for receive object `index` and returns where it was
    /// placed.
    ///
    /// Filter initialization mode is left as found. Filters added while in
    /// [`Mode::Initialization`] stay inactive until the next operating mode.
    pub fn add_filter(&mut self, index: usize, filter: &Filter) -> Result<Placement> {
        let fifo = fifo_of(index).ok_or(Error::Parameter)?;
        self.ensure_powered()?;
        Ok(FilterBanks::new(&self.periph).add(fifo, filter)?)
    }

    /// Removes a filter installed with [`Can::add_filter`].
    pub fn remove_filter(&mut self, index: usize, filter: &Filter) -> Result<Placement> {
        let fifo = fifo_of(index).ok_or(Error::Parameter)?;
        self.ensure_powered()?;
        Ok(FilterBanks::new(&self.periph).remove(fifo, filter)?)
    }

    /// Assigns `role` to the object at `index`.
    ///
    /// [`Role::Receive`] is only valid on receive objects, [`Role::Transmit`]
    /// only on transmit objects. The automatic remote frame roles leave the
    /// object inactive and fail with [`Error::Unsupported`].
    pub fn object_configure(&mut self, index: usize, role: Role) -> Result<()> {
        if index >= OBJECTS {
            return Err(Error::Parameter);
        }
        self.ensure_powered()?;
        match role {
            Role::Inactive => {}
            Role::Transmit => {
                mailbox_of(index).ok_or(Error::Parameter)?;
            }
            Role::Receive => {
                fifo_of(index).ok_or(Error::Parameter)?;
            }
            Role::RxRtrTxData | Role::TxRtrRxData => {
                self.roles.set(index, Role::Inactive);
                return Err(Error::Unsupported);
            }
        }
        self.roles.set(index, role);
        Ok(())
    }

    /// Queues a frame on transmit object `index`.
    ///
    /// Data frames carry at most 8 bytes of `data`, remote frames none.
    /// Returns the number of payload bytes accepted.
    pub fn message_send(&mut self, index: usize, info: &MessageInfo, data: &[u8]) -> Result<usize> {
        let mailbox = mailbox_of(index).ok_or(Error::Parameter)?;
        self.ensure_powered()?;
        if self.roles.get(index) != Role::Transmit {
            return Err(Error::State);
        }
        let sent = TxMailbox::new(&self.periph, mailbox).transmit(info, data)?;
        Ok(sent)
    }

    /// Takes the oldest frame from receive object `index`.
    ///
    /// Copies as much of the payload as fits into `data` and returns the
    /// header together with the number of bytes copied.
    pub fn message_read(
        &mut self,
        index: usize,
        data: &mut [u8],
    ) -> nb::Result<(MessageInfo, usize), Error> {
        let fifo = fifo_of(index).ok_or(Error::Parameter)?;
        self.ensure_powered()?;
        if self.roles.get(index) != Role::Receive {
            return Err(Error::State.into());
        }
        RxFifo::new(&self.periph, fifo)
            .receive(data)
            .map_err(|err| match err {
                nb::Error::WouldBlock => nb::Error::WouldBlock,
                nb::Error::Other(never) => match never {},
            })
    }

    /// [`Can::message_send`] for an [`embedded_can::Frame`]
    pub fn transmit_frame(&mut self, index: usize, frame: &Frame) -> Result<usize> {
        self.message_send(index, frame.info(), frame.data())
    }

    /// [`Can::message_read`] into an [`embedded_can::Frame`]
    pub fn receive_frame(&mut self, index: usize) -> nb::Result<Frame, Error> {
        let mut data = [0; MAX_DATA_LEN];
        let (info, len) = self.message_read(index, &mut data)?;
        Ok(Frame::from_parts(info, &data[..len]))
    }

    /// Miscellaneous runtime controls
    pub fn control(&mut self, op: ControlOp) -> Result<()> {
        self.ensure_powered()?;
        match op {
            ControlOp::AbortSend(index) => {
                let mailbox = mailbox_of(index).ok_or(Error::Parameter)?;
                TxMailbox::new(&self.periph, mailbox).abort();
            }
            ControlOp::Retransmission(enable) => {
                self.periph.modify_control(|mcr| mcr.set_nart(!enable));
            }
            ControlOp::FdMode(_) | ControlOp::TransceiverDelay(_) => {
                return Err(Error::Unsupported)
            }
        }
        Ok(())
    }

    /// Current bus state and error counters.
    ///
    /// Reading resets the last error code so the next snapshot only reports
    /// errors that happened in between.
    pub fn status(&mut self) -> Result<Status> {
        self.ensure_powered()?;
        let periph = &self.periph;
        let esr = periph.error_status();
        periph.reset_last_error_code();
        let btr = periph.timing();

        let unit_state = if periph.status().inak() {
            UnitState::Inactive
        } else if btr.lbkm() || btr.silm() {
            UnitState::Passive
        } else if esr.boff() {
            UnitState::Inactive
        } else if esr.epvf() {
            UnitState::Passive
        } else {
            UnitState::Active
        };
        Ok(Status {
            unit_state,
            last_error_code: LastErrorCode::from_lec(esr.lec()),
            tx_error_count: esr.tec(),
            rx_error_count: esr.rec(),
        })
    }

    /// Services the peripheral interrupt; call from its interrupt handler.
    ///
    /// Transmit completions, pending frames, overruns and error state changes
    /// are reported through the callbacks given to [`Can::initialize`].
    pub fn on_interrupt(&self) {
        if self.state != DriverState::Powered {
            warning!("interrupt while not powered");
            return;
        }
        interrupt::dispatch(&self.periph, &self.roles, &self.callbacks);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interrupt::ObjectEvents;
    use crate::reg::fields::{Btr, Tsr};
    use crate::reg::Reg;
    use crate::sim::{SimCan, SimDeps, SimRegisters};
    use embedded_can::{ExtendedId, Id, StandardId};
    use fugit::RateExtU32;
    use std::cell::RefCell;
    use std::vec::Vec;

    type SimBus<'a> = Can<SimCan, SimDeps, &'a SimRegisters>;

    std::thread_local! {
        static UNIT_EVENTS: RefCell<Vec<UnitEvent>> = RefCell::new(Vec::new());
        static OBJECT_EVENTS: RefCell<Vec<(usize, ObjectEvents)>> = RefCell::new(Vec::new());
    }

    fn record_unit(event: UnitEvent) {
        UNIT_EVENTS.with(|events| events.borrow_mut().push(event));
    }

    fn record_object(index: usize, events: ObjectEvents) {
        OBJECT_EVENTS.with(|log| log.borrow_mut().push((index, events)));
    }

    fn unit_events() -> Vec<UnitEvent> {
        UNIT_EVENTS.with(|events| events.take())
    }

    fn object_events() -> Vec<(usize, ObjectEvents)> {
        OBJECT_EVENTS.with(|events| events.take())
    }

    fn std_id(raw: u16) -> Id {
        Id::Standard(StandardId::new(raw).unwrap())
    }

    fn ext_id(raw: u32) -> Id {
        Id::Extended(ExtendedId::new(raw).unwrap())
    }

    fn timing_500k() -> BitTiming {
        BitTiming {
            prop_seg: 2,
            phase_seg_1: 5,
            phase_seg_2: 8,
            sjw: 4,
            bitrate: 500.kHz(),
        }
    }

    fn powered(sim: &SimRegisters) -> SimBus<'_> {
        let mut can: SimBus<'_> = Can::with_registers(sim, SimDeps::default(), DriverConfig::default());
        can.initialize(Some(record_unit), Some(record_object)).unwrap();
        can.power_control(PowerState::Full).unwrap();
        can
    }

    /// Powered bus in internal loop back with objects 0 and 1 receiving and
    /// object 2 transmitting
    fn loopback(sim: &SimRegisters) -> SimBus<'_> {
        let mut can = powered(sim);
        can.set_mode(Mode::Initialization).unwrap();
        can.set_bitrate(BitrateSelect::Nominal, &timing_500k()).unwrap();
        can.object_configure(0, Role::Receive).unwrap();
        can.object_configure(1, Role::Receive).unwrap();
        can.object_configure(2, Role::Transmit).unwrap();
        can.set_mode(Mode::LoopbackInternal).unwrap();
        unit_events();
        can
    }

    #[test]
    fn bitrate_500k_at_48m() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.set_mode(Mode::Initialization).unwrap();
        can.set_bitrate(BitrateSelect::Nominal, &timing_500k()).unwrap();
        let btr = Btr::from(sim.read(Reg::Btr));
        assert_eq!(btr.brp(), 5);
        assert_eq!(btr.ts1(), 6);
        assert_eq!(btr.ts2(), 7);
        assert_eq!(btr.sjw(), 3);
        // Still in initialization mode afterwards
        assert!(Mcr::from(sim.read(Reg::Mcr)).inrq());
        assert_eq!(unit_events(), [UnitEvent::BusOff]);
    }

    #[test]
    fn bitrate_keeps_test_mode_and_operating_mode() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.set_bitrate(BitrateSelect::Nominal, &timing_500k()).unwrap();
        let btr = Btr::from(sim.read(Reg::Btr));
        assert!(btr.lbkm() && btr.silm());
        assert!(!Mcr::from(sim.read(Reg::Mcr)).inrq());
    }

    #[test]
    fn bitrate_errors() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        assert_eq!(
            can.set_bitrate(BitrateSelect::FdData, &timing_500k()),
            Err(Error::Unsupported)
        );
        let mut timing = timing_500k();
        timing.phase_seg_2 = 9;
        assert_eq!(
            can.set_bitrate(BitrateSelect::Nominal, &timing),
            Err(Error::BitTiming(BitTimingError::PhaseSeg2OutOfRange(1..=8)))
        );
        can.power_control(PowerState::Off).unwrap();
        assert_eq!(
            can.set_bitrate(BitrateSelect::Nominal, &timing_500k()),
            Err(Error::State)
        );
    }

    #[test]
    fn configure_after_power_off_is_a_state_error() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.power_control(PowerState::Off).unwrap();
        assert_eq!(can.object_configure(2, Role::Transmit), Err(Error::State));
        assert!(!can.dependencies().powered);
        assert!(!can.dependencies().interrupt_enabled);
    }

    #[test]
    fn roles_follow_the_object_partition() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        for index in 0..OBJECTS {
            let receive = can.object_configure(index, Role::Receive);
            let transmit = can.object_configure(index, Role::Transmit);
            if index < crate::object::RX_OBJECTS {
                assert_eq!(receive, Ok(()));
                assert_eq!(transmit, Err(Error::Parameter));
            } else {
                assert_eq!(receive, Err(Error::Parameter));
                assert_eq!(transmit, Ok(()));
            }
            assert_eq!(can.object_configure(index, Role::Inactive), Ok(()));
        }
        assert_eq!(can.object_configure(OBJECTS, Role::Inactive), Err(Error::Parameter));
    }

    #[test]
    fn remote_reply_roles_are_unsupported() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.object_configure(2, Role::Transmit).unwrap();
        assert_eq!(can.object_configure(2, Role::TxRtrRxData), Err(Error::Unsupported));
        let info = MessageInfo::data(std_id(1));
        assert_eq!(can.message_send(2, &info, &[]), Err(Error::State));
    }

    #[test]
    fn loopback_round_trip_preserves_frames() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.add_filter(0, &Filter::Exact(std_id(0x123))).unwrap();
        can.add_filter(1, &Filter::Exact(ext_id(0x1234_5678))).unwrap();

        let payload = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67];
        let info = MessageInfo::data(std_id(0x123));
        assert_eq!(can.message_send(2, &info, &payload), Ok(8));
        let mut buf = [0; 8];
        let (received, len) = can.message_read(0, &mut buf).unwrap();
        assert_eq!(len, 8);
        assert_eq!(buf, payload);
        assert_eq!(received.id, std_id(0x123));
        assert!(!received.rtr);
        assert_eq!(received.dlc, 8);

        let remote = MessageInfo::remote(ext_id(0x1234_5678), 6);
        assert_eq!(can.message_send(2, &remote, &payload), Ok(0));
        let frame = can.receive_frame(1).unwrap();
        assert_eq!(frame.info(), &remote);
        assert!(frame.is_remote_frame() && frame.is_extended());
        assert!(frame.data().is_empty());

        let mask = Filter::Maskable {
            id: ext_id(0x0abc_0000),
            mask: 0x1fff_0000,
        };
        can.add_filter(1, &mask).unwrap();
        let info = MessageInfo::data(ext_id(0x0abc_1234));
        assert_eq!(can.message_send(2, &info, &payload[..3]), Ok(3));
        let frame = can.receive_frame(1).unwrap();
        assert_eq!(frame.info().id, ext_id(0x0abc_1234));
        assert!(frame.is_data_frame() && frame.is_extended());
        assert_eq!(frame.data(), &payload[..3]);
        can.message_send(2, &MessageInfo::data(ext_id(0x0abd_1234)), &[1])
            .unwrap();

        assert_eq!(can.message_read(0, &mut buf), Err(nb::Error::WouldBlock));
        assert_eq!(can.message_read(1, &mut buf), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn frames_without_a_matching_filter_are_dropped() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.object_set_filter(0, FilterOperation::MaskableAdd, std_id(0x100), 0x700)
            .unwrap();
        let frame = Frame::new(StandardId::new(0x0ff).unwrap(), &[1]).unwrap();
        can.transmit_frame(2, &frame).unwrap();
        assert_eq!(sim.pending(0), 0);
        let frame = Frame::new(StandardId::new(0x1ff).unwrap(), &[1, 2]).unwrap();
        can.transmit_frame(2, &frame).unwrap();
        assert_eq!(can.receive_frame(0), Ok(frame));
    }

    #[test]
    fn short_buffers_truncate_the_copy() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.add_filter(0, &Filter::Exact(std_id(7))).unwrap();
        can.message_send(2, &MessageInfo::data(std_id(7)), &[1, 2, 3, 4, 5])
            .unwrap();
        let mut buf = [0; 2];
        let (info, len) = can.message_read(0, &mut buf).unwrap();
        assert_eq!((info.dlc, len, buf), (5, 2, [1, 2]));
    }

    #[test]
    fn filter_operations_validate_their_arguments() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        assert_eq!(
            can.object_set_filter(2, FilterOperation::ExactAdd, std_id(1), 0),
            Err(Error::Parameter)
        );
        assert_eq!(
            can.object_set_filter(0, FilterOperation::RangeAdd, std_id(1), 2),
            Err(Error::Unsupported)
        );
        assert_eq!(
            can.object_set_filter(0, FilterOperation::ExactRemove, std_id(1), 0),
            Err(Error::FilterNotFound)
        );
        for n in 0..crate::reg::FILTER_BANKS {
            can.object_set_filter(1, FilterOperation::ExactAdd, ext_id(n as u32), 0)
                .unwrap();
        }
        assert_eq!(
            can.object_set_filter(1, FilterOperation::ExactAdd, ext_id(0x777), 0),
            Err(Error::NoFreeBank)
        );
        can.power_control(PowerState::Off).unwrap();
        assert_eq!(
            can.object_set_filter(0, FilterOperation::ExactAdd, std_id(1), 0),
            Err(Error::State)
        );
    }

    #[test]
    fn send_complete_is_reported_for_transmit_objects() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.message_send(2, &MessageInfo::data(std_id(9)), &[1]).unwrap();
        can.on_interrupt();
        let events = object_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 2);
        assert!(events[0].1.send_complete());
        // Completion flag cleared, nothing left to report
        can.on_interrupt();
        assert!(object_events().is_empty());
    }

    #[test]
    fn pending_request_makes_the_mailbox_busy() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.set_mode(Mode::Initialization).unwrap();
        can.object_configure(3, Role::Transmit).unwrap();
        let info = MessageInfo::data(std_id(9));
        assert_eq!(can.message_send(3, &info, &[1, 2]), Ok(2));
        assert_eq!(can.message_send(3, &info, &[1, 2]), Err(Error::Busy));

        can.control(ControlOp::AbortSend(3)).unwrap();
        assert_eq!(can.message_send(3, &info, &[1, 2]), Ok(2));
        assert_eq!(can.control(ControlOp::AbortSend(1)), Err(Error::Parameter));
    }

    #[test]
    fn completions_without_a_transmit_role_are_acknowledged_silently() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        let mailbox = mailbox_of(2).unwrap();
        can.message_send(2, &MessageInfo::data(std_id(9)), &[1]).unwrap();
        let tsr = Tsr::from(sim.read(Reg::Tsr));
        assert!(tsr.rqcp(mailbox) && tsr.txok(mailbox));

        can.object_configure(2, Role::Inactive).unwrap();
        can.on_interrupt();
        assert!(object_events().is_empty());
        assert!(!Tsr::from(sim.read(Reg::Tsr)).rqcp(mailbox));
    }

    #[test]
    fn aborted_requests_are_acknowledged_silently() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.set_mode(Mode::Initialization).unwrap();
        can.object_configure(3, Role::Transmit).unwrap();
        let mailbox = mailbox_of(3).unwrap();
        can.message_send(3, &MessageInfo::data(std_id(9)), &[1]).unwrap();
        can.control(ControlOp::AbortSend(3)).unwrap();
        let tsr = Tsr::from(sim.read(Reg::Tsr));
        assert!(tsr.rqcp(mailbox) && !tsr.txok(mailbox));

        can.on_interrupt();
        assert!(object_events().is_empty());
        assert!(!Tsr::from(sim.read(Reg::Tsr)).rqcp(mailbox));
    }

    #[test]
    fn overrun_is_reported_once() {
        let sim = SimRegisters::default();
        let can = loopback(&sim);
        for _ in 0..4 {
            sim.inject(0, 0x10 << 21, 0, (0, 0));
        }
        can.on_interrupt();
        let events = object_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 0);
        assert!(events[0].1.receive() && events[0].1.receive_overrun());

        can.on_interrupt();
        let events = object_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].1.receive() && !events[0].1.receive_overrun());
    }

    #[test]
    fn unclaimed_fifo_is_drained() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        can.object_configure(1, Role::Inactive).unwrap();
        sim.inject(1, 0x10 << 21, 0, (0, 0));
        sim.inject(1, 0x11 << 21, 0, (0, 0));
        can.on_interrupt();
        assert_eq!(sim.pending(1), 1);
        assert!(object_events().is_empty());
    }

    #[test]
    fn unit_events_are_disarmed_until_the_next_mode_change() {
        let sim = SimRegisters::default();
        let mut can = loopback(&sim);
        // Bus-off wins over passive and warning
        sim.set_error_status(0b111);
        can.on_interrupt();
        assert_eq!(unit_events(), [UnitEvent::BusOff]);
        can.on_interrupt();
        assert_eq!(unit_events(), [UnitEvent::Passive]);
        can.on_interrupt();
        assert_eq!(unit_events(), [UnitEvent::Warning]);
        can.on_interrupt();
        assert!(unit_events().is_empty());
        assert!(!can.periph.interrupts_enabled().bof());

        can.set_mode(Mode::Normal).unwrap();
        assert_eq!(unit_events(), [UnitEvent::Active]);
        assert_eq!(can.periph.interrupts_enabled(), InterruptSet::powered());
        can.on_interrupt();
        assert_eq!(unit_events(), [UnitEvent::BusOff]);
    }

    #[test]
    fn mode_events_and_test_bits() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        let cases = [
            (Mode::Monitor, false, true, UnitEvent::Passive),
            (Mode::LoopbackExternal, true, false, UnitEvent::Active),
            (Mode::LoopbackInternal, true, true, UnitEvent::Passive),
            (Mode::Normal, false, false, UnitEvent::Active),
        ];
        for (mode, loopback, silent, event) in cases {
            can.set_mode(mode).unwrap();
            let btr = Btr::from(sim.read(Reg::Btr));
            assert_eq!((btr.lbkm(), btr.silm()), (loopback, silent));
            assert_eq!(unit_events(), [event]);
            assert!(!can.periph.filter_init());
        }
        let mcr = Mcr::from(sim.read(Reg::Mcr));
        assert!(mcr.abom() && mcr.awum() && !mcr.inrq());

        can.set_mode(Mode::Initialization).unwrap();
        assert!(can.periph.filter_init());
        can.add_filter(0, &Filter::Exact(std_id(5))).unwrap();
        assert!(can.periph.filter_init());
        assert_eq!(can.set_mode(Mode::Restricted), Err(Error::Unsupported));
        assert_eq!(Mode::try_from(9).map_err(Error::from), Err(Error::Parameter));
        assert_eq!(unit_events(), [UnitEvent::BusOff]);
        can.set_mode(Mode::Normal).unwrap();
        assert!(!can.periph.filter_init());
    }

    #[test]
    fn stuck_acknowledgment_times_out() {
        let sim = SimRegisters::default();
        let mut deps = SimDeps::default();
        deps.host_clock = 6400.Hz();
        let mut can: SimBus<'_> = Can::with_registers(&sim, deps, DriverConfig::default());
        can.initialize(None, None).unwrap();
        can.power_control(PowerState::Full).unwrap();
        sim.set_stuck_init_ack(true);
        assert_eq!(can.set_mode(Mode::Normal), Err(Error::Timeout));
        assert_eq!(
            can.set_bitrate(BitrateSelect::Nominal, &timing_500k()),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn stuck_reset_leaves_the_driver_unpowered() {
        let sim = SimRegisters::default();
        let mut deps = SimDeps::default();
        deps.host_clock = 6400.Hz();
        let mut can: SimBus<'_> = Can::with_registers(&sim, deps, DriverConfig::default());
        can.initialize(None, None).unwrap();
        sim.set_stuck_reset(true);
        assert_eq!(can.power_control(PowerState::Full), Err(Error::Timeout));
        assert_eq!(can.object_configure(0, Role::Receive), Err(Error::State));
    }

    #[test]
    fn lifecycle() {
        let sim = SimRegisters::default();
        let mut can: SimBus<'_> = Can::with_registers(&sim, SimDeps::default(), DriverConfig::default());
        assert_eq!(can.power_control(PowerState::Full), Err(Error::State));
        can.initialize(None, None).unwrap();
        // Callbacks are kept by a repeated initialization
        can.initialize(Some(record_unit), None).unwrap();
        can.power_control(PowerState::Full).unwrap();
        assert!(can.dependencies().powered);
        assert!(!can.dependencies().interrupt_enabled);
        assert_eq!(can.periph.interrupts_enabled(), InterruptSet::powered());
        assert!(can.periph.filter_init());
        assert_eq!(sim.read(Reg::Fr1(0)), crate::filter::UNUSED_HALF);
        assert_eq!(can.power_control(PowerState::Full), Ok(()));
        assert_eq!(can.power_control(PowerState::Low), Err(Error::Unsupported));

        can.set_mode(Mode::Normal).unwrap();
        assert!(unit_events().is_empty());

        can.uninitialize().unwrap();
        assert!(!can.dependencies().powered);
        assert_eq!(can.power_control(PowerState::Full), Err(Error::State));
        can.initialize(None, Some(record_object)).unwrap();
        can.power_control(PowerState::Full).unwrap();
        assert!(can.dependencies().interrupt_enabled);
        let deps = can.release();
        assert!(!deps.powered && !deps.interrupt_enabled);
    }

    #[test]
    fn status_snapshot() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.set_mode(Mode::Initialization).unwrap();
        assert_eq!(can.status().unwrap().unit_state, UnitState::Inactive);

        can.set_mode(Mode::Normal).unwrap();
        sim.set_error_status(0x12_80_0032);
        let status = can.status().unwrap();
        assert_eq!(
            status,
            Status {
                unit_state: UnitState::Passive,
                last_error_code: LastErrorCode::Ack,
                tx_error_count: 0x80,
                rx_error_count: 0x12,
            }
        );
        // The last error code is consumed by the read
        assert_eq!(can.status().unwrap().last_error_code, LastErrorCode::None);

        sim.set_error_status(0x0000_0064);
        let status = can.status().unwrap();
        assert_eq!(status.unit_state, UnitState::Inactive);
        assert_eq!(status.last_error_code, LastErrorCode::Crc);

        sim.set_error_status(0);
        assert_eq!(can.status().unwrap().unit_state, UnitState::Active);

        can.set_mode(Mode::Monitor).unwrap();
        assert_eq!(can.status().unwrap().unit_state, UnitState::Passive);
    }

    #[test]
    fn last_error_code_mapping() {
        use LastErrorCode::*;
        let mapped: Vec<_> = (0..8).map(LastErrorCode::from_lec).collect();
        assert_eq!(mapped, [None, Stuff, Form, Ack, Bit, Bit, Crc, None]);
    }

    #[test]
    fn control_operations() {
        let sim = SimRegisters::default();
        let mut can = powered(&sim);
        can.control(ControlOp::Retransmission(false)).unwrap();
        assert!(Mcr::from(sim.read(Reg::Mcr)).nart());
        can.control(ControlOp::Retransmission(true)).unwrap();
        assert!(!Mcr::from(sim.read(Reg::Mcr)).nart());
        assert_eq!(can.control(ControlOp::FdMode(true)), Err(Error::Unsupported));
        assert_eq!(
            can.control(ControlOp::TransceiverDelay(3)),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn static_descriptors() {
        let sim = SimRegisters::default();
        let can: SimBus<'_> = Can::with_registers(&sim, SimDeps::default(), DriverConfig::default());
        assert_eq!(can.capabilities().num_objects, 5);
        assert!(!can.capabilities().fd_mode);
        assert_eq!(can.version(), DriverVersion { api: 0x0103, driver: 0x0103 });
        assert_eq!(can.get_clock(), HertzU32::MHz(48));
        assert!(can.object_get_capabilities(0).mask_filtering);
        assert!(can.object_get_capabilities(4).tx);
    }
}
