#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # bxCAN driver
//!
//! ## Overview
//! This crate provides a platform-agnostic driver core for the bxCAN
//! controller found in many Cortex-M microcontrollers.
//!
//! It provides the following features:
//!
//! - bit timing calculation with a configurable clock tolerance
//! - operating modes: initialization, normal, bus monitoring and both loop
//!   back variants
//! - five communication objects: two receive objects backed by the hardware
//!   FIFOs and three transmit objects backed by the mailboxes
//! - exact and mask acceptance filters for standard and extended identifiers,
//!   packed into the filter banks automatically
//! - transmission cancellation
//! - interrupt driven unit events (bus-off, passive, warning, active) and
//!   object events (send complete, receive, overrun) delivered through plain
//!   function callbacks
//!
//! bxCAN is embedded in the MCU like all other peripherals. The interface
//! between them is a clock, an interrupt line and a memory-mapped register
//! block. For the driver to be operational, this interface has to be
//! provided by a platform-specific HAL through the [`bxcan_driver_core`]
//! traits, whose safety requirements guarantee exclusive ownership of the
//! peripheral.
//!
//! ## Usage
//!
//! [`Can`] is created from a [`Dependencies`] implementing struct and holds
//! onto it until it's [`released`]. The lifecycle is
//! [`initialize`] (register callbacks), [`power_control`] (clock and reset),
//! then configuration in initialization mode followed by a switch into an
//! operating mode.
//!
//! ```no_run
//! # struct Can1;
//! # unsafe impl bxcan_driver::core::CanId for Can1 {
//! #     const ADDRESS: *const () = 0x4000_6400 as *const _;
//! # }
//! # pub mod hal {
//! #     pub struct Dependencies(pub ());
//! #     unsafe impl<ID: bxcan_driver::core::CanId> bxcan_driver::core::Dependencies<ID> for Dependencies {
//! #         fn host_clock(&self) -> bxcan_driver::fugit::HertzU32 { unreachable!() }
//! #         fn can_clock(&self) -> bxcan_driver::fugit::HertzU32 { unreachable!() }
//! #         fn power_up(&mut self) {}
//! #         fn power_down(&mut self) {}
//! #         fn enable_interrupt(&mut self) {}
//! #         fn disable_interrupt(&mut self) {}
//! #     }
//! # }
//! use bxcan_driver::bus::{Can, PowerState};
//! use bxcan_driver::config::{BitTiming, BitrateSelect, DriverConfig, Mode};
//! use bxcan_driver::embedded_can::{Frame as _, StandardId};
//! use bxcan_driver::filter::Filter;
//! use bxcan_driver::interrupt::{ObjectEvents, UnitEvent};
//! use bxcan_driver::message::Frame;
//! use bxcan_driver::object::Role;
//! use bxcan_driver::fugit::RateExtU32 as _;
//!
//! fn on_unit(event: UnitEvent) { /* ... */ }
//! fn on_object(index: usize, events: ObjectEvents) { /* ... */ }
//!
//! let mut can = Can::<Can1, _>::new(hal::Dependencies(()), DriverConfig::default());
//! can.initialize(Some(on_unit), Some(on_object)).unwrap();
//! can.power_control(PowerState::Full).unwrap();
//!
//! can.set_mode(Mode::Initialization).unwrap();
//! can.set_bitrate(BitrateSelect::Nominal, &BitTiming::new(500.kHz())).unwrap();
//! can.object_configure(0, Role::Receive).unwrap();
//! can.object_configure(2, Role::Transmit).unwrap();
//! can.add_filter(0, &Filter::Exact(StandardId::new(0x123).unwrap().into()))
//!     .unwrap();
//! can.set_mode(Mode::Normal).unwrap();
//!
//! let frame = Frame::new(StandardId::new(0x321).unwrap(), &[1, 2, 3]).unwrap();
//! can.transmit_frame(2, &frame).unwrap();
//! // From the interrupt handler: `can.on_interrupt()`
//! ```
//!
//! [`Can`]: crate::bus::Can
//! [`Dependencies`]: bxcan_driver_core::Dependencies
//! [`released`]: crate::bus::Can::release
//! [`initialize`]: crate::bus::Can::initialize
//! [`power_control`]: crate::bus::Can::power_control

mod fmt;

pub mod bus;
pub mod config;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod object;
pub mod prelude;
pub mod reg;
pub mod rx_fifo;

mod periph;
mod tx_buffers;

#[cfg(test)]
mod sim;

pub use bxcan_driver_core as core;
pub use embedded_can;
pub use fugit;
pub use nb;
