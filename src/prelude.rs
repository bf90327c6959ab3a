//! Traits needed to use the driver's types
pub use crate::reg::RegisterAccess as _;
pub use embedded_can::Frame as _;
