#![no_std]
#![warn(missing_docs)]

//! `bxcan-driver-core` provides the thin integration layer between the
//! platform independent [`bxcan-driver`] crate and platform specific HAL
//! crates (in documentation also referred to as _target HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`bxcan-driver`]: <https://docs.rs/crate/bxcan-driver/>

pub use fugit;

/// Trait representing bxCAN peripheral identity
///
/// Types implementing this trait are expected to be used as marker types
/// identifying the bxCAN instance available on the platform. It only conveys
/// *where* the peripheral register block is located, not that it can be
/// accessed. The latter is expressed by the [`Dependencies`] trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of a valid bxCAN register block
/// (master control register at offset `0x000`, filter banks from `0x240`).
///
/// # Examples
/// ```no_run
/// use bxcan_driver_core::CanId;
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4000_6400 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block of the peripheral
    const ADDRESS: *const ();
}

/// Trait representing bxCAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] (clock gate,
///   pins, interrupt line) and release them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   peripheral (pins have already been configured)
/// - be a singleton (only a single instance of [`Dependencies`] for a specific
///   [`CanId`] must exist at the same time)
///
/// in order to prevent aliasing and guarantee that the driver provided by
/// [`bxcan-driver`] is the sole owner of the peripheral.
///
/// # Safety
/// While a [`Dependencies`] type instance exists
/// - the APB clock feeding the peripheral must not change
/// - CAN related pin modes must not change
/// - the register block must not be safely accessible by the application
///   developer or accessed in other parts of the target HAL
/// - the interrupt line controlled through [`Dependencies::enable_interrupt`]
///   must be the one whose handler calls into the driver's dispatcher
///
/// # Example
/// ```no_run
/// # mod pac {
/// #     pub struct RCC;
/// #     impl RCC {
/// #         pub fn enable_can(&mut self) {}
/// #         pub fn reset_can(&mut self) {}
/// #         pub fn disable_can(&mut self) {}
/// #     }
/// #     pub struct NVIC;
/// #     impl NVIC {
/// #         pub fn unpend(&mut self) {}
/// #         pub fn unmask(&mut self) {}
/// #         pub fn mask(&mut self) {}
/// #     }
/// # }
/// use bxcan_driver_core::{fugit::HertzU32, CanId};
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4000_6400 as *const _;
/// }
///
/// pub struct Dependencies {
///     rcc: pac::RCC,
///     nvic: pac::NVIC,
///     sysclk: HertzU32,
///     pclk: HertzU32,
/// }
///
/// unsafe impl bxcan_driver_core::Dependencies<Can1> for Dependencies {
///     fn host_clock(&self) -> HertzU32 {
///         self.sysclk
///     }
///
///     fn can_clock(&self) -> HertzU32 {
///         self.pclk
///     }
///
///     fn power_up(&mut self) {
///         self.rcc.enable_can();
///         self.rcc.reset_can();
///     }
///
///     fn power_down(&mut self) {
///         self.rcc.reset_can();
///         self.rcc.disable_can();
///     }
///
///     fn enable_interrupt(&mut self) {
///         self.nvic.unpend();
///         self.nvic.unmask();
///     }
///
///     fn disable_interrupt(&mut self) {
///         self.nvic.mask();
///     }
/// }
/// ```
/// [`bxcan-driver`]: <https://docs.rs/crate/bxcan-driver/>
pub unsafe trait Dependencies<Id: CanId> {
    /// Frequency of the host / main / CPU clock.
    ///
    /// Busy-wait budgets for hardware acknowledgments are derived from it.
    fn host_clock(&self) -> fugit::HertzU32;
    /// Frequency of the peripheral (APB) clock the bit timing is derived
    /// from.
    fn can_clock(&self) -> fugit::HertzU32;
    /// Gate the peripheral clock on and pulse the peripheral reset line.
    fn power_up(&mut self);
    /// Hold the peripheral in reset and gate its clock off.
    fn power_down(&mut self);
    /// Clear any pending request on the peripheral interrupt line and unmask
    /// it.
    fn enable_interrupt(&mut self);
    /// Mask the peripheral interrupt line.
    fn disable_interrupt(&mut self);
}
