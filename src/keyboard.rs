//! ASUS keyboard control endpoint driver.
//!
//! The keyboard exposes several HID sub-interfaces; the one accepting
//! vendor control reports (backlight, touchpad toggle) is identified by
//! the `mi_02&col01` fragment of its composite device path. All commands
//! are fixed-length feature reports built in [`protocol`], written through
//! the [`device_io::DeviceIO`] seam, and driven by [`control::Control`].

pub mod control;
pub mod device_io;
pub mod protocol;

pub use control::Control;
pub use protocol::Level;

use log::debug;

use crate::error::Error;

/// ASUS vendor id.
pub const VENDOR_ID: u16 = 0x0B05;
/// N-Key keyboard device product id.
pub const PRODUCT_ID: u16 = 0x1866;
/// Path fragment selecting the control sub-interface among the several
/// interfaces the same physical device exposes.
pub const CONTROL_INTERFACE: &str = "mi_02&col01";

// Scan codes delivered by the control endpoint.
pub const KEY_ROG: u32 = 0x38;
pub const KEY_FN_F5: u32 = 0xAE;
pub const KEY_TOUCHPAD_TOGGLE: u32 = 0x6B;
pub const KEY_KBD_BRIGHTNESS_UP: u32 = 0xC4;
pub const KEY_KBD_BRIGHTNESS_DOWN: u32 = 0xC5;
pub const KEY_FN_LEFT: u32 = 0xB2;
pub const KEY_FN_RIGHT: u32 = 0xB3;

// Injection target codes understood by the OS input-synthesis facility.
pub const KEY_PAGE_UP: u16 = 0x21;
pub const KEY_PAGE_DOWN: u16 = 0x22;

/// OS input-synthesis facility used for Fn-key remapping. External
/// collaborator; the shipped implementation only logs.
pub trait KeyInjector: Send + Sync {
    fn inject(&self, code: u16) -> Result<(), Error>;
}

/// Injector that logs the key press instead of synthesizing it.
pub struct NullInjector;

impl KeyInjector for NullInjector {
    fn inject(&self, code: u16) -> Result<(), Error> {
        debug!("keyboard: would inject key code {code:#04x}");
        Ok(())
    }
}
