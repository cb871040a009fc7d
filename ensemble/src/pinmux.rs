//! Pin multiplexing and pad control.
//!
//! Every pad of the SoC has one 32-bit PINMUX register holding the selected
//! alternate function in bits [2:0] and the pad control in bits [23:16].

use core::fmt;

use bitflags::bitflags;

use crate::mmio::Mmio;

/// Base address of the PINMUX registers.
pub const PINMUX_BASE: usize = 0x1a60_3000;

/// Number of GPIO ports.
pub const NPORTS: u8 = 16;

/// Number of pins per port.
pub const NPINS: u8 = 8;

/// Pinmux error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid port or pin number.
    InvalidPad {
        /// Port number.
        port: u8,

        /// Pin number.
        pin: u8,
    },

    /// Invalid alternate function.
    InvalidAltFunction(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidPad { port, pin } => write!(f, "invalid pad: P{port}_{pin}"),
            Error::InvalidAltFunction(alt) => {
                write!(f, "invalid alternate function: {alt}")
            }
        }
    }
}

/// A pad, identified by its GPIO port and pin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pad {
    port: u8,
    pin: u8,
}

impl Pad {
    /// Returns the pad of `port` and `pin`.
    pub fn new(port: u8, pin: u8) -> Result<Pad, Error> {
        if port >= NPORTS || pin >= NPINS {
            return Err(Error::InvalidPad { port, pin });
        }
        Ok(Pad { port, pin })
    }

    /// Returns the pad of `port` and `pin` for compile-time constants. An
    /// invalid pad fails the build.
    pub const fn from_const(port: u8, pin: u8) -> Pad {
        assert!(port < NPORTS && pin < NPINS, "invalid pad");
        Pad { port, pin }
    }

    /// Returns the GPIO port of the pad.
    pub const fn port(self) -> u8 {
        self.port
    }

    /// Returns the GPIO pin of the pad.
    pub const fn pin(self) -> u8 {
        self.pin
    }

    fn reg(self) -> usize {
        PINMUX_BASE + self.port as usize * 0x20 + self.pin as usize * 4
    }
}

/// Alternate function of a pad. Function 0 is always GPIO.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AltFunction(u8);

impl AltFunction {
    /// GPIO.
    pub const GPIO: AltFunction = AltFunction(0);
}

impl TryFrom<u8> for AltFunction {
    type Error = Error;

    fn try_from(alt: u8) -> Result<AltFunction, Error> {
        if alt > 7 {
            return Err(Error::InvalidAltFunction(alt));
        }
        Ok(AltFunction(alt))
    }
}

bitflags! {
    /// Pad control.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PadControl: u8 {
        /// Input buffer enabled.
        const READ_ENABLE = 1 << 0;

        /// Schmitt trigger on the input.
        const SCHMITT_TRIGGER = 1 << 1;

        /// Fast slew rate.
        const SLEW_RATE_FAST = 1 << 2;

        /// Weak pull-up when the driver is disabled.
        const PULL_UP = 1 << 3;

        /// Weak pull-down when the driver is disabled.
        const PULL_DOWN = 2 << 3;

        /// 4 mA output drive strength.
        const DRIVE_4MA = 1 << 5;

        /// 8 mA output drive strength.
        const DRIVE_8MA = 2 << 5;

        /// Open drain output.
        const OPEN_DRAIN = 1 << 7;
    }
}

impl PadControl {
    /// Pad control of the GPIO lines used as trigger signals.
    pub const SIGNAL: PadControl = PadControl::READ_ENABLE
        .union(PadControl::SCHMITT_TRIGGER)
        .union(PadControl::DRIVE_4MA);
}

/// PINMUX registers.
pub struct Pinmux<B: Mmio> {
    bus: B,
}

impl<B: Mmio> Pinmux<B> {
    /// Returns a new [`Pinmux`] accessed through `bus`.
    pub const fn new(bus: B) -> Pinmux<B> {
        Pinmux { bus }
    }

    /// Selects the alternate function and pad control of `pad`.
    pub fn set(&self, pad: Pad, alt: AltFunction, ctrl: PadControl) {
        let val = (alt.0 as u32) | ((ctrl.bits() as u32) << 16);
        unsafe { self.bus.write32(pad.reg(), val) };
    }

    /// Returns the alternate function and pad control of `pad`.
    pub fn get(&self, pad: Pad) -> (AltFunction, PadControl) {
        let val = unsafe { self.bus.read32(pad.reg()) };
        (
            AltFunction((val & 0x7) as u8),
            PadControl::from_bits_retain((val >> 16) as u8),
        )
    }
}
