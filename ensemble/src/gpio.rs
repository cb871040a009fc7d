//! GPIO operations and trigger signals.
//!
//! [`GpioDriver`] is the per-port driver capability, implemented for the
//! Synopsys DesignWare APB GPIO controllers of the SoC by [`DwGpio`].
//! [`GpioTriggerSignal`] binds one board line to a direction and offers
//! send, receive and wait operations on it, so firmware can mark events for an
//! external observer (e.g. a logic analyzer) or wait for one.
//!
//! For more information, please see [DesignWare DW_apb_gpio Databook].
//!
//! [DesignWare DW_apb_gpio Databook]: https://www.synopsys.com/dw/ipdir.php?c=DW_apb_gpio

use core::fmt;

use crate::cancel::{Cancellation, Never};
use crate::mmio::Mmio;
use crate::pinmux::Pad;

/// Base address of GPIO0. Ports are 4 KiB apart.
const GPIO_BASE: usize = 0x4900_0000;

/// Number of ports handled by [`DwGpio`].
const NPORTS: u8 = 15;

/// Number of pins per port.
const NPINS: u8 = 8;

/// Port A data register.
const GPIO_SWPORTA_DR: usize = 0x00;

/// Port A data direction register.
const GPIO_SWPORTA_DDR: usize = 0x04;

/// Interrupt enable register.
const GPIO_INTEN: usize = 0x30;

/// Port A external port register.
const GPIO_EXT_PORTA: usize = 0x50;

/// GPIO error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid GPIO port.
    InvalidPort(u8),

    /// Invalid GPIO pin.
    InvalidPin(u8),

    /// [`Direction::Invalid`] was requested.
    InvalidDirection,

    /// The operation does not match the direction of the signal.
    WrongDirection,

    /// The wait was cancelled.
    Cancelled,

    /// The driver does not control the port of the line.
    PortMismatch {
        /// Port of the line.
        line: u8,

        /// Port of the driver.
        driver: u8,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidPort(port) => write!(f, "invalid GPIO port: {port}"),
            Error::InvalidPin(pin) => write!(f, "invalid GPIO pin: {pin}"),
            Error::InvalidDirection => write!(f, "invalid signal direction"),
            Error::WrongDirection => write!(f, "wrong signal direction"),
            Error::Cancelled => write!(f, "wait cancelled"),
            Error::PortMismatch { line, driver } => {
                write!(f, "line on port {line} given a driver of port {driver}")
            }
        }
    }
}

/// Pin direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Output pin.
    Output,

    /// Input pin.
    Input,

    /// No usable direction. Rejected by every operation.
    Invalid,
}

/// Pin level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    /// Low level.
    Low,

    /// High level.
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Level {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// GPIO port driver.
pub trait GpioDriver {
    /// Returns the port controlled by the driver.
    fn port(&self) -> u8;

    /// Prepares `pin` for use. Interrupts of the pin are disabled.
    fn initialize(&mut self, pin: u8) -> Result<(), Error>;

    /// Powers `pin` up or down.
    fn power_control(&mut self, pin: u8, on: bool) -> Result<(), Error>;

    /// Sets the direction of `pin`.
    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), Error>;

    /// Drives `pin`. Only meaningful for outputs.
    fn set_value(&mut self, pin: u8, level: Level) -> Result<(), Error>;

    /// Returns the level of `pin`.
    fn get_value(&self, pin: u8) -> Result<Level, Error>;
}

/// DesignWare APB GPIO port.
#[derive(Debug, Clone)]
pub struct DwGpio<B: Mmio> {
    bus: B,
    port: u8,
    base: usize,
}

impl<B: Mmio> DwGpio<B> {
    /// Returns the driver of GPIO `port`.
    pub fn new(bus: B, port: u8) -> Result<DwGpio<B>, Error> {
        if port >= NPORTS {
            return Err(Error::InvalidPort(port));
        }
        Ok(DwGpio {
            bus,
            port,
            base: GPIO_BASE + port as usize * 0x1000,
        })
    }

    fn mask(pin: u8) -> Result<u32, Error> {
        if pin >= NPINS {
            return Err(Error::InvalidPin(pin));
        }
        Ok(1 << pin)
    }
}

impl<B: Mmio> GpioDriver for DwGpio<B> {
    fn port(&self) -> u8 {
        self.port
    }

    fn initialize(&mut self, pin: u8) -> Result<(), Error> {
        let mask = Self::mask(pin)?;
        unsafe { self.bus.clear_bits32(self.base + GPIO_INTEN, mask) };
        Ok(())
    }

    fn power_control(&mut self, pin: u8, _on: bool) -> Result<(), Error> {
        // The port clock is gated as a whole by the board.
        Self::mask(pin).map(|_| ())
    }

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), Error> {
        let mask = Self::mask(pin)?;
        let addr = self.base + GPIO_SWPORTA_DDR;
        match dir {
            Direction::Output => unsafe { self.bus.set_bits32(addr, mask) },
            Direction::Input => unsafe { self.bus.clear_bits32(addr, mask) },
            Direction::Invalid => return Err(Error::InvalidDirection),
        }
        Ok(())
    }

    fn set_value(&mut self, pin: u8, level: Level) -> Result<(), Error> {
        let mask = Self::mask(pin)?;
        let addr = self.base + GPIO_SWPORTA_DR;
        match level {
            Level::High => unsafe { self.bus.set_bits32(addr, mask) },
            Level::Low => unsafe { self.bus.clear_bits32(addr, mask) },
        }
        Ok(())
    }

    fn get_value(&self, pin: u8) -> Result<Level, Error> {
        let mask = Self::mask(pin)?;
        let val = unsafe { self.bus.read32(self.base + GPIO_EXT_PORTA) };
        Ok(Level::from(val & mask != 0))
    }
}

/// GPIO lines of the board usable as trigger signals.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalLine {
    /// Red channel of RGB LED 1.
    Led1Red,

    /// Green channel of RGB LED 1.
    Led1Green,

    /// Blue channel of RGB LED 1.
    Led1Blue,

    /// Red channel of RGB LED 2.
    Led2Red,

    /// Green channel of RGB LED 2.
    Led2Green,

    /// Blue channel of RGB LED 2.
    Led2Blue,

    /// Logic analyzer reference line, P5_6.
    AnalyzerReference,

    /// Logic analyzer measurement window, P5_4.
    AnalyzerWindow,
}

impl SignalLine {
    /// Every line of the board.
    pub const ALL: [SignalLine; 8] = [
        SignalLine::Led1Red,
        SignalLine::Led1Green,
        SignalLine::Led1Blue,
        SignalLine::Led2Red,
        SignalLine::Led2Green,
        SignalLine::Led2Blue,
        SignalLine::AnalyzerReference,
        SignalLine::AnalyzerWindow,
    ];

    /// Returns the pad of the line.
    pub const fn pad(self) -> Pad {
        match self {
            SignalLine::Led1Red => Pad::from_const(12, 3),
            SignalLine::Led1Green => Pad::from_const(7, 4),
            SignalLine::Led1Blue => Pad::from_const(12, 0),
            SignalLine::Led2Red => Pad::from_const(6, 2),
            SignalLine::Led2Green => Pad::from_const(6, 4),
            SignalLine::Led2Blue => Pad::from_const(6, 6),
            SignalLine::AnalyzerReference => Pad::from_const(5, 6),
            SignalLine::AnalyzerWindow => Pad::from_const(5, 4),
        }
    }

    /// Returns the GPIO port of the line.
    pub const fn port(self) -> u8 {
        self.pad().port()
    }

    /// Returns the GPIO pin of the line.
    pub const fn pin(self) -> u8 {
        self.pad().pin()
    }
}

/// A GPIO line used as a one-way synchronization signal.
///
/// The signal owns the driver of its port. Nothing prevents building two
/// signals over the same line, which callers must avoid.
pub struct GpioTriggerSignal<D: GpioDriver> {
    driver: D,
    line: SignalLine,
    direction: Direction,
}

impl<D: GpioDriver> GpioTriggerSignal<D> {
    /// Configures `line` with the given direction. Outputs start released.
    ///
    /// `driver` must control the port of `line`. Nothing is written otherwise.
    pub fn new(
        mut driver: D,
        line: SignalLine,
        direction: Direction,
    ) -> Result<GpioTriggerSignal<D>, Error> {
        if direction == Direction::Invalid {
            return Err(Error::InvalidDirection);
        }
        if driver.port() != line.port() {
            return Err(Error::PortMismatch {
                line: line.port(),
                driver: driver.port(),
            });
        }

        let pin = line.pin();
        driver.initialize(pin)?;
        driver.power_control(pin, true)?;
        driver.set_direction(pin, direction)?;
        if direction == Direction::Output {
            driver.set_value(pin, Level::Low)?;
        }

        Ok(GpioTriggerSignal {
            driver,
            line,
            direction,
        })
    }

    /// Returns the line of the signal.
    pub fn line(&self) -> SignalLine {
        self.line
    }

    /// Returns the direction of the signal.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Asserts the signal if `value` is true, or releases it otherwise.
    pub fn send(&mut self, value: bool) -> Result<(), Error> {
        if self.direction != Direction::Output {
            return Err(Error::WrongDirection);
        }
        self.driver.set_value(self.line.pin(), Level::from(value))
    }

    /// Returns true if the signal is asserted.
    pub fn recv(&self) -> Result<bool, Error> {
        if self.direction != Direction::Input {
            return Err(Error::WrongDirection);
        }
        Ok(self.driver.get_value(self.line.pin())? == Level::High)
    }

    /// Waits for the signal to be asserted.
    ///
    /// Between polls it calls `yield_now`, if provided, or spins otherwise.
    /// The wait fails with [`Error::Cancelled`] as soon as `cancel` fires
    /// while the signal is released.
    pub fn wait_for_signal(
        &self,
        mut yield_now: Option<&mut dyn FnMut()>,
        cancel: &dyn Cancellation,
    ) -> Result<(), Error> {
        if self.direction != Direction::Input {
            return Err(Error::WrongDirection);
        }

        loop {
            if self.recv()? {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match yield_now.as_mut() {
                Some(f) => f(),
                None => core::hint::spin_loop(),
            }
        }
    }

    /// Waits for the signal to be asserted, with no bound.
    pub fn wait_forever(&self, yield_now: Option<&mut dyn FnMut()>) -> Result<(), Error> {
        self.wait_for_signal(yield_now, &Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelToken, Deadline};
    use crate::cpu::time::Clock;
    use crate::testing::FakeBus;

    use core::cell::Cell;

    const PORT5: usize = GPIO_BASE + 5 * 0x1000;

    fn port5(bus: &FakeBus) -> DwGpio<FakeBus> {
        DwGpio::new(bus.clone(), 5).unwrap()
    }

    #[test]
    fn lines_are_valid_pads() {
        for line in SignalLine::ALL {
            assert!(line.port() < NPORTS);
            assert!(line.pin() < NPINS);
        }
        assert_eq!(SignalLine::AnalyzerWindow.port(), 5);
        assert_eq!(SignalLine::AnalyzerWindow.pin(), 4);
    }

    #[test]
    fn driver_range() {
        assert_eq!(
            DwGpio::new(FakeBus::new(), 15).map(|_| ()),
            Err(Error::InvalidPort(15))
        );
        let mut gpio = port5(&FakeBus::new());
        assert_eq!(gpio.set_value(8, Level::High), Err(Error::InvalidPin(8)));
        assert_eq!(
            gpio.set_direction(0, Direction::Invalid),
            Err(Error::InvalidDirection)
        );
    }

    #[test]
    fn invalid_direction_is_rejected() {
        let bus = FakeBus::new();
        let signal = GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Invalid);
        assert!(matches!(signal, Err(Error::InvalidDirection)));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn driver_of_another_port_is_rejected() {
        let bus = FakeBus::new();
        let gpio = DwGpio::new(bus.clone(), 0).unwrap();
        let signal = GpioTriggerSignal::new(gpio, SignalLine::Led1Red, Direction::Output);
        assert!(matches!(
            signal,
            Err(Error::PortMismatch { line: 12, driver: 0 })
        ));
        assert!(bus.writes().is_empty());

        let port12 = GPIO_BASE + 12 * 0x1000;
        bus.set(port12 + GPIO_SWPORTA_DR, 1 << 3);
        let gpio = DwGpio::new(bus.clone(), SignalLine::Led1Red.port()).unwrap();
        let mut signal =
            GpioTriggerSignal::new(gpio, SignalLine::Led1Red, Direction::Output).unwrap();
        assert_eq!(bus.get(port12 + GPIO_SWPORTA_DR), 0);
        signal.send(true).unwrap();
        assert_eq!(bus.get(port12 + GPIO_SWPORTA_DR), 1 << 3);
        assert_eq!(bus.get(GPIO_BASE + GPIO_SWPORTA_DR), 0);
    }

    #[test]
    fn spinning_wait_ends_at_the_deadline() {
        let bus = FakeBus::new();
        let signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerReference, Direction::Input)
                .unwrap();
        let clock = TickClock(Cell::new(0));
        let deadline = Deadline::after(&clock, 1_000);

        // A yield hook that never sleeps, as the firmware images use.
        let mut spin = || {
            core::hint::spin_loop();
            clock.0.set(clock.0.get() + 1);
        };
        assert_eq!(
            signal.wait_for_signal(Some(&mut spin), &deadline),
            Err(Error::Cancelled)
        );
        assert!(clock.now() >= 1_000);
    }

    #[test]
    fn output_starts_released() {
        let bus = FakeBus::new();
        bus.set(PORT5 + GPIO_SWPORTA_DR, 1 << 4);
        bus.set(PORT5 + GPIO_INTEN, 1 << 4);

        let mut signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Output)
                .unwrap();

        assert_eq!(bus.get(PORT5 + GPIO_SWPORTA_DR), 0);
        assert_eq!(bus.get(PORT5 + GPIO_SWPORTA_DDR), 1 << 4);
        assert_eq!(bus.get(PORT5 + GPIO_INTEN), 0);

        signal.send(true).unwrap();
        assert_eq!(bus.get(PORT5 + GPIO_SWPORTA_DR), 1 << 4);
        signal.send(false).unwrap();
        assert_eq!(bus.get(PORT5 + GPIO_SWPORTA_DR), 0);
    }

    #[test]
    fn wrong_direction() {
        let bus = FakeBus::new();
        let mut output =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerReference, Direction::Output)
                .unwrap();
        assert_eq!(output.recv(), Err(Error::WrongDirection));
        assert_eq!(output.wait_forever(None), Err(Error::WrongDirection));

        let mut input =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Input)
                .unwrap();
        let nwrites = bus.writes().len();
        assert_eq!(input.send(true), Err(Error::WrongDirection));
        assert_eq!(bus.writes().len(), nwrites);

        // Sending on the output still works.
        output.send(true).unwrap();
    }

    #[test]
    fn pre_asserted_input_returns_at_once() {
        let bus = FakeBus::new();
        bus.set(PORT5 + GPIO_EXT_PORTA, 1 << 4);
        let signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Input)
                .unwrap();

        let mut yields = 0;
        let mut count = || yields += 1;
        assert_eq!(signal.wait_for_signal(Some(&mut count), &Never), Ok(()));
        assert_eq!(yields, 0);
    }

    struct TickClock(Cell<u32>);

    impl Clock for TickClock {
        fn now(&self) -> u32 {
            self.0.get()
        }
    }

    #[test]
    fn released_input_blocks_until_deadline() {
        let bus = FakeBus::new();
        let signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Input)
                .unwrap();
        let clock = TickClock(Cell::new(0));
        let deadline = Deadline::after(&clock, 100);

        let mut yields = 0;
        let mut tick = || {
            yields += 1;
            clock.0.set(clock.0.get() + 10);
        };
        assert_eq!(
            signal.wait_for_signal(Some(&mut tick), &deadline),
            Err(Error::Cancelled)
        );
        assert_eq!(yields, 10);
    }

    #[test]
    fn wait_ends_when_the_line_rises() {
        let bus = FakeBus::new();
        let signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Input)
                .unwrap();

        let mut polls = 0;
        let mut raise_later = || {
            polls += 1;
            if polls == 3 {
                bus.set(PORT5 + GPIO_EXT_PORTA, 1 << 4);
            }
        };
        assert_eq!(signal.wait_forever(Some(&mut raise_later)), Ok(()));
        assert_eq!(polls, 3);
    }

    #[test]
    fn cancelled_token() {
        let bus = FakeBus::new();
        let signal =
            GpioTriggerSignal::new(port5(&bus), SignalLine::AnalyzerWindow, Direction::Input)
                .unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(signal.wait_for_signal(None, &token), Err(Error::Cancelled));
    }
}
