//! DesignWare APB UART driver.
//!
//! The UARTs of the SoC are 16550 compatible, with registers 4 bytes apart.
//!
//! For more information, please see [DesignWare DW_apb_uart Databook].
//!
//! [DesignWare DW_apb_uart Databook]: https://www.synopsys.com/dw/ipdir.php?c=dw_apb_uart

use core::fmt;

use crate::mmio::Mmio;
use crate::print::Console;

/// Receive buffer register (read), transmit holding register (write) and
/// divisor latch low (DLAB=1).
const UART_RBR: usize = 0x00;

/// Transmit holding register.
const UART_THR: usize = 0x00;

/// Divisor latch low.
const UART_DLL: usize = 0x00;

/// Interrupt enable register and divisor latch high (DLAB=1).
const UART_IER: usize = 0x04;

/// Divisor latch high.
const UART_DLH: usize = 0x04;

/// FIFO control register.
const UART_FCR: usize = 0x08;

/// Line control register.
const UART_LCR: usize = 0x0c;

/// Line status register.
const UART_LSR: usize = 0x14;

/// LCR.DLAB: divisor latch access.
const LCR_DLAB: u32 = 1 << 7;

/// LCR.DLS: 8 data bits, 1 stop bit, no parity.
const LCR_8N1: u32 = 0b11;

/// FCR: enable and reset both FIFOs.
const FCR_ENABLE_RESET: u32 = 0b111;

/// LSR.DR: data ready.
const LSR_DR: u32 = 1 << 0;

/// LSR.THRE: transmit holding register empty.
const LSR_THRE: u32 = 1 << 5;

/// UART error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The baud rate cannot be derived from the UART clock.
    InvalidBaudRate {
        /// Requested baud rate.
        baud: u32,

        /// UART clock frequency in Hz.
        clock_hz: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidBaudRate { baud, clock_hz } => {
                write!(f, "invalid baud rate {baud} for a {clock_hz} Hz clock")
            }
        }
    }
}

/// Returns the divisor latch value for the requested baud rate.
fn divisor(baud: u32, clock_hz: u32) -> Result<u16, Error> {
    let err = Error::InvalidBaudRate { baud, clock_hz };
    if baud == 0 {
        return Err(err);
    }

    // Divisor = UARTCLK / (16 * Baud rate), truncated.
    let div = clock_hz / baud.checked_mul(16).ok_or(err)?;
    match u16::try_from(div) {
        Ok(div) if div != 0 => Ok(div),
        _ => Err(err),
    }
}

/// 16550 compatible UART.
pub struct Uart<B: Mmio> {
    bus: B,
    base: usize,
}

impl<B: Mmio> Uart<B> {
    /// Returns the UART at `base`.
    pub const fn new(bus: B, base: usize) -> Uart<B> {
        Uart { bus, base }
    }

    /// Configures the UART as 8n1 with the given baud rate and disables its
    /// interrupts.
    pub fn init(&self, baud: u32, clock_hz: u32) -> Result<(), Error> {
        let div = divisor(baud, clock_hz)?;

        unsafe {
            self.bus.write32(self.base + UART_IER, 0);

            self.bus.write32(self.base + UART_LCR, LCR_DLAB);
            self.bus.write32(self.base + UART_DLL, (div & 0xff) as u32);
            self.bus.write32(self.base + UART_DLH, (div >> 8) as u32);
            self.bus.write32(self.base + UART_LCR, LCR_8N1);

            self.bus.write32(self.base + UART_FCR, FCR_ENABLE_RESET);
        }

        Ok(())
    }

    /// Transmits a byte.
    pub fn send_byte(&self, b: u8) {
        unsafe {
            // Wait while the transmit holding register is full.
            while self.bus.read32(self.base + UART_LSR) & LSR_THRE == 0 {}

            self.bus.write32(self.base + UART_THR, b as u32);
        }
    }

    /// Receives a byte, if any.
    pub fn try_recv_byte(&self) -> Option<u8> {
        unsafe {
            if self.bus.read32(self.base + UART_LSR) & LSR_DR == 0 {
                return None;
            }
            Some(self.bus.read32(self.base + UART_RBR) as u8)
        }
    }
}

impl<B: Mmio + Send + Sync> Console for Uart<B> {
    fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.send_byte(b);
        }
    }
}
