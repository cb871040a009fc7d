//! Arm Ethos-U55 NPU bootstrap.
//!
//! The NPU is driven through a small register bank. The board's
//! [`AcceleratorContext`] owns that bank and the NPU interrupt line for the
//! whole run. The inference runtime only builds command streams and submits
//! them, then waits for the completion through
//! [`AcceleratorContext::wait_for_completion`].
//!
//! This module owns the part that has to happen at boot:
//!
//! 1. Mask the NPU interrupt line.
//! 2. Soft reset the NPU into the requested security and privilege state.
//! 3. Bind the [`AcceleratorContext`] to an interrupt trampoline and install
//!    it in the vector table.
//! 4. Unmask the line.
//!
//! The line is only unmasked once the context is valid. A failed bootstrap is
//! not retried and leaves the NPU in an unknown state for the rest of the
//! boot.
//!
//! For more information, please see [Arm Ethos-U55 NPU Technical Reference
//! Manual].
//!
//! [Arm Ethos-U55 NPU Technical Reference Manual]: https://developer.arm.com/documentation/102420/latest

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Once;

use crate::cancel::Cancellation;
use crate::config::NpuConfig;
use crate::interrupt::{self, IrqHandler, Nvic, VectorTable};
use crate::mmio::Mmio;

/// ID register.
pub(crate) const NPU_ID: usize = 0x00;

/// Status register.
pub(crate) const NPU_STATUS: usize = 0x04;

/// Command register.
pub(crate) const NPU_CMD: usize = 0x08;

/// Reset register.
pub(crate) const NPU_RESET: usize = 0x0c;

/// Protection register, the security and privilege state in use.
pub(crate) const NPU_PROT: usize = 0x24;

/// STATUS.irq_raised.
const STATUS_IRQ_RAISED: u32 = 1 << 1;

/// STATUS.bus_status: an AXI bus error was detected.
const STATUS_BUS_ERROR: u32 = 1 << 2;

/// STATUS.reset_status: a reset is in progress.
const STATUS_RESET: u32 = 1 << 3;

/// CMD.clear_irq.
const CMD_CLEAR_IRQ: u32 = 1 << 1;

/// CMD.clock_q_enable.
const CMD_CLOCK_Q_ENABLE: u32 = 1 << 2;

/// CMD.power_q_enable.
const CMD_POWER_Q_ENABLE: u32 = 1 << 3;

/// Privileged bit of RESET.pending_CPL and PROT.active_CPL.
const CPL_PRIVILEGED: u32 = 1 << 0;

/// Non-secure bit of RESET.pending_CSL and PROT.active_CSL.
const CSL_NON_SECURE: u32 = 1 << 1;

/// Number of STATUS reads to wait for a soft reset to complete.
const RESET_POLL: usize = 10_000;

/// NPU error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The context was already initialized during this boot.
    AlreadyInitialized,

    /// The soft reset did not complete.
    ResetTimeout,

    /// The NPU did not enter the requested security and privilege state.
    ProtMismatch {
        /// Requested PROT value.
        expected: u32,

        /// PROT value after reset.
        actual: u32,
    },

    /// The context has not been initialized.
    NotInitialized,

    /// The NPU reported an AXI bus error.
    BusError,

    /// The wait was cancelled.
    Cancelled,

    /// Interrupt error.
    InterruptError(interrupt::Error),

    /// A fast memory region was configured. The NPU is only used with the
    /// SRAM arena.
    FastMemoryUnsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AlreadyInitialized => write!(f, "NPU already initialized"),
            Error::ResetTimeout => write!(f, "NPU soft reset timed out"),
            Error::ProtMismatch { expected, actual } => write!(
                f,
                "NPU protection mismatch: expected {expected:#x}, got {actual:#x}"
            ),
            Error::NotInitialized => write!(f, "NPU not initialized"),
            Error::BusError => write!(f, "NPU bus error"),
            Error::Cancelled => write!(f, "NPU wait cancelled"),
            Error::InterruptError(err) => write!(f, "interrupt error: {err}"),
            Error::FastMemoryUnsupported => write!(f, "NPU fast memory not supported"),
        }
    }
}

impl From<interrupt::Error> for Error {
    fn from(err: interrupt::Error) -> Error {
        Error::InterruptError(err)
    }
}

/// Ethos-U55 register driver.
#[derive(Debug)]
pub struct EthosU55<B: Mmio> {
    bus: B,
    base: usize,
}

impl<B: Mmio> EthosU55<B> {
    /// Returns a driver for the NPU at `base`.
    pub const fn new(bus: B, base: usize) -> EthosU55<B> {
        EthosU55 { bus, base }
    }

    fn read(&self, reg: usize) -> u32 {
        unsafe { self.bus.read32(self.base + reg) }
    }

    fn write(&self, reg: usize, val: u32) {
        unsafe { self.bus.write32(self.base + reg, val) }
    }

    /// Returns the ID register.
    pub fn id(&self) -> u32 {
        self.read(NPU_ID)
    }

    /// Returns the status register.
    pub fn status(&self) -> u32 {
        self.read(NPU_STATUS)
    }

    /// Soft resets the NPU into the given security and privilege state and
    /// enables its clock and power Q-channels.
    pub fn init(&self, secure: bool, privileged: bool) -> Result<(), Error> {
        let mut prot = 0;
        if privileged {
            prot |= CPL_PRIVILEGED;
        }
        if !secure {
            prot |= CSL_NON_SECURE;
        }

        self.write(NPU_RESET, prot);
        if !(0..RESET_POLL).any(|_| self.status() & STATUS_RESET == 0) {
            return Err(Error::ResetTimeout);
        }

        let actual = self.read(NPU_PROT) & (CPL_PRIVILEGED | CSL_NON_SECURE);
        if actual != prot {
            return Err(Error::ProtMismatch {
                expected: prot,
                actual,
            });
        }

        self.write(
            NPU_CMD,
            CMD_CLEAR_IRQ | CMD_CLOCK_Q_ENABLE | CMD_POWER_Q_ENABLE,
        );
        Ok(())
    }

    /// Acknowledges a raised interrupt and returns the status observed
    /// before acknowledging it.
    pub fn ack_irq(&self) -> u32 {
        let status = self.status();
        self.write(
            NPU_CMD,
            CMD_CLEAR_IRQ | CMD_CLOCK_Q_ENABLE | CMD_POWER_Q_ENABLE,
        );
        status
    }
}

/// State of the one NPU of the core.
///
/// It lives in a `static` so the interrupt trampoline can reach it.
pub struct AcceleratorContext<B: Mmio> {
    driver: Once<EthosU55<B>>,
    claimed: AtomicBool,
    done: AtomicBool,
    bus_error: AtomicBool,
    irqs: AtomicU32,
}

impl<B: Mmio> AcceleratorContext<B> {
    /// Returns an uninitialized context.
    pub const fn new() -> AcceleratorContext<B> {
        AcceleratorContext {
            driver: Once::new(),
            claimed: AtomicBool::new(false),
            done: AtomicBool::new(false),
            bus_error: AtomicBool::new(false),
            irqs: AtomicU32::new(0),
        }
    }

    /// Initializes the NPU described by `config`.
    ///
    /// It can only be called once per boot. Further calls fail with
    /// [`Error::AlreadyInitialized`], even if the first one failed. A
    /// configuration with fast memory is rejected before the context is
    /// claimed.
    pub fn initialize(&self, bus: B, config: NpuConfig) -> Result<(), Error> {
        if config.fast_memory.is_some() {
            return Err(Error::FastMemoryUnsupported);
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyInitialized);
        }

        let driver = EthosU55::new(bus, config.base);
        log::trace!("npu: id={:#010x}", driver.id());
        driver.init(config.secure, config.privileged)?;

        self.driver.call_once(|| driver);
        Ok(())
    }

    /// Returns true if the NPU has been successfully initialized.
    pub fn is_initialized(&self) -> bool {
        self.driver.is_completed()
    }

    /// Returns the number of handled interrupts.
    pub fn irq_count(&self) -> u32 {
        self.irqs.load(Ordering::Relaxed)
    }

    /// Waits for the next completion interrupt.
    ///
    /// Each completion is consumed by exactly one wait.
    pub fn wait_for_completion(&self, cancel: &dyn Cancellation) -> Result<(), Error> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        loop {
            if self.done.swap(false, Ordering::AcqRel) {
                if self.bus_error.swap(false, Ordering::AcqRel) {
                    return Err(Error::BusError);
                }
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            core::hint::spin_loop();
        }
    }
}

impl<B: Mmio> Default for AcceleratorContext<B> {
    fn default() -> AcceleratorContext<B> {
        AcceleratorContext::new()
    }
}

impl<B: Mmio + Send + Sync> IrqHandler for AcceleratorContext<B> {
    fn handle_irq(&self) {
        let Some(driver) = self.driver.get() else {
            return;
        };

        self.irqs.fetch_add(1, Ordering::Relaxed);
        let status = driver.ack_irq();
        if status & STATUS_BUS_ERROR != 0 {
            self.bus_error.store(true, Ordering::Release);
        }
        if status & (STATUS_IRQ_RAISED | STATUS_BUS_ERROR) != 0 {
            self.done.store(true, Ordering::Release);
        }
    }
}

/// Brings the NPU up and routes its interrupt line to an
/// [`AcceleratorContext`].
pub struct AcceleratorBootstrap<'a, B: Mmio> {
    nvic: &'a Nvic<B>,
    vectors: &'a VectorTable<B>,
}

impl<'a, B: Mmio> AcceleratorBootstrap<'a, B> {
    /// Returns a bootstrap using the given interrupt controller and vector
    /// table.
    pub fn new(nvic: &'a Nvic<B>, vectors: &'a VectorTable<B>) -> AcceleratorBootstrap<'a, B> {
        AcceleratorBootstrap { nvic, vectors }
    }

    /// Initializes `ctx` and routes the interrupt line of `config` to it.
    ///
    /// The line stays masked unless every step succeeds.
    pub fn run<D>(
        &self,
        ctx: &'static AcceleratorContext<D>,
        bus: D,
        config: NpuConfig,
    ) -> Result<(), Error>
    where
        D: Mmio + Send + Sync + 'static,
    {
        self.nvic.mask(config.irq);
        self.nvic.clear_pending(config.irq);

        ctx.initialize(bus, config)?;

        let trampoline = interrupt::bind(ctx)?;
        self.vectors.set_vector(config.irq, trampoline);

        self.nvic.unmask(config.irq);
        log::debug!(
            "npu: base={:#x} irq={} secure={} privileged={}",
            config.base,
            config.irq.number(),
            config.secure,
            config.privileged
        );
        Ok(())
    }
}
