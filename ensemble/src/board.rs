//! Board bring-up.
//!
//! [`BoardInit`] runs the bring-up sequence of a [`Board`] once per boot:
//!
//! ```text
//! [vectors] -> pinmux -> clocks -> [power domains] -> console -> [NPU] -> caches
//! ```
//!
//! Bracketed stages depend on the [`BoardConfig`]. Every stage is a
//! synchronous call and nothing is rolled back. A failure stops the sequence
//! right away, so when the NPU cannot be brought up the caches are left
//! disabled and [`BootError`] tells which stage failed.
//!
//! The MPU is not part of the sequence. It is programmed earlier, from the
//! `MPU_Load_Regions` hook, with [`load_mpu_regions`].

use core::fmt;

use bitflags::bitflags;
use spin::Once;

use crate::config::{BoardConfig, ConsoleConfig, NpuConfig, Profile};
use crate::cpu::cache;
use crate::cpu::scb::Scb;
use crate::gpio::SignalLine;
use crate::interrupt::{self, Nvic, RamVectors, VectorTable};
use crate::mmio::Mmio;
use crate::mpu::{self, Mpu};
use crate::npu::{self, AcceleratorBootstrap, AcceleratorContext};
use crate::pinmux::{self, AltFunction, Pad, PadControl, Pinmux};
use crate::print;
use crate::uart::{self, Uart};

/// Base address of the Clock Generation Unit.
const CGU_BASE: usize = 0x1a60_2000;

/// CGU clock enable register.
const CGU_CLK_ENA: usize = CGU_BASE + 0x14;

/// 160 MHz clock.
const CLK_ENA_160M: u32 = 1 << 20;

/// 100 MHz clock.
const CLK_ENA_100M: u32 = 1 << 21;

/// 20 MHz clock.
const CLK_ENA_20M: u32 = 1 << 22;

/// 38.4 MHz clock.
const CLK_ENA_38P4M: u32 = 1 << 23;

/// Base address of the VBAT always-on domain registers.
const VBAT_BASE: usize = 0x1a60_9000;

/// VBAT power control register.
const VBAT_PWR_CTRL: usize = VBAT_BASE + 0x8c;

/// MIPI TX D-PHY power mask.
const PWR_CTRL_TX_DPHY_PWR_MASK: u32 = 1 << 0;

/// MIPI TX D-PHY isolation.
const PWR_CTRL_TX_DPHY_ISO: u32 = 1 << 1;

/// MIPI RX D-PHY power mask.
const PWR_CTRL_RX_DPHY_PWR_MASK: u32 = 1 << 4;

/// MIPI RX D-PHY isolation.
const PWR_CTRL_RX_DPHY_ISO: u32 = 1 << 5;

/// MIPI D-PHY PLL power mask.
const PWR_CTRL_DPHY_PLL_PWR_MASK: u32 = 1 << 8;

/// MIPI D-PHY PLL isolation.
const PWR_CTRL_DPHY_PLL_ISO: u32 = 1 << 9;

/// UART4 RX pad.
const UART4_RX: Pad = Pad::from_const(12, 1);

/// UART4 TX pad.
const UART4_TX: Pad = Pad::from_const(12, 2);

/// Alternate function of the UART4 pads.
const UART4_ALT: u8 = 2;

/// Board error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Interrupt error.
    InterruptError(interrupt::Error),

    /// Pinmux error.
    PinmuxError(pinmux::Error),

    /// UART error.
    UartError(uart::Error),

    /// NPU error.
    NpuError(npu::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InterruptError(err) => write!(f, "interrupt error: {err}"),
            Error::PinmuxError(err) => write!(f, "pinmux error: {err}"),
            Error::UartError(err) => write!(f, "UART error: {err}"),
            Error::NpuError(err) => write!(f, "NPU error: {err}"),
        }
    }
}

impl From<interrupt::Error> for Error {
    fn from(err: interrupt::Error) -> Error {
        Error::InterruptError(err)
    }
}

impl From<pinmux::Error> for Error {
    fn from(err: pinmux::Error) -> Error {
        Error::PinmuxError(err)
    }
}

impl From<uart::Error> for Error {
    fn from(err: uart::Error) -> Error {
        Error::UartError(err)
    }
}

impl From<npu::Error> for Error {
    fn from(err: npu::Error) -> Error {
        Error::NpuError(err)
    }
}

/// Board support operations used by [`BoardInit`].
pub trait Board {
    /// Copies the vector table to RAM and makes it active.
    fn relocate_vectors(&mut self) -> Result<(), Error>;

    /// Configures the pads used by the board.
    fn configure_pinmux(&mut self) -> Result<(), Error>;

    /// Enables the peripheral clocks.
    fn enable_clocks(&mut self) -> Result<(), Error>;

    /// Powers up the optional power domains and releases their isolation.
    fn enable_power_domains(&mut self) -> Result<(), Error>;

    /// Sets the console up and registers it for printing.
    fn init_console(&mut self, console: &ConsoleConfig) -> Result<(), Error>;

    /// Bootstraps the NPU and routes its interrupt.
    fn start_accelerator(&mut self, npu: &NpuConfig) -> Result<(), Error>;

    /// Enables the L1 caches.
    fn enable_caches(&mut self);

    /// Returns true if both L1 caches are enabled.
    fn caches_enabled(&self) -> bool;
}

/// Bring-up stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    /// The vector table lives in RAM.
    VectorsRelocated,

    /// The pads are configured.
    PinmuxConfigured,

    /// The peripheral clocks are running.
    ClocksEnabled,

    /// The optional power domains are up.
    PowerDomainsEnabled,

    /// The console is usable.
    ConsoleReady,

    /// The NPU is initialized and its interrupt unmasked.
    AcceleratorReady,

    /// The L1 caches are enabled. Terminal stage.
    CachesEnabled,
}

impl Stage {
    /// Returns the flag of the stage in [`Stages`].
    pub fn flag(self) -> Stages {
        match self {
            Stage::VectorsRelocated => Stages::VECTORS_RELOCATED,
            Stage::PinmuxConfigured => Stages::PINMUX_CONFIGURED,
            Stage::ClocksEnabled => Stages::CLOCKS_ENABLED,
            Stage::PowerDomainsEnabled => Stages::POWER_DOMAINS_ENABLED,
            Stage::ConsoleReady => Stages::CONSOLE_READY,
            Stage::AcceleratorReady => Stages::ACCELERATOR_READY,
            Stage::CachesEnabled => Stages::CACHES_ENABLED,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::VectorsRelocated => "vectors relocated",
            Stage::PinmuxConfigured => "pinmux configured",
            Stage::ClocksEnabled => "clocks enabled",
            Stage::PowerDomainsEnabled => "power domains enabled",
            Stage::ConsoleReady => "console ready",
            Stage::AcceleratorReady => "accelerator ready",
            Stage::CachesEnabled => "caches enabled",
        };
        write!(f, "{name}")
    }
}

bitflags! {
    /// Set of completed stages.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Stages: u8 {
        /// [`Stage::VectorsRelocated`].
        const VECTORS_RELOCATED = 1 << 0;

        /// [`Stage::PinmuxConfigured`].
        const PINMUX_CONFIGURED = 1 << 1;

        /// [`Stage::ClocksEnabled`].
        const CLOCKS_ENABLED = 1 << 2;

        /// [`Stage::PowerDomainsEnabled`].
        const POWER_DOMAINS_ENABLED = 1 << 3;

        /// [`Stage::ConsoleReady`].
        const CONSOLE_READY = 1 << 4;

        /// [`Stage::AcceleratorReady`].
        const ACCELERATOR_READY = 1 << 5;

        /// [`Stage::CachesEnabled`].
        const CACHES_ENABLED = 1 << 6;
    }
}

/// Outcome of a complete bring-up.
#[derive(Debug)]
pub struct BootReport<B> {
    /// The board, ready for the application.
    pub board: B,

    /// Target core.
    pub profile: Profile,

    /// Completed stages. Always includes [`Stages::CACHES_ENABLED`].
    pub completed: Stages,
}

/// Failed bring-up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootError {
    /// Stage that failed.
    pub stage: Stage,

    /// Stages completed before the failure.
    pub completed: Stages,

    /// Cause of the failure.
    pub cause: Error,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "boot failed at stage \"{}\": {}", self.stage, self.cause)
    }
}

/// One-shot bring-up sequencer.
pub struct BoardInit<B: Board> {
    board: B,
    config: BoardConfig,
    completed: Stages,
}

impl<B: Board> BoardInit<B> {
    /// Returns a sequencer for `board` with the given configuration.
    pub fn new(board: B, config: BoardConfig) -> BoardInit<B> {
        BoardInit {
            board,
            config,
            completed: Stages::empty(),
        }
    }

    fn step<F>(&mut self, stage: Stage, f: F) -> Result<(), BootError>
    where
        F: FnOnce(&mut B) -> Result<(), Error>,
    {
        if let Err(cause) = f(&mut self.board) {
            log::error!("boot: {stage} failed: {cause}");
            return Err(BootError {
                stage,
                completed: self.completed,
                cause,
            });
        }

        self.completed |= stage.flag();
        log::info!("boot: {stage}");
        Ok(())
    }

    /// Runs the sequence. It consumes the sequencer, so it cannot run twice.
    pub fn run(mut self) -> Result<BootReport<B>, BootError> {
        let config = self.config;

        if config.relocate_vectors {
            self.step(Stage::VectorsRelocated, |b| b.relocate_vectors())?;
        }
        self.step(Stage::PinmuxConfigured, |b| b.configure_pinmux())?;
        self.step(Stage::ClocksEnabled, |b| b.enable_clocks())?;
        if config.power_domains {
            self.step(Stage::PowerDomainsEnabled, |b| b.enable_power_domains())?;
        }
        self.step(Stage::ConsoleReady, |b| b.init_console(&config.console))?;
        if let Some(npu) = config.npu {
            self.step(Stage::AcceleratorReady, |b| b.start_accelerator(&npu))?;
        }
        self.step(Stage::CachesEnabled, |b| {
            b.enable_caches();
            Ok(())
        })?;

        Ok(BootReport {
            board: self.board,
            profile: config.profile,
            completed: self.completed,
        })
    }
}

/// Defines the standard memory attributes, loads the region table of the
/// configured core and enables the MPU.
///
/// It runs from `MPU_Load_Regions`, before `.data` and `.bss` are
/// initialized. Nothing on this path may log.
pub fn load_mpu_regions<B: Mmio>(bus: B, config: &BoardConfig) -> Result<Mpu<B>, mpu::Error> {
    let mut mpu = Mpu::new(bus);
    mpu.define_standard_attributes()?;
    mpu.load_regions(config.profile.regions(), config.mpu_control)?;
    Ok(mpu)
}

/// Statically allocated state of an [`AlifEnsemble`] board.
pub struct BoardResources<B: Mmio> {
    vectors: RamVectors,
    accelerator: AcceleratorContext<B>,
    console: Once<Uart<B>>,
}

impl<B: Mmio> BoardResources<B> {
    /// Returns empty resources.
    pub const fn new() -> BoardResources<B> {
        BoardResources {
            vectors: RamVectors::new(),
            accelerator: AcceleratorContext::new(),
            console: Once::new(),
        }
    }

    /// Returns the NPU context.
    pub fn accelerator(&self) -> &AcceleratorContext<B> {
        &self.accelerator
    }
}

impl<B: Mmio> Default for BoardResources<B> {
    fn default() -> BoardResources<B> {
        BoardResources::new()
    }
}

/// Alif Ensemble development kit, seen from one of its Cortex-M55 cores.
pub struct AlifEnsemble<B: Mmio + 'static> {
    bus: B,
    resources: &'static BoardResources<B>,
    scb: Scb<B>,
    nvic: Nvic<B>,
    vectors: VectorTable<B>,
    pinmux: Pinmux<B>,
}

impl<B> AlifEnsemble<B>
where
    B: Mmio + Clone + Send + Sync + 'static,
{
    /// Returns the board accessed through `bus`.
    pub fn new(bus: B, resources: &'static BoardResources<B>) -> AlifEnsemble<B> {
        AlifEnsemble {
            scb: Scb::new(bus.clone()),
            nvic: Nvic::new(bus.clone()),
            vectors: VectorTable::new(bus.clone()),
            pinmux: Pinmux::new(bus.clone()),
            bus,
            resources,
        }
    }

    /// Returns the bus used by the board.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Returns the NPU context.
    pub fn accelerator(&self) -> &'static AcceleratorContext<B> {
        &self.resources.accelerator
    }
}

impl<B> Board for AlifEnsemble<B>
where
    B: Mmio + Clone + Send + Sync + 'static,
{
    fn relocate_vectors(&mut self) -> Result<(), Error> {
        // SAFETY: The RAM table is owned by the board resources and only
        // used as vector table.
        unsafe { self.vectors.relocate(self.resources.vectors.addr())? };
        Ok(())
    }

    fn configure_pinmux(&mut self) -> Result<(), Error> {
        let uart = AltFunction::try_from(UART4_ALT)?;
        self.pinmux.set(UART4_RX, uart, PadControl::READ_ENABLE);
        self.pinmux.set(UART4_TX, uart, PadControl::empty());

        for line in SignalLine::ALL {
            self.pinmux.set(line.pad(), AltFunction::GPIO, PadControl::SIGNAL);
        }
        Ok(())
    }

    fn enable_clocks(&mut self) -> Result<(), Error> {
        unsafe {
            self.bus.set_bits32(
                CGU_CLK_ENA,
                CLK_ENA_38P4M | CLK_ENA_160M | CLK_ENA_100M | CLK_ENA_20M,
            )
        };
        Ok(())
    }

    fn enable_power_domains(&mut self) -> Result<(), Error> {
        unsafe {
            self.bus.clear_bits32(
                VBAT_PWR_CTRL,
                PWR_CTRL_TX_DPHY_PWR_MASK | PWR_CTRL_RX_DPHY_PWR_MASK | PWR_CTRL_DPHY_PLL_PWR_MASK,
            );
            self.bus.clear_bits32(
                VBAT_PWR_CTRL,
                PWR_CTRL_TX_DPHY_ISO | PWR_CTRL_RX_DPHY_ISO | PWR_CTRL_DPHY_PLL_ISO,
            );
        }
        Ok(())
    }

    fn init_console(&mut self, console: &ConsoleConfig) -> Result<(), Error> {
        let ConsoleConfig::Uart {
            base,
            baud,
            clock_hz,
        } = *console
        else {
            return Ok(());
        };

        let uart = Uart::new(self.bus.clone(), base);
        uart.init(baud, clock_hz)?;
        print::set_console(self.resources.console.call_once(|| uart));
        Ok(())
    }

    fn start_accelerator(&mut self, npu: &NpuConfig) -> Result<(), Error> {
        // The trampoline can only be installed in the RAM table.
        if !self.vectors.is_active(&self.resources.vectors) {
            let vtor = self.scb.vtor();
            return Err(interrupt::Error::InactiveTable { vtor }.into());
        }

        AcceleratorBootstrap::new(&self.nvic, &self.vectors).run(
            &self.resources.accelerator,
            self.bus.clone(),
            *npu,
        )?;
        Ok(())
    }

    fn enable_caches(&mut self) {
        cache::enable_icache(&self.scb);
        cache::enable_dcache(&self.scb);
    }

    fn caches_enabled(&self) -> bool {
        self.scb.icache_enabled() && self.scb.dcache_enabled()
    }
}
