//! Board configuration.
//!
//! A firmware image targets exactly one of the two Cortex-M55 cores of the
//! Ensemble SoC. The selected [`Profile`] decides the MPU region table, and a
//! [`BoardConfig`] gathers every other boot-time constant. Firmware picks one
//! of the presets, [`BoardConfig::HP`] or [`BoardConfig::HE`], in a single
//! place.

use log::LevelFilter;
use static_assertions::const_assert;

use crate::interrupt::Irq;
use crate::mpu::{self, Access, AttrIndex, Control, MemoryRegion, RegionTable, Shareability};

/// Privileged and unprivileged read/write.
const RW: Access = Access::NON_PRIVILEGED;

/// Privileged and unprivileged read-only.
const RO: Access = Access::READ_ONLY.union(Access::NON_PRIVILEGED);

/// Privileged and unprivileged read/write, no instruction fetch.
const RW_XN: Access = Access::NON_PRIVILEGED.union(Access::EXECUTE_NEVER);

const SRAM0: MemoryRegion = MemoryRegion::new(
    "SRAM0",
    0x0200_0000,
    0x023f_ffff,
    AttrIndex::NORMAL_WT_RA_TRANSIENT,
    Shareability::Non,
    RW,
);

const SRAM1: MemoryRegion = MemoryRegion::new(
    "SRAM1",
    0x0800_0000,
    0x0827_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Non,
    RW,
);

const HOST_PERIPHERALS: MemoryRegion = MemoryRegion::new(
    "host peripherals",
    0x1a00_0000,
    0x1aff_ffff,
    AttrIndex::DEVICE_NGNRE,
    Shareability::Non,
    RW_XN,
);

const HE_ITCM: MemoryRegion = MemoryRegion::new(
    "M55-HE ITCM",
    0x5800_0000,
    0x5803_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Outer,
    RW,
);

const HE_DTCM: MemoryRegion = MemoryRegion::new(
    "M55-HE DTCM",
    0x5880_0000,
    0x5883_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Outer,
    RW,
);

const HP_ITCM: MemoryRegion = MemoryRegion::new(
    "M55-HP ITCM",
    0x5000_0000,
    0x5003_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Outer,
    RW,
);

const HP_DTCM: MemoryRegion = MemoryRegion::new(
    "M55-HP DTCM",
    0x5080_0000,
    0x508f_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Outer,
    RW,
);

const MRAM: MemoryRegion = MemoryRegion::new(
    "MRAM",
    0x8000_0000,
    0x8057_ffff,
    AttrIndex::NORMAL_WT_RA,
    Shareability::Non,
    RO,
);

const OSPI_REGS: MemoryRegion = MemoryRegion::new(
    "OSPI registers",
    0x8300_0000,
    0x83ff_ffff,
    AttrIndex::DEVICE_NGNRE,
    Shareability::Non,
    RW_XN,
);

const OSPI0_XIP: MemoryRegion = MemoryRegion::new(
    "OSPI0 XIP",
    0xa000_0000,
    0xbfff_ffff,
    AttrIndex::NORMAL_WB_RA_WA,
    Shareability::Non,
    RW,
);

const OSPI1_XIP: MemoryRegion = MemoryRegion::new(
    "OSPI1 XIP",
    0xc000_0000,
    0xdfff_ffff,
    AttrIndex::NORMAL_NON_CACHEABLE,
    Shareability::Non,
    RO,
);

/// Number of regions of the M55-HP table.
const HP_NREGIONS: usize = 9;

/// Number of regions of the M55-HE table.
const HE_NREGIONS: usize = 9;

/// Regions of the M55-HP core. The M55-HE TCMs are reachable through the
/// global address map.
static HP_REGIONS: [MemoryRegion; HP_NREGIONS] = [
    SRAM0,
    SRAM1,
    HOST_PERIPHERALS,
    HE_ITCM,
    HE_DTCM,
    MRAM,
    OSPI_REGS,
    OSPI0_XIP,
    OSPI1_XIP,
];

/// Regions of the M55-HE core. The M55-HP TCMs are reachable through the
/// global address map.
static HE_REGIONS: [MemoryRegion; HE_NREGIONS] = [
    SRAM0,
    SRAM1,
    HOST_PERIPHERALS,
    HP_ITCM,
    HP_DTCM,
    MRAM,
    OSPI_REGS,
    OSPI0_XIP,
    OSPI1_XIP,
];

// Both cores implement 16 MPU regions.
const_assert!(HP_NREGIONS <= mpu::MAX_REGIONS);
const_assert!(HE_NREGIONS <= mpu::MAX_REGIONS);

/// Target core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Profile {
    /// M55-HP, high performance core.
    HighPerformance,

    /// M55-HE, high efficiency core.
    HighEfficiency,
}

impl Profile {
    /// Returns the name of the core.
    pub fn name(&self) -> &'static str {
        match self {
            Profile::HighPerformance => "M55-HP",
            Profile::HighEfficiency => "M55-HE",
        }
    }

    /// Returns the MPU region table of the core.
    pub fn regions(&self) -> RegionTable<'static> {
        match self {
            Profile::HighPerformance => RegionTable(&HP_REGIONS),
            Profile::HighEfficiency => RegionTable(&HE_REGIONS),
        }
    }
}

/// Ethos-U55 configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NpuConfig {
    /// Base address of the register bank.
    pub base: usize,

    /// Interrupt line.
    pub irq: Irq,

    /// Run the NPU in the secure state.
    pub secure: bool,

    /// Run the NPU in privileged mode.
    pub privileged: bool,

    /// Base address and size of the fast memory area. The U55 has none, so
    /// `Some` is rejected when the NPU is brought up.
    pub fast_memory: Option<(usize, usize)>,
}

impl NpuConfig {
    /// NPU local to the M55-HP and M55-HE cores.
    pub const LOCAL: NpuConfig = NpuConfig {
        base: 0x400e_1000,
        irq: Irq::new(55),
        secure: true,
        privileged: true,
        fast_memory: None,
    };
}

/// Console configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsoleConfig {
    /// 16550 compatible UART.
    Uart {
        /// Base address of the UART.
        base: usize,

        /// Baud rate.
        baud: u32,

        /// UART clock frequency in Hz.
        clock_hz: u32,
    },

    /// Output goes through the debugger. The board does not touch any UART.
    Semihosting,
}

impl ConsoleConfig {
    /// UART4 at 115200 baud.
    pub const UART4: ConsoleConfig = ConsoleConfig::Uart {
        base: 0x4901_c000,
        baud: 115_200,
        clock_hz: 100_000_000,
    };
}

/// Boot-time configuration of the board.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Target core.
    pub profile: Profile,

    /// NPU to bootstrap, if any.
    pub npu: Option<NpuConfig>,

    /// Console.
    pub console: ConsoleConfig,

    /// Power the MIPI D-PHY domains up and release their isolation.
    pub power_domains: bool,

    /// Copy the vector table to RAM before anything else.
    pub relocate_vectors: bool,

    /// Maximum log level.
    pub log_level: LevelFilter,

    /// MPU background policy. [`Control::ENABLE`] is implied.
    pub mpu_control: Control,
}

impl BoardConfig {
    /// M55-HP preset.
    pub const HP: BoardConfig = BoardConfig {
        profile: Profile::HighPerformance,
        npu: Some(NpuConfig::LOCAL),
        console: ConsoleConfig::UART4,
        power_domains: true,
        relocate_vectors: true,
        log_level: LevelFilter::Info,
        mpu_control: Control::PRIVDEFENA,
    };

    /// M55-HE preset.
    pub const HE: BoardConfig = BoardConfig {
        profile: Profile::HighEfficiency,
        ..BoardConfig::HP
    };

    /// Returns the configuration of the given core with the defaults of its
    /// preset.
    pub const fn for_profile(profile: Profile) -> BoardConfig {
        match profile {
            Profile::HighPerformance => BoardConfig::HP,
            Profile::HighEfficiency => BoardConfig::HE,
        }
    }
}
