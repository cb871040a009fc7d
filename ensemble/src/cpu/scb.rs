//! System Control Block.

use crate::mmio::{Mmio, SCS_BASE};

/// Vector Table Offset Register.
pub(crate) const SCB_VTOR: usize = SCS_BASE + 0xd08;

/// Configuration and Control Register.
pub(crate) const SCB_CCR: usize = SCS_BASE + 0xd14;

/// Current Cache Size ID Register.
pub(crate) const SCB_CCSIDR: usize = SCS_BASE + 0xd80;

/// Cache Size Selection Register.
pub(crate) const SCB_CSSELR: usize = SCS_BASE + 0xd84;

/// Debug Exception and Monitor Control Register.
pub(crate) const SCB_DEMCR: usize = SCS_BASE + 0xdfc;

/// I-cache invalidate all to the Point of Unification.
pub(crate) const SCB_ICIALLU: usize = SCS_BASE + 0xf50;

/// D-cache invalidate by set/way.
pub(crate) const SCB_DCISW: usize = SCS_BASE + 0xf60;

/// CCR.DC: data and unified caches enable.
pub(crate) const CCR_DC: u32 = 1 << 16;

/// CCR.IC: instruction cache enable.
pub(crate) const CCR_IC: u32 = 1 << 17;

/// VTOR.TBLOFF keeps bits [31:7].
const VTOR_TBLOFF_MASK: u32 = !0x7f;

/// Handle to the System Control Block.
#[derive(Debug, Clone)]
pub struct Scb<B: Mmio> {
    bus: B,
}

impl<B: Mmio> Scb<B> {
    /// Returns a new [`Scb`] accessed through `bus`.
    pub const fn new(bus: B) -> Scb<B> {
        Scb { bus }
    }

    /// Returns the bus used to reach the SCB.
    pub(crate) fn bus(&self) -> &B {
        &self.bus
    }

    /// Returns the address of the active vector table.
    pub fn vtor(&self) -> u32 {
        unsafe { self.bus.read32(SCB_VTOR) & VTOR_TBLOFF_MASK }
    }

    /// Sets the address of the active vector table.
    ///
    /// # Safety
    ///
    /// `addr` must point to a valid vector table for the rest of the program
    /// lifetime.
    pub unsafe fn set_vtor(&self, addr: u32) {
        self.bus.write32(SCB_VTOR, addr & VTOR_TBLOFF_MASK);
    }

    /// Returns the value of the Configuration and Control Register.
    pub fn ccr(&self) -> u32 {
        unsafe { self.bus.read32(SCB_CCR) }
    }

    /// Returns true if the instruction cache is enabled.
    pub fn icache_enabled(&self) -> bool {
        self.ccr() & CCR_IC != 0
    }

    /// Returns true if the data cache is enabled.
    pub fn dcache_enabled(&self) -> bool {
        self.ccr() & CCR_DC != 0
    }
}
