//! Cycle counting.

use crate::cpu::scb::SCB_DEMCR;
use crate::mmio::Mmio;

/// DWT Control Register.
const DWT_CTRL: usize = 0xe000_1000;

/// DWT Cycle Count Register.
const DWT_CYCCNT: usize = 0xe000_1004;

/// DEMCR.TRCENA: enables the DWT.
const DEMCR_TRCENA: u32 = 1 << 24;

/// DWT_CTRL.CYCCNTENA.
const DWT_CTRL_CYCCNTENA: u32 = 1 << 0;

/// Free running time source.
pub trait Clock {
    /// Returns the current tick count. It wraps around on overflow.
    fn now(&self) -> u32;
}

/// The DWT cycle counter. It counts core clock cycles.
#[derive(Debug, Clone)]
pub struct CycleCounter<B: Mmio> {
    bus: B,
}

impl<B: Mmio> CycleCounter<B> {
    /// Returns a new [`CycleCounter`] accessed through `bus`.
    pub const fn new(bus: B) -> CycleCounter<B> {
        CycleCounter { bus }
    }

    /// Enables the trace unit and starts the cycle counter from zero.
    pub fn enable(&self) {
        unsafe {
            self.bus.set_bits32(SCB_DEMCR, DEMCR_TRCENA);
            self.bus.write32(DWT_CYCCNT, 0);
            self.bus.set_bits32(DWT_CTRL, DWT_CTRL_CYCCNTENA);
        }
    }
}

impl<B: Mmio> Clock for CycleCounter<B> {
    fn now(&self) -> u32 {
        unsafe { self.bus.read32(DWT_CYCCNT) }
    }
}
