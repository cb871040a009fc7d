//! L1 cache maintenance.
//!
//! Caches are enabled last during boot. Both operations follow the
//! architectural sequence: invalidate first, then set the enable bit in CCR,
//! with barriers around every step.

use crate::cpu::scb::{
    Scb, CCR_DC, CCR_IC, SCB_CCR, SCB_CCSIDR, SCB_CSSELR, SCB_DCISW,
    SCB_ICIALLU,
};
use crate::cpu::{dsb, isb};
use crate::mmio::Mmio;

/// Decoded CCSIDR geometry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Number of sets.
    pub sets: u32,

    /// Number of ways.
    pub ways: u32,
}

impl From<u32> for CacheGeometry {
    fn from(ccsidr: u32) -> CacheGeometry {
        CacheGeometry {
            sets: ((ccsidr >> 13) & 0x7fff) + 1,
            ways: ((ccsidr >> 3) & 0x3ff) + 1,
        }
    }
}

/// Enables the instruction cache. Does nothing if it is already enabled.
pub fn enable_icache<B: Mmio>(scb: &Scb<B>) {
    if scb.icache_enabled() {
        return;
    }

    let bus = scb.bus();

    dsb();
    isb();

    // Invalidate the whole I-cache.
    unsafe { bus.write32(SCB_ICIALLU, 0) };
    dsb();
    isb();

    unsafe { bus.set_bits32(SCB_CCR, CCR_IC) };
    dsb();
    isb();
}

/// Enables the data cache. Does nothing if it is already enabled.
///
/// The cache content is undefined out of reset, so every line is invalidated
/// by set/way before enabling it.
pub fn enable_dcache<B: Mmio>(scb: &Scb<B>) {
    if scb.dcache_enabled() {
        return;
    }

    let bus = scb.bus();

    // Select the level 1 data cache.
    unsafe { bus.write32(SCB_CSSELR, 0) };
    dsb();

    let geometry = CacheGeometry::from(unsafe { bus.read32(SCB_CCSIDR) });
    log::trace!("dcache: {} sets, {} ways", geometry.sets, geometry.ways);

    // Way is in bits [31:30] and set in bits [13:5] for the 4-way, 32-byte
    // line L1 D-cache.
    for set in 0..geometry.sets {
        for way in 0..geometry.ways {
            let sw = ((set << 5) & 0x3fe0) | ((way << 30) & 0xc000_0000);
            unsafe { bus.write32(SCB_DCISW, sw) };
        }
    }
    dsb();

    unsafe { bus.set_bits32(SCB_CCR, CCR_DC) };
    dsb();
    isb();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    /// 4 ways, 64 sets.
    const CCSIDR: u32 = (63 << 13) | (3 << 3);

    #[test]
    fn geometry_decoding() {
        let geometry = CacheGeometry::from(CCSIDR);
        assert_eq!(geometry, CacheGeometry { sets: 64, ways: 4 });
    }

    #[test]
    fn dcache_is_invalidated_before_enabling() {
        let bus = FakeBus::new();
        bus.set(SCB_CCSIDR, CCSIDR);
        let scb = Scb::new(bus.clone());

        enable_dcache(&scb);

        let writes = bus.writes();
        let invalidations =
            writes.iter().filter(|&&(addr, _)| addr == SCB_DCISW).count();
        assert_eq!(invalidations, 64 * 4);
        assert!(bus.last_write(SCB_DCISW) < bus.last_write(SCB_CCR));
        assert!(scb.dcache_enabled());
    }

    #[test]
    fn enabling_twice_is_a_no_op() {
        let bus = FakeBus::new();
        let scb = Scb::new(bus.clone());

        enable_icache(&scb);
        let nwrites = bus.writes().len();
        enable_icache(&scb);

        assert!(scb.icache_enabled());
        assert_eq!(bus.writes().len(), nwrites);
    }
}
