//! Interrupt handling.
//!
//! This module covers the NVIC enable/pending registers, the vector table and
//! the binding of interrupt handlers that need a context. Vector table
//! entries are plain functions, so a handler owning state is reached through
//! one of a small fixed set of trampolines. [`bind`] claims a free trampoline
//! for a `'static` handler and returns the function to install.
//!
//! For more information, please see [Armv8-M Architecture Reference Manual],
//! section B3.4 "Nested Vectored Interrupt Controller".
//!
//! [Armv8-M Architecture Reference Manual]: https://developer.arm.com/documentation/ddi0553/latest

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

use crate::cpu::scb::Scb;
use crate::cpu::{dmb, dsb, isb};
use crate::mmio::{Mmio, SCS_BASE};

/// Interrupt Set-Enable Registers.
pub(crate) const NVIC_ISER_BASE: usize = SCS_BASE + 0x100;

/// Interrupt Clear-Enable Registers.
pub(crate) const NVIC_ICER_BASE: usize = SCS_BASE + 0x180;

/// Interrupt Set-Pending Registers.
pub(crate) const NVIC_ISPR_BASE: usize = SCS_BASE + 0x200;

/// Interrupt Clear-Pending Registers.
pub(crate) const NVIC_ICPR_BASE: usize = SCS_BASE + 0x280;

/// Number of external interrupt lines.
pub const NIRQS: u16 = 480;

/// Number of system exception entries preceding the external interrupts.
pub const NEXCEPTIONS: usize = 16;

/// Number of entries of a full vector table.
pub const NVECTORS: usize = NEXCEPTIONS + NIRQS as usize;

/// Alignment of a vector table of [`NVECTORS`] entries.
pub const VECTOR_TABLE_ALIGN: usize = 2048;

/// Number of trampolines.
pub const NSLOTS: usize = 8;

/// Interrupt error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid interrupt number.
    InvalidIrq(u16),

    /// Every trampoline is already bound.
    NoFreeSlot,

    /// The vector table address is not properly aligned.
    MisalignedTable(usize),

    /// The active vector table is not the RAM table, so its entries cannot
    /// be written.
    InactiveTable {
        /// Address of the active table.
        vtor: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidIrq(n) => write!(f, "invalid IRQ: {n}"),
            Error::NoFreeSlot => write!(f, "no free interrupt trampoline"),
            Error::MisalignedTable(addr) => {
                write!(f, "misaligned vector table: {addr:#x}")
            }
            Error::InactiveTable { vtor } => {
                write!(f, "vector table at {vtor:#x} is not the RAM table")
            }
        }
    }
}

/// External interrupt line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Irq(u16);

impl Irq {
    /// Returns the interrupt line `n`. Evaluated in a const context, an
    /// invalid line fails the build.
    pub const fn new(n: u16) -> Irq {
        assert!(n < NIRQS, "invalid IRQ");
        Irq(n)
    }

    /// Returns the interrupt number.
    pub const fn number(self) -> u16 {
        self.0
    }

    /// Returns the register offset and bit mask of the line in the NVIC
    /// set/clear register banks.
    fn word_and_mask(self) -> (usize, u32) {
        ((self.0 as usize / 32) * 4, 1 << (self.0 % 32))
    }
}

impl TryFrom<u16> for Irq {
    type Error = Error;

    fn try_from(n: u16) -> Result<Irq, Error> {
        if n >= NIRQS {
            return Err(Error::InvalidIrq(n));
        }
        Ok(Irq(n))
    }
}

/// Nested Vectored Interrupt Controller.
pub struct Nvic<B: Mmio> {
    bus: B,
}

impl<B: Mmio> Nvic<B> {
    /// Returns a new [`Nvic`] accessed through `bus`.
    pub const fn new(bus: B) -> Nvic<B> {
        Nvic { bus }
    }

    /// Disables the interrupt line. When it returns, the line cannot fire
    /// anymore.
    pub fn mask(&self, irq: Irq) {
        let (off, mask) = irq.word_and_mask();
        unsafe { self.bus.write32(NVIC_ICER_BASE + off, mask) };
        dsb();
        isb();
    }

    /// Enables the interrupt line.
    pub fn unmask(&self, irq: Irq) {
        let (off, mask) = irq.word_and_mask();
        unsafe { self.bus.write32(NVIC_ISER_BASE + off, mask) };
    }

    /// Returns true if the interrupt line is enabled.
    pub fn is_enabled(&self, irq: Irq) -> bool {
        let (off, mask) = irq.word_and_mask();
        unsafe { self.bus.read32(NVIC_ISER_BASE + off) & mask != 0 }
    }

    /// Returns true if the interrupt line is pending.
    pub fn is_pending(&self, irq: Irq) -> bool {
        let (off, mask) = irq.word_and_mask();
        unsafe { self.bus.read32(NVIC_ISPR_BASE + off) & mask != 0 }
    }

    /// Clears the pending state of the interrupt line.
    pub fn clear_pending(&self, irq: Irq) {
        let (off, mask) = irq.word_and_mask();
        unsafe { self.bus.write32(NVIC_ICPR_BASE + off, mask) };
    }
}

/// Vector table entry.
pub type Vector = extern "C" fn();

/// RAM backing store for a relocated vector table.
#[repr(C, align(2048))]
pub struct RamVectors(UnsafeCell<[u32; NVECTORS]>);

// SAFETY: The table is only written by `VectorTable::relocate` and
// `VectorTable::set_vector`, which require exclusive boot-time access.
unsafe impl Sync for RamVectors {}

impl RamVectors {
    /// Returns a zeroed table.
    pub const fn new() -> RamVectors {
        RamVectors(UnsafeCell::new([0; NVECTORS]))
    }

    /// Returns the address of the table.
    pub fn addr(&self) -> usize {
        self.0.get() as usize
    }
}

impl Default for RamVectors {
    fn default() -> RamVectors {
        RamVectors::new()
    }
}

/// The active vector table, as pointed by VTOR.
pub struct VectorTable<B: Mmio> {
    scb: Scb<B>,
}

impl<B: Mmio> VectorTable<B> {
    /// Returns a new [`VectorTable`] accessed through `bus`.
    pub const fn new(bus: B) -> VectorTable<B> {
        VectorTable { scb: Scb::new(bus) }
    }

    fn entry_addr(&self, irq: Irq) -> usize {
        self.scb.vtor() as usize + (NEXCEPTIONS + irq.0 as usize) * 4
    }

    /// Installs `handler` as the entry of `irq` in the active table.
    ///
    /// The table must live in RAM. See [`VectorTable::relocate`].
    pub fn set_vector(&self, irq: Irq, handler: Vector) {
        let addr = self.entry_addr(irq);
        unsafe { self.scb.bus().write32(addr, handler as usize as u32) };
        dsb();
    }

    /// Returns true if `table` is the active table.
    pub fn is_active(&self, table: &RamVectors) -> bool {
        self.scb.vtor() == table.addr() as u32
    }

    /// Returns the entry of `irq` in the active table.
    pub fn vector(&self, irq: Irq) -> u32 {
        unsafe { self.scb.bus().read32(self.entry_addr(irq)) }
    }

    /// Copies the active table to `dst` and makes it active. It returns
    /// `Ok(false)` without copying anything if `dst` is already active.
    ///
    /// # Safety
    ///
    /// `dst` must point to writable memory with room for [`NVECTORS`]
    /// entries, such as a [`RamVectors`], that nothing else uses.
    pub unsafe fn relocate(&self, dst: usize) -> Result<bool, Error> {
        if dst % VECTOR_TABLE_ALIGN != 0 {
            return Err(Error::MisalignedTable(dst));
        }

        let src = self.scb.vtor() as usize;
        if src == dst as u32 as usize {
            return Ok(false);
        }

        let bus = self.scb.bus();
        for i in 0..NVECTORS {
            bus.write32(dst + i * 4, bus.read32(src + i * 4));
        }
        dmb();

        self.scb.set_vtor(dst as u32);
        dsb();

        log::trace!("vector table moved from {src:#x} to {dst:#x}");
        Ok(true)
    }
}

/// Interrupt handler owning state.
pub trait IrqHandler: Sync {
    /// Handles the interrupt. It runs in handler mode, so it must not block.
    fn handle_irq(&self);
}

#[allow(clippy::declare_interior_mutable_const)]
const UNBOUND: Once<&'static dyn IrqHandler> = Once::new();
#[allow(clippy::declare_interior_mutable_const)]
const FREE: AtomicBool = AtomicBool::new(false);

/// Handlers bound to the trampolines.
static SLOTS: [Once<&'static dyn IrqHandler>; NSLOTS] = [UNBOUND; NSLOTS];

/// Claimed trampolines.
static CLAIMED: [AtomicBool; NSLOTS] = [FREE; NSLOTS];

extern "C" fn trampoline<const N: usize>() {
    if let Some(handler) = SLOTS[N].get() {
        handler.handle_irq();
    }
}

static TRAMPOLINES: [Vector; NSLOTS] = [
    trampoline::<0>,
    trampoline::<1>,
    trampoline::<2>,
    trampoline::<3>,
    trampoline::<4>,
    trampoline::<5>,
    trampoline::<6>,
    trampoline::<7>,
];

/// Binds `handler` to a free trampoline and returns the trampoline.
///
/// Bindings are permanent.
pub fn bind(handler: &'static dyn IrqHandler) -> Result<Vector, Error> {
    let slot = CLAIMED
        .iter()
        .position(|claimed| {
            claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
        .ok_or(Error::NoFreeSlot)?;

    SLOTS[slot].call_once(|| handler);
    log::trace!("irq handler bound to trampoline {slot}");
    Ok(TRAMPOLINES[slot])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::scb::SCB_VTOR;
    use crate::testing::FakeBus;

    use core::sync::atomic::AtomicU32;

    #[test]
    fn irq_range() {
        assert_eq!(Irq::try_from(479), Ok(Irq::new(479)));
        assert_eq!(Irq::try_from(480), Err(Error::InvalidIrq(480)));
    }

    #[test]
    fn nvic_lines() {
        let bus = FakeBus::new();
        let nvic = Nvic::new(bus.clone());
        let irq = Irq::new(55);

        nvic.unmask(irq);
        assert!(nvic.is_enabled(irq));
        assert_eq!(bus.last_write(NVIC_ISER_BASE + 4), Some(0));
        assert!(!nvic.is_enabled(Irq::new(54)));

        nvic.mask(irq);
        assert!(!nvic.is_enabled(irq));
        assert!(!bus.irq_enabled(55));

        unsafe { bus.write32(NVIC_ISPR_BASE + 4, 1 << 23) };
        assert!(nvic.is_pending(irq));
        nvic.clear_pending(irq);
        assert!(!nvic.is_pending(irq));
    }

    #[test]
    fn relocation_copies_the_table() {
        const FLASH: usize = 0x8000_0000;
        const RAM: usize = 0x0200_0000;

        let bus = FakeBus::new();
        bus.set(SCB_VTOR, FLASH as u32);
        for i in 0..NVECTORS {
            bus.set(FLASH + i * 4, 0x8000_1001 + i as u32);
        }

        let vectors = VectorTable::new(bus.clone());
        assert_eq!(unsafe { vectors.relocate(RAM) }, Ok(true));

        assert_eq!(bus.get(SCB_VTOR), RAM as u32);
        assert_eq!(bus.get(RAM + 4), 0x8000_1002);
        assert_eq!(bus.get(RAM + (NVECTORS - 1) * 4), bus.get(FLASH + (NVECTORS - 1) * 4));

        let nwrites = bus.writes().len();
        assert_eq!(unsafe { vectors.relocate(RAM) }, Ok(false));
        assert_eq!(bus.writes().len(), nwrites);
    }

    #[test]
    fn misaligned_relocation() {
        let vectors = VectorTable::new(FakeBus::new());
        assert_eq!(
            unsafe { vectors.relocate(0x0200_0400) },
            Err(Error::MisalignedTable(0x0200_0400))
        );
    }

    #[test]
    fn ram_vectors_alignment() {
        let vectors = Box::new(RamVectors::new());
        assert_eq!(vectors.addr() % VECTOR_TABLE_ALIGN, 0);
    }

    struct Counter(AtomicU32);

    impl IrqHandler for Counter {
        fn handle_irq(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn trampoline_forwards_to_bound_handler() {
        static COUNTER: Counter = Counter(AtomicU32::new(0));

        let bus = FakeBus::new();
        bus.set(SCB_VTOR, 0x0200_0000);
        let vectors = VectorTable::new(bus.clone());
        let irq = Irq::new(55);

        let trampoline = bind(&COUNTER).unwrap();
        vectors.set_vector(irq, trampoline);
        assert_eq!(vectors.vector(irq), trampoline as usize as u32);
        assert_eq!(bus.get(0x0200_0000 + (16 + 55) * 4), trampoline as usize as u32);

        trampoline();
        trampoline();
        assert_eq!(COUNTER.0.load(Ordering::Relaxed), 2);
    }
}
