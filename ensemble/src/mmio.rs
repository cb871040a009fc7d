//! Memory mapped I/O operations.
//!
//! Drivers never dereference register addresses directly. They go through
//! an [`Mmio`] implementation, which is [`Volatile`] on the target and a fake
//! register file in host tests.
//!
//! For more information about the System Control Space registers, please see
//! [Armv8-M Architecture Reference Manual].
//!
//! [Armv8-M Architecture Reference Manual]: https://developer.arm.com/documentation/ddi0553/latest

use core::ptr::{read_volatile, write_volatile};

/// Base address of the System Control Space.
pub const SCS_BASE: usize = 0xe000_e000;

/// 32-bit register access.
pub trait Mmio {
    /// Reads the register at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be a valid, 4-byte aligned register address.
    unsafe fn read32(&self, addr: usize) -> u32;

    /// Writes `val` into the register at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be a valid, 4-byte aligned register address and writing
    /// `val` must not break any invariant the rest of the system relies on.
    unsafe fn write32(&self, addr: usize, val: u32);

    /// Read-modify-write of the register at `addr`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Mmio::read32`] and [`Mmio::write32`].
    unsafe fn modify32<F>(&self, addr: usize, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let val = self.read32(addr);
        self.write32(addr, f(val));
    }

    /// Sets the bits of `mask` in the register at `addr`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Mmio::modify32`].
    unsafe fn set_bits32(&self, addr: usize, mask: u32) {
        self.modify32(addr, |val| val | mask)
    }

    /// Clears the bits of `mask` in the register at `addr`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Mmio::modify32`].
    unsafe fn clear_bits32(&self, addr: usize, mask: u32) {
        self.modify32(addr, |val| val & !mask)
    }
}

/// Volatile access to the physical address space.
#[derive(Debug, Copy, Clone, Default)]
pub struct Volatile;

impl Mmio for Volatile {
    unsafe fn read32(&self, addr: usize) -> u32 {
        read_volatile(addr as *const u32)
    }

    unsafe fn write32(&self, addr: usize, val: u32) {
        write_volatile(addr as *mut u32, val)
    }
}

impl<B: Mmio> Mmio for &B {
    unsafe fn read32(&self, addr: usize) -> u32 {
        (**self).read32(addr)
    }

    unsafe fn write32(&self, addr: usize, val: u32) {
        (**self).write32(addr, val)
    }
}
