//! CPU specific operations.
//!
//! On the target these are single instructions. Host builds, which only run
//! the tests, replace barriers with a sequentially consistent fence and hints
//! with a spin-loop hint.

#[cfg(target_arch = "arm")]
use core::arch::asm;

pub mod cache;
pub mod scb;
pub mod time;

/// dsb instruction.
///
/// Data Synchronization Barrier. No instruction after it executes until all
/// explicit memory accesses before it complete.
#[inline(always)]
pub fn dsb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("dsb sy", options(nostack, preserves_flags))
    };
    #[cfg(not(target_arch = "arm"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// isb instruction.
///
/// Instruction Synchronization Barrier. Flushes the pipeline so that the
/// effects of context-changing operations (e.g. MPU or cache configuration)
/// are visible to the following instructions.
#[inline(always)]
pub fn isb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("isb sy", options(nostack, preserves_flags))
    };
    #[cfg(not(target_arch = "arm"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// dmb instruction.
///
/// Data Memory Barrier. Orders explicit memory accesses before and after it.
#[inline(always)]
pub fn dmb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("dmb sy", options(nostack, preserves_flags))
    };
    #[cfg(not(target_arch = "arm"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// wfe instruction.
///
/// Wait For Event is a hint instruction that indicates that the PE can enter a
/// low-power state and remain there until a wakeup event occurs.
#[inline(always)]
pub fn wfe() {
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("wfe", options(nomem, nostack, preserves_flags))
    };
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}

/// wfi instruction.
///
/// Wait For Interrupt is a hint instruction that indicates that the PE can
/// enter a low-power state and remain there until an interrupt occurs.
#[inline(always)]
pub fn wfi() {
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags))
    };
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}

/// Runs `f` with interrupts masked through PRIMASK, restoring the previous
/// mask state afterwards.
pub fn without_interrupts<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(target_arch = "arm")]
    {
        let primask: u32;
        unsafe {
            asm!("mrs {}, PRIMASK", out(reg) primask, options(nomem, nostack, preserves_flags));
            asm!("cpsid i", options(nomem, nostack, preserves_flags));
        }

        let ret = f();

        // Only re-enable if interrupts were enabled on entry.
        if primask & 1 == 0 {
            unsafe { asm!("cpsie i", options(nomem, nostack, preserves_flags)) };
        }
        ret
    }
    #[cfg(not(target_arch = "arm"))]
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_section_runs_once() {
        let mut calls = 0;
        let ret = without_interrupts(|| {
            calls += 1;
            without_interrupts(|| 7) * 6
        });
        assert_eq!(ret, 42);
        assert_eq!(calls, 1);
    }
}
