//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::interrupt::{NVIC_ICER_BASE, NVIC_ICPR_BASE, NVIC_ISER_BASE, NVIC_ISPR_BASE};
use crate::mmio::Mmio;
use crate::mpu::{MPU_RBAR, MPU_RLAR, MPU_RNR, MPU_TYPE};

/// Number of NVIC set/clear register words.
const NVIC_WORDS: usize = 16;

/// Write hook. Receives the register file and the written value.
type Hook = Box<dyn Fn(&mut HashMap<usize, u32>, u32) + Send>;

#[derive(Default)]
struct State {
    regs: HashMap<usize, u32>,
    banks: HashMap<u32, (u32, u32)>,
    stuck_regions: Vec<u32>,
    enabled: [u32; NVIC_WORDS],
    pending: [u32; NVIC_WORDS],
    hooks: Vec<(usize, Hook)>,
    log: Vec<(usize, u32)>,
}

/// Fake register file.
///
/// Plain registers behave like memory. On top of that it models the MPU
/// region registers banked by `MPU_RNR` and the write-one-to-set/clear
/// semantics of the NVIC.
#[derive(Clone, Default)]
pub struct FakeBus(Arc<Mutex<State>>);

impl FakeBus {
    /// Returns a bus with an MPU implementing 16 regions.
    pub fn new() -> FakeBus {
        let bus = FakeBus::default();
        bus.set(MPU_TYPE, 16 << 8);
        bus
    }

    /// Sets the value of a register without logging the access.
    pub fn set(&self, addr: usize, val: u32) {
        self.0.lock().unwrap().regs.insert(addr, val);
    }

    /// Returns the value of a register without logging the access.
    pub fn get(&self, addr: usize) -> u32 {
        *self.0.lock().unwrap().regs.get(&addr).unwrap_or(&0)
    }

    /// Registers a hook run after every write to `addr`.
    pub fn on_write<F>(&self, addr: usize, hook: F)
    where
        F: Fn(&mut HashMap<usize, u32>, u32) + Send + 'static,
    {
        self.0.lock().unwrap().hooks.push((addr, Box::new(hook)));
    }

    /// Makes writes to the given MPU region number ineffective.
    pub fn stick_region(&self, rnr: u32) {
        self.0.lock().unwrap().stuck_regions.push(rnr);
    }

    /// Returns every write performed through [`Mmio::write32`].
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.0.lock().unwrap().log.clone()
    }

    /// Returns the position of the first write to `addr` in the write log.
    pub fn first_write(&self, addr: usize) -> Option<usize> {
        self.writes().iter().position(|&(a, _)| a == addr)
    }

    /// Returns the position of the last write to `addr` in the write log.
    pub fn last_write(&self, addr: usize) -> Option<usize> {
        self.writes().iter().rposition(|&(a, _)| a == addr)
    }

    /// Returns true if the NVIC line is enabled.
    pub fn irq_enabled(&self, irq: u32) -> bool {
        let state = self.0.lock().unwrap();
        state.enabled[(irq / 32) as usize] & (1 << (irq % 32)) != 0
    }
}

fn nvic_word(addr: usize, base: usize) -> Option<usize> {
    if (base..base + NVIC_WORDS * 4).contains(&addr) {
        Some((addr - base) / 4)
    } else {
        None
    }
}

impl Mmio for FakeBus {
    unsafe fn read32(&self, addr: usize) -> u32 {
        let state = self.0.lock().unwrap();
        if let Some(n) = nvic_word(addr, NVIC_ISER_BASE).or(nvic_word(addr, NVIC_ICER_BASE)) {
            return state.enabled[n];
        }
        if let Some(n) = nvic_word(addr, NVIC_ISPR_BASE).or(nvic_word(addr, NVIC_ICPR_BASE)) {
            return state.pending[n];
        }
        if addr == MPU_RBAR || addr == MPU_RLAR {
            let rnr = *state.regs.get(&MPU_RNR).unwrap_or(&0);
            let (rbar, rlar) = *state.banks.get(&rnr).unwrap_or(&(0, 0));
            return if addr == MPU_RBAR { rbar } else { rlar };
        }
        *state.regs.get(&addr).unwrap_or(&0)
    }

    unsafe fn write32(&self, addr: usize, val: u32) {
        let mut state = self.0.lock().unwrap();
        state.log.push((addr, val));

        if let Some(n) = nvic_word(addr, NVIC_ISER_BASE) {
            state.enabled[n] |= val;
        } else if let Some(n) = nvic_word(addr, NVIC_ICER_BASE) {
            state.enabled[n] &= !val;
        } else if let Some(n) = nvic_word(addr, NVIC_ISPR_BASE) {
            state.pending[n] |= val;
        } else if let Some(n) = nvic_word(addr, NVIC_ICPR_BASE) {
            state.pending[n] &= !val;
        } else if addr == MPU_RBAR || addr == MPU_RLAR {
            let rnr = *state.regs.get(&MPU_RNR).unwrap_or(&0);
            if !state.stuck_regions.contains(&rnr) {
                let bank = state.banks.entry(rnr).or_insert((0, 0));
                if addr == MPU_RBAR {
                    bank.0 = val;
                } else {
                    bank.1 = val;
                }
            }
        } else {
            state.regs.insert(addr, val);
        }

        let State { regs, hooks, .. } = &mut *state;
        for (hook_addr, hook) in hooks.iter() {
            if *hook_addr == addr {
                hook(regs, val);
            }
        }
    }
}
