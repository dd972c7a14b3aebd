//! Simulated register space for host tests

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::register::Bus;
use crate::sysctl;

/// A flat word-addressed memory that records every load and store
///
/// Unwritten words read as zero. Write-one-to-clear stores behave like the
/// hardware: the ones in the mask clear the stored bits.
#[derive(Default)]
pub(crate) struct SimBus {
    words: RefCell<BTreeMap<u32, u32>>,
    stores: RefCell<Vec<(u32, u32)>>,
    loads: RefCell<Vec<u32>>,
}

impl SimBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A part whose peripherals all report ready and whose PLL locks at once
    pub(crate) fn powered() -> Self {
        let bus = Self::new();
        for pr in sysctl::READY_REGISTERS {
            bus.preset(pr, u32::MAX);
        }
        bus.preset(sysctl::RIS_ADDRESS, 1 << 6);
        bus
    }

    /// Sets a word without recording a store
    pub(crate) fn preset(&self, address: u32, value: u32) {
        self.words.borrow_mut().insert(address, value);
    }

    /// Reads a word without going through the bus
    pub(crate) fn peek(&self, address: u32) -> u32 {
        self.words.borrow().get(&address).copied().unwrap_or(0)
    }

    pub(crate) fn stores(&self) -> Vec<(u32, u32)> {
        self.stores.borrow().clone()
    }

    pub(crate) fn store_count(&self) -> usize {
        self.stores.borrow().len()
    }

    /// Number of stores that went to `address`
    pub(crate) fn stores_to(&self, address: u32) -> usize {
        self.stores
            .borrow()
            .iter()
            .filter(|(a, _)| *a == address)
            .count()
    }

    /// Number of loads from `address`
    pub(crate) fn loads_from(&self, address: u32) -> usize {
        self.loads.borrow().iter().filter(|a| **a == address).count()
    }

    /// Forgets the recorded accesses, keeping the memory contents
    pub(crate) fn reset_log(&self) {
        self.stores.borrow_mut().clear();
        self.loads.borrow_mut().clear();
    }
}

impl Bus for SimBus {
    fn load(&self, address: u32) -> u32 {
        self.loads.borrow_mut().push(address);
        self.peek(address)
    }

    fn store(&self, address: u32, value: u32) {
        self.stores.borrow_mut().push((address, value));
        self.words.borrow_mut().insert(address, value);
    }

    fn clear_bits(&self, address: u32, mask: u32) {
        self.stores.borrow_mut().push((address, mask));
        let old = self.peek(address);
        self.words.borrow_mut().insert(address, old & !mask);
    }
}
