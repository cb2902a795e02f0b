//! Register I/O port: the single path for CPU register writes.

use osd_bus::{DmaError, DmaRegion, OsdBus};
use osd_regs::{HwResetReason, RegisterAddress, RegisterWrite};

use crate::backup::BackupStore;

/// Owns the bus and the backup shadow. Every write lands in the shadow as well as in hardware.
#[derive(Debug)]
pub struct RegisterIo<B> {
    bus: B,
    backup: BackupStore,
}

impl<B: OsdBus> RegisterIo<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            backup: BackupStore::new(),
        }
    }

    pub fn read(&mut self, addr: RegisterAddress) -> u32 {
        self.bus.read_reg(addr)
    }

    pub fn write(&mut self, addr: RegisterAddress, value: u32) {
        self.bus.write_reg(addr, value);
        self.backup.update_backup(addr, value);
    }

    pub fn set_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let value = self.read(addr) | mask;
        self.write(addr, value);
    }

    pub fn clr_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let value = self.read(addr) & !mask;
        self.write(addr, value);
    }

    pub fn backup(&self) -> &BackupStore {
        &self.backup
    }

    pub fn backup_mut(&mut self) -> &mut BackupStore {
        &mut self.backup
    }

    pub fn backup_init(&mut self, mask: HwResetReason) -> HwResetReason {
        self.backup.backup_init(mask, &mut self.bus)
    }

    pub fn alloc_coherent(&mut self, size_bytes: usize) -> Result<DmaRegion, DmaError> {
        self.bus.alloc_coherent(size_bytes)
    }

    pub fn free_coherent(&mut self, region: DmaRegion) {
        self.bus.free_coherent(region);
    }

    pub fn write_item(&mut self, paddr: u32, item: RegisterWrite) -> Result<(), DmaError> {
        self.bus.write_physical(paddr, &item.encode_le())
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}
