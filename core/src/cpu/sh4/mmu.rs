//! Minimal software-managed MMU, covering TLB-miss exceptions as part of
//! the guest exception set. Most Dreamcast titles run the host CPU
//! with the MMU off, using the P1/P2 fixed-mapping address windows instead
//! of the UTLB — so this models just enough of a UTLB to raise the miss and
//! protection-violation exceptions a guest that *does* enable it expects,
//! rather than a full associative lookup with replacement policy.

use crate::error::GuestException;

/// One software-managed UTLB entry (a small, linearly-searched subset of
/// the real 64-entry associative array).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbEntry {
    pub virt_page: u32,
    pub phys_page: u32,
    pub asid: u8,
    pub valid: bool,
    pub writable: bool,
    pub shared: bool,
}

pub struct Mmu {
    pub enabled: bool,
    pub asid: u8,
    entries: Vec<TlbEntry>,
}

const PAGE_MASK: u32 = 0xffff_f000;

impl Mmu {
    pub fn new() -> Self {
        Self {
            enabled: false,
            asid: 0,
            entries: Vec::new(),
        }
    }

    pub fn load_entry(&mut self, entry: TlbEntry) {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.virt_page == entry.virt_page && (e.shared || e.asid == entry.asid))
        {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Translate `vaddr` to a physical address, or `Err` with the guest
    /// exception that should be raised (miss vs. protection violation
    /// depend on `write`). Pass-through when the MMU is disabled.
    pub fn translate(&self, vaddr: u32, write: bool) -> Result<u32, GuestException> {
        if !self.enabled {
            return Ok(vaddr);
        }
        let page = vaddr & PAGE_MASK;
        let offset = vaddr & !PAGE_MASK;
        let entry = self.entries.iter().find(|e| {
            e.valid && e.virt_page == page && (e.shared || e.asid == self.asid)
        });
        match entry {
            None if write => Err(GuestException::TlbMissWrite { addr: vaddr }),
            None => Err(GuestException::TlbMissRead { addr: vaddr }),
            Some(e) if write && !e.writable => {
                Err(GuestException::TlbProtectionWrite { addr: vaddr })
            }
            Some(e) => Ok(e.phys_page | offset),
        }
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mmu_passes_through() {
        let mmu = Mmu::new();
        assert_eq!(mmu.translate(0x1234_5678, false).unwrap(), 0x1234_5678);
    }

    #[test]
    fn miss_on_unmapped_page() {
        let mut mmu = Mmu::new();
        mmu.enabled = true;
        assert_eq!(
            mmu.translate(0x8000_0000, false).unwrap_err(),
            GuestException::TlbMissRead { addr: 0x8000_0000 }
        );
    }

    #[test]
    fn write_to_read_only_page_is_protection_violation() {
        let mut mmu = Mmu::new();
        mmu.enabled = true;
        mmu.load_entry(TlbEntry {
            virt_page: 0x8000_0000,
            phys_page: 0x0c00_0000,
            asid: 0,
            valid: true,
            writable: false,
            shared: false,
        });
        assert_eq!(
            mmu.translate(0x8000_0004, true).unwrap_err(),
            GuestException::TlbProtectionWrite { addr: 0x8000_0004 }
        );
        assert_eq!(mmu.translate(0x8000_0004, false).unwrap(), 0x0c00_0004);
    }
}
