//! System Block (Holly) register bank, interrupt controller, and the two
//! graphics-feeding DMA engines. Register offsets below are
//! relative to the system-block window's base, `0x005f6800`.

pub mod dma;
pub mod intc;

pub use dma::{Ch2DmaDest, Channel2Dma, SortDma};
pub use intc::{ExternalSource, HollyIntc, InterruptClass, NormalSource, Priority};

use crate::error::{CoreError, CoreResult};
use crate::memmap::RegionOps;

const SB_C2DSTAT: u32 = 0x000;
const SB_C2DLEN: u32 = 0x004;
const SB_C2DST: u32 = 0x008;
const SB_SDSTAW: u32 = 0x010;
const SB_SDBAAW: u32 = 0x014;
const SB_SDST: u32 = 0x020;
const SB_LMMODE0: u32 = 0x084;
const SB_LMMODE1: u32 = 0x088;
const SB_ISTNRM: u32 = 0x100;
const SB_ISTEXT: u32 = 0x104;
const SB_ISTERR: u32 = 0x108;
const SB_IML2NRM: u32 = 0x110;
const SB_IML2EXT: u32 = 0x114;
const SB_IML2ERR: u32 = 0x118;
const SB_IML4NRM: u32 = 0x120;
const SB_IML4EXT: u32 = 0x124;
const SB_IML4ERR: u32 = 0x128;
const SB_IML6NRM: u32 = 0x130;
const SB_IML6EXT: u32 = 0x134;
const SB_IML6ERR: u32 = 0x138;

/// A DMA start request latched by a register write, to be actually carried
/// out by the caller that owns main RAM: region ops hold
/// only a typed context pointer, never the backing store itself.
#[derive(Clone, Copy, Debug)]
pub enum DmaRequest {
    Channel2 { src: u32, len: u32, dest: Ch2DmaDest },
    Sort { table_addr: u32 },
}

/// The system block's register file plus its two owned DMA engines and the
/// three-class interrupt controller. Most cells behind `read`/`write` use
/// the generic "warn-on-access" default; the
/// cells enumerated above wire to the specific behavior below.
pub struct Holly {
    pub intc: HollyIntc,
    pub ch2_dma: Channel2Dma,
    pub sort_dma: SortDma,

    regs: [u8; 0x400],
    /// Set by a register write that starts a DMA; drained by the caller
    /// once per timeslice.
    pub pending_dma: Option<DmaRequest>,
}

impl Holly {
    pub fn new() -> Self {
        Self {
            intc: HollyIntc::new(),
            ch2_dma: Channel2Dma::new(),
            sort_dma: SortDma::new(),
            regs: [0; 0x400],
            pending_dma: None,
        }
    }

    fn reg32(&self, off: u32) -> u32 {
        let o = off as usize;
        let b = &self.regs[o..o + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn set_reg32(&mut self, off: u32, val: u32) {
        let o = off as usize;
        self.regs[o..o + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// Called once per timeslice by the owning aggregate after draining
    /// register writes, to clear the DMA-complete status the spec requires
    /// (`SDST` and `SB_C2DST` both read 0 once the transfer completes).
    pub fn clear_dma_start_bit(&mut self, which: DmaEngine) {
        match which {
            DmaEngine::Channel2 => self.set_reg32(SB_C2DST, 0),
            DmaEngine::Sort => self.set_reg32(SB_SDST, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaEngine {
    Channel2,
    Sort,
}

impl Default for Holly {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionOps for Holly {
    fn read8(&mut self, offset: u32) -> CoreResult<u8> {
        let base = offset & !3;
        let shift = (offset & 3) * 8;
        Ok((self.read32(base)? >> shift) as u8)
    }
    fn read16(&mut self, offset: u32) -> CoreResult<u16> {
        let base = offset & !3;
        let shift = (offset & 2) * 8;
        Ok((self.read32(base)? >> shift) as u16)
    }
    fn read32(&mut self, offset: u32) -> CoreResult<u32> {
        let val = match offset {
            SB_ISTNRM => self.intc.pending_normal(),
            SB_ISTEXT => self.intc.pending_external(),
            SB_ISTERR => self.intc.pending_error(),
            _ if (offset as usize) + 4 <= self.regs.len() => self.reg32(offset),
            _ => {
                return Err(CoreError::unimplemented_access(
                    "holly register",
                    offset,
                    4,
                    None,
                ))
            }
        };
        Ok(val)
    }

    fn write8(&mut self, offset: u32, val: u8) -> CoreResult<()> {
        let base = offset & !3;
        let shift = (offset & 3) * 8;
        let mut word = self.read32(base).unwrap_or(0);
        word = (word & !(0xff << shift)) | ((val as u32) << shift);
        self.write32(base, word)
    }
    fn write16(&mut self, offset: u32, val: u16) -> CoreResult<()> {
        let base = offset & !3;
        let shift = (offset & 2) * 8;
        let mut word = self.read32(base).unwrap_or(0);
        word = (word & !(0xffff << shift)) | ((val as u32) << shift);
        self.write32(base, word)
    }
    fn write32(&mut self, offset: u32, val: u32) -> CoreResult<()> {
        match offset {
            SB_ISTNRM => {
                // ISTNRM is write-to-clear: writing a 1 bit clears that
                // pending bit, matching the real Holly semantics.
                self.intc.set_pending_normal(self.intc.pending_normal() & !val);
            }
            SB_ISTEXT => self.intc.set_pending_external(self.intc.pending_external() & !val),
            SB_ISTERR => self.intc.set_pending_error(self.intc.pending_error() & !val),
            SB_IML2NRM => self.intc.set_mask(Priority::Low, InterruptClass::Normal, val),
            SB_IML2EXT => self.intc.set_mask(Priority::Low, InterruptClass::External, val),
            SB_IML2ERR => self.intc.set_mask(Priority::Low, InterruptClass::Error, val),
            SB_IML4NRM => self.intc.set_mask(Priority::Mid, InterruptClass::Normal, val),
            SB_IML4EXT => self.intc.set_mask(Priority::Mid, InterruptClass::External, val),
            SB_IML4ERR => self.intc.set_mask(Priority::Mid, InterruptClass::Error, val),
            SB_IML6NRM => self.intc.set_mask(Priority::High, InterruptClass::Normal, val),
            SB_IML6EXT => self.intc.set_mask(Priority::High, InterruptClass::External, val),
            SB_IML6ERR => self.intc.set_mask(Priority::High, InterruptClass::Error, val),
            SB_LMMODE0 => self.ch2_dma.lmmode0 = val & 1 != 0,
            SB_LMMODE1 => self.ch2_dma.lmmode1 = val & 1 != 0,
            SB_C2DST if val & 1 != 0 => {
                self.set_reg32(SB_C2DST, 1);
                self.pending_dma = Some(DmaRequest::Channel2 {
                    src: self.reg32(SB_C2DSTAT),
                    len: self.reg32(SB_C2DLEN),
                    dest: Ch2DmaDest::TaFifoPoly,
                });
            }
            SB_SDST if val & 1 != 0 => {
                self.set_reg32(SB_SDST, 1);
                self.pending_dma = Some(DmaRequest::Sort {
                    table_addr: self.reg32(SB_SDSTAW),
                });
            }
            _ if (offset as usize) + 4 <= self.regs.len() => self.set_reg32(offset, val),
            _ => {
                return Err(CoreError::unimplemented_access(
                    "holly register",
                    offset,
                    4,
                    Some(val as u64),
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c2dst_write_latches_a_dma_request() {
        let mut holly = Holly::new();
        holly.write32(SB_C2DSTAT, 0x1000).unwrap();
        holly.write32(SB_C2DLEN, 0x40).unwrap();
        holly.write32(SB_C2DST, 1).unwrap();
        assert!(matches!(
            holly.pending_dma,
            Some(DmaRequest::Channel2 { src: 0x1000, len: 0x40, .. })
        ));
    }

    #[test]
    fn sdst_reads_zero_after_clear() {
        let mut holly = Holly::new();
        holly.write32(SB_SDSTAW, 0x2000).unwrap();
        holly.write32(SB_SDST, 1).unwrap();
        assert_eq!(holly.read32(SB_SDST).unwrap(), 1);
        holly.clear_dma_start_bit(DmaEngine::Sort);
        assert_eq!(holly.read32(SB_SDST).unwrap(), 0);
    }

    #[test]
    fn istnrm_write_clears_matching_pending_bits() {
        let mut holly = Holly::new();
        holly.intc.raise_normal(NormalSource::GdromDmaComplete);
        assert_ne!(holly.intc.pending_normal(), 0);
        holly.write32(SB_ISTNRM, 1 << (NormalSource::GdromDmaComplete as u32)).unwrap();
        assert_eq!(holly.intc.pending_normal(), 0);
    }
}
