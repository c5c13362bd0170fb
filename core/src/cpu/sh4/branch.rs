//! Branch instructions and delayed-branch semantics. Delayed branches arm
//! `delayed_branch_addr` and let
//! `Sh4::do_exec_inst` commit the PC update after the delay slot retires;
//! non-delayed conditional branches (BT/BF without the `.S` suffix) take
//! effect immediately since SH4 defines them as not having a delay slot.

use super::{sr_bits, Sh4};
use crate::error::CoreResult;
use crate::memmap::MemoryMap;

fn arm_delayed_branch(cpu: &mut Sh4, target: u32) {
    cpu.delayed_branch = true;
    cpu.delayed_branch_addr = target;
}

pub(super) fn bra(cpu: &mut Sh4, disp12: i32) -> CoreResult<u32> {
    let target = (cpu.pc as i32).wrapping_add(disp12 * 2).wrapping_add(2) as u32;
    arm_delayed_branch(cpu, target);
    Ok(2)
}

pub(super) fn bsr(cpu: &mut Sh4, disp12: i32) -> CoreResult<u32> {
    cpu.pr = cpu.pc.wrapping_add(2);
    let target = (cpu.pc as i32).wrapping_add(disp12 * 2).wrapping_add(2) as u32;
    arm_delayed_branch(cpu, target);
    Ok(2)
}

pub(super) fn jmp(cpu: &mut Sh4, rn: usize) -> CoreResult<u32> {
    arm_delayed_branch(cpu, cpu.r[rn]);
    Ok(2)
}

pub(super) fn jsr(cpu: &mut Sh4, rn: usize) -> CoreResult<u32> {
    cpu.pr = cpu.pc.wrapping_add(2);
    arm_delayed_branch(cpu, cpu.r[rn]);
    Ok(2)
}

pub(super) fn rts(cpu: &mut Sh4) -> CoreResult<u32> {
    arm_delayed_branch(cpu, cpu.pr);
    Ok(2)
}

pub(super) fn rte(cpu: &mut Sh4) -> CoreResult<u32> {
    let target = cpu.spc;
    let restored_sr = cpu.ssr;
    arm_delayed_branch(cpu, target);
    cpu.set_sr_for_rte(restored_sr);
    Ok(4)
}

/// BT/BF without delay slot: branch taken or not immediately, no pipeline
/// effect. `slot` selects the `.S` (delayed) forms.
pub(super) fn bt(cpu: &mut Sh4, _mem: &mut MemoryMap, disp8: i32, slot: bool) -> CoreResult<u32> {
    if cpu.sr & sr_bits::T != 0 {
        let target = (cpu.pc as i32).wrapping_add(disp8 * 2).wrapping_add(2) as u32;
        if slot {
            arm_delayed_branch(cpu, target);
        } else {
            cpu.pc = target;
        }
        Ok(3)
    } else {
        Ok(1)
    }
}

pub(super) fn bf(cpu: &mut Sh4, _mem: &mut MemoryMap, disp8: i32, slot: bool) -> CoreResult<u32> {
    if cpu.sr & sr_bits::T == 0 {
        let target = (cpu.pc as i32).wrapping_add(disp8 * 2).wrapping_add(2) as u32;
        if slot {
            arm_delayed_branch(cpu, target);
        } else {
            cpu.pc = target;
        }
        Ok(3)
    } else {
        Ok(1)
    }
}

impl Sh4 {
    /// RTE's SR restore happens as part of the instruction, but the bank
    /// swap side effect must still go through `set_sr` so R0-R7 stay
    /// consistent.
    pub(crate) fn set_sr_for_rte(&mut self, restored: u32) {
        self.set_sr(restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::{LinearStore, MemoryMap, RegionKind, UnmappedPolicy};

    fn flat_mem() -> MemoryMap {
        let mut mem = MemoryMap::new(UnmappedPolicy::Fatal);
        mem.add_region(
            0,
            0xffff_ffff,
            0xffff_ffff,
            0xffff_ffff,
            RegionKind::Ram,
            LinearStore::new("flat", 0x10000, false),
        );
        mem
    }

    #[test]
    fn bra_delays_pc_update_until_after_delay_slot() {
        let mut mem = flat_mem();
        let mut cpu = Sh4::new();
        cpu.pc = 0x1000;
        // BRA +0 (branch to pc+4), delay slot is NOP.
        mem.write16(0x1000, 0xa000).unwrap();
        mem.write16(0x1002, 0x0009).unwrap();
        cpu.do_exec_inst(&mut mem).unwrap(); // BRA: pc -> 0x1002, armed
        assert_eq!(cpu.pc, 0x1002);
        cpu.do_exec_inst(&mut mem).unwrap(); // delay slot NOP, commits branch
        assert_eq!(cpu.pc, 0x1004);
    }

    #[test]
    fn bt_without_delay_slot_branches_immediately() {
        let mut mem = flat_mem();
        let mut cpu = Sh4::new();
        cpu.pc = 0x2000;
        cpu.sr |= sr_bits::T;
        // BT +1 (disp8=1 -> target = pc+2+1*2)
        mem.write16(0x2000, 0x8901).unwrap();
        cpu.do_exec_inst(&mut mem).unwrap();
        assert_eq!(cpu.pc, 0x2000 + 2 + 2);
    }
}
