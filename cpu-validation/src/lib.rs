//! Single-step validation harness for the host (SH4) and audio (ARM7)
//! interpreters. Test vectors use an `initial`/`final` JSON shape, so
//! externally sourced golden vectors could be dropped in unchanged; unlike
//! bus-cycle-level 8-bit CPUs these interpreters are instruction-level, so
//! there is no per-T-state `cycles` trace to assert against — only the
//! register file and touched RAM bytes before and after.

use dc_core::cpu::state::{Arm7State, CpuStateTrait, Sh4State};
use dc_core::cpu::{Arm7, Sh4};
use dc_core::memmap::{LinearStore, MemoryMap, RegionKind, UnmappedPolicy};
use serde::{Deserialize, Serialize};

/// Build a flat 64 KiB memory map over a single RAM region, a flat-bus
/// single-step sandbox.
pub fn flat_memory_map() -> MemoryMap {
    let mut mem = MemoryMap::new(UnmappedPolicy::Fatal);
    mem.add_region(
        0,
        0xffff,
        0xffff_ffff,
        0xffff,
        RegionKind::Ram,
        LinearStore::new("test ram", 0x1_0000, false),
    );
    mem
}

// --- SH4 JSON test vector types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sh4TestCase {
    pub name: String,
    pub initial: Sh4CpuState,
    #[serde(rename = "final")]
    pub final_state: Sh4CpuState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sh4CpuState {
    pub r: [u32; 16],
    pub pc: u32,
    pub pr: u32,
    pub sr: u32,
    pub gbr: u32,
    pub vbr: u32,
    pub mach: u32,
    pub macl: u32,
    pub ram: Vec<(u32, u8)>,
}

impl Sh4CpuState {
    pub fn apply_to(&self, cpu: &mut Sh4) {
        cpu.r = self.r;
        cpu.pc = self.pc;
        cpu.pr = self.pr;
        cpu.sr = self.sr;
        cpu.gbr = self.gbr;
        cpu.vbr = self.vbr;
        cpu.mach = self.mach;
        cpu.macl = self.macl;
    }

    pub fn matches(&self, snapshot: &Sh4State) -> bool {
        snapshot.r == self.r
            && snapshot.pc == self.pc
            && snapshot.pr == self.pr
            && snapshot.sr == self.sr
            && snapshot.gbr == self.gbr
            && snapshot.vbr == self.vbr
            && snapshot.mach == self.mach
            && snapshot.macl == self.macl
    }
}

// --- ARM7 JSON test vector types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm7TestCase {
    pub name: String,
    pub initial: Arm7CpuState,
    #[serde(rename = "final")]
    pub final_state: Arm7CpuState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm7CpuState {
    pub r: [u32; 16],
    pub cpsr: u32,
    pub ram: Vec<(u32, u8)>,
}

impl Arm7CpuState {
    pub fn apply_to(&self, cpu: &mut Arm7) {
        cpu.r = self.r;
        cpu.cpsr = self.cpsr;
        cpu.enable();
    }

    pub fn matches(&self, snapshot: &Arm7State) -> bool {
        snapshot.r == self.r && snapshot.cpsr == self.cpsr
    }
}

/// Run one host-CPU instruction against a freshly built memory map seeded
/// from `tc.initial`, returning the resulting snapshot and the memory map
/// for byte-level RAM assertions against `tc.final_state.ram`.
pub fn run_sh4_single_step(tc: &Sh4TestCase) -> (Sh4State, MemoryMap) {
    let mut mem = flat_memory_map();
    for &(addr, val) in &tc.initial.ram {
        mem.write8(addr, val).expect("seeding test RAM");
    }

    let mut cpu = Sh4::new();
    tc.initial.apply_to(&mut cpu);

    cpu.do_exec_inst(&mut mem)
        .unwrap_or_else(|e| panic!("{}: instruction faulted: {e}", tc.name));

    (cpu.snapshot(), mem)
}

/// Same as [`run_sh4_single_step`] for the audio CPU. ARM7's two-stage
/// pipeline needs filling before the instruction under test actually
/// retires, so this ticks three times: fill, fill, retire.
pub fn run_arm7_single_step(tc: &Arm7TestCase) -> (Arm7State, MemoryMap) {
    let mut mem = flat_memory_map();
    for &(addr, val) in &tc.initial.ram {
        mem.write8(addr, val).expect("seeding test RAM");
    }

    let mut cpu = Arm7::new();
    tc.initial.apply_to(&mut cpu);

    for _ in 0..3 {
        cpu.tick(&mut mem)
            .unwrap_or_else(|e| panic!("{}: instruction faulted: {e}", tc.name));
    }

    (cpu.snapshot(), mem)
}
