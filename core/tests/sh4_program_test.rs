//! Black-box host CPU tests driven only through the public `Sh4`/`MemoryMap`
//! API, exercising short multi-instruction programs rather than single
//! decode units.

mod common;
use common::flat_mem;
use dc_core::cpu::Sh4;

#[test]
fn counts_down_a_register_with_dt_and_bf() {
    let mut mem = flat_mem();
    let mut cpu = Sh4::new();
    cpu.pc = 0x0;
    cpu.r[0] = 3;

    // loop: DT R0 ; BF loop (no delay slot: BF without .S)
    mem.write16(0x0, 0x4010).unwrap(); // DT R0
    mem.write16(0x2, 0x8bfd).unwrap(); // BF -3 (target = pc_of_bf + 4 - 6 = 0)
    mem.write16(0x4, 0x0009).unwrap(); // NOP, reached once the loop exits

    for _ in 0..16 {
        cpu.do_exec_inst(&mut mem).unwrap();
        if cpu.r[0] == 0 && cpu.pc == 0x4 {
            break;
        }
    }
    assert_eq!(cpu.r[0], 0);
    assert_eq!(cpu.pc, 0x4);
}

#[test]
fn literal_pool_load_then_add() {
    let mut mem = flat_mem();
    let mut cpu = Sh4::new();
    cpu.pc = 0x0;

    // MOV.L @(1,PC),R1  then  ADD R1,R0
    mem.write16(0x0, 0xd101).unwrap(); // MOV.L @(disp,PC),R1 with disp=1
    mem.write16(0x2, 0x301c).unwrap(); // ADD R1,R0
    mem.write32(0x8, 0x0000_2a00).unwrap(); // literal at (pc & ~3) + 1*4 == 0x8

    cpu.r[0] = 2;
    cpu.do_exec_inst(&mut mem).unwrap();
    assert_eq!(cpu.r[1], 0x0000_2a00);
    cpu.do_exec_inst(&mut mem).unwrap();
    assert_eq!(cpu.r[0], 0x0000_2a02);
}
