//! Single-step validation against hand-authored vectors in an
//! `initial`/`final` JSON shape. No external golden-vector corpus ships
//! for this ISA (unlike SingleStepTests-backed harnesses for 8-bit CPUs),
//! so these cases are written out directly; the harness functions are
//! exactly the ones an externally sourced vector file would be run through.

use dc_cpu_validation::{run_sh4_single_step, Sh4CpuState, Sh4TestCase};

fn base_state() -> Sh4CpuState {
    Sh4CpuState {
        r: [0; 16],
        pc: 0,
        pr: 0,
        sr: 0,
        gbr: 0,
        vbr: 0,
        mach: 0,
        macl: 0,
        ram: Vec::new(),
    }
}

#[test]
fn add_immediate_to_r0() {
    let mut initial = base_state();
    initial.r[0] = 5;
    initial.ram = vec![(0x00, 0x05), (0x01, 0x70)]; // ADD #5,R0 (little-endian 0x7005)

    let mut expected = initial.clone();
    expected.r[0] = 10;
    expected.pc = 2;

    let tc = Sh4TestCase {
        name: "add_immediate_to_r0".into(),
        initial,
        final_state: expected.clone(),
    };

    let (snapshot, _mem) = run_sh4_single_step(&tc);
    assert!(expected.matches(&snapshot));
}

#[test]
fn mov_immediate_sign_extends_into_r3() {
    let mut initial = base_state();
    // MOV #-1,R3 -> 0xe3ff
    initial.ram = vec![(0x00, 0xff), (0x01, 0xe3)];

    let mut expected = initial.clone();
    expected.r[3] = 0xffff_ffff;
    expected.pc = 2;

    let tc = Sh4TestCase {
        name: "mov_immediate_sign_extends_into_r3".into(),
        initial,
        final_state: expected.clone(),
    };

    let (snapshot, _mem) = run_sh4_single_step(&tc);
    assert!(expected.matches(&snapshot));
}
