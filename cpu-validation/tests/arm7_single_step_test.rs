//! Single-step validation for the audio CPU, hand-authored the same way
//! as [`dc_cpu_validation::run_sh4_single_step`]'s vectors — no external
//! golden-vector corpus exists for this ISA subset, so cases are written
//! directly against the harness an externally sourced vector file would
//! also run through.

use dc_cpu_validation::{run_arm7_single_step, Arm7CpuState, Arm7TestCase};

fn base_state() -> Arm7CpuState {
    Arm7CpuState {
        r: [0; 16],
        cpsr: 0,
        ram: Vec::new(),
    }
}

#[test]
fn mov_immediate_al_condition_always_executes() {
    let mut initial = base_state();
    initial.r[15] = 0x00;
    // MOV R2, #0x55 (cond=AL, I=1, opcode=MOV): 0xE3A02055, little-endian bytes.
    let inst: u32 = 0xE3A0_2055;
    initial.ram = inst
        .to_le_bytes()
        .iter()
        .enumerate()
        .map(|(i, &b)| (i as u32, b))
        .collect();

    // The harness ticks three times (fill, fill, retire) and every tick
    // advances r15 by 4 regardless of pipeline stage, so r15 lands at
    // 0x0c rather than the 0x04 a single real fetch would imply.
    let mut expected = initial.clone();
    expected.r[2] = 0x55;
    expected.r[15] = 0x0c;

    let tc = Arm7TestCase {
        name: "mov_immediate_al_condition_always_executes".into(),
        initial,
        final_state: expected.clone(),
    };

    let (snapshot, _mem) = run_arm7_single_step(&tc);
    assert_eq!(snapshot.r[2], expected.r[2]);
    assert_eq!(snapshot.r[15], expected.r[15]);
}
