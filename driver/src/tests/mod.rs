//! End-to-end scenarios: mini-IR programs driven through the full exploration engine.

use std::sync::Arc;

use kestrel_core::{MemOrdering, RmwBinOp, SAddr};

use crate::{
    MemoryModel, VerificationOptions, VerificationResult, explore,
    test_utils::{AddrRef, Cond, Inst, MiniInterp, Operand, Prog},
};

mod diagnostics;
mod litmus;

// HARNESS HELPERS
// ------------------------------------------------------------------------------------------------

/// Runs `prog` to exhaustion under `opts` and returns the result.
fn run(prog: Prog, opts: VerificationOptions) -> VerificationResult {
    let prog = Arc::new(prog);
    let mut interp = MiniInterp::new(Arc::clone(&prog));
    explore::verify(opts, prog, &mut interp).expect("valid options")
}

fn run_under(prog: Prog, model: MemoryModel) -> VerificationResult {
    run(prog, VerificationOptions::new(model))
}

/// Shorthand for a static-location load into a register.
fn load(reg: usize, addr: SAddr, ord: MemOrdering) -> Inst {
    Inst::Load { reg, addr: AddrRef::Static(addr), ord }
}

/// Shorthand for a constant store to a static location.
fn store(addr: SAddr, val: u64, ord: MemOrdering) -> Inst {
    Inst::Store { addr: AddrRef::Static(addr), val: Operand::Const(val), ord }
}

fn fai(reg: usize, addr: SAddr, ord: MemOrdering) -> Inst {
    Inst::Fai { reg, addr, op: RmwBinOp::Add, operand: 1, ord }
}

/// Spawns `n` copies of function 1 from main and joins them all.
fn spawn_and_join_n(n: usize) -> Vec<Inst> {
    let mut main = Vec::new();
    for i in 0..n {
        main.push(Inst::Spawn { reg: i + 1, fun: 1, arg: 0 });
    }
    for i in 0..n {
        main.push(Inst::Join { reg: 7, tid: Operand::Reg(i + 1) });
    }
    main
}

fn assert_reg_eq(reg: usize, val: u64) -> Inst {
    Inst::Assert(Cond::Eq(Operand::Reg(reg), Operand::Const(val)))
}
