use kestrel_core::MemOrdering;
use pretty_assertions::assert_eq;

use super::*;
use crate::VerificationError;

// SOFT ERRORS (WARN-ONCE)
// ------------------------------------------------------------------------------------------------

#[test]
fn concurrent_plain_accesses_warn_once_and_continue() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, MemOrdering::NotAtomic)],
        vec![load(1, x, MemOrdering::NotAtomic)],
    ];
    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok(), "plain races warn, they do not halt");
    assert!(result.warnings.contains(&VerificationError::RaceNotAtomic));
    // Both rf choices for the read are still explored.
    assert_eq!(result.explored, 2);
}

#[test]
fn unordered_writes_warn_about_ww_races() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 1, arg: 1 },
        ],
        vec![store(x, 7, MemOrdering::Relaxed)],
    ];
    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok());
    assert!(result.warnings.contains(&VerificationError::WWRace));
    assert_eq!(result.explored, 2, "both coherence orders are explored");
}

#[test]
fn leaked_allocation_warns_when_opted_in() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![Inst::Malloc { reg: 1, size: 8 }]];
    let result = run(
        prog,
        VerificationOptions::new(MemoryModel::Rc11).with_unfreed_memory_warnings(true),
    );
    assert!(result.is_ok());
    assert!(result.warnings.contains(&VerificationError::UnfreedMemory));
}

#[test]
fn freed_allocation_does_not_warn() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![Inst::Malloc { reg: 1, size: 8 }, Inst::Free { reg: 1 }]];
    let result = run(
        prog,
        VerificationOptions::new(MemoryModel::Rc11).with_unfreed_memory_warnings(true),
    );
    assert!(result.is_ok());
    assert!(result.warnings.is_empty());
}

#[test]
fn disabling_race_detection_suppresses_the_warning() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, MemOrdering::NotAtomic)],
        vec![load(1, x, MemOrdering::NotAtomic)],
    ];
    let result = run(
        prog,
        VerificationOptions::new(MemoryModel::Rc11).with_race_detection(false),
    );
    assert!(result.is_ok());
    assert!(result.warnings.is_empty());
}

// HARD ERRORS
// ------------------------------------------------------------------------------------------------

#[test]
fn reading_uninitialized_heap_memory_halts() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![
        Inst::Malloc { reg: 1, size: 8 },
        Inst::Load { reg: 2, addr: AddrRef::Reg(1), ord: MemOrdering::Relaxed },
    ]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert_eq!(result.status, Some(VerificationError::UninitializedMem));
}

#[test]
fn accessing_freed_memory_halts() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![
        Inst::Malloc { reg: 1, size: 8 },
        Inst::Store { addr: AddrRef::Reg(1), val: Operand::Const(1), ord: MemOrdering::Relaxed },
        Inst::Free { reg: 1 },
        Inst::Load { reg: 2, addr: AddrRef::Reg(1), ord: MemOrdering::Relaxed },
    ]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert_eq!(result.status, Some(VerificationError::AccessFreed));
}

#[test]
fn accessing_unallocated_memory_halts() {
    let mut prog = Prog::default();
    prog.add_static(0, 0);
    let bogus = kestrel_core::SAddr::new_heap(0, 4096);
    prog.funs = vec![vec![load(1, bogus, MemOrdering::Relaxed)]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert_eq!(result.status, Some(VerificationError::AccessNonMalloc));
}

#[test]
fn unlocking_an_unheld_mutex_halts() {
    let mut prog = Prog::default();
    let lock = prog.add_static(0, 0);
    prog.funs = vec![vec![Inst::Unlock(lock)]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert_eq!(result.status, Some(VerificationError::InvalidUnlock));
}

#[test]
fn joining_the_calling_thread_halts() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![Inst::Join { reg: 1, tid: Operand::Const(0) }]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert!(matches!(result.status, Some(VerificationError::InvalidJoin(_))));
}

#[test]
fn hard_errors_preserve_a_report() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![
        Inst::Malloc { reg: 1, size: 8 },
        Inst::Load { reg: 2, addr: AddrRef::Reg(1), ord: MemOrdering::Relaxed },
    ]];
    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.message.contains("Error"));
    assert!(result.message.contains("uninitialized"));
}
