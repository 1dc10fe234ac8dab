use std::sync::Arc;

use kestrel_core::MemOrdering;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::{SchedulePolicy, VerificationError, explore::verify_parallel};

// BOUNDARY BEHAVIORS
// ------------------------------------------------------------------------------------------------

#[test]
fn empty_program_explores_exactly_once() {
    let prog = Prog::new(vec![vec![]]);
    let result = run_under(prog, MemoryModel::Sc);
    assert!(result.is_ok());
    assert_eq!(result.explored, 1);
    assert_eq!(result.explored_blocked, 0);
}

#[test]
fn disjoint_stores_have_one_execution() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let y = prog.add_static(8, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, MemOrdering::SeqCst)],
        vec![store(y, 1, MemOrdering::SeqCst)],
    ];
    let result = run_under(prog, MemoryModel::Sc);
    assert!(result.is_ok());
    assert_eq!(result.explored, 1);
}

/// Scenario: `t1: store(x,1)  t2: r = load(x)` — the read observes either the store or the
/// initial value.
#[test]
fn store_versus_load_has_two_executions() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, MemOrdering::SeqCst)],
        vec![load(1, x, MemOrdering::SeqCst)],
    ];
    let result = run_under(prog, MemoryModel::Sc);
    assert!(result.is_ok());
    assert_eq!(result.explored, 2);
}

/// Two writers and a reader that joins them first: the read has no choice left, but coherence
/// still has two linear extensions.
#[test]
fn two_writers_give_two_coherence_extensions() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let mut main = spawn_and_join_n(2);
    main.push(load(1, x, MemOrdering::SeqCst));
    prog.funs = vec![main, vec![store(x, 1, MemOrdering::SeqCst)]];
    // Both spawned threads run the same function; with symmetry reduction off, both
    // coherence orders are distinct executions.
    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok());
    assert_eq!(result.explored, 2);
}

// MESSAGE PASSING
// ------------------------------------------------------------------------------------------------

fn message_passing(ord: MemOrdering) -> Prog {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let y = prog.add_static(8, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, ord), store(y, 1, ord)],
        vec![
            load(1, y, ord),
            load(2, x, ord),
            // assert(!(r1 == 1 && r2 == 0))
            Inst::Assert(Cond::Not(Box::new(Cond::And(
                Box::new(Cond::Eq(Operand::Reg(1), Operand::Const(1))),
                Box::new(Cond::Eq(Operand::Reg(2), Operand::Const(0))),
            )))),
        ],
    ];
    prog
}

#[rstest]
#[case::sc(MemoryModel::Sc, MemOrdering::SeqCst)]
#[case::ra(MemoryModel::Ra, MemOrdering::Relaxed)]
#[case::rc11_rel_acq(MemoryModel::Rc11, MemOrdering::AcqRel)]
fn message_passing_holds_under_synchronizing_models(
    #[case] model: MemoryModel,
    #[case] ord: MemOrdering,
) {
    let result = run_under(message_passing(ord), model);
    assert!(result.is_ok(), "assertion must not fire: {:?}", result.status);
    assert_eq!(result.explored, 3);
}

#[test]
fn message_passing_fails_under_relaxed_rc11() {
    let result = run_under(message_passing(MemOrdering::Relaxed), MemoryModel::Rc11);
    assert!(matches!(result.status, Some(VerificationError::Assertion(_))));
}

// STORE BUFFERING
// ------------------------------------------------------------------------------------------------

fn store_buffering(ord: MemOrdering) -> Prog {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let y = prog.add_static(8, 0);
    prog.funs = vec![
        vec![
            Inst::Spawn { reg: 1, fun: 1, arg: 0 },
            Inst::Spawn { reg: 2, fun: 2, arg: 0 },
        ],
        vec![store(x, 1, ord), load(1, y, ord)],
        vec![store(y, 1, ord), load(1, x, ord)],
    ];
    prog
}

#[test]
fn store_buffering_has_three_executions_under_sc() {
    let result = run_under(store_buffering(MemOrdering::SeqCst), MemoryModel::Sc);
    assert!(result.is_ok());
    assert_eq!(result.explored, 3, "the both-read-zero outcome is not sequentially consistent");
}

#[test]
fn store_buffering_has_four_executions_under_relaxed_rc11() {
    let result = run_under(store_buffering(MemOrdering::Relaxed), MemoryModel::Rc11);
    assert!(result.is_ok());
    assert_eq!(result.explored, 4);
}

// RMW CONTENTION
// ------------------------------------------------------------------------------------------------

/// N threads incrementing from 0: one execution per serialization, all summing to N.
#[rstest]
#[case::two(2, 2)]
#[case::three(3, 6)]
fn fai_contention_explores_every_serialization(#[case] n: usize, #[case] factorial: u64) {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let mut main = spawn_and_join_n(n);
    main.push(load(1, x, MemOrdering::SeqCst));
    main.push(assert_reg_eq(1, n as u64));
    prog.funs = vec![main, vec![fai(1, x, MemOrdering::SeqCst)]];

    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok(), "counter must always reach {n}: {:?}", result.status);
    assert_eq!(result.explored, factorial);
}

#[test]
fn cas_contention_has_one_winner_per_execution() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let mut main = spawn_and_join_n(2);
    main.push(load(1, x, MemOrdering::SeqCst));
    main.push(assert_reg_eq(1, 1));
    prog.funs = vec![
        main,
        vec![Inst::Cas { reg: 1, addr: x, expected: 0, new_val: 1, ord: MemOrdering::SeqCst }],
    ];

    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok(), "exactly one CAS wins: {:?}", result.status);
    assert_eq!(result.explored, 2);
}

// LOCKS
// ------------------------------------------------------------------------------------------------

#[test]
fn lock_protected_increments_have_two_executions_and_no_races() {
    let mut prog = Prog::default();
    let lock = prog.add_static(0, 0);
    let x = prog.add_static(8, 0);
    let mut main = spawn_and_join_n(2);
    main.push(load(1, x, MemOrdering::SeqCst));
    main.push(assert_reg_eq(1, 2));
    prog.funs = vec![
        main,
        vec![
            Inst::Lock(lock),
            load(1, x, MemOrdering::NotAtomic),
            Inst::Add { dst: 2, a: Operand::Reg(1), b: Operand::Const(1) },
            Inst::Store {
                addr: AddrRef::Static(x),
                val: Operand::Reg(2),
                ord: MemOrdering::NotAtomic,
            },
            Inst::Unlock(lock),
        ],
    ];

    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok(), "lock discipline keeps the counter exact: {:?}", result.status);
    assert_eq!(result.explored, 2, "one execution per lock-acquisition order");
    assert!(result.warnings.is_empty(), "no races under proper locking");
}

// BARRIERS
// ------------------------------------------------------------------------------------------------

#[test]
fn barrier_round_passes_all_threads_in_one_execution() {
    let mut prog = Prog::default();
    let b = prog.add_static(0, 3);
    let main = spawn_and_join_n(3);
    prog.funs = vec![
        main,
        vec![Inst::BarrierArrive(b), Inst::BarrierWait(b)],
    ];

    let result = run_under(prog, MemoryModel::Rc11);
    assert!(result.is_ok(), "all threads pass the barrier: {:?}", result.status);
    assert_eq!(result.explored, 1, "barrier-aware mode prunes intra-round revisits");
    assert_eq!(result.explored_blocked, 0);
}

// SYMMETRY REDUCTION
// ------------------------------------------------------------------------------------------------

#[test]
fn symmetry_reduction_prunes_isomorphic_serializations() {
    let build = || {
        let mut prog = Prog::default();
        let x = prog.add_static(0, 0);
        prog.funs = vec![spawn_and_join_n(2), vec![fai(1, x, MemOrdering::SeqCst)]];
        prog
    };

    let plain = run(build(), VerificationOptions::new(MemoryModel::Rc11));
    let reduced = run(
        build(),
        VerificationOptions::new(MemoryModel::Rc11).with_symmetry_reduction(true),
    );
    assert_eq!(plain.explored, 2);
    assert_eq!(reduced.explored, 1, "the two serializations are isomorphic");
}

// BLOCKED EXECUTIONS
// ------------------------------------------------------------------------------------------------

#[test]
fn failed_assume_blocks_the_execution() {
    let mut prog = Prog::default();
    prog.funs = vec![vec![Inst::Assume(Cond::Eq(Operand::Const(0), Operand::Const(1)))]];
    let result = run_under(prog, MemoryModel::Sc);
    assert!(result.is_ok());
    assert_eq!(result.explored, 0);
    assert_eq!(result.explored_blocked, 1);
}

// SCHEDULING POLICIES & DETERMINISM
// ------------------------------------------------------------------------------------------------

#[rstest]
#[case::ltr(SchedulePolicy::Ltr)]
#[case::wf(SchedulePolicy::WriteFirst)]
#[case::wfr(SchedulePolicy::WriteFirstRandom)]
#[case::arbitrary(SchedulePolicy::Arbitrary)]
fn execution_count_is_policy_independent(#[case] policy: SchedulePolicy) {
    let result = run(
        store_buffering(MemOrdering::SeqCst),
        VerificationOptions::new(MemoryModel::Sc)
            .with_schedule_policy(policy)
            .with_schedule_seed(12345),
    );
    assert!(result.is_ok());
    assert_eq!(result.explored, 3);
}

#[test]
fn caching_does_not_change_execution_counts() {
    let cached = run(
        store_buffering(MemOrdering::Relaxed),
        VerificationOptions::new(MemoryModel::Rc11).with_instruction_caching(true),
    );
    let uncached = run(
        store_buffering(MemOrdering::Relaxed),
        VerificationOptions::new(MemoryModel::Rc11).with_instruction_caching(false),
    );
    assert_eq!(cached.explored, uncached.explored);
    assert_eq!(cached.explored_blocked, uncached.explored_blocked);
}

// PARALLEL EXPLORATION
// ------------------------------------------------------------------------------------------------

#[test]
fn worker_count_does_not_change_the_execution_set() {
    let mut prog = Prog::default();
    let x = prog.add_static(0, 0);
    let mut main = spawn_and_join_n(3);
    main.push(load(1, x, MemOrdering::SeqCst));
    main.push(assert_reg_eq(1, 3));
    prog.funs = vec![main, vec![fai(1, x, MemOrdering::SeqCst)]];
    let prog = Arc::new(prog);

    let sequential = {
        let prog = Arc::clone(&prog);
        let mut interp = MiniInterp::new(Arc::clone(&prog));
        explore::verify(VerificationOptions::new(MemoryModel::Rc11), prog, &mut interp)
            .expect("valid options")
    };
    let parallel = {
        let prog_for_mem = Arc::clone(&prog);
        let prog_for_interp = Arc::clone(&prog);
        verify_parallel(
            VerificationOptions::new(MemoryModel::Rc11).with_workers(3),
            prog_for_mem,
            move || MiniInterp::new(Arc::clone(&prog_for_interp)),
        )
        .expect("valid options")
    };

    assert!(sequential.is_ok() && parallel.is_ok());
    assert_eq!(sequential.explored, 6);
    assert_eq!(parallel.explored, sequential.explored);
}

// ESTIMATION
// ------------------------------------------------------------------------------------------------

#[test]
fn estimation_samples_the_state_space() {
    let prog = store_buffering(MemOrdering::Relaxed);
    let prog = Arc::new(prog);
    let mut interp = MiniInterp::new(Arc::clone(&prog));
    let result = explore::estimate(
        VerificationOptions::new(MemoryModel::Rc11).with_schedule_seed(7),
        prog,
        &mut interp,
        64,
    )
    .expect("valid options");
    assert!(result.estimation_mean >= 1.0);
    assert!(result.explored + result.explored_blocked >= 1);
}
