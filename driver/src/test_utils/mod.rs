//! A register-machine interpreter over a tiny IR, sufficient to drive the engine through the
//! litmus programs the tests verify.

use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_core::{
    ASize, Action, ActionKind, AddrPool, Annotation, AssumeType, CasInfo, Event, EventDeps,
    FaiInfo, MemOrdering, ReadKind, RmwBinOp, SAddr, SVal, ThreadInfo, WriteKind,
};

use crate::{
    Driver, HandleResult, Interpreter, LoadRequest, MemorySource, StoreRequest,
};

pub const REGS: usize = 8;

// MINI IR
// ================================================================================================

/// Where an instruction finds its address: a static location or an address-typed register.
#[derive(Clone, Copy, Debug)]
pub enum AddrRef {
    Static(SAddr),
    Reg(usize),
}

/// An operand: a constant or a register.
#[derive(Clone, Copy, Debug)]
pub enum Operand {
    Const(u64),
    Reg(usize),
}

/// A condition over registers (used by assert/assume).
#[derive(Clone, Debug)]
pub enum Cond {
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
}

/// One instruction of the mini IR.
#[derive(Clone, Debug)]
pub enum Inst {
    Load { reg: usize, addr: AddrRef, ord: MemOrdering },
    Store { addr: AddrRef, val: Operand, ord: MemOrdering },
    Cas { reg: usize, addr: SAddr, expected: u64, new_val: u64, ord: MemOrdering },
    Fai { reg: usize, addr: SAddr, op: RmwBinOp, operand: u64, ord: MemOrdering },
    Lock(SAddr),
    Unlock(SAddr),
    Fence(MemOrdering),
    Spawn { reg: usize, fun: u32, arg: u64 },
    Join { reg: usize, tid: Operand },
    BarrierArrive(SAddr),
    BarrierWait(SAddr),
    Malloc { reg: usize, size: u64 },
    Free { reg: usize },
    /// Local arithmetic; emits no event.
    Add { dst: usize, a: Operand, b: Operand },
    Assert(Cond),
    Assume(Cond),
}

/// A program: one function per spawnable entry point; function 0 is main.
#[derive(Clone, Debug, Default)]
pub struct Prog {
    pub funs: Vec<Vec<Inst>>,
    pub statics: BTreeMap<SAddr, u64>,
}

impl Prog {
    pub fn new(funs: Vec<Vec<Inst>>) -> Self {
        Self { funs, statics: BTreeMap::new() }
    }

    /// Declares a static location with its initial value; returns its address.
    pub fn add_static(&mut self, offset: u64, init: u64) -> SAddr {
        let addr = SAddr::new_static(0, offset);
        self.statics.insert(addr, init);
        addr
    }
}

impl MemorySource for Prog {
    fn initial_value_of(&self, addr: SAddr) -> SVal {
        SVal::new(self.statics.get(&addr).copied().unwrap_or(0))
    }

    fn is_statically_allocated(&self, addr: SAddr) -> bool {
        self.statics.contains_key(&addr)
    }
}

// THREAD STATE
// ================================================================================================

#[derive(Clone, Debug)]
struct ThreadState {
    fun: u32,
    pc: usize,
    regs: [u64; REGS],
    /// Number of events this thread has emitted (the next event's index).
    events: u32,
    finished: bool,
}

impl ThreadState {
    fn new(fun: u32, arg: u64, first_event: u32) -> Self {
        let mut regs = [0; REGS];
        regs[0] = arg;
        Self { fun, pc: 0, regs, events: first_event, finished: false }
    }
}

// INTERPRETER
// ================================================================================================

/// Single-steps a [`Prog`], reporting every memory event to the driver.
pub struct MiniInterp {
    prog: Arc<Prog>,
    threads: Vec<ThreadState>,
}

impl MiniInterp {
    pub fn new(prog: Arc<Prog>) -> Self {
        let mut interp = Self { prog, threads: Vec::new() };
        interp.reset();
        interp
    }

    fn thread(&mut self, t: u32) -> &mut ThreadState {
        &mut self.threads[t as usize]
    }

    fn resolve(&self, t: u32, op: Operand) -> u64 {
        match op {
            Operand::Const(v) => v,
            Operand::Reg(r) => self.threads[t as usize].regs[r],
        }
    }

    fn resolve_addr(&self, t: u32, addr: AddrRef) -> SAddr {
        match addr {
            AddrRef::Static(a) => a,
            AddrRef::Reg(r) => SAddr::from_raw(self.threads[t as usize].regs[r]),
        }
    }

    fn eval(&self, t: u32, cond: &Cond) -> bool {
        match cond {
            Cond::Eq(a, b) => self.resolve(t, *a) == self.resolve(t, *b),
            Cond::Ne(a, b) => self.resolve(t, *a) != self.resolve(t, *b),
            Cond::Not(c) => !self.eval(t, c),
            Cond::And(a, b) => self.eval(t, a) && self.eval(t, b),
        }
    }

    fn next_inst(&self, t: u32) -> Option<&Inst> {
        let ts = &self.threads[t as usize];
        self.prog.funs[ts.fun as usize].get(ts.pc)
    }

    fn pos(&self, t: u32) -> Event {
        Event::new(t, self.threads[t as usize].events)
    }
}

impl Interpreter for MiniInterp {
    fn reset(&mut self) {
        self.threads.clear();
        // The main thread's first event slot (index 0) is the init label.
        self.threads.push(ThreadState::new(0, 0, 1));
    }

    fn collect_runnable(&self, out: &mut Vec<Action>) {
        for (t, ts) in self.threads.iter().enumerate() {
            let kind = match self.next_inst(t as u32) {
                Some(Inst::Load { .. })
                | Some(Inst::Cas { .. })
                | Some(Inst::Fai { .. })
                | Some(Inst::Lock(_))
                | Some(Inst::BarrierWait(_)) => ActionKind::Load,
                Some(Inst::Store { .. })
                | Some(Inst::Unlock(_))
                | Some(Inst::BarrierArrive(_)) => ActionKind::Store,
                _ => ActionKind::Other,
            };
            out.push(Action::new(kind, Event::new(t as u32, ts.events)));
        }
    }

    fn step(&mut self, t: u32, driver: &mut Driver) {
        let Some(inst) = self.next_inst(t).cloned() else {
            // End of function: the thread finishes, returning its first register.
            if !self.threads[t as usize].finished {
                let pos = self.pos(t);
                let ret = SVal::new(self.threads[t as usize].regs[0]);
                driver.handle_thread_finish(pos, ret);
                let ts = self.thread(t);
                ts.events += 1;
                ts.finished = true;
            }
            return;
        };

        match inst {
            Inst::Load { reg, addr, ord } => {
                let pos = self.pos(t);
                let addr = self.resolve_addr(t, addr);
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: ord,
                    kind: ReadKind::Plain,
                    annot: None,
                    deps: EventDeps::none(),
                });
                if let HandleResult::Ok(v) = result {
                    let ts = self.thread(t);
                    ts.regs[reg] = v.get();
                    ts.events += 1;
                    ts.pc += 1;
                }
            },
            Inst::Store { addr, val, ord } => {
                let pos = self.pos(t);
                let addr = self.resolve_addr(t, addr);
                let val = SVal::new(self.resolve(t, val));
                let result = driver.handle_store(pos, StoreRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: ord,
                    kind: WriteKind::Plain,
                    val,
                    is_final: false,
                    deps: EventDeps::none(),
                });
                if let HandleResult::Ok(()) = result {
                    let ts = self.thread(t);
                    ts.events += 1;
                    ts.pc += 1;
                }
            },
            Inst::Cas { reg, addr, expected, new_val, ord } => {
                let pos = self.pos(t);
                let cas = CasInfo { expected: SVal::new(expected), new_val: SVal::new(new_val) };
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: ord,
                    kind: ReadKind::Cas(cas),
                    annot: None,
                    deps: EventDeps::none(),
                });
                let HandleResult::Ok(old) = result else { return };
                self.thread(t).events += 1;
                if old == SVal::new(expected) {
                    let wres = driver.handle_store(pos.next(), StoreRequest {
                        addr,
                        size: ASize::new(4),
                        ordering: ord,
                        kind: WriteKind::Cas,
                        val: SVal::new(new_val),
                        is_final: false,
                        deps: EventDeps::none(),
                    });
                    match wres {
                        HandleResult::Ok(()) | HandleResult::Invalid => {
                            self.thread(t).events += 1;
                        },
                        _ => return,
                    }
                }
                let ts = self.thread(t);
                ts.regs[reg] = old.get();
                ts.pc += 1;
            },
            Inst::Fai { reg, addr, op, operand, ord } => {
                let pos = self.pos(t);
                let fai = FaiInfo { op, operand: SVal::new(operand) };
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: ord,
                    kind: ReadKind::Fai(fai),
                    annot: None,
                    deps: EventDeps::none(),
                });
                let HandleResult::Ok(old) = result else { return };
                self.thread(t).events += 1;
                let new_val = op.apply(old, SVal::new(operand), ASize::new(4));
                let wres = driver.handle_store(pos.next(), StoreRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: ord,
                    kind: WriteKind::Fai,
                    val: new_val,
                    is_final: false,
                    deps: EventDeps::none(),
                });
                match wres {
                    HandleResult::Ok(()) | HandleResult::Invalid => {
                        self.thread(t).events += 1;
                    },
                    _ => return,
                }
                let ts = self.thread(t);
                ts.regs[reg] = old.get();
                ts.pc += 1;
            },
            Inst::Lock(addr) => {
                let pos = self.pos(t);
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::Acquire,
                    kind: ReadKind::LockCas,
                    annot: Some(Annotation::Eq(SVal::new(0))),
                    deps: EventDeps::none(),
                });
                let HandleResult::Ok(old) = result else { return };
                if old != SVal::new(0) {
                    // Replayed a stale acquisition attempt; retry once rescheduled.
                    return;
                }
                self.thread(t).events += 1;
                let wres = driver.handle_store(pos.next(), StoreRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::Acquire,
                    kind: WriteKind::LockCas,
                    val: SVal::new(1),
                    is_final: false,
                    deps: EventDeps::none(),
                });
                match wres {
                    HandleResult::Ok(()) | HandleResult::Invalid => {
                        self.thread(t).events += 1;
                    },
                    _ => return,
                }
                self.thread(t).pc += 1;
            },
            Inst::Unlock(addr) => {
                let pos = self.pos(t);
                let result = driver.handle_store(pos, StoreRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::Release,
                    kind: WriteKind::Unlock,
                    val: SVal::new(0),
                    is_final: false,
                    deps: EventDeps::none(),
                });
                if let HandleResult::Ok(()) = result {
                    let ts = self.thread(t);
                    ts.events += 1;
                    ts.pc += 1;
                }
            },
            Inst::Fence(ord) => {
                let pos = self.pos(t);
                driver.handle_fence(pos, ord, EventDeps::none());
                let ts = self.thread(t);
                ts.events += 1;
                ts.pc += 1;
            },
            Inst::Spawn { reg, fun, arg } => {
                let pos = self.pos(t);
                let info = ThreadInfo { id: 0, parent: t, fun_id: fun, arg: SVal::new(arg) };
                let child = driver.handle_thread_create(pos, info, EventDeps::none());
                if child as usize >= self.threads.len() {
                    self.threads.resize_with(child as usize + 1, || {
                        ThreadState::new(fun, arg, 1)
                    });
                }
                self.threads[child as usize] = ThreadState::new(fun, arg, 1);
                let ts = self.thread(t);
                ts.regs[reg] = child.into();
                ts.events += 1;
                ts.pc += 1;
            },
            Inst::Join { reg, tid } => {
                let pos = self.pos(t);
                let child = self.resolve(t, tid) as u32;
                let result = driver.handle_thread_join(pos, child, EventDeps::none());
                if let HandleResult::Ok(v) = result {
                    let ts = self.thread(t);
                    ts.regs[reg] = v.get();
                    ts.events += 1;
                    ts.pc += 1;
                }
            },
            Inst::BarrierArrive(addr) => {
                let pos = self.pos(t);
                let fai = FaiInfo { op: RmwBinOp::Sub, operand: SVal::new(1) };
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::AcqRel,
                    kind: ReadKind::BIncFai(fai),
                    annot: None,
                    deps: EventDeps::none(),
                });
                let HandleResult::Ok(old) = result else { return };
                self.thread(t).events += 1;
                let new_val = RmwBinOp::Sub.apply(old, SVal::new(1), ASize::new(4));
                let wres = driver.handle_store(pos.next(), StoreRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::AcqRel,
                    kind: WriteKind::BIncFai,
                    val: new_val,
                    is_final: false,
                    deps: EventDeps::none(),
                });
                match wres {
                    HandleResult::Ok(()) | HandleResult::Invalid => {
                        self.thread(t).events += 1;
                    },
                    _ => return,
                }
                self.thread(t).pc += 1;
            },
            Inst::BarrierWait(addr) => {
                let pos = self.pos(t);
                let result = driver.handle_load(pos, LoadRequest {
                    addr,
                    size: ASize::new(4),
                    ordering: MemOrdering::Acquire,
                    kind: ReadKind::BWait,
                    annot: None,
                    deps: EventDeps::none(),
                });
                if let HandleResult::Ok(_) = result {
                    let ts = self.thread(t);
                    ts.events += 1;
                    ts.pc += 1;
                }
            },
            Inst::Malloc { reg, size } => {
                let pos = self.pos(t);
                let addr = driver.handle_malloc(pos, size, 8, AddrPool::Heap);
                let ts = self.thread(t);
                ts.regs[reg] = addr.get();
                ts.events += 1;
                ts.pc += 1;
            },
            Inst::Free { reg } => {
                let pos = self.pos(t);
                let addr = SAddr::from_raw(self.threads[t as usize].regs[reg]);
                driver.handle_free(pos, addr, EventDeps::none());
                let ts = self.thread(t);
                ts.events += 1;
                ts.pc += 1;
            },
            Inst::Add { dst, a, b } => {
                let sum = self.resolve(t, a).wrapping_add(self.resolve(t, b));
                let ts = self.thread(t);
                ts.regs[dst] = sum;
                ts.pc += 1;
            },
            Inst::Assert(cond) => {
                if !self.eval(t, &cond) {
                    let pos = self.pos(t);
                    driver.report_assert_violation(pos, "assertion failed");
                    self.thread(t).finished = true;
                    return;
                }
                self.thread(t).pc += 1;
            },
            Inst::Assume(cond) => {
                if !self.eval(t, &cond) {
                    let pos = self.pos(t);
                    driver.handle_assume(pos, AssumeType::User);
                    return;
                }
                self.thread(t).pc += 1;
            },
        }
    }
}
