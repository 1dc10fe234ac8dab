use std::collections::HashMap;

use kestrel_core::{
    Action, ActionKind, BlockType, Event, EventLabel, ExecutionGraph, LabelKind, SVal, View,
};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::trace;

use crate::config::{SchedulePolicy, VerificationOptions};

// SCHEDULER
// ================================================================================================

/// Resolves the value an already-committed label handed back to the program (used to key the
/// value-prefix cache); supplied by the driver, which can see initial memory.
pub type ValueOf<'a> = &'a dyn Fn(&ExecutionGraph, &EventLabel) -> SVal;

/// Outcome of a cache probe for the next labels to add.
#[derive(Debug)]
pub enum CacheLookup {
    /// Nothing is schedulable: the execution is complete.
    Done,
    /// No cached continuation; the interpreter must run.
    Miss,
    /// Cached labels that extend the current graph.
    Hit(Vec<EventLabel>),
}

/// Picks the next thread to step.
///
/// Scheduling proceeds in four stages, each falling through to the next: replaying the restored
/// graph after a backtrack, honoring thread prioritization (lock holders, speculating
/// threads), the configured policy, and finally unblocking one optimistically-blocked read.
/// Given the same policy, seed and replay schedule, decisions are deterministic.
#[derive(Debug)]
pub struct Scheduler {
    policy: SchedulePolicy,
    rng: SmallRng,
    /// Pending replay schedule, in reverse order (next event at the back).
    replay: Vec<Event>,
    /// A read that was unblocked and must re-run before anything else is attempted.
    rescheduled_read: Option<Event>,
    /// Threads to prefer, identified by an event of theirs.
    prios: Vec<Event>,
    /// Value-prefix cache: `(fun_id, thread)` → value sequence → cached continuation.
    seen_prefixes: HashMap<(u32, u32), HashMap<Vec<SVal>, Vec<EventLabel>>>,
}

impl Scheduler {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a new scheduler configured per `opts`.
    pub fn new(opts: &VerificationOptions) -> Self {
        let rng = match opts.schedule_seed() {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            policy: opts.schedule_policy(),
            rng,
            replay: Vec::new(),
            rescheduled_read: None,
            prios: Vec::new(),
            seen_prefixes: HashMap::new(),
        }
    }

    // EXPLORATION RESET
    // --------------------------------------------------------------------------------------------

    /// Re-derives the replay schedule and prioritization from the (restored) graph; called at
    /// the beginning of every execution.
    pub fn reset_exploration(&mut self, g: &ExecutionGraph) {
        self.rescheduled_read = None;
        self.prios.clear();
        self.replay = calculate_replay_schedule(g);

        // Check whether the event that led to this execution needs thread prioritization.
        for tid in g.thread_ids() {
            let Some(last) = g.last_label(tid) else { continue };

            // A thread blocked acquiring a lock primes priority on the holder.
            if last.block_type() == Some(BlockType::LockNotAcq)
                && let Some(read) = g.po_imm_pred(last.pos()).and_then(|lab| lab.read())
                && let Some(rf) = read.rf
                && !rf.is_init()
            {
                self.prioritize(rf);
                return;
            }

            // A speculating thread keeps running until it confirms.
            let Some(rlab) = last.read() else { continue };
            let speculative = matches!(rlab.kind, kestrel_core::ReadKind::Speculative)
                || (0..last.index()).rev().any(|i| {
                    g.label(Event::new(tid, i))
                        .read()
                        .is_some_and(|r| matches!(r.kind, kestrel_core::ReadKind::Speculative))
                });
            if speculative {
                self.prioritize(last.pos());
            }
        }
    }

    /// Prioritizes the thread owning `pos`.
    pub fn prioritize(&mut self, pos: Event) {
        self.prios = vec![pos];
    }

    /// Returns true while the restored prefix has events left to replay.
    pub fn in_replay(&self) -> bool {
        !self.replay.is_empty()
    }

    /// Returns true if `pos` is the read currently being rescheduled.
    pub fn is_rescheduled_read(&self, pos: Event) -> bool {
        self.rescheduled_read == Some(pos)
    }

    /// Clears the rescheduled-read marker.
    pub fn clear_rescheduled_read(&mut self) {
        self.rescheduled_read = None;
    }

    // SCHEDULING
    // --------------------------------------------------------------------------------------------

    /// Returns the next thread to step, or `None` when every thread is finished or blocked
    /// for good.
    pub fn schedule(&mut self, g: &mut ExecutionGraph, runnable: &[Action]) -> Option<u32> {
        if let Some(t) = self.schedule_replay(g, runnable) {
            return Some(t);
        }
        if let Some(t) = self.schedule_prioritized(g) {
            return Some(t);
        }
        if let Some(t) = self.schedule_policy(g, runnable) {
            return Some(t);
        }
        // All threads are blocked or done; try unblocking an optimistically blocked read.
        self.reschedule_reads(g)
    }

    /// Replays the restored graph: pops already re-executed entries and returns the thread of
    /// the next one.
    fn schedule_replay(&mut self, g: &ExecutionGraph, runnable: &[Action]) -> Option<u32> {
        // Entries are popped lazily: one instruction may map to several events (RMWs), and the
        // interpreter may consult the scheduler without having advanced.
        while let Some(next) = self.replay.last().copied() {
            let executed = runnable
                .get(next.thread as usize)
                .is_some_and(|action| next.index < action.next.index);
            if executed {
                self.replay.pop();
                continue;
            }
            // If the next entry is a read that blocks again in the graph, pop it eagerly:
            // its thread will never advance past it during this replay.
            let blocked_here = g.last_label(next.thread).is_some_and(|last| {
                last.is_block()
                    && next.index + 1 == last.index()
                    && g.po_imm_pred(last.pos()).is_some_and(|p| p.read().is_some())
            });
            if blocked_here {
                self.replay.pop();
                continue;
            }
            return Some(next.thread);
        }
        None
    }

    /// Schedules according to the current prioritization scheme, if any thread of it can run.
    fn schedule_prioritized(&mut self, g: &ExecutionGraph) -> Option<u32> {
        self.prios
            .iter()
            .find(|pos| is_schedulable(g, pos.thread))
            .map(|pos| pos.thread)
    }

    /// Unblocks one read-opt-blocked thread and schedules it.
    fn reschedule_reads(&mut self, g: &mut ExecutionGraph) -> Option<u32> {
        for tid in g.thread_ids().collect::<Vec<_>>() {
            let Some(pos) = g.blocked_with(tid, |b| matches!(b, BlockType::ReadOpt(_))) else {
                continue;
            };
            trace!(thread = tid, "rescheduling blocked read");
            self.rescheduled_read = Some(pos);
            g.unblock_thread(pos);
            return Some(tid);
        }
        None
    }

    /// Schedules according to the selected policy.
    fn schedule_policy(&mut self, g: &ExecutionGraph, runnable: &[Action]) -> Option<u32> {
        match self.policy {
            SchedulePolicy::Ltr => runnable
                .iter()
                .find(|a| is_schedulable(g, a.next.thread))
                .map(|a| a.next.thread),
            SchedulePolicy::WriteFirst => {
                let mut fallback = None;
                for action in runnable {
                    if !is_schedulable(g, action.next.thread) {
                        continue;
                    }
                    if fallback.is_none() {
                        fallback = Some(action.next.thread);
                    }
                    if action.kind != ActionKind::Load {
                        return Some(first_schedulable_symmetric(g, action.next.thread));
                    }
                }
                fallback.map(|t| first_schedulable_symmetric(g, t))
            },
            SchedulePolicy::WriteFirstRandom => {
                let mut writes = Vec::new();
                let mut others = Vec::new();
                for action in runnable {
                    if !is_schedulable(g, action.next.thread) {
                        continue;
                    }
                    match action.kind {
                        ActionKind::Load => others.push(action.next.thread),
                        _ => writes.push(action.next.thread),
                    }
                }
                let pool = if writes.is_empty() { &others } else { &writes };
                if pool.is_empty() {
                    return None;
                }
                let pick = pool[self.rng.random_range(0..pool.len())];
                Some(first_schedulable_symmetric(g, pick))
            },
            SchedulePolicy::Arbitrary => {
                let n = runnable.len();
                if n == 0 {
                    return None;
                }
                let start = self.rng.random_range(0..n);
                (0..n)
                    .map(|i| &runnable[(start + i) % n])
                    .find(|a| is_schedulable(g, a.next.thread))
                    .map(|a| first_schedulable_symmetric(g, a.next.thread))
            },
        }
    }

    // VALUE-PREFIX CACHE
    // --------------------------------------------------------------------------------------------

    /// Caches `lab` under its thread's value prefix. Must be called before `lab` is added to
    /// the graph.
    pub fn cache_event_label(&mut self, g: &ExecutionGraph, lab: &EventLabel, value_of: ValueOf) {
        let key = (fun_id(g, lab.thread()), lab.thread());
        let (vals, indices) = extract_val_prefix(g, lab.pos(), value_of);

        let buckets = self.seen_prefixes.entry(key).or_default();
        buckets.entry(Vec::new()).or_default();
        let common = (0..=vals.len())
            .rev()
            .find(|len| buckets.contains_key(&vals[..*len]))
            .expect("the empty prefix is always present");
        let mut seen: Vec<SVal> = vals[..common].to_vec();

        // Fastpath: everything up to this label is already cached.
        let data = buckets.get(&seen).expect("bucket just ensured");
        if data.last().is_some_and(|cached| cached.index() >= lab.index()) {
            return;
        }

        // Copy the uncached suffix, splitting buckets at value-returning labels.
        let mut from = if common == 0 { 0 } else { indices[common - 1].index + 1 };
        if let Some(cached) = data.last() {
            from = from.max(cached.index() + 1);
        }
        for i in from..=lab.index() {
            let mut copy = if i == lab.index() {
                lab.clone()
            } else {
                g.label(Event::new(lab.thread(), i)).clone()
            };
            copy.reset();

            let split = buckets
                .get(&seen)
                .expect("bucket exists")
                .last()
                .is_some_and(|cached| cached.returns_value());
            if split {
                let Some(&next_val) = vals.get(seen.len()) else { break };
                seen.push(next_val);
                buckets.entry(seen.clone()).or_default();
            }
            buckets.get_mut(&seen).expect("bucket exists").push(copy);
        }
    }

    /// Probes the cache for labels extending the current graph.
    pub fn schedule_from_cache(
        &mut self,
        g: &mut ExecutionGraph,
        value_of: ValueOf,
    ) -> CacheLookup {
        let next = g
            .thread_ids()
            .find(|tid| is_schedulable(g, *tid))
            .or_else(|| self.reschedule_reads(g));
        match next {
            Some(tid) => self.retrieve_from_cache(g, tid, value_of),
            None => CacheLookup::Done,
        }
    }

    fn retrieve_from_cache(
        &mut self,
        g: &ExecutionGraph,
        thread: u32,
        value_of: ValueOf,
    ) -> CacheLookup {
        let key = (fun_id(g, thread), thread);
        let next = next_label_to_add(g, thread);
        let (vals, _) = extract_val_prefix(g, next, value_of);

        let cached = self.seen_prefixes.get(&key).and_then(|buckets| buckets.get(&vals));
        match cached {
            Some(data)
                if data.last().is_some_and(|cached| cached.index() >= next.index) =>
            {
                CacheLookup::Hit(
                    data.iter()
                        .filter(|cached| cached.index() >= next.index)
                        .cloned()
                        .collect(),
                )
            },
            _ => CacheLookup::Miss,
        }
    }
}

// FREE FUNCTIONS
// ================================================================================================

/// Returns true if `thread` can still take a step (its last label is not a terminator).
pub fn is_schedulable(g: &ExecutionGraph, thread: u32) -> bool {
    g.last_label(thread).is_some_and(|lab| !lab.is_terminator())
}

/// Walks the symmetric-predecessor chain of `tid` and returns the first (lowest) thread that
/// can still run, so that symmetric threads advance in canonical order.
fn first_schedulable_symmetric(g: &ExecutionGraph, tid: u32) -> u32 {
    let mut first = tid;
    let mut symm = symm_pred_of(g, tid);
    while let Some(t) = symm {
        if is_schedulable(g, t) {
            first = t;
        }
        symm = symm_pred_of(g, t);
    }
    first
}

fn symm_pred_of(g: &ExecutionGraph, tid: u32) -> Option<u32> {
    match g.first_label(tid)?.kind() {
        LabelKind::ThreadStart(ts) => ts.symm_pred,
        _ => None,
    }
}

/// Computes the replay schedule of `g`: a porf-respecting linearization of the graph, reversed
/// so the next event sits at the back.
fn calculate_replay_schedule(g: &ExecutionGraph) -> Vec<Event> {
    let mut view = View::new();
    let mut schedule = Vec::new();
    for tid in g.thread_ids() {
        if let Some(last) = g.last_label(tid) {
            porf_replay_dfs(g, last.pos(), &mut view, &mut schedule);
        }
    }

    // Completed threads replay too: re-running their creates is what re-materializes the
    // interpreter's thread table after a backtrack.
    schedule.reverse();
    schedule
}

fn porf_replay_dfs(g: &ExecutionGraph, pos: Event, view: &mut View, out: &mut Vec<Event>) {
    if view.contains(pos) {
        return;
    }
    let start = view.cut(pos.thread);
    view.include(pos);
    for idx in start..=pos.index {
        let p = Event::new(pos.thread, idx);
        let plab = g.label(p);
        match plab.kind() {
            LabelKind::Read(r) => {
                if let Some(rf) = r.rf
                    && !rf.is_init()
                {
                    porf_replay_dfs(g, rf, view, out);
                }
            },
            LabelKind::ThreadJoin(tj) => {
                if let Some(fin) = g.last_label(tj.child) {
                    porf_replay_dfs(g, fin.pos(), view, out);
                }
            },
            LabelKind::ThreadStart(ts) => porf_replay_dfs(g, ts.create, view, out),
            _ => {},
        }
        if !plab.is_block() && !matches!(plab.kind(), LabelKind::Init | LabelKind::Empty) {
            out.push(p);
        }
    }
}

/// Returns the position the next label of `thread` will occupy (the first placeholder, if the
/// thread has holes).
fn next_label_to_add(g: &ExecutionGraph, thread: u32) -> Event {
    for i in 0..g.thread_size(thread) {
        if matches!(g.label(Event::new(thread, i)).kind(), LabelKind::Empty) {
            return Event::new(thread, i);
        }
    }
    Event::new(thread, g.thread_size(thread))
}

/// Returns the function id of `thread` (0 for main).
fn fun_id(g: &ExecutionGraph, thread: u32) -> u32 {
    match g.first_label(thread).map(|lab| lab.kind()) {
        Some(LabelKind::ThreadStart(ts)) => ts.info.fun_id,
        _ => 0,
    }
}

/// Returns the values returned so far by `thread`'s events before `pos`, along with the events
/// that produced them.
fn extract_val_prefix(
    g: &ExecutionGraph,
    pos: Event,
    value_of: ValueOf,
) -> (Vec<SVal>, Vec<Event>) {
    let mut vals = Vec::new();
    let mut events = Vec::new();
    for i in 0..pos.index {
        let lab = g.label(Event::new(pos.thread, i));
        if lab.returns_value() {
            vals.push(value_of(g, lab));
            events.push(lab.pos());
        }
    }
    (vals, events)
}
