//! Debug-only well-formedness checks over the execution graph.

use alloc::collections::BTreeSet;

use super::ExecutionGraph;
use crate::{event::Event, label::LabelKind};

impl ExecutionGraph {
    /// Checks the graph invariants, panicking on the first violation.
    ///
    /// Intended for debug builds and tests; the checks are quadratic in the graph size.
    pub fn validate(&self) {
        let mut stamps = BTreeSet::new();

        for label in self.labels() {
            assert!(
                stamps.insert(label.stamp()),
                "duplicate stamp {} at {}",
                label.stamp(),
                label.pos()
            );
        }

        // Stamps are monotone within each thread.
        for t in self.thread_ids() {
            let mut prev = None;
            for label in self.po(t) {
                if let Some(prev) = prev {
                    assert!(prev < label.stamp(), "non-monotone stamps in thread {t}");
                }
                prev = Some(label.stamp());
            }
        }

        // Reads-from and reader lists agree in both directions.
        for label in self.labels() {
            if let Some(read) = label.read()
                && let Some(rf) = read.rf
            {
                if !rf.is_init() {
                    let src = self.label(rf).write().expect("rf points to a non-write");
                    assert_eq!(src.addr, read.addr, "rf address mismatch at {}", label.pos());
                }
                assert!(
                    self.readers(read.addr, rf).contains(&label.pos()),
                    "missing reader entry for {}",
                    label.pos()
                );
            }
        }
        for label in self.labels() {
            if let Some(write) = label.write() {
                for reader in write.readers.iter() {
                    let rlab = self.label(*reader).read().expect("reader is not a read");
                    assert_eq!(rlab.rf, Some(label.pos()), "stale reader entry");
                }
            }
        }

        // Coherence tracks exactly the writes of each address.
        for (addr, co) in self.coherence.iter() {
            let mut seen = BTreeSet::new();
            for w in co {
                assert!(seen.insert(*w), "duplicate coherence entry {w}");
                let wlab = self.label(*w).write().expect("coherence entry is not a write");
                assert_eq!(wlab.addr, *addr, "coherence entry at wrong address");
            }
        }
        for label in self.labels() {
            if let Some(write) = label.write()
                && !write.is_local
            {
                assert!(
                    self.co_index(write.addr, label.pos()).is_some(),
                    "write {} missing from coherence",
                    label.pos()
                );
            }
        }

        // RMW pairs are po-adjacent, share the address, and atomically extend their source.
        for label in self.labels() {
            let Some(write) = label.write() else { continue };
            if !write.is_rmw() {
                continue;
            }
            let read = self
                .po_imm_pred(label.pos())
                .and_then(|lab| lab.read())
                .expect("RMW write without adjacent read part");
            assert_eq!(read.addr, write.addr, "RMW pair accesses different locations");
            if let Some(rf) = read.rf {
                let pred = if rf.is_init() { Event::INIT } else { rf };
                let succ = self.co_imm_succ(write.addr, pred).unwrap_or(label.pos());
                // The write part sits co-immediately after its read's source unless a racing
                // RMW (a transient atomicity violation about to moot) got there first.
                if succ != label.pos() {
                    assert!(
                        self.violates_atomicity(label.pos()),
                        "RMW write {} not adjacent to its source",
                        label.pos()
                    );
                }
            }
        }

        // Thread timelines start with a start label (or the init label for thread 0).
        for t in self.thread_ids() {
            if let Some(first) = self.first_label(t) {
                match first.kind() {
                    LabelKind::Init => assert_eq!(t, 0, "init label outside thread 0"),
                    LabelKind::ThreadStart(_) => assert_ne!(t, 0, "thread 0 with a start label"),
                    LabelKind::Empty => {},
                    other => panic!("thread {t} starts with {other:?}"),
                }
            }
        }
    }
}
