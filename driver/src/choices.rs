use std::collections::{BTreeMap, BTreeSet};

use kestrel_core::{Event, ViewKind};

// CHOICE MAP
// ================================================================================================

/// Per-event record of the exploration alternatives that were available when the event was
/// committed: rf-sources for reads, coherence predecessors for writes.
///
/// Estimation mode multiplies the choice-set sizes into a state-space estimate; restriction
/// cuts entries whose events (or alternatives) were removed.
#[derive(Clone, Debug, Default)]
pub struct ChoiceMap {
    choices: BTreeMap<Event, BTreeSet<Event>>,
}

impl ChoiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `pos` could have chosen any of `options`.
    pub fn update(&mut self, pos: Event, options: impl IntoIterator<Item = Event>) {
        self.choices.insert(pos, options.into_iter().collect());
    }

    /// Records `option` as an additional alternative for each event of `positions`.
    pub fn extend_each(&mut self, positions: impl IntoIterator<Item = Event>, option: Event) {
        for pos in positions {
            self.choices.entry(pos).or_default().insert(option);
        }
    }

    /// Removes entries (and alternatives) outside of `view`.
    pub fn cut(&mut self, view: &ViewKind) {
        self.choices.retain(|pos, _| view.contains(*pos));
        for options in self.choices.values_mut() {
            options.retain(|e| view.contains(*e));
        }
    }

    /// Iterates over the recorded choice sets.
    pub fn iter(&self) -> impl Iterator<Item = (Event, &BTreeSet<Event>)> {
        self.choices.iter().map(|(pos, set)| (*pos, set))
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use kestrel_core::View;

    use super::*;

    #[test]
    fn cut_drops_entries_and_alternatives_outside_the_view() {
        let mut cm = ChoiceMap::new();
        cm.update(Event::new(1, 1), [Event::INIT, Event::new(2, 1)]);
        cm.update(Event::new(2, 2), [Event::INIT]);

        let mut v = View::new();
        v.include(Event::new(1, 1));
        v.include(Event::new(0, 0));
        cm.cut(&ViewKind::Plain(v));

        let entries: Vec<_> = cm.iter().collect();
        assert_eq!(entries.len(), 1);
        let (pos, options) = entries[0];
        assert_eq!(pos, Event::new(1, 1));
        assert!(options.contains(&Event::INIT));
        assert!(!options.contains(&Event::new(2, 1)));
    }
}
