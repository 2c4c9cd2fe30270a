//! Console replacement: counts calls per level and drops the arguments.

use std::cell::RefCell;
use std::collections::BTreeMap;
use vf_js::ConsoleTally;

pub const CONSOLE_LEVELS: &[&str] = &["log", "info", "warn", "error", "debug", "trace"];

#[derive(Debug, Default)]
pub struct ConsoleShim {
    counts: RefCell<BTreeMap<String, u64>>,
}

impl ConsoleShim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call. Unknown levels count under `log`.
    pub fn call<T>(&self, level: &str, _arguments: &[T]) {
        let level = if CONSOLE_LEVELS.contains(&level) { level } else { "log" };
        let mut counts = self.counts.borrow_mut();
        let count = counts.entry(level.to_owned()).or_default();
        *count = count.saturating_add(1);
    }

    /// Folds in calls counted by a script realm.
    pub fn absorb(&self, tally: ConsoleTally) {
        let mut counts = self.counts.borrow_mut();
        for (level, calls) in tally {
            let count = counts.entry(level).or_default();
            *count = count.saturating_add(calls);
        }
    }

    pub fn count(&self, level: &str) -> u64 {
        self.counts.borrow().get(level).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.borrow().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::ConsoleShim;
    use vf_js::ConsoleTally;

    #[test]
    fn counts_per_level_without_keeping_arguments() {
        let console = ConsoleShim::new();
        console.call("log", &["a", "b"]);
        console.call::<&str>("error", &[]);
        console.call("table", &[1, 2, 3]);

        let mut tally = ConsoleTally::new();
        tally.insert("warn".to_owned(), 2);
        console.absorb(tally);

        assert_eq!(console.count("log"), 2);
        assert_eq!(console.count("error"), 1);
        assert_eq!(console.count("warn"), 2);
        assert_eq!(console.total(), 5);
    }
}
