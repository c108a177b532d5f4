//! Visit tracking for shared artifacts.

use std::collections::BTreeSet;

/// A named set that reports whether a name has been seen before.
///
/// Several IR nodes can share one underlying artifact: every instance of a
/// container image shares the image directory, every RPC client shares the
/// generated stubs. Codegen guards such output with a tracker so the first
/// node generates and the rest skip.
#[derive(Default)]
pub struct VisitTracker {
    visited: BTreeSet<String>,
}

impl VisitTracker {
    pub fn new() -> Self {
        VisitTracker::default()
    }

    /// Record `name`, returning whether it had already been recorded.
    pub fn visited(&mut self, name: &str) -> bool {
        !self.visited.insert(name.to_string())
    }
}
