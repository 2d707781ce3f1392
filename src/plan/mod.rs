//! # Bring-up planning.
//!
//! - [`DependencyGraph`] validates a declared unit set and sorts it topologically.
//! - [`StackPlan`] is the result: strictly ordered batches of mutually independent units.

mod graph;

pub use graph::DependencyGraph;

/// Ordered list of unit batches.
///
/// Units inside a batch have no dependency relation to each other and may start
/// concurrently; batches run strictly one after another. Tear-down walks the plan
/// backwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackPlan {
    batches: Vec<Vec<String>>,
}

impl StackPlan {
    pub(crate) fn new(batches: Vec<Vec<String>>) -> Self {
        Self { batches }
    }

    /// The batches, in bring-up order.
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// All unit names in bring-up order.
    pub fn units(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.batches.iter().flatten().map(String::as_str)
    }

    /// All unit names in tear-down order (exact reverse of [`StackPlan::units`]).
    pub fn teardown_order(&self) -> impl Iterator<Item = &str> {
        self.units().rev()
    }

    /// Index of the batch containing `name`.
    pub fn batch_of(&self, name: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|n| n == name))
    }

    /// Total number of units.
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// True if the plan contains no units.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl std::fmt::Display for StackPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f, "batch {i}: {}", batch.join(", "))?;
        }
        Ok(())
    }
}
