//! # Shared unit state table.
//!
//! The only shared mutable resource of the runtime: one [`UnitState`] per unit,
//! behind a single `RwLock` (stacks are small, so a global lock is enough).
//!
//! ```text
//! recovery loops ──► set / begin ──┐
//!                                  ▼
//!                       RwLock<HashMap<name, UnitState>>
//!                                  ▲
//! StackController::status() ───────┘  (read lock only)
//! ```
//!
//! ## Rules
//! - The lock is never held across an await point of a unit action, probe or sleep.
//! - Writes come from the recovery module only; everything else reads.
//! - Every entry always holds one of the five [`UnitState`] values.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use crate::state::UnitState;

pub(crate) struct UnitTable {
    state: RwLock<HashMap<String, UnitState>>,
}

impl UnitTable {
    /// Creates a table with every unit `Stopped`.
    pub(crate) fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let state = names
            .into_iter()
            .map(|name| (name.to_string(), UnitState::Stopped))
            .collect();
        Self {
            state: RwLock::new(state),
        }
    }

    pub(crate) async fn get(&self, name: &str) -> UnitState {
        self.state
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    pub(super) async fn set(&self, name: &str, next: UnitState) {
        if let Some(slot) = self.state.write().await.get_mut(name) {
            *slot = next;
        }
    }

    /// Moves `name` to `Starting` unless one of `peers` holds the exclusion group.
    ///
    /// A peer holds the group while it is `Starting`, `Healthy` or `Degraded`. Check
    /// and transition happen under one write lock. Returns the holder on refusal.
    pub(super) async fn begin(&self, name: &str, peers: &[String]) -> Result<(), String> {
        let mut state = self.state.write().await;
        let holder = peers.iter().find(|peer| {
            state
                .get(peer.as_str())
                .is_some_and(|s| s.is_in_flight() || *s == UnitState::Healthy)
        });
        if let Some(holder) = holder {
            return Err(holder.clone());
        }
        if let Some(slot) = state.get_mut(name) {
            *slot = UnitState::Starting;
        }
        Ok(())
    }

    /// Marks every unit still `Starting` or `Degraded` as `Failed`; returns their names.
    pub(super) async fn fail_in_flight(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut failed: Vec<String> = state
            .iter_mut()
            .filter(|(_, s)| s.is_in_flight())
            .map(|(name, s)| {
                *s = UnitState::Failed;
                name.clone()
            })
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Consistent copy of the whole table.
    pub(crate) async fn snapshot(&self) -> BTreeMap<String, UnitState> {
        self.state
            .read()
            .await
            .iter()
            .map(|(name, s)| (name.clone(), *s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_refuses_while_peer_holds_group() {
        let table = UnitTable::new(["pipewire-pulse", "pulseaudio"]);
        let peers = vec!["pipewire-pulse".to_string()];

        table.set("pipewire-pulse", UnitState::Healthy).await;
        assert_eq!(
            table.begin("pulseaudio", &peers).await,
            Err("pipewire-pulse".to_string())
        );
        assert_eq!(table.get("pulseaudio").await, UnitState::Stopped);

        table.set("pipewire-pulse", UnitState::Failed).await;
        assert!(table.begin("pulseaudio", &peers).await.is_ok());
        assert_eq!(table.get("pulseaudio").await, UnitState::Starting);
    }

    #[tokio::test]
    async fn fail_in_flight_leaves_settled_units_alone() {
        let table = UnitTable::new(["a", "b", "c", "d"]);
        table.set("a", UnitState::Healthy).await;
        table.set("b", UnitState::Starting).await;
        table.set("c", UnitState::Degraded).await;

        assert_eq!(table.fail_in_flight().await, vec!["b", "c"]);
        let snap = table.snapshot().await;
        assert_eq!(snap["a"], UnitState::Healthy);
        assert_eq!(snap["b"], UnitState::Failed);
        assert_eq!(snap["c"], UnitState::Failed);
        assert_eq!(snap["d"], UnitState::Stopped);
    }

    #[tokio::test]
    async fn unknown_names_are_ignored() {
        let table = UnitTable::new(["a"]);
        table.set("ghost", UnitState::Healthy).await;
        assert_eq!(table.snapshot().await.len(), 1);
    }
}
