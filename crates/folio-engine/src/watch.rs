//! Live-updating query watchers.
//!
//! A watcher emits the query result once, then re-runs the full pipeline
//! after every committed mutation on its collection. Events for other
//! collections are ignored; bursts of events coalesce into a single
//! re-evaluation. Emission order is FIFO per watcher.

use std::sync::Arc;

use folio_core::entity::Entity;
use folio_core::error::Result;
use folio_query::config::QueryConfig;

use crate::bus::Subscription;
use crate::database::DatabaseInner;
use crate::exec::EngineView;

/// A live-updating sequence of query result snapshots.
///
/// Iterate it for blocking semantics, or [`Watcher::poll`] for a
/// non-blocking check. Dropping the watcher unsubscribes from the bus.
pub struct Watcher {
    inner: Arc<DatabaseInner>,
    collection: String,
    config: QueryConfig,
    subscription: Subscription,
    emitted_initial: bool,
}

impl Watcher {
    pub(crate) fn new(
        inner: Arc<DatabaseInner>,
        collection: String,
        config: QueryConfig,
        subscription: Subscription,
    ) -> Self {
        Self {
            inner,
            collection,
            config,
            subscription,
            emitted_initial: false,
        }
    }

    /// Re-runs the query pipeline against the live store.
    fn evaluate(&self) -> Result<Vec<Entity>> {
        let states = self.inner.lock_states()?;
        let view = EngineView {
            configs: &self.inner.configs,
            states: &states,
            operators: &self.inner.operators,
        };
        let output = view.execute(&self.collection, &self.config)?;
        output.items.into_iter().collect()
    }

    /// Drains queued events, reporting whether any were for this
    /// watcher's collection.
    fn drain_pending(&self, mut relevant: bool) -> bool {
        while let Ok(event) = self.subscription.events.try_recv() {
            relevant |= event.collection == self.collection;
        }
        relevant
    }

    /// Non-blocking: the next snapshot if the initial emission is pending
    /// or a relevant change arrived, else `None`.
    pub fn poll(&mut self) -> Option<Result<Vec<Entity>>> {
        if !self.emitted_initial {
            self.emitted_initial = true;
            self.drain_pending(false);
            return Some(self.evaluate());
        }
        if self.drain_pending(false) {
            return Some(self.evaluate());
        }
        None
    }
}

impl Iterator for Watcher {
    type Item = Result<Vec<Entity>>;

    /// Blocks until the next emission is due. Returns `None` once the
    /// database (and thus the bus sender side) is gone.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.emitted_initial {
            self.emitted_initial = true;
            return Some(self.evaluate());
        }
        loop {
            let event = self.subscription.events.recv().ok()?;
            // Coalesce: everything queued during the last evaluation
            // folds into one re-run.
            let relevant = self.drain_pending(event.collection == self.collection);
            if relevant {
                return Some(self.evaluate());
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.inner.bus.unsubscribe(self.subscription.id);
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("collection", &self.collection)
            .field("emitted_initial", &self.emitted_initial)
            .finish_non_exhaustive()
    }
}
