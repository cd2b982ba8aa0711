//! Reuse of overlay entries across passes.
//!
//! Before a pass applies its results, every existing entry it may replace is claimed and parked
//! in a recycler. New diagnostics pick up a parked entry with matching coordinates instead of
//! creating a fresh one; whatever is left is disposed at the end. An entry that keeps showing
//! the same problem is therefore never removed and re-added, so the editor does not flicker.

use crate::cancel::CancellationToken;
use crate::config::RecyclingStrategy;
use crate::error::OverlayError;
use crate::overlay::{EntryHandle, OverlayEntry, OverlayStore};
use crate::range::{StageId, TextRange};
use crate::severity::Layer;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A claimed entry waiting to be reused or disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycledEntry {
    /// The entry.
    pub handle: EntryHandle,
    /// Its range when it was claimed.
    pub range: TextRange,
    /// Its layer.
    pub layer: Layer,
    /// Rule that produced it.
    pub tool_id: Option<Arc<str>>,
    /// Stage that produced it.
    pub group: StageId,
}

impl RecycledEntry {
    fn of(entry: &OverlayEntry) -> Self {
        Self {
            handle: entry.handle,
            range: entry.range,
            layer: entry.layer,
            tool_id: entry.tool_id.clone(),
            group: entry.group,
        }
    }
}

/// Pool of claimed overlay entries owned by one session.
pub trait Recycler: Send {
    /// Claim `handle` and park it. Returns `false` if another live session holds it.
    fn recycle(&mut self, store: &mut OverlayStore, handle: EntryHandle)
    -> Result<bool, OverlayError>;

    /// Take a parked entry matching the given coordinates.
    fn pickup(
        &mut self,
        range: TextRange,
        layer: Layer,
        tool_id: Option<&Arc<str>>,
    ) -> Option<RecycledEntry>;

    /// Dispose every entry still parked and return the disposed handles.
    ///
    /// With `essential_only`, entries of non-essential stages are released instead of disposed.
    fn incinerate(&mut self, store: &mut OverlayStore, essential_only: bool) -> Vec<EntryHandle>;

    /// Drop every claim of this recycler, parked or picked up, without disposing anything.
    fn release_all(&mut self, store: &mut OverlayStore) -> usize;

    /// Number of parked entries.
    fn pending(&self) -> usize;
}

/// Build the recycler for `strategy`.
pub fn recycler_for(strategy: RecyclingStrategy, token: CancellationToken) -> Box<dyn Recycler> {
    match strategy {
        RecyclingStrategy::ByRange => Box::new(OverlayRecycler::new(token)),
        RecyclingStrategy::ByTool => Box::new(ManagedOverlayRecycler::new(token)),
    }
}

#[derive(Debug)]
struct Pool<K> {
    token: CancellationToken,
    parked: HashMap<K, Vec<RecycledEntry>>,
    picked: Vec<EntryHandle>,
}

impl<K: Eq + Hash> Pool<K> {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            parked: HashMap::new(),
            picked: Vec::new(),
        }
    }

    fn recycle(
        &mut self,
        store: &mut OverlayStore,
        handle: EntryHandle,
        key: impl FnOnce(&RecycledEntry) -> K,
    ) -> Result<bool, OverlayError> {
        if !store.try_claim(handle, &self.token)? {
            tracing::trace!(entry = %handle, "entry claimed by another session");
            return Ok(false);
        }
        let recycled = store
            .get(handle)
            .map(RecycledEntry::of)
            .ok_or(OverlayError::UnknownEntry(handle.0))?;
        self.parked.entry(key(&recycled)).or_default().push(recycled);
        Ok(true)
    }

    fn pickup(&mut self, key: &K) -> Option<RecycledEntry> {
        let bucket = self.parked.get_mut(key)?;
        let recycled = bucket.pop();
        if bucket.is_empty() {
            self.parked.remove(key);
        }
        if let Some(recycled) = &recycled {
            self.picked.push(recycled.handle);
        }
        recycled
    }

    fn drain_parked(&mut self) -> Vec<RecycledEntry> {
        let mut parked: Vec<RecycledEntry> = self.parked.drain().flat_map(|(_, v)| v).collect();
        parked.sort_by_key(|recycled| recycled.handle);
        parked
    }

    fn incinerate(&mut self, store: &mut OverlayStore, essential_only: bool) -> Vec<EntryHandle> {
        let mut disposed = Vec::new();
        for recycled in self.drain_parked() {
            if essential_only && !recycled.group.is_essential() {
                store.release_claim(recycled.handle, self.token.id());
                continue;
            }
            match store.remove_entry(recycled.handle) {
                Ok(_) => disposed.push(recycled.handle),
                Err(err) => tracing::debug!(
                    entry = %recycled.handle,
                    error = %err,
                    "recycled entry already gone"
                ),
            }
        }
        self.picked.clear();
        disposed
    }

    fn release_all(&mut self, store: &mut OverlayStore) -> usize {
        let token_id = self.token.id();
        let mut released = 0;
        for recycled in self.drain_parked() {
            released += usize::from(store.release_claim(recycled.handle, token_id));
        }
        for handle in self.picked.drain(..) {
            released += usize::from(store.release_claim(handle, token_id));
        }
        released
    }

    fn pending(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }
}

/// Recycler matching entries by range and layer.
#[derive(Debug)]
pub struct OverlayRecycler {
    pool: Pool<(TextRange, Layer)>,
}

impl OverlayRecycler {
    /// Create a recycler claiming entries on behalf of `token`'s session.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            pool: Pool::new(token),
        }
    }
}

impl Recycler for OverlayRecycler {
    fn recycle(
        &mut self,
        store: &mut OverlayStore,
        handle: EntryHandle,
    ) -> Result<bool, OverlayError> {
        self.pool
            .recycle(store, handle, |recycled| (recycled.range, recycled.layer))
    }

    fn pickup(
        &mut self,
        range: TextRange,
        layer: Layer,
        _tool_id: Option<&Arc<str>>,
    ) -> Option<RecycledEntry> {
        self.pool.pickup(&(range, layer))
    }

    fn incinerate(&mut self, store: &mut OverlayStore, essential_only: bool) -> Vec<EntryHandle> {
        self.pool.incinerate(store, essential_only)
    }

    fn release_all(&mut self, store: &mut OverlayStore) -> usize {
        self.pool.release_all(store)
    }

    fn pending(&self) -> usize {
        self.pool.pending()
    }
}

/// Recycler that only reuses an entry for a diagnostic of the same rule.
#[derive(Debug)]
pub struct ManagedOverlayRecycler {
    pool: Pool<(Option<Arc<str>>, TextRange, Layer)>,
}

impl ManagedOverlayRecycler {
    /// Create a recycler claiming entries on behalf of `token`'s session.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            pool: Pool::new(token),
        }
    }
}

impl Recycler for ManagedOverlayRecycler {
    fn recycle(
        &mut self,
        store: &mut OverlayStore,
        handle: EntryHandle,
    ) -> Result<bool, OverlayError> {
        self.pool.recycle(store, handle, |recycled| {
            (recycled.tool_id.clone(), recycled.range, recycled.layer)
        })
    }

    fn pickup(
        &mut self,
        range: TextRange,
        layer: Layer,
        tool_id: Option<&Arc<str>>,
    ) -> Option<RecycledEntry> {
        self.pool.pickup(&(tool_id.cloned(), range, layer))
    }

    fn incinerate(&mut self, store: &mut OverlayStore, essential_only: bool) -> Vec<EntryHandle> {
        self.pool.incinerate(store, essential_only)
    }

    fn release_all(&mut self, store: &mut OverlayStore) -> usize {
        self.pool.release_all(store)
    }

    fn pending(&self) -> usize {
        self.pool.pending()
    }
}
