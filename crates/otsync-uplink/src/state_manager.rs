//! Client-side state manager.
//!
//! The manager keeps an application state in step with a remote history.
//! Local edits are applied immediately and collected as working diffs; a
//! [`StateManager::sync`] pushes them as a commit and rebases the client onto
//! whatever happened remotely in the meantime.
//!
//! At every point between calls:
//!
//! ```text
//! state == apply(state at committed_id, pending_diffs ++ working_diffs)
//! ```
//!
//! Pending diffs belong to the outstanding proto commit: one that is being
//! pushed, or whose push failed and will be pushed again, unchanged, by the
//! next sync. The push may have landed even when it reported an error, so the
//! client never rebases while a commit is outstanding.

use crate::config::StateManagerConfig;
use crate::uplink::{FetchData, Uplink};
use futures::future::{BoxFuture, FutureExt, Shared};
use otsync_core::{OTState, OTSystem, OtError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observable synchronization status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// Nothing local that the remote has not seen.
    Clean,
    /// Local diffs wait for the next sync.
    Dirty,
    /// A push is in flight and nothing was added since.
    Committing,
    /// A push is in flight and more diffs were added meanwhile.
    DirtyCommitting,
}

struct Core<K, D, P, St> {
    /// Last remote commit the state is based on, with its level.
    committed: Option<(K, i64)>,
    /// Proto commit on top of `committed` holding exactly `pending`.
    outstanding: Option<P>,
    pending: Vec<D>,
    working: Vec<D>,
    committing: bool,
    /// Bumped by every checkout so late push results can be discarded.
    epoch: u64,
    state: St,
}

type CoreOf<U, St> = Core<<U as Uplink>::CommitId, <U as Uplink>::Diff, <U as Uplink>::ProtoCommit, St>;

type SyncFuture = Shared<BoxFuture<'static, Result<()>>>;

struct Inner<U: Uplink, S: ?Sized, St> {
    uplink: U,
    system: Arc<S>,
    config: StateManagerConfig,
    core: Mutex<CoreOf<U, St>>,
    /// The sync currently running, shared by every caller that asks for one.
    in_flight: Mutex<Option<SyncFuture>>,
}

/// Keeps an [`OTState`] synchronized through an [`Uplink`].
///
/// Cloning yields another handle to the same manager.
pub struct StateManager<U: Uplink, S: ?Sized, St> {
    inner: Arc<Inner<U, S, St>>,
}

impl<U: Uplink, S: ?Sized, St> Clone for StateManager<U, S, St> {
    fn clone(&self) -> Self {
        StateManager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U, S, St> StateManager<U, S, St>
where
    U: Uplink + 'static,
    S: OTSystem<U::Diff> + ?Sized + 'static,
    St: OTState<U::Diff> + Send + 'static,
{
    pub fn new(uplink: U, system: Arc<S>, state: St) -> Self {
        Self::with_config(uplink, system, state, StateManagerConfig::default())
    }

    pub fn with_config(uplink: U, system: Arc<S>, state: St, config: StateManagerConfig) -> Self {
        StateManager {
            inner: Arc::new(Inner {
                uplink,
                system,
                config,
                core: Mutex::new(Core {
                    committed: None,
                    outstanding: None,
                    pending: Vec::new(),
                    working: Vec::new(),
                    committing: false,
                    epoch: 0,
                    state,
                }),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn uplink(&self) -> &U {
        &self.inner.uplink
    }

    /// Replace everything local with the remote head.
    pub async fn checkout(&self) -> Result<()> {
        let data = self.inner.uplink.checkout().await?;

        let mut core = self.inner.core.lock();
        core.committed = Some((data.commit_id.clone(), data.level));
        core.outstanding = None;
        core.pending.clear();
        core.working.clear();
        core.committing = false;
        core.epoch += 1;
        core.state.init();
        core.state.apply_all(&data.diffs);
        info!(commit = ?data.commit_id, level = data.level, "checked out");
        Ok(())
    }

    /// Apply a local diff and queue it for the next sync.
    pub fn add(&self, diff: U::Diff) -> Result<()> {
        self.add_all(vec![diff])
    }

    pub fn add_all(&self, diffs: Vec<U::Diff>) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.committed.is_none() {
            return Err(OtError::NotCheckedOut);
        }
        core.state.apply_all(&diffs);
        core.working.extend(diffs);
        Ok(())
    }

    /// Push local diffs and catch up with the remote.
    ///
    /// Concurrent callers share one execution and all receive its result.
    pub async fn sync(&self) -> Result<()> {
        let future = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(running) => {
                    debug!("joining in-flight sync");
                    running.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let future = async move {
                        let result = inner.run_sync().await;
                        *inner.in_flight.lock() = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(future.clone());
                    future
                }
            }
        };
        future.await
    }

    /// Wait for remote changes and rebase onto them.
    ///
    /// Returns whether the state moved. Nothing is rebased while a commit is
    /// outstanding or if the committed id changed while waiting.
    pub async fn poll(&self) -> Result<bool> {
        let current = {
            let core = self.inner.core.lock();
            if core.committing || core.outstanding.is_some() {
                return Ok(false);
            }
            self.inner.committed_id(&core)?
        };

        let data = self.inner.uplink.poll(&current).await?;

        let mut core = self.inner.core.lock();
        let stale = core.committed.as_ref().map(|(id, _)| id) != Some(&current);
        if stale || core.committing || core.outstanding.is_some() {
            debug!(commit = ?current, "skipping stale poll result");
            return Ok(false);
        }
        let moved = data.commit_id != current;
        self.inner.rebase(&mut core, data)?;
        Ok(moved)
    }

    pub fn status(&self) -> SyncStatus {
        let core = self.inner.core.lock();
        let dirty = !core.working.is_empty() || (!core.committing && core.outstanding.is_some());
        match (dirty, core.committing) {
            (false, false) => SyncStatus::Clean,
            (true, false) => SyncStatus::Dirty,
            (false, true) => SyncStatus::Committing,
            (true, true) => SyncStatus::DirtyCommitting,
        }
    }

    pub fn is_checked_out(&self) -> bool {
        self.inner.core.lock().committed.is_some()
    }

    pub fn committed_id(&self) -> Option<U::CommitId> {
        self.inner.core.lock().committed.as_ref().map(|(id, _)| id.clone())
    }

    pub fn level(&self) -> Option<i64> {
        self.inner.core.lock().committed.as_ref().map(|(_, level)| *level)
    }

    pub fn working_diffs(&self) -> Vec<U::Diff> {
        self.inner.core.lock().working.clone()
    }

    pub fn pending_diffs(&self) -> Vec<U::Diff> {
        self.inner.core.lock().pending.clone()
    }

    /// Whether a commit is being pushed or waits for a retried push.
    pub fn has_pending_commit(&self) -> bool {
        !self.inner.core.lock().pending.is_empty()
    }

    /// Read the application state.
    pub fn with_state<T>(&self, f: impl FnOnce(&St) -> T) -> T {
        f(&self.inner.core.lock().state)
    }
}

impl<U, S, St> Inner<U, S, St>
where
    U: Uplink,
    S: OTSystem<U::Diff> + ?Sized,
    St: OTState<U::Diff> + Send,
{
    fn committed_id(&self, core: &CoreOf<U, St>) -> Result<U::CommitId> {
        core.committed
            .as_ref()
            .map(|(id, _)| id.clone())
            .ok_or(OtError::NotCheckedOut)
    }

    async fn run_sync(&self) -> Result<()> {
        let retry = self.core.lock().outstanding.is_some();
        if retry {
            self.push_outstanding().await?;
        }

        self.fetch().await?;

        let dirty = !self.core.lock().working.is_empty();
        if dirty {
            self.commit().await?;
        }
        Ok(())
    }

    /// Fetch remote changes from the committed id and rebase onto them.
    async fn fetch(&self) -> Result<()> {
        let current = {
            let core = self.core.lock();
            self.committed_id(&core)?
        };
        let data = self.uplink.fetch(&current).await?;

        let mut core = self.core.lock();
        let moved = core.committed.as_ref().map(|(id, _)| id) != Some(&current);
        if moved || core.committing || core.outstanding.is_some() {
            debug!(commit = ?current, "committed id moved during fetch");
            return Ok(());
        }
        self.rebase(&mut core, data)
    }

    /// Turn the working diffs into a proto commit on top of the committed id
    /// and push it.
    async fn commit(&self) -> Result<()> {
        let (parent, level, diffs, epoch) = {
            let mut core = self.core.lock();
            let (parent, level) = core.committed.clone().ok_or(OtError::NotCheckedOut)?;
            let working = std::mem::take(&mut core.working);
            core.pending = working;
            core.committing = true;
            (parent, level, core.pending.clone(), core.epoch)
        };

        let proto = self.uplink.create_proto_commit(parent, diffs, level).await;

        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                debug!("checked out while preparing a commit, dropping it");
                core.committing = false;
                return Ok(());
            }
            match proto {
                Ok(proto) => core.outstanding = Some(proto),
                Err(e) => {
                    // Nothing was sent, the diffs go back in front of later adds
                    core.committing = false;
                    let mut working = std::mem::take(&mut core.pending);
                    working.append(&mut core.working);
                    core.working = working;
                    return Err(e);
                }
            }
        }

        self.push_outstanding().await
    }

    /// Push the outstanding proto commit. A failure keeps it for the next
    /// sync, which pushes the very same commit again.
    async fn push_outstanding(&self) -> Result<()> {
        let (proto, epoch) = {
            let mut core = self.core.lock();
            let Some(proto) = core.outstanding.clone() else {
                return Ok(());
            };
            core.committing = true;
            (proto, core.epoch)
        };

        let result = self.uplink.push(proto).await;

        let mut core = self.core.lock();
        core.committing = false;
        if core.epoch != epoch {
            debug!("checked out during a push, ignoring its result");
            return result.map(|_| ());
        }
        match result {
            Ok(data) => {
                // The remote side now contains the pending diffs
                let head = data.commit_id.clone();
                let count = core.pending.len();
                self.rebase(&mut core, data)?;
                core.outstanding = None;
                core.pending.clear();
                info!(head = ?head, diffs = count, "committed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, pending = core.pending.len(), "push failed, keeping commit for retry");
                Err(e)
            }
        }
    }

    /// Move onto `data`: transform working diffs against the remote ones,
    /// apply the remote side to the state and keep the local side as working
    /// diffs. Leaves everything untouched on error.
    fn rebase(&self, core: &mut CoreOf<U, St>, data: FetchData<U::CommitId, U::Diff>) -> Result<()> {
        if data.diffs.is_empty() {
            core.committed = Some((data.commit_id, data.level));
            return Ok(());
        }

        let transformed = self.system.transform(&core.working, &data.diffs)?;

        core.state.apply_all(&transformed.right);
        core.working = if self.config.squash_on_rebase {
            self.system.squash(&transformed.left)
        } else {
            transformed.left
        };
        debug!(
            commit = ?data.commit_id,
            remote = data.diffs.len(),
            working = core.working.len(),
            "rebased"
        );
        core.committed = Some((data.commit_id, data.level));
        Ok(())
    }
}
