//! State manager behaviour against a shared in-memory repository.

use async_trait::async_trait;
use otsync_core::ops::counter::{counter_system, Counter, CounterAlgebra, CounterOp};
use otsync_core::ops::register::{strict_register_system, Register, RegisterOp};
use otsync_core::{DiffAlgebra, ListSystem, OTState, OtError, Result};
use otsync_graph::{Commit, MemoryRepository, OTAlgorithms, Repository};
use otsync_uplink::{
    FetchData, RepositoryUplink, StateManager, StateManagerConfig, SyncStatus, Uplink, UplinkConfig,
    UplinkConfigBuilder,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

type Store<D> = MemoryRepository<u64, D>;
type System = ListSystem<CounterAlgebra>;
type CounterUplink = RepositoryUplink<u64, CounterOp, Store<CounterOp>, System>;
type CounterManager = StateManager<CounterUplink, System, Counter>;

fn manager_for<A, St>(
    repository: &Arc<Store<A::Diff>>,
    system: ListSystem<A>,
    state: St,
    config: UplinkConfig,
) -> StateManager<RepositoryUplink<u64, A::Diff, Store<A::Diff>, ListSystem<A>>, ListSystem<A>, St>
where
    A: DiffAlgebra + 'static,
    A::Diff: Send + Sync + 'static,
    St: OTState<A::Diff> + Send + 'static,
{
    let system = Arc::new(system);
    let uplink = RepositoryUplink::with_config(Arc::clone(repository), Arc::clone(&system), config);
    StateManager::new(uplink, system, state)
}

fn counter_client(repository: &Arc<Store<CounterOp>>) -> CounterManager {
    manager_for(repository, counter_system(), Counter::new(), UplinkConfig::default())
}

fn value<U>(manager: &StateManager<U, System, Counter>) -> i64
where
    U: Uplink<CommitId = u64, Diff = CounterOp> + 'static,
{
    manager.with_state(|counter| counter.value)
}

/// state == apply(state at committed_id, pending ++ working)
async fn assert_invariant<U>(manager: &StateManager<U, System, Counter>, repository: &Arc<Store<CounterOp>>)
where
    U: Uplink<CommitId = u64, Diff = CounterOp> + 'static,
{
    let algorithms: OTAlgorithms<u64, CounterOp, Store<CounterOp>, System> =
        OTAlgorithms::new(Arc::clone(repository), Arc::new(counter_system()));
    let committed = manager.committed_id().unwrap();
    let (base, _) = algorithms.checkout(&committed).await.unwrap();

    let mut expected = Counter::new();
    expected.apply_all(&base);
    expected.apply_all(&manager.pending_diffs());
    expected.apply_all(&manager.working_diffs());
    assert_eq!(value(manager), expected.value);
}

/// Uplink wrapper that counts calls, can hold pushes until released and can
/// drop the reply of a push that already landed.
struct GatedUplink {
    inner: CounterUplink,
    gate: Option<Arc<Notify>>,
    fetches: AtomicUsize,
    pushes: AtomicUsize,
    lost_replies: AtomicUsize,
}

impl GatedUplink {
    fn new(repository: &Arc<Store<CounterOp>>, gate: Option<Arc<Notify>>) -> Self {
        GatedUplink {
            inner: RepositoryUplink::new(Arc::clone(repository), Arc::new(counter_system())),
            gate,
            fetches: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            lost_replies: AtomicUsize::new(0),
        }
    }

    fn lose_next_replies(&self, count: usize) {
        self.lost_replies.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Uplink for GatedUplink {
    type CommitId = u64;
    type Diff = CounterOp;
    type ProtoCommit = Commit<u64, CounterOp>;

    async fn checkout(&self) -> Result<FetchData<u64, CounterOp>> {
        self.inner.checkout().await
    }

    async fn fetch(&self, current: &u64) -> Result<FetchData<u64, CounterOp>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(current).await
    }

    async fn poll(&self, current: &u64) -> Result<FetchData<u64, CounterOp>> {
        self.inner.poll(current).await
    }

    async fn create_proto_commit(
        &self,
        parent: u64,
        diffs: Vec<CounterOp>,
        parent_level: i64,
    ) -> Result<Commit<u64, CounterOp>> {
        self.inner.create_proto_commit(parent, diffs, parent_level).await
    }

    async fn push(&self, commit: Commit<u64, CounterOp>) -> Result<FetchData<u64, CounterOp>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        match &self.gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        let data = self.inner.push(commit).await?;
        let lost = self
            .lost_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(OtError::Repository("connection reset after push".to_string()));
        }
        Ok(data)
    }
}

#[tokio::test]
async fn test_requires_checkout() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = counter_client(&repository);

    assert_eq!(manager.add(CounterOp::Add(1)), Err(OtError::NotCheckedOut));
    assert_eq!(manager.sync().await, Err(OtError::NotCheckedOut));
    assert!(!manager.is_checked_out());
}

#[tokio::test]
async fn test_sync_pushes_working_diffs_as_one_commit() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = counter_client(&repository);
    manager.checkout().await.unwrap();

    manager.add(CounterOp::Add(2)).unwrap();
    manager.add_all(vec![CounterOp::Add(3)]).unwrap();
    assert_eq!(manager.status(), SyncStatus::Dirty);
    assert_eq!(value(&manager), 5);

    manager.sync().await.unwrap();

    assert_eq!(manager.status(), SyncStatus::Clean);
    let heads = repository.get_heads().await.unwrap();
    let head = *heads.iter().next().unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(manager.committed_id(), Some(head));
    assert_eq!(manager.level(), Some(2));

    let commit = repository.load_commit(&head).await.unwrap();
    assert_eq!(commit.diffs_from(&1), Some(&[CounterOp::Add(2), CounterOp::Add(3)][..]));
}

#[tokio::test]
async fn test_sync_without_changes_pushes_nothing() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = counter_client(&repository);
    manager.checkout().await.unwrap();

    manager.sync().await.unwrap();
    assert_eq!(repository.calls().push, 0);
    assert_eq!(manager.committed_id(), Some(1));
}

#[tokio::test]
async fn test_two_clients_converge() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let a = counter_client(&repository);
    let b = counter_client(&repository);
    a.checkout().await.unwrap();
    b.checkout().await.unwrap();

    a.add(CounterOp::Add(2)).unwrap();
    b.add(CounterOp::Add(5)).unwrap();

    a.sync().await.unwrap();
    b.sync().await.unwrap();
    assert_invariant(&b, &repository).await;
    a.sync().await.unwrap();

    assert_eq!(value(&a), 7);
    assert_eq!(value(&b), 7);
    assert_eq!(a.committed_id(), b.committed_id());
    assert_eq!(repository.get_heads().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sets_resolve_to_larger_value() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let a = counter_client(&repository);
    let b = counter_client(&repository);
    a.checkout().await.unwrap();
    b.checkout().await.unwrap();

    a.add(CounterOp::set(0, 10)).unwrap();
    b.add(CounterOp::set(0, 20)).unwrap();

    a.sync().await.unwrap();
    b.sync().await.unwrap();
    a.sync().await.unwrap();

    assert_eq!(value(&a), 20);
    assert_eq!(value(&b), 20);
}

#[tokio::test]
async fn test_failed_push_is_retried_unchanged() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = counter_client(&repository);
    manager.checkout().await.unwrap();

    manager.add(CounterOp::Add(1)).unwrap();
    repository.fail_next_pushes(1);

    let error = manager.sync().await.unwrap_err();
    assert!(error.is_retryable());
    assert_eq!(manager.pending_diffs(), vec![CounterOp::Add(1)]);
    assert!(manager.working_diffs().is_empty());
    assert!(manager.has_pending_commit());
    assert_eq!(manager.status(), SyncStatus::Dirty);
    assert_invariant(&manager, &repository).await;

    manager.add(CounterOp::Add(2)).unwrap();
    assert_eq!(manager.pending_diffs(), vec![CounterOp::Add(1)]);
    assert_eq!(manager.working_diffs(), vec![CounterOp::Add(2)]);
    manager.sync().await.unwrap();

    // Root, the retried commit, then a child holding the later add
    assert_eq!(repository.len(), 3);
    let head = manager.committed_id().unwrap();
    assert_eq!(repository.get_heads().await.unwrap().into_iter().collect::<Vec<_>>(), vec![head]);
    let commit = repository.load_commit(&head).await.unwrap();
    assert_eq!(commit.level, 3);
    let (parent, diffs) = commit.parents.iter().next().unwrap();
    assert_eq!(diffs, &vec![CounterOp::Add(2)]);
    let retried = repository.load_commit(parent).await.unwrap();
    assert_eq!(retried.diffs_from(&1), Some(&[CounterOp::Add(1)][..]));

    assert!(!manager.has_pending_commit());
    assert_eq!(manager.status(), SyncStatus::Clean);
    assert_eq!(value(&manager), 3);
}

#[tokio::test]
async fn test_retry_after_lost_reply_does_not_duplicate_commit() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = StateManager::new(
        GatedUplink::new(&repository, None),
        Arc::new(counter_system()),
        Counter::new(),
    );
    manager.checkout().await.unwrap();

    manager.add(CounterOp::Add(1)).unwrap();
    manager.uplink().lose_next_replies(1);

    let error = manager.sync().await.unwrap_err();
    assert!(error.is_retryable());
    // The commit landed even though the push reported an error
    assert_eq!(repository.len(), 2);
    assert_eq!(manager.pending_diffs(), vec![CounterOp::Add(1)]);
    assert_eq!(manager.committed_id(), Some(1));
    assert_invariant(&manager, &repository).await;

    manager.sync().await.unwrap();

    assert_eq!(repository.len(), 2);
    assert_eq!(repository.calls().push, 2);
    let head = manager.committed_id().unwrap();
    assert_eq!(repository.get_heads().await.unwrap(), BTreeSet::from([head]));

    let algorithms: OTAlgorithms<u64, CounterOp, Store<CounterOp>, System> =
        OTAlgorithms::new(Arc::clone(&repository), Arc::new(counter_system()));
    let (remote, _) = algorithms.checkout(&head).await.unwrap();
    assert_eq!(remote, vec![CounterOp::Add(1)]);
    assert_eq!(value(&manager), 1);
    assert_eq!(manager.status(), SyncStatus::Clean);
}

#[tokio::test]
async fn test_poll_waits_for_outstanding_commit() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let other = counter_client(&repository);
    let manager = StateManager::new(
        GatedUplink::new(&repository, None),
        Arc::new(counter_system()),
        Counter::new(),
    );
    other.checkout().await.unwrap();
    manager.checkout().await.unwrap();

    manager.add(CounterOp::Add(1)).unwrap();
    manager.uplink().lose_next_replies(1);
    assert!(manager.sync().await.is_err());

    other.add(CounterOp::Add(5)).unwrap();
    other.sync().await.unwrap();

    // Rebasing now could apply the already landed commit twice
    assert!(!manager.poll().await.unwrap());
    assert_eq!(manager.committed_id(), Some(1));

    manager.sync().await.unwrap();
    other.sync().await.unwrap();
    assert_eq!(value(&manager), 6);
    assert_eq!(value(&other), 6);
    assert_eq!(manager.committed_id(), other.committed_id());
}

#[tokio::test]
async fn test_transform_conflict_leaves_state_untouched() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let a = manager_for(&repository, strict_register_system(), Register::default(), UplinkConfig::default());
    let b = manager_for(&repository, strict_register_system(), Register::default(), UplinkConfig::default());
    a.checkout().await.unwrap();
    b.checkout().await.unwrap();

    a.add(RegisterOp::rename("", "x")).unwrap();
    a.sync().await.unwrap();

    b.add(RegisterOp::rename("", "y")).unwrap();
    let error = b.sync().await.unwrap_err();

    assert!(matches!(error, OtError::TransformConflict(_)));
    assert!(!error.is_retryable());
    assert_eq!(b.with_state(|r| r.name.clone()), "y");
    assert_eq!(b.working_diffs(), vec![RegisterOp::rename("", "y")]);
    assert_eq!(b.committed_id(), Some(1));
}

#[tokio::test]
async fn test_concurrent_sync_calls_share_one_execution() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let manager = StateManager::new(
        GatedUplink::new(&repository, None),
        Arc::new(counter_system()),
        Counter::new(),
    );
    manager.checkout().await.unwrap();
    manager.add(CounterOp::Add(4)).unwrap();

    let (first, second) = tokio::join!(manager.sync(), manager.sync());
    first.unwrap();
    second.unwrap();

    assert_eq!(manager.uplink().pushes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.uplink().fetches.load(Ordering::SeqCst), 1);
    assert_eq!(repository.calls().push, 1);

    // The slot is free again once the shared sync finished
    manager.sync().await.unwrap();
    assert_eq!(manager.uplink().fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_status_while_committing() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let gate = Arc::new(Notify::new());
    let manager = StateManager::new(
        GatedUplink::new(&repository, Some(Arc::clone(&gate))),
        Arc::new(counter_system()),
        Counter::new(),
    );
    manager.checkout().await.unwrap();
    manager.add(CounterOp::Add(1)).unwrap();

    let syncing = manager.clone();
    let handle = tokio::spawn(async move { syncing.sync().await });

    while manager.status() != SyncStatus::Committing {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.pending_diffs(), vec![CounterOp::Add(1)]);

    manager.add(CounterOp::Add(10)).unwrap();
    assert_eq!(manager.status(), SyncStatus::DirtyCommitting);
    assert_eq!(value(&manager), 11);

    gate.notify_one();
    handle.await.unwrap().unwrap();

    assert_eq!(manager.status(), SyncStatus::Dirty);
    assert_eq!(manager.working_diffs(), vec![CounterOp::Add(10)]);

    gate.notify_one();
    manager.sync().await.unwrap();
    assert_eq!(manager.status(), SyncStatus::Clean);
    assert_eq!(value(&manager), 11);
}

#[tokio::test]
async fn test_poll_rebases_onto_remote_commit() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let config = UplinkConfigBuilder::new().poll_interval(5).poll_timeout(2000).build();
    let a = counter_client(&repository);
    let b = manager_for(&repository, counter_system(), Counter::new(), config);
    a.checkout().await.unwrap();
    b.checkout().await.unwrap();

    b.add(CounterOp::Add(1)).unwrap();

    let poller = b.clone();
    let handle = tokio::spawn(async move { poller.poll().await });

    a.add(CounterOp::Add(6)).unwrap();
    a.sync().await.unwrap();

    assert!(handle.await.unwrap().unwrap());
    assert_eq!(value(&b), 7);
    assert_eq!(b.committed_id(), a.committed_id());
    assert_eq!(b.working_diffs(), vec![CounterOp::Add(1)]);
    assert_invariant(&b, &repository).await;
}

#[tokio::test]
async fn test_poll_times_out_without_changes() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let config = UplinkConfigBuilder::new().poll_interval(5).poll_timeout(20).build();
    let manager = manager_for(&repository, counter_system(), Counter::new(), config);
    manager.checkout().await.unwrap();

    assert!(!manager.poll().await.unwrap());
    assert_eq!(manager.committed_id(), Some(1));
}

#[tokio::test]
async fn test_rebase_keeps_working_diffs_unsquashed_when_configured() {
    let repository = Arc::new(MemoryRepository::with_root(1));
    let a = counter_client(&repository);
    let b = {
        let system = Arc::new(counter_system());
        let uplink: CounterUplink = RepositoryUplink::new(Arc::clone(&repository), Arc::clone(&system));
        let config = StateManagerConfig {
            squash_on_rebase: false,
        };
        StateManager::with_config(uplink, system, Counter::new(), config)
    };
    a.checkout().await.unwrap();
    b.checkout().await.unwrap();

    a.add(CounterOp::Add(1)).unwrap();
    a.sync().await.unwrap();

    b.add_all(vec![CounterOp::Add(2), CounterOp::Add(3)]).unwrap();
    b.poll().await.unwrap();

    assert_eq!(b.working_diffs(), vec![CounterOp::Add(2), CounterOp::Add(3)]);
    assert_eq!(value(&b), 6);
}

#[derive(Clone, Debug)]
enum Action {
    Add(bool, i64),
    Set(bool, i64),
    Sync(bool),
    FailNextPush,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (any::<bool>(), -5i64..5).prop_map(|(first, delta)| Action::Add(first, delta)),
        1 => (any::<bool>(), 0i64..30).prop_map(|(first, next)| Action::Set(first, next)),
        2 => any::<bool>().prop_map(Action::Sync),
        1 => Just(Action::FailNextPush),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn invariant_holds_under_random_workload(actions in prop::collection::vec(action(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (a, b) = runtime.block_on(async {
            let repository = Arc::new(MemoryRepository::with_root(1));
            let a = counter_client(&repository);
            let b = counter_client(&repository);
            a.checkout().await.unwrap();
            b.checkout().await.unwrap();

            for action in actions {
                match action {
                    Action::Add(first, delta) => {
                        let client = if first { &a } else { &b };
                        client.add(CounterOp::Add(delta)).unwrap();
                    }
                    Action::Set(first, next) => {
                        let client = if first { &a } else { &b };
                        client.add(CounterOp::set(value(client), next)).unwrap();
                    }
                    Action::Sync(first) => {
                        let client = if first { &a } else { &b };
                        if let Err(error) = client.sync().await {
                            assert!(error.is_retryable());
                        }
                    }
                    Action::FailNextPush => repository.fail_next_pushes(1),
                }
                assert_invariant(&a, &repository).await;
                assert_invariant(&b, &repository).await;
            }

            repository.fail_next_pushes(0);
            a.sync().await.unwrap();
            b.sync().await.unwrap();
            a.sync().await.unwrap();
            (value(&a), value(&b))
        });

        prop_assert_eq!(a, b);
    }
}
