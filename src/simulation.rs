use futures::future::join_all;
use otsync_core::ops::counter::{Counter, CounterAlgebra, CounterOp};
use otsync_core::ops::register::{Register, RegisterAlgebra, RegisterOp};
use otsync_core::{ListSystem, Merged, MergedSystem, OTState, OtError, Result};
use otsync_graph::MemoryRepository;
use otsync_uplink::{RepositoryUplink, StateManager, UplinkConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One edit to a shared document: counter ops and title renames.
pub type DocumentDiff = Merged<CounterOp, RegisterOp>;

type DocumentSystem = MergedSystem<ListSystem<CounterAlgebra>, ListSystem<RegisterAlgebra>>;
type Store = MemoryRepository<u64, DocumentDiff>;
type Client = StateManager<RepositoryUplink<u64, DocumentDiff, Store, DocumentSystem>, DocumentSystem, Document>;

/// A document with a counter and a title.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    pub counter: Counter,
    pub title: Register,
}

impl OTState<DocumentDiff> for Document {
    fn init(&mut self) {
        self.counter.init();
        self.title.init();
    }

    fn apply(&mut self, diff: &DocumentDiff) {
        self.counter.apply_all(&diff.0);
        self.title.apply_all(&diff.1);
    }
}

/// Parameters of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub clients: usize,
    pub ops_per_client: usize,
    /// Probability that a client syncs after an edit.
    pub sync_ratio: f64,
    /// Probability that an edit is an absolute counter set.
    pub set_ratio: f64,
    /// Probability that an edit renames the title.
    pub rename_ratio: f64,
    /// Probability that the next push is rejected before a sync.
    pub failure_ratio: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            clients: 4,
            ops_per_client: 100,
            sync_ratio: 0.2,
            set_ratio: 0.1,
            rename_ratio: 0.05,
            failure_ratio: 0.05,
            seed: 42,
        }
    }
}

/// Statistics collected during a simulation
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub clients: usize,
    pub operations_per_client: usize,
    pub syncs: usize,
    pub failed_syncs: usize,
    pub commits: usize,
    pub merge_commits: usize,
    pub total_time: Duration,
    pub ops_per_second: f64,
    pub converged: bool,
    pub final_state: Document,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Clients:                   {:>30} ║", self.clients);
        println!("║  Operations per Client:     {:>30} ║", self.operations_per_client);
        println!("║  Successful Syncs:          {:>30} ║", self.syncs);
        println!("║  Failed Syncs (retried):    {:>30} ║", self.failed_syncs);
        println!("║  Commits:                   {:>30} ║", self.commits);
        println!("║  Merge Commits:             {:>30} ║", self.merge_commits);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("║  Final Counter:             {:>30} ║", self.final_state.counter.value);
        println!("║  Final Title:               {:>30} ║", self.final_state.title.name);
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Default)]
struct ClientReport {
    syncs: usize,
    failed_syncs: usize,
}

fn random_diff(rng: &mut StdRng, document: &Document, client: usize, op: usize, config: &SimulationConfig) -> DocumentDiff {
    if rng.gen_bool(config.rename_ratio) {
        let next = format!("title-{}-{}", client, op);
        return (vec![], vec![RegisterOp::rename(document.title.name.clone(), next)]);
    }
    let counter_op = if rng.gen_bool(config.set_ratio) {
        CounterOp::set(document.counter.value, rng.gen_range(0..1000))
    } else {
        CounterOp::Add(rng.gen_range(-10..=10))
    };
    (vec![counter_op], vec![])
}

/// Sync, counting a rejected push as a failed but recoverable attempt.
async fn sync_once(client: &Client, report: &mut ClientReport) -> Result<()> {
    match client.sync().await {
        Ok(()) => {
            report.syncs += 1;
            Ok(())
        }
        Err(e) if e.is_retryable() => {
            report.failed_syncs += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run_client(
    client: Client,
    repository: Arc<Store>,
    index: usize,
    config: SimulationConfig,
) -> Result<ClientReport> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
    let mut report = ClientReport::default();

    for op in 0..config.ops_per_client {
        let diff = client.with_state(|document| random_diff(&mut rng, document, index, op, &config));
        client.add(diff)?;

        if rng.gen_bool(config.sync_ratio) {
            if rng.gen_bool(config.failure_ratio) {
                repository.fail_next_pushes(1);
            }
            sync_once(&client, &mut report).await?;
        }

        if op % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(report)
}

/// Run concurrent clients against one repository and check they converge.
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Document Sync Simulation                            ║");
    println!("║  Clients: {} | Ops/Client: {} | Seed: {} ║",
             config.clients, config.ops_per_client, config.seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let repository: Arc<Store> = Arc::new(MemoryRepository::with_root(0));
    let system = Arc::new(MergedSystem::new(
        ListSystem::new(CounterAlgebra),
        ListSystem::new(RegisterAlgebra::lenient()),
    ));
    let uplink_config = UplinkConfig::default();

    let mut clients = Vec::with_capacity(config.clients);
    for _ in 0..config.clients {
        let uplink = RepositoryUplink::with_config(Arc::clone(&repository), Arc::clone(&system), uplink_config.clone());
        let client: Client = StateManager::new(uplink, Arc::clone(&system), Document::default());
        client.checkout().await?;
        clients.push(client);
    }

    println!("\n[Phase 1/2] Editing and syncing concurrently...");

    let mut handles = vec![];
    for (index, client) in clients.iter().enumerate() {
        let task = run_client(client.clone(), Arc::clone(&repository), index, config.clone());
        handles.push(tokio::spawn(task));
    }

    let mut report = ClientReport::default();
    for handle in handles {
        let client_report = handle
            .await
            .map_err(|e| OtError::InvariantViolation(format!("client task failed: {}", e)))??;
        report.syncs += client_report.syncs;
        report.failed_syncs += client_report.failed_syncs;
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Settling...");

    // One round pushes everything, the second lets every client catch up
    repository.fail_next_pushes(0);
    for _ in 0..2 {
        for result in join_all(clients.iter().map(|client| client.sync())).await {
            result?;
            report.syncs += 1;
        }
        for client in &clients {
            client.sync().await?;
            report.syncs += 1;
        }
    }

    let total_time = start.elapsed();
    let states: Vec<Document> = clients.iter().map(|c| c.with_state(Document::clone)).collect();
    let heads: Vec<Option<u64>> = clients.iter().map(|c| c.committed_id()).collect();
    let converged = states.windows(2).all(|w| w[0] == w[1]) && heads.windows(2).all(|w| w[0] == w[1]);

    if converged {
        info!(commits = repository.len(), "clients converged");
    } else {
        warn!(?heads, "clients diverged");
    }

    let merge_commits = repository
        .topological_order()
        .iter()
        .filter_map(|id| repository.commit(id))
        .filter(|commit| commit.is_merge())
        .count();

    let total_operations = config.clients * config.ops_per_client + report.syncs;
    println!("[Phase 2/2] ✓ Completed");

    Ok(SimulationStats {
        clients: config.clients,
        operations_per_client: config.ops_per_client,
        syncs: report.syncs,
        failed_syncs: report.failed_syncs,
        commits: repository.len(),
        merge_commits,
        total_time,
        ops_per_second: total_operations as f64 / total_time.as_secs_f64(),
        converged,
        final_state: states.into_iter().next().unwrap_or_default(),
    })
}
