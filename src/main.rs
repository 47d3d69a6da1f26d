use simulation::{run_simulation, SimulationConfig};
use tracing_subscriber::EnvFilter;

pub mod simulation;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            MULTI-CLIENT SYNC SIMULATIONS                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let scenarios = [
        // Small, mostly online clients
        SimulationConfig {
            clients: 4,
            ops_per_client: 100,
            sync_ratio: 0.3,
            ..SimulationConfig::default()
        },
        // Rarely syncing clients build long divergent branches
        SimulationConfig {
            clients: 4,
            ops_per_client: 200,
            sync_ratio: 0.02,
            seed: 7,
            ..SimulationConfig::default()
        },
        // Flaky network
        SimulationConfig {
            clients: 6,
            ops_per_client: 150,
            failure_ratio: 0.3,
            seed: 1337,
            ..SimulationConfig::default()
        },
        SimulationConfig {
            clients: 10,
            ops_per_client: 300,
            seed: 2024,
            ..SimulationConfig::default()
        },
    ];

    let mut diverged = 0;
    for config in scenarios {
        let stats = run_simulation(config).await?;
        stats.print();
        if !stats.converged {
            diverged += 1;
        }
    }

    if diverged > 0 {
        return Err(format!("{} simulation(s) did not converge", diverged).into());
    }

    println!("\n✓ All simulations converged!");
    Ok(())
}
