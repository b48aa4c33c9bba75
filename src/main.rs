use std::env;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};

use dsm::{
    spawn_node, ChannelNetwork, DsmError, DsmNode, NodeHandle, ProcessId, Result, RunnerConfig,
    UNINITIALIZED,
};

const DEFAULT_PROCESSES: u32 = 3;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("demo");

    let outcome = match command {
        "demo" => {
            let size = match args.get(2).map(|s| s.parse::<u32>()) {
                None => DEFAULT_PROCESSES,
                Some(Ok(n)) if n >= 2 => n,
                Some(_) => {
                    eprintln!("demo needs a process count of at least 2");
                    process::exit(2);
                }
            };
            run_demo(size)
        }
        "race" => run_race(),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = outcome {
        error!(error = %e, "run failed");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Usage: dsm [command]");
    eprintln!("Commands:");
    eprintln!("  demo [N] - N in-process nodes share var1/var2 (default 3)");
    eprintln!("  race     - two nodes win a compare-and-exchange on the same value");
    eprintln!("  (none)   - Same as 'demo'");
}

/// Spawn `size` nodes on one channel network, each logging its notifications.
fn start_cluster(size: u32) -> Result<Vec<NodeHandle>> {
    let mut network = ChannelNetwork::new(size);
    let config = RunnerConfig::default();

    network
        .endpoints()
        .into_iter()
        .map(|ep| {
            let node = DsmNode::with_handler(ep, |name: &str, value: i32, rank: ProcessId| {
                info!("Variable {} changed to {} in node rank of {}", name, value, rank);
            })?;
            spawn_node(node, config.clone())
        })
        .collect()
}

/// Poll `handle` until `name` reads `value` or the timeout passes.
fn wait_for(handle: &NodeHandle, name: &str, value: i32) -> Result<bool> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        if handle.get(name)?.as_raw() == value {
            return Ok(true);
        }
        thread::sleep(Duration::from_millis(2));
    }
    Ok(false)
}

fn report(handles: &[NodeHandle], names: &[&str]) -> Result<()> {
    for handle in handles {
        for name in names {
            let state = handle.get(name)?;
            info!(rank = handle.rank(), var = *name, ?state, "final replica");
        }
    }
    Ok(())
}

fn stop_all(handles: &mut [NodeHandle]) -> Result<()> {
    for handle in handles.iter_mut() {
        let stats = handle.stop()?;
        info!(rank = handle.rank(), ?stats, "node stopped");
    }
    Ok(())
}

fn run_demo(size: u32) -> Result<()> {
    let mut handles = start_cluster(size)?;

    info!("Process 0 writing to var1 and var2");
    handles[0].subscribe("var1")?;
    handles[0].subscribe("var2")?;
    handles[0].write("var1", 42)?;
    handles[0].compare_and_exchange("var2", UNINITIALIZED, 100)?;

    if !wait_for(&handles[1], "var1", 42)? {
        warn!("node 1 never observed var1 = 42");
    }

    let swapped = handles[1].compare_and_exchange("var1", 42, 1500)?;
    info!(swapped, "process 1 compare-and-exchange var1: 42 -> 1500");

    for handle in &handles {
        if !wait_for(handle, "var1", 1500)? {
            warn!(rank = handle.rank(), "var1 did not settle");
        }
    }

    report(&handles, &["var1", "var2"])?;
    stop_all(&mut handles)
}

/// Join every contender. A panicked contender fails the whole race.
fn join_contenders<T>(workers: Vec<thread::ScopedJoinHandle<'_, T>>) -> Result<Vec<T>> {
    workers
        .into_iter()
        .map(|w| {
            w.join()
                .map_err(|_| DsmError::RunnerUnavailable("race contender panicked".to_string()))
        })
        .collect()
}

fn run_race() -> Result<()> {
    let mut handles = start_cluster(2)?;

    handles[0].subscribe("counter")?;
    handles[0].write("counter", 0)?;
    if !wait_for(&handles[1], "counter", 0)? {
        warn!("node 1 never observed counter = 0");
    }

    // Both contenders read 0 locally and try to claim it.
    let results: Vec<(ProcessId, Result<bool>)> = thread::scope(|scope| {
        let workers: Vec<_> = handles
            .iter()
            .map(|handle| {
                scope.spawn(move || {
                    let jitter = rand::thread_rng().gen_range(0..3);
                    thread::sleep(Duration::from_millis(jitter));
                    let claim = 100 + handle.rank() as i32;
                    (handle.rank(), handle.compare_and_exchange("counter", 0, claim))
                })
            })
            .collect();

        join_contenders(workers)
    })?;

    let mut winners = 0;
    for (rank, result) in results {
        let won = result?;
        info!(rank, won, "compare-and-exchange counter: 0 -> claim");
        if won {
            winners += 1;
        }
    }

    thread::sleep(Duration::from_millis(50));
    report(&handles, &["counter"])?;

    if winners > 1 {
        let a = handles[0].get("counter")?;
        let b = handles[1].get("counter")?;
        warn!(
            winners,
            replica_0 = ?a,
            replica_1 = ?b,
            diverged = a != b,
            "both contenders won: optimistic compare-and-exchange lost an update"
        );
    }

    stop_all(&mut handles)
}
