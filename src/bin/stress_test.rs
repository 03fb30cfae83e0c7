//! sheetq Stress Test Binary
//!
//! A standalone binary that hammers the request path with concurrent
//! lock-guarded enqueues and then drains everything, reporting throughput and
//! dedup/lock statistics. Run with: `cargo run --release --bin stress_test`.
//!
//! This is separate from the regular test suite because it can take a while
//! and its knobs are command-line arguments.
//!
//! # Examples
//!
//! ```bash
//! # Default: 500 requests from 8 concurrent senders
//! cargo run --release --bin stress_test
//!
//! # Heavier contention, retried ids
//! cargo run --release --bin stress_test -- --requests 5000 --concurrency 32 --dup-rate 10
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sheetq::{
    Api, BatchProcessor, DrainConfig, DurableQueue, HandleCache, LockConfig, MemoryDrive,
    MemoryKv, MemoryTabular, PersistentKv, RequestLock,
};

/// Stress test configuration
struct Config {
    /// Total requests to send
    num_requests: usize,
    /// Concurrent sender tasks
    concurrency: usize,
    /// Percentage of requests reusing an earlier id (dedup pressure)
    dup_rate: usize,
    /// Distinct destination tables to spread writes over
    destinations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_requests: 500,
            concurrency: 8,
            dup_rate: 0,
            destinations: 4,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--requests" | "-r" => {
                i += 1;
                config.num_requests = args[i].parse().expect("Invalid --requests value");
            }
            "--concurrency" | "-c" => {
                i += 1;
                config.concurrency = args[i].parse().expect("Invalid --concurrency value");
            }
            "--dup-rate" => {
                i += 1;
                config.dup_rate = args[i].parse().expect("Invalid --dup-rate value");
            }
            "--destinations" => {
                i += 1;
                config.destinations = args[i].parse().expect("Invalid --destinations value");
            }
            "--help" | "-h" => {
                println!(
                    r#"sheetq Stress Test

Usage: stress_test [OPTIONS]

Options:
  -r, --requests <N>     Total requests to send (default: 500)
  -c, --concurrency <N>  Concurrent sender tasks (default: 8)
  --dup-rate <PCT>       Percent of requests reusing an earlier id (default: 0)
  --destinations <N>     Distinct destination tables (default: 4)
  -h, --help             Show this help
"#
                );
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() {
    let config = parse_args();

    println!("sheetq Stress Test");
    println!("==================");
    println!("Requests:     {}", config.num_requests);
    println!("Concurrency:  {}", config.concurrency);
    println!("Dup rate:     {}%", config.dup_rate);
    println!("Destinations: {}", config.destinations);
    println!();

    let kv: Arc<dyn PersistentKv> = Arc::new(MemoryKv::new());
    let tabular = Arc::new(MemoryTabular::new());
    let drive = Arc::new(MemoryDrive::new());

    // Tight lock timings so contention shows up as retries, not stalls.
    let lock = RequestLock::with_config(
        kv.clone(),
        LockConfig {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(2),
            verify_pause: Duration::from_millis(1),
            ..LockConfig::default()
        },
    );
    let queue = DurableQueue::new(kv.clone());
    let api = Arc::new(Api::new(lock.clone(), queue.clone()));

    let accepted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));

    let per_task = config.num_requests / config.concurrency.max(1);
    let start = Instant::now();

    let mut handles = Vec::new();
    for task_id in 0..config.concurrency {
        let api = api.clone();
        let accepted = accepted.clone();
        let rejected = rejected.clone();
        let dup_rate = config.dup_rate;
        let destinations = config.destinations;

        handles.push(tokio::spawn(async move {
            for n in 0..per_task {
                // Reuse an earlier id for dup_rate% of sends.
                let id = if dup_rate > 0 && n % 100 < dup_rate && n > 0 {
                    format!("t{}-{}", task_id, n - 1)
                } else {
                    format!("t{}-{}", task_id, n)
                };
                let body = format!(
                    r#"{{"type":"insertRow","id":"{}","data":{{"tableName":"table-{}","data":{{"task":{},"n":{}}}}}}}"#,
                    id,
                    n % destinations.max(1),
                    task_id,
                    n
                );
                let response = api.handle(&body).await;
                if response.is_success() {
                    accepted.fetch_add(1, Ordering::Relaxed);
                } else {
                    rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for handle in handles {
        handle.await.expect("sender task panicked");
    }
    let enqueue_elapsed = start.elapsed();

    let queued = queue.size().expect("queue size");
    println!("Enqueue phase");
    println!("-------------");
    println!("  elapsed:   {:.2?}", enqueue_elapsed);
    println!("  accepted:  {}", accepted.load(Ordering::Relaxed));
    println!("  rejected:  {}", rejected.load(Ordering::Relaxed));
    println!("  queued:    {} (after dedup)", queued);
    println!(
        "  rate:      {:.0} req/s",
        config.num_requests as f64 / enqueue_elapsed.as_secs_f64()
    );
    println!();

    let cache = HandleCache::new(kv.clone(), tabular.clone(), drive);
    let processor = BatchProcessor::new(queue.clone(), cache);

    let drain_config = DrainConfig {
        columns: vec!["task".to_string(), "n".to_string()],
        ..DrainConfig::default()
    };
    let drain_start = Instant::now();
    let report = processor
        .run_scheduled(&lock, &drain_config)
        .await
        .expect("drain failed")
        .expect("lock unexpectedly busy");
    let drain_elapsed = drain_start.elapsed();

    println!("Drain phase");
    println!("-----------");
    println!("  elapsed:        {:.2?}", drain_elapsed);
    println!("  groups written: {}", report.groups_written);
    println!("  groups failed:  {}", report.groups_failed);
    println!("  rows written:   {}", report.rows_written);
    println!("  append calls:   {}", tabular.append_calls());
    println!(
        "  queue after:    {}",
        queue.size().expect("queue size after drain")
    );
}
