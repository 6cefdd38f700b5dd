//! pulse-bench - Throughput scenarios for the pulse engines
//!
//! Usage:
//!   pulse-bench pipeline              # producers -> ring -> stats -> flush
//!   pulse-bench ring                  # raw MPMC ring contention
//!   pulse-bench leaderboard           # update/query mix with decay

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use rand::Rng;

use pulse_core::{
    EventStreamProcessor, FlushCallback, Leaderboard, ProcessorConfig, RingBuffer,
};

#[derive(Parser)]
#[command(name = "pulse-bench")]
#[command(about = "Benchmark suite for the pulse analytics engines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: concurrent producers, stats, batched flush
    Pipeline {
        /// Events per producer
        #[arg(long, default_value_t = 250_000)]
        events: u64,

        /// Producer threads
        #[arg(long, default_value_t = 4)]
        producers: usize,

        /// Ring capacity (rounded to a power of two)
        #[arg(long, default_value_t = 4096)]
        buffer: usize,

        /// Batch size handed to the flush callback
        #[arg(long, default_value_t = 256)]
        batch: usize,
    },

    /// Raw ring push/pop contention
    Ring {
        /// Items per producer
        #[arg(long, default_value_t = 1_000_000)]
        items: u64,

        #[arg(long, default_value_t = 4)]
        producers: usize,

        #[arg(long, default_value_t = 4)]
        consumers: usize,

        #[arg(long, default_value_t = 1024)]
        capacity: usize,
    },

    /// Leaderboard update/query mix
    Leaderboard {
        /// Total score updates
        #[arg(long, default_value_t = 200_000)]
        updates: u64,

        /// Distinct users
        #[arg(long, default_value_t = 20_000)]
        users: u64,

        /// Top-k query every N updates
        #[arg(long, default_value_t = 1000)]
        query_stride: u64,
    },
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Pipeline {
            events,
            producers,
            buffer,
            batch,
        } => run_pipeline(events, producers, buffer, batch),
        Commands::Ring {
            items,
            producers,
            consumers,
            capacity,
        } => run_ring(items, producers, consumers, capacity),
        Commands::Leaderboard {
            updates,
            users,
            query_stride,
        } => run_leaderboard(updates, users, query_stride),
    }
}

fn report(title: &str, rows: &[(String, String)]) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (label, value) in rows {
        println!("║ {:<40} {:>19} ║", label, value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
}

fn run_pipeline(events: u64, producers: usize, buffer: usize, batch: usize) {
    let processor = EventStreamProcessor::with_config(ProcessorConfig {
        buffer_capacity: buffer,
        worker_threads: 2,
        batch_size: batch,
        flush_interval_ms: 1,
    });

    let delivered = Arc::new(AtomicU64::new(0));
    let callback: FlushCallback = {
        let delivered = delivered.clone();
        Arc::new(move |batch: Vec<pulse_core::Event>| {
            delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
        })
    };
    processor.set_flush_callback(Some(callback));

    let start = Instant::now();
    thread::scope(|scope| {
        for p in 0..producers {
            let processor = &processor;
            scope.spawn(move || {
                let mut rng = rand::rng();
                for i in 0..events {
                    let user = format!("user-{}", rng.random_range(0..50_000u32));
                    let channel = format!("channel-{}", (p as u64 * 31 + i) % 200);
                    while !processor.push_event("message", &user, &channel, 0) {
                        thread::yield_now();
                    }
                }
            });
        }
    });
    processor.flush_now();
    let elapsed = start.elapsed();

    let total = events * producers as u64;
    let unique = processor.get_unique_users_last_hour();
    let top = processor.get_top_channels(5);

    report(
        "Pipeline throughput",
        &[
            ("Events".into(), total.to_string()),
            ("Delivered".into(), delivered.load(Ordering::Relaxed).to_string()),
            ("Dropped (retried)".into(), processor.events_dropped().to_string()),
            ("Duration".into(), format!("{:.2?}", elapsed)),
            (
                "Throughput".into(),
                format!("{:.0} events/s", total as f64 / elapsed.as_secs_f64()),
            ),
            ("Unique users (est)".into(), unique.to_string()),
            (
                "Top channel".into(),
                top.first()
                    .map(|(c, n)| format!("{} x{}", c, n))
                    .unwrap_or_default(),
            ),
        ],
    );
}

fn run_ring(items: u64, producers: usize, consumers: usize, capacity: usize) {
    let ring = Arc::new(RingBuffer::<u64>::new(capacity));
    let consumed = Arc::new(AtomicU64::new(0));
    let total = items * producers as u64;

    let start = Instant::now();
    thread::scope(|scope| {
        for p in 0..producers {
            let ring = ring.clone();
            scope.spawn(move || {
                for i in 0..items {
                    let mut value = p as u64 * items + i;
                    loop {
                        match ring.push(value) {
                            Ok(()) => break,
                            Err(back) => {
                                value = back;
                                std::hint::spin_loop();
                            }
                        }
                    }
                }
            });
        }
        for _ in 0..consumers {
            let ring = ring.clone();
            let consumed = consumed.clone();
            scope.spawn(move || {
                while consumed.load(Ordering::Relaxed) < total {
                    if ring.pop().is_some() {
                        consumed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });
        }
    });
    let elapsed = start.elapsed();

    report(
        "MPMC ring contention",
        &[
            ("Items".into(), total.to_string()),
            (
                "Topology".into(),
                format!("{}p / {}c / cap {}", producers, consumers, capacity),
            ),
            ("Duration".into(), format!("{:.2?}", elapsed)),
            (
                "Throughput".into(),
                format!("{:.0} items/s", total as f64 / elapsed.as_secs_f64()),
            ),
        ],
    );
}

fn run_leaderboard(updates: u64, users: u64, query_stride: u64) {
    let board = Leaderboard::new(0.95, users as usize).expect("valid parameters");
    let base = 1_700_000_000i64;
    let mut rng = rand::rng();

    let start = Instant::now();
    let mut queries = 0u64;
    for i in 0..updates {
        let user = format!("user-{}", rng.random_range(0..users));
        let points = rng.random_range(1.0..25.0);
        // Walk time forward one minute per thousand updates.
        let ts = base + (i / 1000) as i64 * 60;
        board.update_user(&user, points, ts);

        if i % query_stride == 0 {
            let ts_now = ts;
            board.set_time_source(move || ts_now);
            let _ = board.get_top_users(10);
            queries += 1;
        }
    }
    let elapsed = start.elapsed();

    report(
        "Leaderboard update/query mix",
        &[
            ("Updates".into(), updates.to_string()),
            ("Top-k queries".into(), queries.to_string()),
            ("Resident users".into(), board.size().to_string()),
            ("Duration".into(), format!("{:.2?}", elapsed)),
            (
                "Throughput".into(),
                format!("{:.0} updates/s", updates as f64 / elapsed.as_secs_f64()),
            ),
        ],
    );
}
