//! Shared-memory latency probe.
//!
//! Two queues of `i64` timestamps, ping-ponged between a pair of roles:
//! role `a` stamps the wall clock into the first queue and spins on the
//! second; role `b` does the mirror image. Each side reports the one-way
//! latency of the records it received.
//!
//! Cross-process:
//!
//! ```text
//!   pingpong a /dev/shm/pp.1 /dev/shm/pp.2
//!   pingpong b /dev/shm/pp.1 /dev/shm/pp.2     # second terminal
//! ```
//!
//! Or `pingpong threads` for the in-process variant over the same mapped
//! files.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lapring::ReaderCursor;
use lapring_shm::{ShmOptions, ShmQueue};
use tracing::info;

const DEFAULT_ITERS: usize = 10_000;
const CAPACITY: usize = 4096;

type Probe = ShmQueue<i64, CAPACITY>;

fn nanos_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos() as i64
}

#[derive(Default)]
struct Stats {
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
}

impl Stats {
    fn record(&mut self, nanos: i64) {
        if self.count == 0 || nanos < self.min {
            self.min = nanos;
        }
        if self.count == 0 || nanos > self.max {
            self.max = nanos;
        }
        self.sum += nanos;
        self.count += 1;
    }

    fn report(&self, role: &str) {
        let mean = self.sum as f64 / self.count.max(1) as f64;
        info!(
            role,
            received = self.count,
            mean_ns = mean,
            min_ns = self.min,
            max_ns = self.max,
            "one-way latency"
        );
    }
}

/// Stamp into `out`, wait for the peer's stamp on `back`.
fn drive(out: &Probe, back: &Probe, iters: usize, pace: bool) -> Stats {
    let mut stats = Stats::default();
    let mut cursor = ReaderCursor::new();
    for _ in 0..iters {
        if pace {
            thread::sleep(Duration::from_micros(10));
        }
        out.push(nanos_now());
        loop {
            let stamp = back.recv(&mut cursor).copied();
            if let Some(sent) = stamp {
                stats.record(nanos_now() - sent);
                break;
            }
            std::hint::spin_loop();
        }
    }
    stats
}

/// Wait for a stamp on `inbound`, answer on `outbound`.
fn echo(inbound: &Probe, outbound: &Probe, iters: usize) -> Stats {
    let mut stats = Stats::default();
    let mut cursor = ReaderCursor::new();
    for _ in 0..iters {
        loop {
            let stamp = inbound.recv(&mut cursor).copied();
            if let Some(sent) = stamp {
                stats.record(nanos_now() - sent);
                break;
            }
            std::hint::spin_loop();
        }
        outbound.push(nanos_now());
    }
    stats
}

fn open(path: &str) -> Probe {
    Probe::create_or_attach(path, ShmOptions::default())
        .unwrap_or_else(|err| panic!("cannot open queue at {path}: {err}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_else(|| usage());
    let path1 = args
        .next()
        .unwrap_or_else(|| "/dev/shm/lapring.pingpong.1".to_owned());
    let path2 = args
        .next()
        .unwrap_or_else(|| "/dev/shm/lapring.pingpong.2".to_owned());
    let iters: usize = args
        .next()
        .map(|s| s.parse().unwrap_or_else(|_| usage()))
        .unwrap_or(DEFAULT_ITERS);

    match role.as_str() {
        "a" => {
            let q1 = open(&path1);
            let q2 = open(&path2);
            drive(&q1, &q2, iters, true).report("a");
        }
        "b" => {
            let q1 = open(&path1);
            let q2 = open(&path2);
            echo(&q1, &q2, iters).report("b");
        }
        "threads" => {
            // a stale file from a crashed run would replay old stamps
            let _ = Probe::unlink(&path1);
            let _ = Probe::unlink(&path2);
            let q1 = open(&path1);
            let q2 = open(&path2);
            // a second, independent mapping of the same files, so both
            // sides go through shared memory exactly as two processes would
            let q1b = open(&path1);
            let q2b = open(&path2);

            let echoer = thread::spawn(move || echo(&q1b, &q2b, iters));
            drive(&q1, &q2, iters, true).report("a");
            echoer.join().expect("echo thread panicked").report("b");

            let _ = Probe::unlink(&path1);
            let _ = Probe::unlink(&path2);
        }
        _ => usage(),
    }
}

fn usage() -> ! {
    eprintln!("usage: pingpong <a|b|threads> [path1 path2 [iters]]");
    std::process::exit(2);
}
