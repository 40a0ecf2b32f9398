//! Enforcement micro-benchmark.
//!
//! Builds a standalone stage with one channel and a catch-all noop
//! object, then hammers it from a configurable number of workers and
//! reports aggregate throughput.

use std::io::Write;
use std::sync::Arc;

use git_version::git_version;
use slog::{o, Drain};
use structopt::StructOpt;

use flowgate::{Context, Response, StageBuilder};

#[derive(Debug, StructOpt)]
#[structopt(name = "flowgate-bench", about = "Data plane stage enforcement benchmark.")]
struct Opt {
    /// File to write results to instead of stdout.
    #[structopt(short = "l", long = "log-file")]
    log_file: Option<std::path::PathBuf>,

    /// Number of enforcement iterations across all workers.
    #[structopt(short = "o", long = "ops", default_value = "1000000")]
    ops: i64,

    /// Number of concurrent workers.
    #[structopt(short = "t", long = "threads", default_value = "1")]
    threads: u32,

    /// Per-operation payload size in bytes.
    #[structopt(short = "s", long = "size", default_value = "0")]
    size: i64,

    /// Show debug log information.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    const GIT_VERSION: &str = git_version!(
        args = ["--long", "--all", "--always", "--dirty=-modified"],
        fallback = "unknown"
    );

    let opt = Opt::from_args();

    // Terminal logging, compact format, async drain.
    let log_decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(log_decorator).build().fuse();
    let log_level = if opt.verbose {
        slog::Level::Debug
    } else {
        slog::Level::Info
    };
    let drain = slog::LevelFilter::new(drain, log_level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let root_log = slog::Logger::root(
        drain,
        o!("build" => GIT_VERSION, "pkg-version" => env!("CARGO_PKG_VERSION")),
    );

    slog::info!(root_log, "arguments {:?}", opt);

    let stage = Arc::new(
        StageBuilder::new()
            .stage_name("flowgate-bench")
            .channels(1)
            .create_default_objects(true)
            .default_channel(0)
            .logger(root_log.new(o!("subsystem" => "stage")))
            .build()
            .await?,
    );

    let threads = opt.threads.max(1);
    let ops_per_worker = (opt.ops.max(0) as u64) / threads as u64;
    let payload = vec![0xabu8; opt.size.max(0) as usize];

    let start = std::time::Instant::now();
    let mut workers = Vec::new();
    for worker_id in 0..threads {
        let stage = Arc::clone(&stage);
        let payload = payload.clone();
        let log = root_log.new(o!("worker" => worker_id));
        workers.push(tokio::task::spawn(async move {
            let mut enforced: u64 = 0;
            for _ in 0..ops_per_worker {
                let context =
                    Context::new(worker_id as i64, 0, 0, payload.len().max(1) as u64, 1);
                let mut response = Response::new(0);
                let status = stage.enforce_request(&context, &payload, &mut response).await;
                if status.is_enforced() {
                    enforced += 1;
                }
            }
            slog::debug!(log, "worker finished"; "enforced" => enforced);
            enforced
        }));
    }

    let mut total_enforced: u64 = 0;
    for worker in workers {
        total_enforced += worker.await?;
    }
    let elapsed = start.elapsed();

    let throughput = total_enforced as f64 / elapsed.as_secs_f64();
    let mut report = String::new();
    report.push_str("----------------------------\n");
    report.push_str(&format!("operations enforced: {}\n", total_enforced));
    report.push_str(&format!(
        "elapsed time: {}\n",
        humantime::format_duration(std::time::Duration::from_millis(
            elapsed.as_millis() as u64
        ))
    ));
    report.push_str(&format!("throughput: {:.3} ops/s\n", throughput));
    report.push_str("----------------------------\n");

    match &opt.log_file {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            file.write_all(report.as_bytes())?;
        }
        None => {
            print!("{}", report);
        }
    }

    stage.shutdown().await;
    Ok(())
}
