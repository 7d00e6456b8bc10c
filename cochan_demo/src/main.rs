mod report;

use std::time::Duration;

use clap::Parser;
use cochan_core::{values, Coroutine, Registry, Status, Value};
use report::Reporter;

/// cochan demo options
#[derive(Parser)]
struct Opts {
    /// How many Fibonacci numbers the generator coroutine yields
    #[arg(short, long, default_value = "10")]
    count: u32,

    /// Default bound for a single resume, in milliseconds
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u64,

    /// How long the stalling body sleeps, in milliseconds
    #[arg(long, default_value = "200")]
    stall_ms: u64,

    /// Print one JSON object per handoff instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    cochan_core::set_default_timeout(Duration::from_millis(opts.timeout_ms))?;
    let reporter = Reporter::new(opts.json);

    run_generator(&reporter, opts.count).await?;
    run_accumulator(&reporter).await?;
    run_stall(&reporter, Duration::from_millis(opts.stall_ms)).await;

    Ok(())
}

/// A generator: the body yields one Fibonacci number per resume.
async fn run_generator(reporter: &Reporter, count: u32) -> anyhow::Result<()> {
    let co = Coroutine::create(|co: Coroutine, args: Vec<Value>| async move {
        let limit = args.first().and_then(Value::as_int).unwrap_or(0);
        let (mut a, mut b) = (0_i64, 1_i64);
        for _ in 0..limit {
            co.yield_(values![a]).await?;
            (a, b) = (b, a + b);
        }
        anyhow::Ok(())
    })?;

    co.resume_with_default_timeout(values![count]).await?;
    for step in 1..=count as usize {
        let output = co.resume_with_default_timeout(values![]).await?;
        reporter.handoff("fib", step, co.status(), &output);
    }
    Ok(())
}

/// Token-addressed coroutine keeping a running total of what it is sent.
async fn run_accumulator(reporter: &Reporter) -> anyhow::Result<()> {
    let registry = Registry::new();
    let id = registry.wrap(|co: Coroutine, args: Vec<Value>| async move {
        let mut total: i64 = args.iter().filter_map(Value::as_int).sum();
        loop {
            let input = co.yield_(values![total]).await?;
            if input.is_empty() {
                return anyhow::Ok(());
            }
            total += input.iter().filter_map(Value::as_int).sum::<i64>();
        }
    });

    registry.call(id, values![100]).await?;
    for (step, n) in (1..=4).enumerate() {
        let output = registry.resume(id, values![n]).await?;
        reporter.handoff("sum", step + 1, registry.status(id), &output);
    }

    // final total via the callback path
    let (tx, rx) = tokio::sync::oneshot::channel();
    let signal = registry.async_resume(
        id,
        move |output| {
            tx.send(output).ok();
        },
        values![],
    );
    signal.await??;
    let output = rx.await?;
    reporter.handoff("sum", 5, registry.status(id), &output);
    Ok(())
}

/// A body that outlives the handle's default timeout.
async fn run_stall(reporter: &Reporter, stall: Duration) {
    let created = Coroutine::builder()
        .timeout(stall / 4)
        .create(move || async move {
            tokio::time::sleep(stall).await;
        });
    let co = match created {
        Ok(co) => co,
        Err(e) => {
            reporter.failure("stall", 0, Status::Closed, &e);
            return;
        }
    };

    // startup, then a deadline, then the closed handle
    for step in 1..=3 {
        match co.resume_with_default_timeout(values![]).await {
            Ok(output) => reporter.handoff("stall", step, co.status(), &output),
            Err(e) => reporter.failure("stall", step, co.status(), &e),
        }
    }
}
