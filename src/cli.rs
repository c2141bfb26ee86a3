//! Front-end for the `vmthreads` binary: scripted scenarios that exercise the
//! runtime end to end.
use crate::{
    config::{RuntimeConfig, StopKind, DEFAULT_STACK_SIZE, PRIORITY_NORM},
    error::{ConfigError, ThreadError},
    metrics::RuntimeStats,
    runtime::Runtime,
    sync::{Arc, AtomicBool, AtomicU64, AtomicUsize, Ordering},
    ThreadHandle,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{process::ExitCode, thread, time::Duration};
use thiserror::Error;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stress and stop-the-world scenarios for the vmthreads runtime"
)]
pub struct Args {
    /// TOML file with runtime configuration overrides
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<String>,
    /// Override the configured stop mechanism
    #[arg(short, long, value_enum, global = true)]
    pub mechanism: Option<StopKind>,
    /// Print the final report as JSON
    #[arg(long, global = true)]
    pub json: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub scenario: Scenario,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Scenario {
    /// Many short-lived threads with their own mutex and condition; even
    /// threads are suspended and resumed, then the whole world is.
    Stress {
        #[arg(long, default_value_t = 64)]
        threads: usize,
        #[arg(long, default_value_t = 15)]
        steps: u32,
        #[arg(long, default_value_t = 100)]
        step_ms: u64,
    },
    /// Counting workers are stopped, checked for silence, and restarted.
    Stw {
        #[arg(long, default_value_t = 8)]
        workers: usize,
        #[arg(long, default_value_t = 500)]
        pause_ms: u64,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read config file: {0}")]
    Io(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("runtime error: {0}")]
    Thread(#[from] ThreadError),
    #[error("check failed: {0}")]
    Check(String),
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub mechanism: StopKind,
    pub detail: String,
    pub stats: RuntimeStats,
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error encoding report: {}", e);
                        return ExitCode::from(1);
                    }
                }
            } else {
                println!("{}: {}", report.scenario, report.detail);
                print!("{}", report.stats);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn load_config(args: &Args) -> Result<RuntimeConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| CliError::Io(e.to_string()))?;
            RuntimeConfig::from_toml_str(&text)?
        }
        None => RuntimeConfig::default(),
    };
    if let Some(kind) = args.mechanism {
        config = config.with_stop_mechanism(kind);
    }
    Ok(config)
}

pub fn run(args: &Args) -> Result<ScenarioReport, CliError> {
    let runtime = Runtime::new(load_config(args)?)?;
    let (scenario, detail) = match args.scenario {
        Scenario::Stress {
            threads,
            steps,
            step_ms,
        } => ("stress", run_stress(&runtime, threads, steps, step_ms)?),
        Scenario::Stw { workers, pause_ms } => ("stw", run_stw(&runtime, workers, pause_ms)?),
    };
    Ok(ScenarioReport {
        scenario,
        mechanism: runtime.stop_mechanism(),
        detail,
        stats: runtime.stats(),
    })
}

/// Ignores `InvalidHandle`: the thread finished before we got to it.
fn tolerate_exited(result: Result<(), ThreadError>) -> Result<(), ThreadError> {
    match result {
        Err(ThreadError::InvalidHandle) => Ok(()),
        other => other,
    }
}

fn stress_worker(runtime: &Runtime, index: usize, steps: u32, step: Duration) -> Result<(), ThreadError> {
    let cond = runtime.cond_create(&format!("ct{index:02}"))?;
    let lock = runtime.mutex_create(&format!("lt{index:02}"))?;

    for _ in 0..steps {
        runtime.mutex_lock(lock)?;
        // Nobody signals: every step is a bounded wait.
        let waited = runtime.cond_timedwait(cond, lock, step);
        runtime.mutex_unlock(lock)?;
        match waited {
            Ok(()) | Err(ThreadError::Timeout) => {}
            Err(e) => return Err(e),
        }
        runtime.safe_point();
    }

    runtime.mutex_destroy(lock)?;
    runtime.cond_destroy(cond)?;
    Ok(())
}

pub fn run_stress(
    runtime: &Arc<Runtime>,
    threads: usize,
    steps: u32,
    step_ms: u64,
) -> Result<String, CliError> {
    let step = Duration::from_millis(step_ms);
    let failures = Arc::new(AtomicUsize::new(0));

    let handles = (0..threads)
        .map(|i| {
            let (rt, failures) = (runtime.clone(), failures.clone());
            runtime.create(
                &format!("TEST_THREAD-{i:02}"),
                move || {
                    if let Err(e) = stress_worker(&rt, i, steps, step) {
                        warn!(worker = i, "stress worker failed: {e}");
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                },
                DEFAULT_STACK_SIZE,
                PRIORITY_NORM,
            )
        })
        .collect::<Result<Vec<ThreadHandle>, _>>()?;
    info!(threads, "stress threads created");

    runtime.sleep(step * 2);
    for handle in handles.iter().step_by(2) {
        tolerate_exited(runtime.suspend(*handle))?;
    }
    info!("even threads suspended");
    runtime.sleep(step * 5);
    for handle in handles.iter().step_by(2) {
        tolerate_exited(runtime.resume(*handle))?;
    }
    info!("even threads resumed");

    runtime.suspend_all();
    runtime.sleep(step * 2);
    runtime.resume_all();
    info!("world suspended and resumed");

    let budget = step * (steps + 20) + Duration::from_secs(30);
    runtime.await_non_daemon_exit(Some(budget))?;

    let failed = failures.load(Ordering::SeqCst);
    if failed > 0 {
        return Err(CliError::Check(format!("{failed} of {threads} workers failed")));
    }
    if runtime.mutexes().in_use() != 0 || runtime.conds().in_use() != 0 {
        return Err(CliError::Check("pool slots leaked".to_owned()));
    }
    Ok(format!("{threads} threads x {steps} steps completed"))
}

pub fn run_stw(runtime: &Arc<Runtime>, workers: usize, pause_ms: u64) -> Result<String, CliError> {
    let stop = Arc::new(AtomicBool::new(false));
    let counters: Vec<Arc<AtomicU64>> = (0..workers).map(|_| Arc::new(AtomicU64::new(0))).collect();

    for (i, counter) in counters.iter().enumerate() {
        let (rt, stop, counter) = (runtime.clone(), stop.clone(), counter.clone());
        runtime.create(
            &format!("counter-{i}"),
            move || {
                while !stop.load(Ordering::Relaxed) {
                    counter.fetch_add(1, Ordering::Relaxed);
                    rt.safe_point();
                }
            },
            0,
            PRIORITY_NORM,
        )?;
    }

    let pause = Duration::from_millis(pause_ms);
    thread::sleep(pause / 4);

    let frozen = {
        let world = runtime.stop_the_world(Duration::from_secs(10))?;
        let before: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        thread::sleep(pause);
        let after: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        info!(pause_us = world.elapsed_micros(), "world stopped");
        before == after
    };

    let resumed_from: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    thread::sleep(pause / 2);
    let progressed = counters
        .iter()
        .zip(&resumed_from)
        .all(|(c, &from)| c.load(Ordering::SeqCst) > from);

    stop.store(true, Ordering::SeqCst);
    runtime.await_non_daemon_exit(Some(Duration::from_secs(30)))?;

    if !frozen {
        return Err(CliError::Check("a counter advanced while the world was stopped".to_owned()));
    }
    if !progressed {
        return Err(CliError::Check("a counter did not advance after resume".to_owned()));
    }
    Ok(format!("{workers} workers frozen for {pause_ms} ms and resumed"))
}
