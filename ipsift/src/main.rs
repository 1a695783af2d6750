use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ipsift_core::Candidate;
use ranking::{rank, survey, ScoredCandidate, SurveyOptions, SurveyOutcome};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

mod config;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "ipsift", version, about = "Select the best-performing IPs from a candidate pool")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./ipsift.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Expand and deduplicate a candidate file without probing
    Expand {
        /// File with one IPv4 address or CIDR block per line
        input: PathBuf,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Probe, score and rank candidates; save the best addresses
    Rank {
        /// File with one IPv4 address or CIDR block per line
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Output file for the ranked addresses, one per line (overwrites)
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// Echo reference target for latency measurement
        #[arg(long, default_value = "114.114.114.114")]
        target: String,
        /// Echo requests per candidate
        #[arg(long, default_value_t = 3)]
        count: u32,
        /// Timeout per echo request in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        /// TCP port probed for reachability
        #[arg(long, default_value_t = 443)]
        port: u16,
        /// Timeout for the port probe in milliseconds
        #[arg(long, default_value_t = 2000)]
        port_timeout_ms: u64,
        /// Max concurrent probe operations across all candidates
        #[arg(long, default_value_t = 50)]
        concurrency: usize,
        /// Candidate launches per second; 0 disables pacing
        #[arg(long, default_value_t = 0)]
        qps: u32,
        /// Minimum qualifying score
        #[arg(long, default_value_t = 80)]
        min_score: u8,
        /// Number of top candidates shown in the summary
        #[arg(long, default_value_t = 5)]
        display: usize,
        /// Number of top candidates written to the output file
        #[arg(long, default_value_t = 10)]
        save: usize,
        /// Measure latency against each candidate instead of the reference target
        #[arg(long, default_value_t = false)]
        ping_candidates: bool,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Optional CSV export of every scored candidate with full metrics
        #[arg(long, value_name = "FILE")]
        metrics: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref());
    match cli.command {
        Commands::Version => {
            println!("ipsift {} (core {})", env!("CARGO_PKG_VERSION"), ipsift_core::version());
        }
        Commands::Expand { input, format } => {
            let list = candidates::load_path(&input)?;
            match format {
                OutputFormat::Text => {
                    println!("{} candidates:", list.len());
                    for c in &list { println!("{}", c); }
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({
                        "input": input,
                        "count": list.len(),
                        "candidates": list.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                    });
                    println!("{}", serde_json::to_string(&obj)?);
                }
                OutputFormat::Jsonl => {
                    for c in &list {
                        println!("{}", serde_json::json!({ "candidate": c.to_string() }));
                    }
                }
            }
        }
        Commands::Rank { input, out, mut target, mut count, mut timeout_ms, mut port, mut port_timeout_ms, mut concurrency, mut qps, mut min_score, mut display, mut save, mut ping_candidates, mut format, metrics } => {
            if let Some(cfg) = &loaded_cfg { if let Some(r) = &cfg.rank {
                if r.target.is_some() { target = r.target.clone().unwrap(); }
                if r.count.is_some() { count = r.count.unwrap(); }
                if r.timeout_ms.is_some() { timeout_ms = r.timeout_ms.unwrap(); }
                if r.port.is_some() { port = r.port.unwrap(); }
                if r.port_timeout_ms.is_some() { port_timeout_ms = r.port_timeout_ms.unwrap(); }
                if r.concurrency.is_some() { concurrency = r.concurrency.unwrap(); }
                if r.qps.is_some() { qps = r.qps.unwrap(); }
                if r.min_score.is_some() { min_score = r.min_score.unwrap(); }
                if r.display.is_some() { display = r.display.unwrap(); }
                if r.save.is_some() { save = r.save.unwrap(); }
                if r.ping_candidates.is_some() { ping_candidates = r.ping_candidates.unwrap(); }
                if let Some(f) = &r.format { format = match f.as_str() { "json" => OutputFormat::Json, "jsonl" => OutputFormat::Jsonl, _ => OutputFormat::Text }; }
            }}

            let pool = candidates::load_path(&input)?;
            if pool.is_empty() {
                println!("no candidates to probe (loaded 0 from {})", input.display());
                return Ok(());
            }
            let total = pool.len();
            if format == OutputFormat::Text {
                println!("loaded {} candidates from {} (deduplicated)", total, input.display());
                println!("probing with concurrency {}, echo target {}, port {}", concurrency, if ping_candidates { "per-candidate" } else { target.as_str() }, port);
            }

            let rt = tokio::runtime::Runtime::new()?;
            let started = Instant::now();
            let started_at = now_rfc3339();
            let per_reply = Duration::from_millis(timeout_ms);
            let port_timeout = Duration::from_millis(port_timeout_ms);
            let reference = target.clone();
            let opts = SurveyOptions { concurrency, qps };
            let outcomes = rt.block_on(async move {
                let latency_fn = move |c: Candidate| {
                    let echo_target = if ping_candidates { c.to_string() } else { reference.clone() };
                    let mut probe = latency_probe::EchoProbe::new(echo_target);
                    probe.count = count;
                    probe.per_reply_timeout = per_reply;
                    async move { probe.measure().await }
                };
                let port_fn = move |c: Candidate| port_probe::check(c.0, port, port_timeout);

                let mut rx = survey(pool, latency_fn, port_fn, opts);
                let mut outcomes = Vec::with_capacity(total);
                while let Some(outcome) = rx.recv().await {
                    if format == OutputFormat::Text {
                        println!("{}", progress_line(&outcome, min_score, port));
                    }
                    outcomes.push(outcome);
                }
                outcomes
            });
            let duration = started.elapsed();
            let ended_at = now_rfc3339();

            let measured = outcomes.iter().filter(|o| matches!(o, SurveyOutcome::Scored(_))).count();
            let dropped = outcomes.len() - measured;
            let ranked = rank(&outcomes, min_score);
            let saved = &ranked[..save.min(ranked.len())];
            let shown = &ranked[..display.min(ranked.len())];

            write_address_list(&out, saved)?;
            if let Some(path) = &metrics {
                write_metrics_csv(path, &outcomes)?;
            }

            match format {
                OutputFormat::Text => {
                    println!();
                    println!("survey finished in {:.2} s", duration.as_secs_f64());
                    println!("{} measured, {} dropped, {} qualified (min score {})", measured, dropped, ranked.len(), min_score);
                    println!("saved top {} to {}", saved.len(), out.display());
                    if !shown.is_empty() {
                        println!();
                        println!("top {}:", shown.len());
                        for (i, s) in shown.iter().enumerate() {
                            println!("{}. {}", i + 1, metrics_line(s, port));
                        }
                    }
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({
                        "input": input,
                        "target": if ping_candidates { serde_json::Value::Null } else { serde_json::json!(target) },
                        "total": total,
                        "measured": measured,
                        "dropped": dropped,
                        "qualified": ranked.len(),
                        "saved": saved.len(),
                        "out": out,
                        "min_score": min_score,
                        "duration_ms": duration.as_millis() as u64,
                        "started_at": started_at,
                        "ended_at": ended_at,
                        "top": shown.iter().map(scored_json).collect::<Vec<_>>(),
                    });
                    println!("{}", serde_json::to_string(&obj)?);
                }
                OutputFormat::Jsonl => {
                    for s in &ranked {
                        println!("{}", scored_json(s));
                    }
                }
            }
        }
    }
    Ok(())
}

fn progress_line(outcome: &SurveyOutcome, min_score: u8, port: u16) -> String {
    match outcome {
        SurveyOutcome::Dropped(c) => format!("{}: latency probe returned no data (skipped)", c),
        SurveyOutcome::Scored(s) => {
            let verdict = if s.score >= min_score { "qualified" } else { "below threshold" };
            format!("{} ({})", metrics_line(s, port), verdict)
        }
    }
}

fn metrics_line(s: &ScoredCandidate, port: u16) -> String {
    let avg = s.avg_ms.map(|v| format!("{:.2} ms", v)).unwrap_or_else(|| "n/a".into());
    format!(
        "{}: avg {}, loss {:.0}%, port {} {}, score {}",
        s.candidate,
        avg,
        s.loss_pct,
        port,
        if s.port_open { "open" } else { "closed" },
        s.score,
    )
}

fn scored_json(s: &ScoredCandidate) -> serde_json::Value {
    serde_json::json!({
        "address": s.candidate.to_string(),
        "score": s.score,
        "avg_ms": s.avg_ms,
        "loss_pct": s.loss_pct,
        "port_open": s.port_open,
    })
}

/// The ranked-address file is the product of the run: plain addresses, one
/// per line, best first. A write failure here is fatal.
fn write_address_list(path: &Path, ranked: &[ScoredCandidate]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .with_context(|| format!("creating output file {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for s in ranked {
        writeln!(w, "{}", s.candidate)?;
    }
    w.flush()?;
    Ok(())
}

fn write_metrics_csv(path: &Path, outcomes: &[SurveyOutcome]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating metrics file {}", path.display()))?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(["address", "score", "avg_ms", "loss_pct", "port_open"])?;
    for outcome in outcomes {
        if let SurveyOutcome::Scored(s) = outcome {
            wtr.write_record([
                s.candidate.to_string(),
                s.score.to_string(),
                s.avg_ms.map(|v| format!("{:.3}", v)).unwrap_or_default(),
                s.loss_pct.to_string(),
                s.port_open.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}
