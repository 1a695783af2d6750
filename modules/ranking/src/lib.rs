//! Concurrent probe orchestration and composite scoring.
//!
//! Every candidate gets two independently scheduled probe tasks (latency
//! and port reachability) drawing permits from one global semaphore.
//! Results are joined per candidate, scored, and streamed back over a
//! channel; ordering across candidates is not guaranteed.

use ipsift_core::{Candidate, LatencySample};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

/// A candidate with joined probe results and its composite score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub avg_ms: Option<f64>,
    pub loss_pct: f64,
    pub port_open: bool,
    pub score: u8,
}

/// Terminal state of one candidate's survey.
#[derive(Debug, Clone, PartialEq)]
pub enum SurveyOutcome {
    /// Both probes joined and the candidate was scored (possibly 0).
    Scored(ScoredCandidate),
    /// The latency probe produced no usable measurement; the candidate is
    /// excluded from ranking rather than scored as 0.
    Dropped(Candidate),
}

/// Survey scheduling knobs.
#[derive(Debug, Clone, Copy)]
pub struct SurveyOptions {
    /// Global cap on in-flight probe operations; latency and port probes
    /// both count against it.
    pub concurrency: usize,
    /// Candidate launches per second; 0 disables pacing.
    pub qps: u32,
}

impl Default for SurveyOptions {
    fn default() -> Self {
        SurveyOptions { concurrency: 50, qps: 0 }
    }
}

/// Composite score in [0,100].
///
/// Total loss, an unreachable port, or an unknown latency disqualify the
/// candidate outright. Otherwise latency is worth up to 40 points (one
/// lost per 5 ms), loss up to 40, and the already-verified port a flat 20.
pub fn score(avg_ms: Option<f64>, loss_pct: f64, port_open: bool) -> u8 {
    if loss_pct >= 100.0 || !port_open {
        return 0;
    }
    let Some(avg) = avg_ms else {
        return 0;
    };
    let delay_score = (40.0 - avg / 5.0).max(0.0);
    let loss_score = 40.0 * (1.0 - loss_pct / 100.0);
    let port_score = 20.0;
    (delay_score + loss_score + port_score).min(100.0).floor() as u8
}

fn join_outcome(candidate: Candidate, sample: Option<LatencySample>, port_open: bool) -> SurveyOutcome {
    match sample {
        None => SurveyOutcome::Dropped(candidate),
        Some(s) => SurveyOutcome::Scored(ScoredCandidate {
            candidate,
            avg_ms: s.avg_ms,
            loss_pct: s.loss_pct,
            port_open,
            score: score(s.avg_ms, s.loss_pct, port_open),
        }),
    }
}

/// Fan out both probes for every candidate and stream outcomes as they
/// complete. The probe implementations are injected so callers decide what
/// the probes actually touch (a reference target, the candidate itself, or
/// a stub in tests). The channel closes once every candidate has reached a
/// terminal state; a candidate whose probe task fails outright is logged
/// and excluded.
pub fn survey<L, LF, P, PF>(
    candidates: Vec<Candidate>,
    latency_probe: L,
    port_probe: P,
    opts: SurveyOptions,
) -> mpsc::Receiver<SurveyOutcome>
where
    L: Fn(Candidate) -> LF + Send + Sync + 'static,
    LF: Future<Output = Option<LatencySample>> + Send + 'static,
    P: Fn(Candidate) -> PF + Send + Sync + 'static,
    PF: Future<Output = bool> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(candidates.len().max(1));
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let latency_probe = Arc::new(latency_probe);
    let port_probe = Arc::new(port_probe);

    tokio::spawn(async move {
        let mut ticker = if opts.qps > 0 {
            let mut it = interval(Duration::from_millis((1000 / opts.qps).max(1) as u64));
            it.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(it)
        } else {
            None
        };

        let mut workers = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(t) = ticker.as_mut() {
                t.tick().await;
            }
            let txc = tx.clone();
            let sem = sem.clone();
            let latency_probe = latency_probe.clone();
            let port_probe = port_probe.clone();
            workers.push(tokio::spawn(async move {
                let latency_task = tokio::spawn({
                    let sem = sem.clone();
                    let fut = (*latency_probe)(candidate);
                    async move {
                        let _permit = sem.acquire_owned().await.unwrap();
                        fut.await
                    }
                });
                let port_task = tokio::spawn({
                    let fut = (*port_probe)(candidate);
                    async move {
                        let _permit = sem.acquire_owned().await.unwrap();
                        fut.await
                    }
                });
                let (sample, port_open) = match (latency_task.await, port_task.await) {
                    (Ok(sample), Ok(port_open)) => (sample, port_open),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("candidate {} excluded, probe task failed: {}", candidate, e);
                        return;
                    }
                };
                let _ = txc.send(join_outcome(candidate, sample, port_open)).await;
            }));
        }
        for w in workers {
            let _ = w.await;
        }
    });

    rx
}

/// Filter scored outcomes to the qualifying threshold and order them by
/// (score descending, average latency ascending, address ascending). The
/// address key keeps equal measurements reproducible across runs and
/// concurrency budgets.
pub fn rank(outcomes: &[SurveyOutcome], min_score: u8) -> Vec<ScoredCandidate> {
    let mut qualified: Vec<ScoredCandidate> = outcomes
        .iter()
        .filter_map(|o| match o {
            SurveyOutcome::Scored(s) if s.score >= min_score => Some(s.clone()),
            _ => None,
        })
        .collect();
    qualified.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                a.avg_ms
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.avg_ms.unwrap_or(f64::INFINITY))
            })
            .then_with(|| a.candidate.cmp(&b.candidate))
    });
    qualified
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::ready;

    fn cand(s: &str) -> Candidate {
        s.parse().unwrap()
    }

    fn sample(avg_ms: Option<f64>, loss_pct: f64) -> Option<LatencySample> {
        Some(LatencySample { avg_ms, loss_pct })
    }

    // Stub probes: .1 and .2 are fast, .3 is slow, .2 has a closed port,
    // .9 yields no usable latency data at all.
    fn stub_latency(c: Candidate) -> std::future::Ready<Option<LatencySample>> {
        ready(match c.to_string().as_str() {
            "10.0.0.1" => sample(Some(10.0), 0.0),
            "10.0.0.2" => sample(Some(10.0), 0.0),
            "10.0.0.3" => sample(Some(60.0), 0.0),
            _ => None,
        })
    }

    fn stub_port(c: Candidate) -> std::future::Ready<bool> {
        ready(c.to_string() != "10.0.0.2")
    }

    async fn run_survey(concurrency: usize) -> Vec<SurveyOutcome> {
        let candidates = vec![
            cand("10.0.0.1"),
            cand("10.0.0.2"),
            cand("10.0.0.3"),
            cand("10.0.0.9"),
        ];
        let opts = SurveyOptions { concurrency, qps: 0 };
        let mut rx = survey(candidates, stub_latency, stub_port, opts);
        let mut out = Vec::new();
        while let Some(o) = rx.recv().await {
            out.push(o);
        }
        out
    }

    #[test]
    fn score_matches_reference_points() {
        assert_eq!(score(Some(10.0), 0.0, true), 98);
        assert_eq!(score(Some(60.0), 0.0, true), 88);
        assert_eq!(score(Some(0.0), 0.0, true), 100);
        assert_eq!(score(Some(1000.0), 50.0, true), 40);
    }

    #[test]
    fn disqualifiers_force_zero() {
        assert_eq!(score(Some(1.0), 100.0, true), 0);
        assert_eq!(score(Some(1.0), 0.0, false), 0);
        assert_eq!(score(None, 0.0, true), 0);
    }

    #[test]
    fn score_is_bounded() {
        for &avg in &[None, Some(0.0), Some(2.5), Some(199.0), Some(10_000.0)] {
            for loss in [0.0, 33.3333, 66.6667, 100.0] {
                for port in [true, false] {
                    assert!(score(avg, loss, port) <= 100);
                }
            }
        }
    }

    #[test]
    fn lower_latency_never_scores_worse() {
        let mut prev = u8::MAX;
        for step in 0..=60 {
            let s = score(Some(step as f64 * 5.0), 10.0, true);
            assert!(s <= prev);
            prev = s;
        }
    }

    #[tokio::test]
    async fn survey_scores_and_drops_per_candidate() {
        let outcomes = run_survey(50).await;
        assert_eq!(outcomes.len(), 4);

        assert!(outcomes.contains(&SurveyOutcome::Dropped(cand("10.0.0.9"))));
        // the unmeasurable candidate is dropped, never scored as 0
        assert!(!outcomes.iter().any(|o| matches!(
            o,
            SurveyOutcome::Scored(s) if s.candidate == cand("10.0.0.9")
        )));

        let ranked = rank(&outcomes, 80);
        let addrs: Vec<String> = ranked.iter().map(|s| s.candidate.to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(ranked[0].score, 98);
        assert_eq!(ranked[1].score, 88);
    }

    #[tokio::test]
    async fn concurrency_budget_does_not_change_the_ranking() {
        let serial = rank(&run_survey(1).await, 80);
        let wide = rank(&run_survey(50).await, 80);
        assert_eq!(serial, wide);
    }

    #[tokio::test]
    async fn ranked_list_order_is_a_contract() {
        let outcomes = run_survey(50).await;
        let ranked = rank(&outcomes, 0);
        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.score > b.score
                    || (a.score == b.score
                        && a.avg_ms.unwrap_or(f64::INFINITY) <= b.avg_ms.unwrap_or(f64::INFINITY))
            );
        }
    }

    #[test]
    fn ties_break_on_latency_then_address() {
        let scored = |ip: &str, avg: f64| {
            SurveyOutcome::Scored(ScoredCandidate {
                candidate: cand(ip),
                avg_ms: Some(avg),
                loss_pct: 0.0,
                port_open: true,
                score: score(Some(avg), 0.0, true),
            })
        };
        // 11.0 ms and 14.9 ms both floor to 97; 10.0 ms pairs tie at 98
        let outcomes = vec![
            scored("10.0.0.5", 11.0),
            scored("10.0.0.4", 14.9),
            scored("10.0.0.9", 10.0),
            scored("10.0.0.1", 10.0),
        ];
        let addrs: Vec<String> = rank(&outcomes, 80)
            .iter()
            .map(|s| s.candidate.to_string())
            .collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.9", "10.0.0.5", "10.0.0.4"]);
    }

    #[test]
    fn threshold_filters_disqualified_candidates() {
        let outcomes = vec![
            SurveyOutcome::Scored(ScoredCandidate {
                candidate: cand("10.0.0.2"),
                avg_ms: Some(10.0),
                loss_pct: 0.0,
                port_open: false,
                score: 0,
            }),
            SurveyOutcome::Dropped(cand("10.0.0.9")),
        ];
        assert!(rank(&outcomes, 80).is_empty());
    }
}
