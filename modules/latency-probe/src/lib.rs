//! Echo-based latency and loss measurement via the system ping utility.

use ipsift_core::LatencySample;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

/// Echo probe settings. The target is explicit so callers can point the
/// probe at a shared reference host or at each candidate directly.
#[derive(Debug, Clone)]
pub struct EchoProbe {
    pub target: String,
    pub count: u32,
    pub per_reply_timeout: Duration,
}

impl EchoProbe {
    pub fn new(target: impl Into<String>) -> Self {
        EchoProbe {
            target: target.into(),
            count: 3,
            per_reply_timeout: Duration::from_secs(2),
        }
    }

    /// Whole-probe ceiling: every reply may time out, plus startup slack.
    fn deadline(&self) -> Duration {
        self.per_reply_timeout * self.count.max(1) + Duration::from_secs(2)
    }

    /// Run the echo sequence. `None` means the output carried no loss
    /// figure at all and the measurement is unusable; a timeout or a
    /// failure to run the probe at all counts as total loss.
    pub async fn measure(&self) -> Option<LatencySample> {
        // iputils -W takes whole seconds
        let reply_secs = self.per_reply_timeout.as_secs().max(1);
        let mut cmd = Command::new("ping");
        cmd.arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(reply_secs.to_string())
            .arg(&self.target)
            .kill_on_drop(true);

        match timeout(self.deadline(), cmd.output()).await {
            Ok(Ok(out)) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                parse_echo_output(&text)
            }
            Ok(Err(e)) => {
                warn!("echo probe against {} could not run: {}", self.target, e);
                Some(LatencySample::total_loss())
            }
            Err(_) => Some(LatencySample::total_loss()),
        }
    }
}

/// Extract (average reply RTT, loss percentage) from iputils-style output.
/// Missing loss figure means the measurement is unusable; a known loss with
/// no timed replies keeps the loss and leaves the average undefined.
pub fn parse_echo_output(output: &str) -> Option<LatencySample> {
    let loss_re = Regex::new(r"(\d+(?:\.\d+)?)% packet loss").unwrap();
    let rtt_re = Regex::new(r"time=(\d+\.?\d*) ms").unwrap();

    let loss_pct: f64 = loss_re.captures(output)?.get(1)?.as_str().parse().ok()?;
    let rtts: Vec<f64> = rtt_re
        .captures_iter(output)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .collect();
    let avg_ms = if rtts.is_empty() {
        None
    } else {
        Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
    };
    Some(LatencySample { avg_ms, loss_pct })
}
