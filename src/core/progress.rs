// ─── Launch events ───
// Structured lifecycle channel. The orchestrator is the only producer of
// stage events; a single consumer (CLI, UI bridge, tests) drains them.

use serde::Serialize;
use tokio::sync::mpsc;

/// Stage of the launch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchStage {
    Preparing,
    Patching,
    Authenticating,
    Launching,
    WaitingForReady,
    Complete,
    Error,
    Cancelled,
}

impl LaunchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchStage::Preparing => "preparing",
            LaunchStage::Patching => "patching",
            LaunchStage::Authenticating => "authenticating",
            LaunchStage::Launching => "launching",
            LaunchStage::WaitingForReady => "waiting-for-ready",
            LaunchStage::Complete => "complete",
            LaunchStage::Error => "error",
            LaunchStage::Cancelled => "cancelled",
        }
    }

    /// Cancellation is honoured up to and including `Launching`.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            LaunchStage::Preparing
                | LaunchStage::Patching
                | LaunchStage::Authenticating
                | LaunchStage::Launching
        )
    }
}

impl std::fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LaunchEvent {
    /// `progress` is local to `stage` (0–100); weighting stages into one
    /// global percentage is the consumer's business.
    Progress {
        stage: LaunchStage,
        progress: u8,
        detail_key: String,
        args: Vec<String>,
    },
    Started {
        pid: u32,
    },
    Ready {
        pid: u32,
    },
    ReadyTimeout {
        pid: u32,
    },
    Stopped {
        pid: u32,
        exit_code: Option<i32>,
    },
    Cancelled,
    Failed {
        stage: LaunchStage,
        message: String,
    },
}

/// Producer half of the launch event channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<LaunchEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LaunchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: LaunchEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, stage: LaunchStage, progress: u8, detail_key: &str, args: &[&str]) {
        self.emit(LaunchEvent::Progress {
            stage,
            progress: progress.min(100),
            detail_key: detail_key.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
    }

    /// Map a 0.0–1.0 fraction onto `[lo, hi]` of a stage.
    pub fn scaled(&self, stage: LaunchStage, lo: u8, hi: u8, detail_key: &str) -> ScaledProgress {
        ScaledProgress {
            sink: self.clone(),
            stage,
            lo: lo.min(hi),
            hi,
            detail_key: detail_key.to_string(),
            last: None,
        }
    }
}

/// Sub-range reporter. Only emits when the integer percentage changes so
/// that tight download loops stay cheap.
#[derive(Debug)]
pub struct ScaledProgress {
    sink: ProgressSink,
    stage: LaunchStage,
    lo: u8,
    hi: u8,
    detail_key: String,
    last: Option<u8>,
}

impl ScaledProgress {
    pub fn report(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let span = f64::from(self.hi - self.lo);
        let value = self.lo + (span * fraction).round() as u8;
        if self.last == Some(value) {
            return;
        }
        self.last = Some(value);
        self.sink.progress(self.stage, value, &self.detail_key, &[]);
    }

    pub fn report_bytes(&mut self, downloaded: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => self.report(downloaded as f64 / total as f64),
            _ => {}
        }
    }
}
