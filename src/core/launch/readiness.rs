// ─── Readiness detection ───
// The client prints a system-information block early on and logs
// "Interface loaded" once the main menu is up. Stdout is the only signal
// the launcher gets; some builds print neither.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};

pub const READY_MARKER: &str = "Interface loaded";
pub const SYSTEM_INFO_MARKER: &str = "System Information";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// The system-information block ended.
    SystemInfo { gpu: Vec<String>, audio: Vec<String> },
    Ready,
}

/// Line-at-a-time state machine over the client's stdout.
#[derive(Debug, Default)]
pub struct ReadinessClassifier {
    in_block: bool,
    gpu: Vec<String>,
    audio: Vec<String>,
    ready: bool,
}

impl ReadinessClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn feed(&mut self, line: &str) -> Vec<LineEvent> {
        let mut events = Vec::new();
        let trimmed = line.trim();

        if self.in_block {
            let ends_block = trimmed.is_empty()
                || trimmed.contains(READY_MARKER)
                || trimmed.contains(SYSTEM_INFO_MARKER)
                || (trimmed.starts_with('[') && !line.starts_with(char::is_whitespace));
            if ends_block {
                events.push(self.close_block());
            } else {
                self.buffer_sub_line(trimmed);
            }
        }

        if trimmed.contains(SYSTEM_INFO_MARKER) {
            self.in_block = true;
        } else if trimmed.contains(READY_MARKER) && !self.ready {
            self.ready = true;
            events.push(LineEvent::Ready);
        }

        events
    }

    /// Flush a block left open when the stream ends.
    pub fn finish(&mut self) -> Option<LineEvent> {
        self.in_block.then(|| self.close_block())
    }

    fn buffer_sub_line(&mut self, line: &str) {
        let lower = line.to_ascii_lowercase();
        if ["gpu", "renderer", "opengl", "vulkan", "graphics"]
            .iter()
            .any(|key| lower.contains(key))
        {
            self.gpu.push(line.to_string());
        } else if ["audio", "openal", "sound"].iter().any(|key| lower.contains(key)) {
            self.audio.push(line.to_string());
        }
    }

    fn close_block(&mut self) -> LineEvent {
        self.in_block = false;
        LineEvent::SystemInfo {
            gpu: std::mem::take(&mut self.gpu),
            audio: std::mem::take(&mut self.audio),
        }
    }
}

fn log_event(pid: u32, event: &LineEvent) {
    match event {
        LineEvent::SystemInfo { gpu, audio } => {
            for line in gpu {
                info!("[game:{}][gpu] {}", pid, line);
            }
            for line in audio {
                info!("[game:{}][audio] {}", pid, line);
            }
        }
        LineEvent::Ready => info!("[game:{}] client reported ready", pid),
    }
}

/// Drain the child's output in the background. The receiver resolves once
/// the ready marker shows up; it errors if stdout closes first.
pub fn watch_output<O, E>(stdout: Option<O>, stderr: Option<E>, pid: u32) -> oneshot::Receiver<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();

    if let Some(stdout) = stdout {
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut classifier = ReadinessClassifier::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!("[game:{}][stdout] {}", pid, line);
                for event in classifier.feed(&line) {
                    log_event(pid, &event);
                    if event == LineEvent::Ready {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            }
            if let Some(event) = classifier.finish() {
                log_event(pid, &event);
            }
        });
    }

    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[game:{}][stderr] {}", pid, line);
            }
        });
    }

    ready_rx
}
