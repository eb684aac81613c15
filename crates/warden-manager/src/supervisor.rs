// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Child-process supervision.
//!
//! The supervisor actor owns the child table. Exits are reported by
//! per-child waiter tasks; restarts follow exponential backoff capped at
//! one hour, and a periodic recovery sweep forgives stale failure counters.
//! Children are expected to exit on unrecoverable state, making this backoff
//! policy the single source of truth for restart timing.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_config::model::ManagerConfig;
use warden_core::jid;

/// Cadence of the due-restart check.
const RESTART_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Failure count a bot must reach before the recovery sweep considers it.
const RECOVERY_FAILURE_THRESHOLD: u32 = 5;

/// How long a bot's last failure must be in the past before the sweep
/// forgives it.
const RECOVERY_IDLE: Duration = Duration::from_secs(3600);

/// Events into the supervisor actor.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A child process exited.
    ChildExited { bot_id: i64, code: Option<i32> },
    /// A child never opened its control port within the spawn timeout.
    StartupTimedOut { bot_id: i64 },
    /// Explicit restart from the HTTP surface.
    RestartBot {
        bot_id: i64,
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// Fleet health snapshot.
    Health {
        reply: oneshot::Sender<serde_json::Value>,
    },
    /// Detailed per-bot status.
    Status {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

#[derive(Debug, Default)]
struct BotEntry {
    pid: Option<u32>,
    running: bool,
    failures: u32,
    last_failure: Option<Instant>,
    restart_due: Option<Instant>,
    /// Set when we terminated the child ourselves; its exit is not a failure.
    expected_exit: bool,
    /// Re-spawn as soon as the expected exit lands (explicit restart flow).
    respawn_on_exit: bool,
}

/// Restart delay after `failures` consecutive failures:
/// `min(initial * 2^(failures-1), cap)`.
pub fn restart_delay(failures: u32, initial: Duration, cap: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let doubled = initial.saturating_mul(2_u32.saturating_pow(failures.saturating_sub(1)));
    doubled.min(cap)
}

/// Whether the recovery sweep should forgive a bot's failure history.
pub fn recovery_eligible(failures: u32, last_failure: Option<Instant>, now: Instant) -> bool {
    failures >= RECOVERY_FAILURE_THRESHOLD
        && last_failure.is_some_and(|at| now.duration_since(at) >= RECOVERY_IDLE)
}

/// Resident set size of this process in bytes (zero when unavailable).
pub fn memory_usage_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| s.split_whitespace().nth(1).map(String::from))
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

fn send_signal(pid: u32, signal: i32) {
    // Signalling a reaped pid is harmless; kill(2) just returns ESRCH.
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

/// The supervisor actor.
pub struct Supervisor {
    cfg: ManagerConfig,
    dataplane_base: String,
    http: reqwest::Client,
    children: HashMap<i64, BotEntry>,
    tx: mpsc::Sender<SupervisorEvent>,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        cfg: ManagerConfig,
        dataplane_base: String,
        tx: mpsc::Sender<SupervisorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            dataplane_base,
            http: reqwest::Client::new(),
            children: HashMap::new(),
            tx,
            started_at: Instant::now(),
            cancel,
        }
    }

    /// Spawns the initial fleet with the configured stagger, then serves
    /// events until shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SupervisorEvent>, initial_bots: Vec<i64>) {
        for (index, bot_id) in initial_bots.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_secs(self.cfg.spawn_stagger_secs)).await;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.spawn_child(*bot_id);
        }

        let mut restart_tick = tokio::time::interval(RESTART_CHECK_INTERVAL);
        let mut sweep_tick =
            tokio::time::interval(Duration::from_secs(self.cfg.recovery_sweep_secs));
        restart_tick.reset();
        sweep_tick.reset();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown_children(&mut rx).await;
                    return;
                }
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => return,
                },
                _ = restart_tick.tick() => self.run_due_restarts(),
                _ = sweep_tick.tick() => self.recovery_sweep(),
            }
        }
    }

    async fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::ChildExited { bot_id, code } => self.on_child_exited(bot_id, code),
            SupervisorEvent::StartupTimedOut { bot_id } => self.on_startup_timeout(bot_id),
            SupervisorEvent::RestartBot { bot_id, reply } => {
                let _ = reply.send(self.on_restart_request(bot_id).await);
            }
            SupervisorEvent::Health { reply } => {
                let _ = reply.send(self.health_snapshot());
            }
            SupervisorEvent::Status { reply } => {
                let _ = reply.send(self.status_snapshot());
            }
        }
    }

    fn spawn_child(&mut self, bot_id: i64) {
        {
            let entry = self.children.entry(bot_id).or_default();
            if entry.running {
                warn!(bot_id, "child already running, not spawning");
                return;
            }
            entry.restart_due = None;
            entry.expected_exit = false;
            entry.respawn_on_exit = false;
        }

        let spawned = Command::new(&self.cfg.worker_binary)
            .env("WARDEN_BOT_ID", bot_id.to_string())
            .stdin(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(bot_id, error = %e, "failed to spawn worker");
                self.record_failure(bot_id);
                return;
            }
        };

        let pid = child.id();
        {
            let entry = self.children.entry(bot_id).or_default();
            entry.running = true;
            entry.pid = pid;
        }
        info!(bot_id, pid, "worker spawned");

        // Waiter: reports the exit back into the actor.
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(bot_id, error = %e, "waiting on worker failed");
                    None
                }
            };
            let _ = tx.send(SupervisorEvent::ChildExited { bot_id, code }).await;
        });

        // Startup probe: the worker must open its control port within the
        // spawn timeout or it gets SIGKILLed.
        if let Ok(port) = jid::worker_port(bot_id) {
            let tx = self.tx.clone();
            let timeout = Duration::from_secs(self.cfg.spawn_timeout_secs);
            tokio::spawn(async move {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                        return;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        let _ = tx.send(SupervisorEvent::StartupTimedOut { bot_id }).await;
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            });
        }
    }

    fn on_child_exited(&mut self, bot_id: i64, code: Option<i32>) {
        let Some(entry) = self.children.get_mut(&bot_id) else {
            return;
        };
        entry.running = false;
        entry.pid = None;

        if entry.expected_exit {
            info!(bot_id, ?code, "worker exited as requested");
            entry.expected_exit = false;
            if entry.respawn_on_exit {
                entry.respawn_on_exit = false;
                self.spawn_child(bot_id);
            }
            return;
        }

        warn!(bot_id, ?code, "worker exited");
        self.record_failure(bot_id);
    }

    fn on_startup_timeout(&mut self, bot_id: i64) {
        let Some(entry) = self.children.get_mut(&bot_id) else {
            return;
        };
        if !entry.running {
            return;
        }
        if let Some(pid) = entry.pid {
            error!(bot_id, pid, "worker never opened its control port, killing");
            send_signal(pid, libc::SIGKILL);
            // The waiter reports the exit; the failure is recorded there.
        }
    }

    async fn on_restart_request(&mut self, bot_id: i64) -> Result<String, String> {
        // Verify the data-plane is reachable before handing the bot a fresh
        // process that would only spin on credential fetches.
        let health = self
            .http
            .get(format!("{}/health", self.dataplane_base))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match health {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                return Err(format!("data-plane health returned {}", response.status()));
            }
            Err(e) => return Err(format!("data-plane unreachable: {e}")),
        }

        let entry = self.children.entry(bot_id).or_default();
        entry.failures = 0;
        entry.last_failure = None;
        entry.restart_due = None;

        if entry.running {
            entry.expected_exit = true;
            entry.respawn_on_exit = true;
            if let Some(pid) = entry.pid {
                info!(bot_id, pid, "terminating worker for explicit restart");
                send_signal(pid, libc::SIGTERM);
            }
            Ok(format!("bot {bot_id} restarting"))
        } else {
            self.spawn_child(bot_id);
            Ok(format!("bot {bot_id} started"))
        }
    }

    fn record_failure(&mut self, bot_id: i64) {
        let initial = Duration::from_secs(self.cfg.restart_initial_secs);
        let cap = Duration::from_secs(self.cfg.restart_cap_secs);
        let entry = self.children.entry(bot_id).or_default();
        entry.failures += 1;
        entry.last_failure = Some(Instant::now());
        let delay = restart_delay(entry.failures, initial, cap);
        entry.restart_due = Some(Instant::now() + delay);
        warn!(
            bot_id,
            failures = entry.failures,
            delay_secs = delay.as_secs(),
            "restart scheduled"
        );
    }

    fn run_due_restarts(&mut self) {
        let now = Instant::now();
        let due: Vec<i64> = self
            .children
            .iter()
            .filter(|(_, e)| !e.running && e.restart_due.is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect();
        for bot_id in due {
            info!(bot_id, "restart due");
            self.spawn_child(bot_id);
        }
    }

    /// Forgives bots whose failure burst has gone stale and brings them back
    /// if nothing is running for them.
    fn recovery_sweep(&mut self) {
        let now = Instant::now();
        let eligible: Vec<i64> = self
            .children
            .iter()
            .filter(|(_, e)| recovery_eligible(e.failures, e.last_failure, now))
            .map(|(id, _)| *id)
            .collect();
        for bot_id in eligible {
            info!(bot_id, "recovery sweep resetting failure counter");
            let entry = self.children.entry(bot_id).or_default();
            entry.failures = 0;
            entry.restart_due = None;
            if !entry.running {
                self.spawn_child(bot_id);
            }
        }
    }

    /// SIGTERM everything, give children the grace period, SIGKILL stragglers.
    async fn shutdown_children(&mut self, rx: &mut mpsc::Receiver<SupervisorEvent>) {
        info!("terminating all workers");
        for entry in self.children.values_mut() {
            if entry.running {
                entry.expected_exit = true;
                if let Some(pid) = entry.pid {
                    send_signal(pid, libc::SIGTERM);
                }
            }
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.cfg.shutdown_grace_secs);
        while self.children.values().any(|e| e.running) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(SupervisorEvent::ChildExited { bot_id, code })) => {
                    self.on_child_exited(bot_id, code);
                }
                Ok(Some(_)) | Ok(None) => {}
                Err(_) => break,
            }
        }

        for (bot_id, entry) in &mut self.children {
            if entry.running
                && let Some(pid) = entry.pid
            {
                warn!(bot_id = *bot_id, pid, "worker did not terminate, killing");
                send_signal(pid, libc::SIGKILL);
                entry.running = false;
            }
        }
    }

    fn health_snapshot(&self) -> serde_json::Value {
        let total = self.children.len();
        let active = self.children.values().filter(|e| e.running).count();
        let failed = self
            .children
            .values()
            .filter(|e| !e.running && e.failures > 0)
            .count();
        json!({
            "status": if failed == 0 { "ok" } else { "degraded" },
            "activeBots": active,
            "failedBots": failed,
            "totalBots": total,
            "uptime": self.started_at.elapsed().as_secs(),
            "memoryUsage": memory_usage_bytes(),
        })
    }

    fn status_snapshot(&self) -> serde_json::Value {
        let children: Vec<serde_json::Value> = self
            .children
            .iter()
            .map(|(bot_id, e)| {
                json!({
                    "botId": bot_id,
                    "pid": e.pid,
                    "running": e.running,
                    "restartDueInSecs": e.restart_due.map(|at| {
                        at.saturating_duration_since(Instant::now()).as_secs()
                    }),
                })
            })
            .collect();
        let failures: HashMap<String, u32> = self
            .children
            .iter()
            .filter(|(_, e)| e.failures > 0)
            .map(|(bot_id, e)| (bot_id.to_string(), e.failures))
            .collect();
        json!({
            "childProcesses": children,
            "botFailures": failures,
            "health": self.health_snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL: Duration = Duration::from_secs(300);
    const CAP: Duration = Duration::from_secs(3600);

    #[test]
    fn restart_delay_doubles_and_caps_at_one_hour() {
        assert_eq!(restart_delay(1, INITIAL, CAP), Duration::from_secs(300));
        assert_eq!(restart_delay(2, INITIAL, CAP), Duration::from_secs(600));
        assert_eq!(restart_delay(3, INITIAL, CAP), Duration::from_secs(1200));
        assert_eq!(restart_delay(4, INITIAL, CAP), Duration::from_secs(2400));
        assert_eq!(restart_delay(5, INITIAL, CAP), Duration::from_secs(3600));
        assert_eq!(restart_delay(12, INITIAL, CAP), Duration::from_secs(3600));
    }

    #[test]
    fn restart_delay_survives_large_failure_counts() {
        // 2^(f-1) overflows u32 past 32 failures; the delay must stay capped.
        assert_eq!(restart_delay(40, INITIAL, CAP), CAP);
        assert_eq!(restart_delay(u32::MAX, INITIAL, CAP), CAP);
    }

    #[test]
    fn recovery_requires_failures_and_idle_time() {
        let now = Instant::now();
        let long_ago = now.checked_sub(Duration::from_secs(7200));
        let recent = now.checked_sub(Duration::from_secs(60));

        assert!(recovery_eligible(5, long_ago, now));
        assert!(recovery_eligible(9, long_ago, now));
        assert!(!recovery_eligible(4, long_ago, now), "too few failures");
        assert!(!recovery_eligible(5, recent, now), "failed too recently");
        assert!(!recovery_eligible(5, None, now), "never failed");
    }

    #[test]
    fn memory_usage_is_nonzero_on_linux() {
        // On Linux /proc/self/statm always exists; elsewhere the helper
        // degrades to zero rather than failing.
        let bytes = memory_usage_bytes();
        if cfg!(target_os = "linux") {
            assert!(bytes > 0);
        }
    }
}
