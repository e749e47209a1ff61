//! Built-in supervisor that restarts the relay on crash.
//!
//! `sshrelay supervise` spawns `sshrelay run` with the same flags and
//! monitors it. On abnormal exit the relay is restarted with exponential
//! backoff. A clean exit (code 0) causes the supervisor to stop.
//! SIGINT/SIGTERM are forwarded to the child.

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;

/// Run the supervisor loop. Does not return; exits the process when the child
/// exits cleanly or the own executable path cannot be resolved. A failed spawn
/// is retried with the same backoff as a crash.
pub async fn run_supervisor(child_args: &[String], sup_config: &SupervisorConfig) -> ! {
    let mut backoff = 1u64;
    let max_backoff = sup_config.max_backoff.max(1);
    let stable_threshold = Duration::from_secs(sup_config.stable_threshold);

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!("Supervisor: cannot resolve own executable path: {e}");
            std::process::exit(1);
        }
    };

    loop {
        let started = Instant::now();
        let status = run_relay_once(&exe, child_args).await;
        let uptime = started.elapsed();

        match status {
            Ok(s) if s.success() => {
                info!("Relay exited cleanly, supervisor stopping");
                std::process::exit(0);
            }
            Ok(s) => warn!(
                "Relay exited: {s} (uptime {:.1}s), restarting in {backoff}s",
                uptime.as_secs_f64()
            ),
            Err(e) => error!(
                "Relay spawn/wait error: {e} (uptime {:.1}s), restarting in {backoff}s",
                uptime.as_secs_f64()
            ),
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = next_backoff(backoff, max_backoff, uptime >= stable_threshold);
    }
}

/// Spawn `exe run <args>` and wait for it. Spawn and wait errors are both
/// returned as `Err`.
async fn run_relay_once(exe: &Path, child_args: &[String]) -> io::Result<ExitStatus> {
    let mut child = Command::new(exe).arg("run").args(child_args).spawn()?;
    let relay_pid = child.id();
    info!("Supervisor: started relay (pid {relay_pid:?})");
    let signal_task = tokio::spawn(forward_signals(relay_pid));
    let status = child.wait().await;
    signal_task.abort();
    status
}

/// Restart delay after the current one: back to 1s after a stable run,
/// doubled (capped) otherwise.
fn next_backoff(current: u64, max: u64, was_stable: bool) -> u64 {
    if was_stable {
        1
    } else {
        current.saturating_mul(2).min(max)
    }
}

/// Forward the first SIGINT or SIGTERM to the child.
async fn forward_signals(pid: Option<u32>) {
    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(int), Ok(term)) => (int, term),
            (Err(e), _) | (_, Err(e)) => {
                error!("Supervisor: failed to register signal handlers: {e}");
                return;
            }
        };
    let (name, signo) = tokio::select! {
        _ = sigint.recv() => ("SIGINT", libc::SIGINT),
        _ = sigterm.recv() => ("SIGTERM", libc::SIGTERM),
    };
    info!("Supervisor: forwarding {name} to child");
    if let Some(pid) = pid {
        #[allow(clippy::cast_possible_wrap)]
        unsafe {
            libc::kill(pid as i32, signo);
        }
    }
}
