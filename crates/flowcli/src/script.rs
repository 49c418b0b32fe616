use anyhow::{anyhow, bail, Context, Result};
use flowmachine::Machine;
use std::fmt;
use std::str::FromStr;
use tokio::time::{sleep_until, Duration, Instant};

/// Control operation applied to the machine at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Suspend,
    Resume,
    Cancel,
    Emit(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Suspend => write!(f, "suspend"),
            Command::Resume => write!(f, "resume"),
            Command::Cancel => write!(f, "cancel"),
            Command::Emit(signal) => write!(f, "emit:{}", signal),
        }
    }
}

/// `<command>@<ms>`, e.g. `suspend@50` or `emit:stop@3000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub command: Command,
}

impl FromStr for ScriptStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (command, at) = s
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| anyhow!("missing '@<ms>' in step '{}'", s))?;
        let at_ms = at
            .parse::<u64>()
            .with_context(|| format!("invalid time in step '{}'", s))?;

        let command = match command {
            "suspend" => Command::Suspend,
            "resume" => Command::Resume,
            "cancel" => Command::Cancel,
            other => match other.strip_prefix("emit:") {
                Some(signal) if !signal.is_empty() => Command::Emit(signal.to_string()),
                _ => bail!("unknown command '{}'", other),
            },
        };
        Ok(Self { at_ms, command })
    }
}

/// Parse a comma separated timeline, ordered by time.
pub fn parse_script(script: &str) -> Result<Vec<ScriptStep>> {
    let mut steps = script
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<ScriptStep>())
        .collect::<Result<Vec<ScriptStep>>>()?;
    steps.sort_by_key(|s| s.at_ms);
    Ok(steps)
}

/// How a scripted run came to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Nothing left to drive.
    Idle,
    /// The timeline ran out with the machine suspended; no further resume can come.
    Suspended,
}

/// Apply `steps` relative to `origin`, then wait for the machine to settle.
pub async fn play(machine: &Machine, steps: &[ScriptStep], origin: Instant) -> Ending {
    for step in steps {
        sleep_until(origin + Duration::from_millis(step.at_ms)).await;
        tracing::debug!(at_ms = step.at_ms, command = %step.command, "script step");
        match &step.command {
            Command::Suspend => machine.suspend(),
            Command::Resume => machine.resume(),
            Command::Cancel => machine.cancel(),
            Command::Emit(signal) => machine.emit(signal),
        }
    }

    if machine.is_suspended() && !machine.is_cancelled() {
        tracing::info!(flow = %machine.current_state_name(), "script exhausted while suspended");
        return Ending::Suspended;
    }
    machine.wait_idle().await;
    Ending::Idle
}
