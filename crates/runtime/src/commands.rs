//! The slash-command surface. Each command resolves to imperative calls on
//! the brain plus a config save; rendering the result is the caller's job.

use anyhow::Result;
use std::path::Path;

use noema_brain::Brain;
use noema_config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/fast`, `/local`, `/smart`, … — switch the current lane.
    Lane(String),
    /// `/auto [on|off]` — toggle or set lane auto-selection.
    Auto(Option<bool>),
    Lanes,
    Status,
    Keys,
    SetKey { lane: String, key: String },
}

/// Parse a slash command. Unknown or non-slash input returns `None`.
pub fn parse(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;

    match head {
        "fast" | "local" | "smart" | "turbo" => Some(Command::Lane(head.to_string())),
        "lane" => parts.next().map(|name| Command::Lane(name.to_string())),
        "auto" => {
            let arg = match parts.next() {
                Some("on") => Some(true),
                Some("off") => Some(false),
                Some(_) => return None,
                None => None,
            };
            Some(Command::Auto(arg))
        }
        "lanes" => Some(Command::Lanes),
        "status" => Some(Command::Status),
        "keys" => Some(Command::Keys),
        "setkey" => {
            let lane = parts.next()?.to_string();
            let key = parts.next()?.to_string();
            Some(Command::SetKey { lane, key })
        }
        _ => None,
    }
}

/// Execute a command against the brain, persist the resulting config, and
/// return a display string.
pub fn execute(
    command: &Command,
    brain: &Brain,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<String> {
    let rendered = match command {
        Command::Lane(name) => {
            brain.set_current_lane(name)?;
            format!("current lane: {name}")
        }
        Command::Auto(value) => {
            let enabled = value.unwrap_or(!brain.auto_select());
            brain.set_auto_select(enabled);
            format!("lane auto-selection {}", if enabled { "on" } else { "off" })
        }
        Command::Lanes => {
            let current = brain.current_lane_name();
            brain
                .lanes()
                .iter()
                .map(|lane| {
                    let marker = if lane.name == current { "*" } else { " " };
                    format!(
                        "{marker} {} — {} {} @ {} [{:?}]",
                        lane.name,
                        lane.engine.as_str(),
                        lane.model,
                        lane.endpoint,
                        brain.breaker_state(&lane.name),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Command::Status => {
            format!(
                "lane: {} | auto: {} | lanes: {}",
                brain.current_lane_name(),
                if brain.auto_select() { "on" } else { "off" },
                brain.lanes().len(),
            )
        }
        Command::Keys => brain
            .config_snapshot()
            .lanes
            .iter()
            .map(|lane| {
                let state = match &lane.api_key {
                    Some(key) if key.starts_with("${") => format!("env {key}"),
                    Some(_) => "set".to_string(),
                    None => "unset".to_string(),
                };
                format!("{}: {state}", lane.name)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Command::SetKey { lane, key } => {
            brain.set_api_key(lane, key)?;
            format!("key stored for lane '{lane}'")
        }
    };

    // Every command persists the brain's view of the config.
    config.brain = brain.config_snapshot();
    config.save_to(config_path)?;
    Ok(rendered)
}

// ── Tests ────────────────────────────────────────────────────────────────────
