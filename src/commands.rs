//! Line commands for `restsync watch` and their autocomplete logic

use crate::params::{ParamValue, Params};
use crate::triggers::LifecycleEvent;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "search",
    aliases: &["s", "/", "find"],
    usage: "search <text>",
    description: "Set the search term (debounced)",
  },
  Command {
    name: "page",
    aliases: &["p", "goto"],
    usage: "page <n>",
    description: "Jump to a page",
  },
  Command {
    name: "more",
    aliases: &["m", "next"],
    usage: "more",
    description: "Load the next page",
  },
  Command {
    name: "set",
    aliases: &["filter", "f"],
    usage: "set <key=value>...",
    description: "Merge query parameters",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload", "refetch"],
    usage: "refresh",
    description: "Refetch now",
  },
  Command {
    name: "retry",
    aliases: &[],
    usage: "retry",
    description: "Clear the error and fetch again",
  },
  Command {
    name: "cancel",
    aliases: &["c", "abort"],
    usage: "cancel",
    description: "Abort the pending request",
  },
  Command {
    name: "reset",
    aliases: &[],
    usage: "reset",
    description: "Back to the initial parameters",
  },
  Command {
    name: "online",
    aliases: &["up"],
    usage: "online",
    description: "Report connectivity restored",
  },
  Command {
    name: "offline",
    aliases: &["down"],
    usage: "offline",
    description: "Report connectivity lost",
  },
  Command {
    name: "show",
    aliases: &["focus"],
    usage: "show",
    description: "Report the view as visible",
  },
  Command {
    name: "hide",
    aliases: &["blur"],
    usage: "hide",
    description: "Report the view as hidden",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit restsync",
  },
];

/// What a parsed line asks the engine to do
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  Search(String),
  Page(i64),
  More,
  Set(Params),
  Refresh,
  Retry,
  Cancel,
  Reset,
  Lifecycle(LifecycleEvent),
  Help,
  Quit,
}

/// Match priority of `cmd` for `input`, lower is better.
///
/// 0 exact name, 1 alias, 2 name prefix, 3 alias prefix, 4 name contains,
/// 5 alias contains.
fn rank(cmd: &Command, input: &str) -> Option<u32> {
  if cmd.name == input {
    Some(0)
  } else if cmd.aliases.contains(&input) {
    Some(1)
  } else if cmd.name.starts_with(input) {
    Some(2)
  } else if cmd.aliases.iter().any(|a| a.starts_with(input)) {
    Some(3)
  } else if cmd.name.contains(input) {
    // Fuzzy match (contains)
    Some(4)
  } else if cmd.aliases.iter().any(|a| a.contains(input)) {
    Some(5)
  } else {
    None
  }
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd, &input_lower).map(|priority| (cmd, priority)))
    .collect();

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// The command a typed word runs: exact name, alias or prefix only.
/// Fuzzy matches are suggestions, never executed.
pub fn resolve(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd, &word).filter(|priority| *priority <= 3).map(|p| (cmd, p)))
    .min_by_key(|(_, priority)| *priority)
    .map(|(cmd, _)| cmd)
}

/// Parse one input line into an [`Action`], resolving the command word through
/// [`resolve`].
pub fn parse(line: &str) -> Result<Action, String> {
  let line = line.trim();
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };
  if word.is_empty() {
    return Err("empty command".to_string());
  }

  let Some(cmd) = resolve(word) else {
    return Err(format!("unknown command: {}", word));
  };

  match cmd.name {
    // An empty search clears the term
    "search" => Ok(Action::Search(rest.to_string())),
    "page" => rest
      .parse::<i64>()
      .ok()
      .filter(|page| *page >= 1)
      .map(Action::Page)
      .ok_or_else(|| format!("usage: {}", cmd.usage)),
    "set" => parse_assignments(rest)
      .map(Action::Set)
      .ok_or_else(|| format!("usage: {}", cmd.usage)),
    "more" => Ok(Action::More),
    "refresh" => Ok(Action::Refresh),
    "retry" => Ok(Action::Retry),
    "cancel" => Ok(Action::Cancel),
    "reset" => Ok(Action::Reset),
    "online" => Ok(Action::Lifecycle(LifecycleEvent::Online)),
    "offline" => Ok(Action::Lifecycle(LifecycleEvent::Offline)),
    "show" => Ok(Action::Lifecycle(LifecycleEvent::Visible)),
    "hide" => Ok(Action::Lifecycle(LifecycleEvent::Hidden)),
    "help" => Ok(Action::Help),
    _ => Ok(Action::Quit),
  }
}

/// Parse `key=value` pairs. Values go through [`ParamValue::parse`].
pub fn parse_assignments(input: &str) -> Option<Params> {
  let mut params = Params::new();
  for pair in input.split_whitespace() {
    let (key, value) = pair.split_once('=')?;
    if key.is_empty() {
      return None;
    }
    params.insert(key, ParamValue::parse(value));
  }
  (!params.is_empty()).then_some(params)
}

/// One line per command, for `help`
pub fn help_text() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("  {:<22} {}", cmd.usage, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}
