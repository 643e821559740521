//! Agent response parsing.
//!
//! Responses are free text with optional `OBSERVATION:`, `PATTERN:`,
//! `MEMORY:` and `ACTION:` labelled lines. Commands are any
//! `Namespace.function(args)` occurrence anywhere in the text. Argument lists
//! may contain nested parentheses and quoted strings; an unterminated call is
//! skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static CALL_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\(")
        .expect("call head pattern is valid")
});

pub const DEFAULT_NAMESPACE: &str = "GM";

/// One extracted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GmCall {
    pub namespace: String,
    pub function: String,
    pub args: Vec<String>,
    /// The call exactly as it appeared, e.g. `GM.heal(0)`.
    pub raw: String,
}

impl fmt::Display for GmCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl GmCall {
    fn arg(&self, index: usize) -> &str {
        self.args.get(index).map_or("?", |a| a.trim_matches(|c| c == '"' || c == '\''))
    }

    fn slot_name(&self, index: usize, party: &[String]) -> String {
        let slot = self.arg(index);
        slot.parse::<usize>()
            .ok()
            .and_then(|s| party.get(s).cloned())
            .unwrap_or_else(|| format!("slot {slot}"))
    }

    /// Human-readable description for the log, using party names for slots.
    pub fn describe(&self, party: &[String]) -> String {
        match self.function.as_str() {
            "heal" => format!("Heal {}", self.slot_name(0, party)),
            "healParty" => "Heal whole party".to_string(),
            "setLevel" => format!("Set {} to level {}", self.slot_name(0, party), self.arg(1)),
            "addEVs" => format!(
                "Add {} {} EVs to {}",
                self.arg(2),
                self.arg(1),
                self.slot_name(0, party)
            ),
            "setFriendship" => format!(
                "Set {} friendship to {}",
                self.slot_name(0, party),
                self.arg(1)
            ),
            "setMove" => format!("Teach {} move {}", self.slot_name(0, party), self.arg(2)),
            "giveItem" => format!(
                "Give item {} x{}",
                self.arg(0),
                self.args.get(1).map_or("1", String::as_str)
            ),
            "setShiny" => format!("Make {} shiny", self.slot_name(0, party)),
            _ => self.raw.clone(),
        }
    }
}

/// Label of a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLabel {
    Observation,
    Pattern,
    Memory,
    Action,
}

impl LineLabel {
    const ALL: [(LineLabel, &'static str); 4] = [
        (LineLabel::Observation, "OBSERVATION:"),
        (LineLabel::Pattern, "PATTERN:"),
        (LineLabel::Memory, "MEMORY:"),
        (LineLabel::Action, "ACTION:"),
    ];

    /// Short tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            LineLabel::Observation => "OBS",
            LineLabel::Pattern => "PTN",
            LineLabel::Memory => "MEM",
            LineLabel::Action => "ACT",
        }
    }

    fn split(line: &str) -> Option<(LineLabel, &str)> {
        let stripped = line.trim().trim_start_matches(['*', '-', ' ']);
        Self::ALL.iter().find_map(|(label, prefix)| {
            stripped
                .strip_prefix(prefix)
                .map(|rest| (*label, rest.trim_start_matches('*').trim()))
        })
    }
}

/// What to relay for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Call(GmCall),
    /// A shell command taken from the ACTION line.
    Shell(String),
}

/// Parsed agent response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub labelled: Vec<(LineLabel, String)>,
    pub calls: Vec<GmCall>,
    /// Last ACTION line, used for the shell fallback.
    pub action_line: Option<String>,
}

impl ParsedResponse {
    pub fn first(&self, label: LineLabel) -> Option<&str> {
        self.labelled
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, text)| text.as_str())
    }

    /// Actions to relay, in order.
    ///
    /// When no calls were found and `shell_fallback` is set, a non-`none`
    /// ACTION line becomes a single shell action with `HOST` replaced.
    pub fn actions(&self, host: &str, shell_fallback: bool) -> Vec<Action> {
        if !self.calls.is_empty() {
            return self.calls.iter().cloned().map(Action::Call).collect();
        }
        if !shell_fallback {
            return Vec::new();
        }
        match self.action_line.as_deref() {
            Some(line) if !line.is_empty() && !line.eq_ignore_ascii_case("none") => {
                vec![Action::Shell(normalize_shell_command(line, host))]
            }
            _ => Vec::new(),
        }
    }
}

/// Response parser for a fixed set of command namespaces.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    namespaces: Vec<String>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new([DEFAULT_NAMESPACE])
    }
}

impl ResponseParser {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(&self, text: &str) -> ParsedResponse {
        let mut labelled = Vec::new();
        let mut action_line = None;
        for line in text.lines() {
            if let Some((label, rest)) = LineLabel::split(line) {
                if label == LineLabel::Action {
                    action_line = Some(rest.to_string());
                }
                labelled.push((label, rest.to_string()));
            }
        }

        ParsedResponse {
            labelled,
            calls: self.extract_calls(text),
            action_line,
        }
    }

    /// Every well-formed call in `text`, in order of appearance.
    pub fn extract_calls(&self, text: &str) -> Vec<GmCall> {
        let mut calls = Vec::new();
        let mut pos = 0;
        while let Some(caps) = CALL_HEAD.captures_at(text, pos) {
            let (Some(head), Some(ns), Some(func)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                break;
            };
            pos = head.end();
            if !self.namespaces.iter().any(|n| n == ns.as_str()) {
                continue;
            }
            let Some(close) = scan_args(&text[head.end()..]) else {
                continue;
            };
            let inner = &text[head.end()..head.end() + close];
            calls.push(GmCall {
                namespace: ns.as_str().to_string(),
                function: func.as_str().to_string(),
                args: split_args(inner),
                raw: text[head.start()..head.end() + close + 1].to_string(),
            });
            pos = head.end() + close + 1;
        }
        calls
    }
}

/// Byte offset of the `)` closing an argument list, or `None` if unterminated.
///
/// A quote only opens a string at the start of an argument, so apostrophes
/// inside bare words are plain text.
fn scan_args(rest: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut arg_start = true;
    for (i, c) in rest.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            } else if c == '\n' {
                return None;
            }
            continue;
        }
        match c {
            '"' | '\'' if arg_start => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            '\n' => return None,
            _ => {}
        }
        arg_start = matches!(c, '(' | '[' | '{' | ',') || (arg_start && c.is_whitespace());
    }
    None
}

fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut arg_start = true;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' if arg_start => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
        arg_start = matches!(c, '(' | '[' | '{' | ',') || (arg_start && c.is_whitespace());
    }
    let last = inner[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    args
}

/// Substitute the emulator host and make sure `nc` does not hang.
pub fn normalize_shell_command(command: &str, host: &str) -> String {
    let mut cmd = command
        .replace(" HOST ", &format!(" {host} "))
        .replace("nc HOST", &format!("nc {host}"));
    if cmd.contains("| nc ") && !cmd.contains(" -w ") && !cmd.contains(" -q ") {
        cmd = cmd.replace("| nc ", "| nc -w 1 ");
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_calls() {
        let text = "OBSERVATION: Torchic nearly fainted\n\
                    PATTERN: keeps leading with Torchic\n\
                    MEMORY: note the close call\n\
                    ACTION: GM.heal(0)\n\
                    then maybe GM.addEVs(0, \"atk\", 4) later";
        let parsed = ResponseParser::default().parse(text);

        assert_eq!(parsed.first(LineLabel::Observation), Some("Torchic nearly fainted"));
        assert_eq!(parsed.first(LineLabel::Memory), Some("note the close call"));
        assert_eq!(parsed.action_line.as_deref(), Some("GM.heal(0)"));
        assert_eq!(parsed.calls.len(), 2);
        assert_eq!(parsed.calls[0].raw, "GM.heal(0)");
        assert_eq!(parsed.calls[1].function, "addEVs");
        assert_eq!(parsed.calls[1].args, vec!["0", "\"atk\"", "4"]);
    }

    #[test]
    fn test_nested_and_quoted_args() {
        let calls = ResponseParser::default()
            .extract_calls(r#"GM.say("hi (there), friend", max(1, 2)) and GM.healParty()"#);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].raw, r#"GM.say("hi (there), friend", max(1, 2))"#);
        assert_eq!(calls[0].args, vec![r#""hi (there), friend""#, "max(1, 2)"]);
        assert!(calls[1].args.is_empty());
    }

    #[test]
    fn test_apostrophe_inside_bare_argument() {
        let calls = ResponseParser::default()
            .extract_calls("MEMORY: GM.note(Torchic's win, 2) then GM.say('it's done')");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].raw, "GM.note(Torchic's win, 2)");
        assert_eq!(calls[0].args, vec!["Torchic's win", "2"]);
        assert_eq!(calls[1].args, vec!["'it's done'"]);
    }

    #[test]
    fn test_unterminated_call_is_skipped() {
        let calls = ResponseParser::default().extract_calls("GM.heal(0\nGM.setShiny(1)");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function, "setShiny");
    }

    #[test]
    fn test_other_namespaces_ignored() {
        let parser = ResponseParser::default();
        assert!(parser.extract_calls("console.log(1) and Math.max(0, 1)").is_empty());
        let calls = parser.extract_calls("wrap(GM.heal(2))");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].raw, "GM.heal(2)");
    }

    #[test]
    fn test_shell_fallback() {
        let parsed = ResponseParser::default()
            .parse("ACTION: echo 'x' | nc HOST 8888");
        assert_eq!(
            parsed.actions("10.0.0.5", true),
            vec![Action::Shell("echo 'x' | nc -w 1 10.0.0.5 8888".to_string())]
        );
        assert!(parsed.actions("10.0.0.5", false).is_empty());

        let none = ResponseParser::default().parse("ACTION: none");
        assert!(none.actions("h", true).is_empty());
    }

    #[test]
    fn test_shell_normalization_keeps_wait_flags() {
        assert_eq!(
            normalize_shell_command("echo a | nc -q 1 HOST 8888", "h"),
            "echo a | nc -q 1 h 8888"
        );
    }

    #[test]
    fn test_describe_uses_party_names() {
        let party = vec!["Torchic".to_string(), "Wingull".to_string()];
        let calls = ResponseParser::default()
            .extract_calls("GM.heal(1) GM.setLevel(0, 20) GM.unknownThing(3)");
        assert_eq!(calls[0].describe(&party), "Heal Wingull");
        assert_eq!(calls[1].describe(&party), "Set Torchic to level 20");
        assert_eq!(calls[2].describe(&party), "GM.unknownThing(3)");
    }
}
