//! Pending narrative payoffs from the playthrough memory note.

use std::path::Path;

/// Line markers for payoffs the agent has promised but not yet delivered.
pub const PAYOFF_MARKERS: &[&str] = &[
    "IMMEDIATE PAYOFF:",
    "PENDING PAYOFF:",
    "PENDING:",
    "STATUS:",
    "PAYOFF OWED:",
    "→ immediate shiny",
    "→ give it",
    "→ teach",
];

pub const MAX_PAYOFFS: usize = 5;

const MIN_LINE_LEN: usize = 20;

/// Marker matching ignores case.
pub fn extract_payoffs(note: &str) -> Vec<String> {
    note.lines()
        .map(str::trim)
        .filter(|line| line.chars().count() >= MIN_LINE_LEN)
        .filter(|line| {
            let lower = line.to_lowercase();
            PAYOFF_MARKERS
                .iter()
                .any(|m| lower.contains(&m.to_lowercase()))
        })
        .map(|line| {
            line.trim_start_matches(['*', '-', ' '])
                .trim_end_matches(['*', ' '])
                .to_string()
        })
        .take(MAX_PAYOFFS)
        .collect()
}

/// Read the note and extract payoffs. A missing or unreadable note yields none.
pub async fn read_payoffs(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(note) => extract_payoffs(&note),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "memory note unavailable");
            Vec::new()
        }
    }
}
