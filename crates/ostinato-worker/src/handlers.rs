//! Task handlers this worker advertises.
//!
//! `generate_midi` runs the full pipeline for one request: compose a score
//! text from the prompt, validate it (bounded rounds), render it to an
//! artifact and hand back its link. The composition and rendering stages
//! are deterministic stand-ins; the pipeline shape and its error surface
//! are the part that matters here.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use ostinato_core::worker::{HandlerError, TaskHandler};

/// Rounds of compose-then-validate before giving up on a prompt.
const MAX_VALIDATION_ROUNDS: usize = 5;

const DEFAULT_BPM: u64 = 120;

pub struct GenerateMidi;

#[async_trait]
impl TaskHandler for GenerateMidi {
    async fn run(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
        let prompt = args
            .first()
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| HandlerError::new("missing prompt argument"))?;
        let bpm = args
            .get(1)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_BPM);

        let mut score = None;
        for round in 1..=MAX_VALIDATION_ROUNDS {
            let candidate = compose_score(prompt, bpm, round);
            if validate_score(&candidate) {
                score = Some(candidate);
                break;
            }
            debug!(round, "composed score failed validation");
        }
        let score = score.ok_or_else(|| HandlerError::new("unable to validate MIDI text"))?;

        let link = render_score(&score)?;
        debug!(%link, "rendered score");
        Ok(serde_json::json!({ "link": link }))
    }
}

/// Turn the prompt into score text. One note token per prompt word, pitch
/// picked from the word itself so the same prompt composes the same score.
fn compose_score(prompt: &str, bpm: u64, round: usize) -> String {
    const SCALE: [&str; 7] = ["C4", "D4", "E4", "F4", "G4", "A4", "B4"];

    let notes: Vec<&str> = prompt
        .split_whitespace()
        .map(|word| SCALE[(word.len() + round) % SCALE.len()])
        .collect();

    format!("tempo={bpm}\nnotes={}", notes.join(","))
}

/// A score passes when it carries a tempo and at least one note.
fn validate_score(score: &str) -> bool {
    let has_tempo = score.lines().any(|l| l.starts_with("tempo="));
    let has_notes = score
        .lines()
        .any(|l| l.strip_prefix("notes=").is_some_and(|n| !n.is_empty()));
    has_tempo && has_notes
}

/// Render the score to its artifact location. Content-addressed so a
/// retried render of the same score lands on the same link.
fn render_score(score: &str) -> Result<String, HandlerError> {
    let digest = Sha256::digest(score.as_bytes());
    let mut name = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        name.push_str(&format!("{byte:02x}"));
    }
    Ok(format!("midi/{name}.mid"))
}
