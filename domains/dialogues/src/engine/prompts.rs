//! Prompt construction for the text-generation gateway
//!
//! One builder per generation site. The gateway is stateless, so every
//! prompt carries the full context it needs; nothing is remembered
//! between calls.

use accord_llm::LlmMessage;
use serde::Deserialize;

use crate::domain::entities::{
    AgreementKind, DetailLevel, Message, Perspective, SenderType, Track,
};

/// System prompt for the intake clarification chat on the guided track
pub fn clarify_system_prompt(category: &str) -> String {
    format!(
        "You are a warm, neutral mediator helping one partner in a couple \
         articulate a conflict about {category}. Ask short clarifying \
         questions, one at a time. Reflect what you hear without taking \
         sides. Never offer solutions yet."
    )
}

/// Build the role-tagged history for the clarification chat
pub fn clarify_messages(transcript: &[Message]) -> Vec<LlmMessage> {
    transcript
        .iter()
        .filter(|m| m.sender_type != SenderType::System)
        .map(|m| match m.sender_type {
            SenderType::Ai => LlmMessage::assistant(m.content.clone()),
            _ => LlmMessage::user(m.content.clone()),
        })
        .collect()
}

/// Prompt for the onboarding message shown to a partner who just joined
pub fn onboarding_prompt(category: &str, detail_level: DetailLevel) -> Vec<LlmMessage> {
    let context = match detail_level {
        DetailLevel::Minimal => "They chose to share only the topic with you.",
        DetailLevel::Summary => "They chose to share a short summary of their intake with you.",
        DetailLevel::Full => "They chose to share their full intake with you.",
    };
    vec![LlmMessage::user(format!(
        "Your partner started a mediated conversation about {category}. \
         {context} Write a short, welcoming message (2-3 sentences) that \
         explains the process: each of you will privately describe your \
         perspective, then review a neutral synthesis together."
    ))]
}

/// System prompt for synthesis generation
pub fn synthesis_system_prompt(category: &str) -> String {
    format!(
        "You are a neutral mediator. Write a synthesis of both partners' \
         perspectives on a conflict about {category}. Restate each side \
         fairly in plain language, name the shared needs underneath, and \
         keep it under 300 words. Do not assign blame or prescribe \
         actions."
    )
}

/// Build the synthesis request from both perspectives, incorporating
/// stored rejection feedback when a previous synthesis was rejected
pub fn synthesis_messages(
    track: Track,
    perspectives: &[Perspective],
    transcript: &[Message],
    rejection_feedback: Option<&str>,
) -> Vec<LlmMessage> {
    let mut body = String::new();

    match track {
        Track::Direct => {
            for (i, p) in perspectives.iter().enumerate() {
                if let Some(content) = &p.content {
                    body.push_str(&format!("Perspective {}:\n{}\n\n", i + 1, content));
                }
            }
        }
        Track::Guided => {
            // The guided track synthesizes from the intake dialogue
            for m in transcript.iter().filter(|m| m.sender_type != SenderType::System) {
                let speaker = match m.sender_type {
                    SenderType::Ai => "Mediator",
                    _ => "Partner",
                };
                body.push_str(&format!("{}: {}\n", speaker, m.content));
            }
            body.push('\n');
        }
    }

    if let Some(feedback) = rejection_feedback {
        body.push_str(&format!(
            "The previous synthesis was rejected with this feedback, which \
             the new synthesis must address:\n{}\n",
            feedback
        ));
    }

    vec![LlmMessage::user(body)]
}

/// System prompt for terminal request/compromise extraction
pub fn extraction_system_prompt() -> String {
    "Extract the concrete agreements from this resolved conversation. \
     Respond with only a JSON array; each element has \"kind\" \
     (\"request\" or \"compromise\"), \"title\" (short imperative), and \
     optionally \"description\". Respond with [] if there are none."
        .to_string()
}

/// Build the extraction request from the resolution context
pub fn extraction_messages(synthesis: Option<&str>, notes: &str) -> Vec<LlmMessage> {
    let mut body = String::new();
    if let Some(synthesis) = synthesis {
        body.push_str(&format!("Accepted synthesis:\n{}\n\n", synthesis));
    }
    body.push_str(&format!("Resolution notes:\n{}\n", notes));
    vec![LlmMessage::user(body)]
}

/// One agreement extracted from the terminal summary
#[derive(Debug, Deserialize, PartialEq)]
pub struct ExtractedAgreement {
    pub kind: AgreementKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parse the extraction response. Tolerates a fenced code block around
/// the JSON; anything else is a parse error the caller swallows.
pub fn parse_extraction(text: &str) -> Result<Vec<ExtractedAgreement>, serde_json::Error> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(inner.trim())
}
