// =============================================================================
// Barangay Backend - AI Suggestion Collaborator
// =============================================================================
// Best-effort category/priority advisory for new concerns. Every
// failure path returns None; concern creation never blocks on this.
// =============================================================================

use serde::Deserialize;

use crate::concerns::{CATEGORIES, PRIORITIES};
use crate::config::Config;

/// Advisory analysis of a concern submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcernAnalysis {
    pub category: String,
    pub priority: String,
    #[serde(default)]
    pub reasoning: String,
}

impl ConcernAnalysis {
    /// Suggested category, only when it is a recognized label.
    pub fn valid_category(&self) -> Option<&str> {
        CATEGORIES
            .contains(&self.category.as_str())
            .then_some(self.category.as_str())
    }

    /// Suggested priority, only when it is a recognized label.
    pub fn valid_priority(&self) -> Option<&str> {
        PRIORITIES
            .contains(&self.priority.as_str())
            .then_some(self.priority.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

fn build_prompt(title: &str, description: &str) -> String {
    format!(
        r#"You are an assistant for a Barangay Concern Reporting System.
Analyze the following report and suggest the best Category and Priority.

Categories: FLOOD, ROAD, WASTE, ELECTRICITY, WATER, SAFETY, OTHER
Priorities: LOW, MEDIUM, HIGH, URGENT

Report Title: {}
Report Description: {}

Respond STRICTLY in JSON format:
{{"category": "CATEGORY_CODE", "priority": "PRIORITY_CODE", "reasoning": "Short explanation why"}}"#,
        title, description
    )
}

/// Ask the model for a category/priority suggestion. Returns None when
/// the API key is unset or on any transport/parse failure.
pub async fn suggest_for_concern(
    config: &Config,
    title: &str,
    description: &str,
) -> Option<ConcernAnalysis> {
    let api_key = config.gemini_api_key.as_deref()?;

    let body = serde_json::json!({
        "contents": [{
            "parts": [{ "text": build_prompt(title, description) }]
        }]
    });

    let client = reqwest::Client::new();
    let response = client
        .post(&config.gemini_api_url)
        .query(&[("key", api_key)])
        .json(&body)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("AI suggestion request failed: {}", e);
            return None;
        }
    };

    let parsed: GenerateResponse = match response.json().await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("AI suggestion response unreadable: {}", e);
            return None;
        }
    };

    let text = parsed
        .candidates
        .first()
        .and_then(|c| c.content.parts.first())
        .map(|p| p.text.as_str())?;

    // Models sometimes fence the JSON in markdown
    let text = text.replace("```json", "").replace("```", "");
    match serde_json::from_str::<ConcernAnalysis>(text.trim()) {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            tracing::warn!("AI suggestion JSON malformed: {}", e);
            None
        }
    }
}
