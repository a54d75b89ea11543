use crate::api::Email;
use crate::narration::segment::{ITEM_DELIMITER, SECTION_DELIMITER};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const DEFAULT_PROMPT: &str = r#"You are the host of a short daily AI news podcast.
Summarize the newsletter emails below into a spoken script of about five minutes.

Return STRICT JSON with this shape ONLY:
{"title": "OFA Daily Summary <DATE>",
 "audio_script": {"opening": "...", "news_items": ["...", "..."], "closing": "..."},
 "description": "..."}

Rules:
- The opening greets listeners and previews the top stories in two or three sentences.
- Each news item is a self-contained story of three to six sentences, written to be read aloud.
- Do not use markdown, bullet characters, URLs or emoji inside audio_script.
- The closing thanks listeners in one or two sentences.
- The description is a YouTube video description listing each story with its source.
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioScript {
    pub opening: String,
    #[serde(default)]
    pub news_items: Vec<String>,
    pub closing: String,
}

impl AudioScript {
    /// Transcript form with section and item markers.
    pub fn to_transcript(&self) -> String {
        let items = self
            .news_items
            .iter()
            .map(|item| format!("{ITEM_DELIMITER} {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n{SECTION_DELIMITER}\n{}\n{SECTION_DELIMITER}\n{}",
            self.opening, items, self.closing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioScriptField {
    Structured(AudioScript),
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct SummaryRoot {
    title: String,
    audio_script: AudioScriptField,
    #[serde(default)]
    description: String,
}

/// Title, narration transcript and video description for one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSummary {
    pub title: String,
    pub transcript: String,
    pub description: String,
}

impl DigestSummary {
    pub fn from_json(text: &str) -> Result<Self> {
        let root: SummaryRoot =
            serde_json::from_str(text.trim()).context("Failed to parse summary JSON")?;
        let transcript = match root.audio_script {
            AudioScriptField::Structured(script) => script.to_transcript(),
            AudioScriptField::Plain(text) => text,
        };
        if root.title.trim().is_empty() {
            anyhow::bail!("Summary has an empty title");
        }
        if transcript.trim().is_empty() {
            anyhow::bail!("Summary has an empty audio script");
        }
        Ok(Self {
            title: root.title.trim().to_string(),
            transcript,
            description: root.description,
        })
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Summarizer input: one `From/Subject/Date/Content` block per email.
pub fn build_summary_input(emails: &[Email], body_char_limit: usize) -> String {
    emails
        .iter()
        .map(|email| {
            let date = email
                .date
                .map(|d| d.to_rfc2822())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "From: {}\nSubject: {}\nDate: {}\nContent: {}",
                email.source,
                email.subject,
                date,
                truncate_chars(&email.body, body_char_limit)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn wrap_content(input: &str, date: NaiveDate) -> String {
    format!(
        "Date: {}\n\nemail_content: {}\n\nGenerate the script as per the instructions.",
        date.format("%Y-%m-%d"),
        input
    )
}

pub async fn load_prompt(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt: {}", path.display())),
        None => Ok(DEFAULT_PROMPT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn email(body: &str) -> Email {
        Email {
            id: "1".into(),
            subject: "[AINews] Big day".into(),
            sender: "smol <news@smol.ai>".into(),
            date: Some(Utc.with_ymd_and_hms(2025, 3, 7, 10, 0, 0).unwrap()),
            body: body.into(),
            snippet: String::new(),
            source: "news@smol.ai".into(),
        }
    }

    #[test]
    fn test_structured_script_is_formatted_with_markers() {
        let raw = r#"{
            "title": "OFA Daily Summary 2025-03-07",
            "audio_script": {"opening": "Hi.", "news_items": ["A shipped.", "B raised."], "closing": "Bye."},
            "description": "Stories: A, B"
        }"#;
        let summary = DigestSummary::from_json(raw).unwrap();
        assert_eq!(
            summary.transcript,
            "Hi.\n===\n<item> A shipped.\n<item> B raised.\n===\nBye."
        );
        assert_eq!(summary.description, "Stories: A, B");
    }

    #[test]
    fn test_plain_script_passes_through() {
        let raw = r#"{"title": "T", "audio_script": "Just talk.", "description": ""}"#;
        let summary = DigestSummary::from_json(raw).unwrap();
        assert_eq!(summary.transcript, "Just talk.");
    }

    #[test]
    fn test_rejects_empty_or_malformed() {
        assert!(DigestSummary::from_json(r#"{"title": "", "audio_script": "x"}"#).is_err());
        assert!(DigestSummary::from_json(r#"{"title": "T", "audio_script": "  "}"#).is_err());
        assert!(DigestSummary::from_json(r#"{"title": "T"}"#).is_err());
        assert!(DigestSummary::from_json("nope").is_err());
    }

    #[test]
    fn test_summary_input_truncates_bodies() {
        let long = "é".repeat(30);
        let input = build_summary_input(&[email(&long), email("short")], 10);
        let blocks: Vec<&str> = input.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("From: news@smol.ai\nSubject: [AINews] Big day\nDate: "));
        assert!(blocks[0].ends_with(&format!("Content: {}...", "é".repeat(10))));
        assert!(blocks[1].ends_with("Content: short"));
    }

    #[tokio::test]
    async fn test_prompt_override() {
        assert_eq!(load_prompt(None).await.unwrap(), DEFAULT_PROMPT);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "custom").await.unwrap();
        assert_eq!(load_prompt(Some(&path)).await.unwrap(), "custom");
    }
}
