use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum GenerateContentError {
    #[error("decode generateContent JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no text in generateContent response")]
    NoText,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
pub fn parse_generate_content_text(body: &[u8]) -> Result<String, GenerateContentError> {
    let resp: GenerateContentResponse = serde_json::from_slice(body)?;

    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerateContentError::NoText);
    }
    Ok(text)
}
