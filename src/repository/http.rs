use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{EntryRepository, RequestError};
use crate::config::ServerOptions;
use crate::model::{AnalysisSummary, Entry};

/// Blocking JSON client for the diary backend.
#[derive(Clone)]
pub struct HttpEntryRepository {
    agent: ureq::Agent,
    base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum ResponseBody {
    Json(Value),
    Text(String),
}

impl HttpEntryRepository {
    pub fn new(options: &ServerOptions) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(options.timeout).build();
        Self {
            agent,
            base_url: options.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health(&self) -> Result<HealthStatus, RequestError> {
        let response = self.agent.get(&self.url("/health")).call();
        decode(finish(response)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl EntryRepository for HttpEntryRepository {
    fn create_entry(&self, mood: &str, body: &str) -> Result<Entry, RequestError> {
        let response = self
            .agent
            .post(&self.url("/entries"))
            .send_json(json!({ "mood": mood, "body": body }));
        let entry: Entry = decode(finish(response)?)?;
        tracing::info!(id = %entry.id, mood = %entry.mood, "entry created");
        Ok(entry)
    }

    fn list_entries(&self, limit: Option<usize>) -> Result<Vec<Entry>, RequestError> {
        let mut request = self.agent.get(&self.url("/entries"));
        if let Some(limit) = limit {
            request = request.query("limit", &limit.to_string());
        }
        let entries: Vec<Entry> = decode(finish(request.call())?)?;
        tracing::debug!(count = entries.len(), ?limit, "entries fetched");
        Ok(entries)
    }

    fn analyze_range(
        &self,
        range_days: u32,
        question: Option<&str>,
    ) -> Result<AnalysisSummary, RequestError> {
        let response = self
            .agent
            .post(&self.url("/analyze"))
            .send_json(json!({ "range_days": range_days, "question": question }));
        decode(finish(response)?)
    }
}

fn finish(result: Result<ureq::Response, ureq::Error>) -> Result<ResponseBody, RequestError> {
    match result {
        Ok(response) => read_body(response),
        Err(ureq::Error::Status(code, response)) => {
            let status_text = response.status_text().to_string();
            let body = read_body(response).unwrap_or(ResponseBody::Text(String::new()));
            Err(RequestError::new(error_message(code, &status_text, &body)))
        }
        Err(ureq::Error::Transport(transport)) => Err(RequestError::new(format!(
            "could not reach the server: {transport}"
        ))),
    }
}

fn read_body(response: ureq::Response) -> Result<ResponseBody, RequestError> {
    let content_type = response.content_type().to_string();
    let raw = response
        .into_string()
        .map_err(|err| RequestError::new(format!("reading response body: {err}")))?;
    Ok(parse_body(&content_type, raw))
}

/// JSON only when the server says so; anything else stays raw text.
fn parse_body(content_type: &str, raw: String) -> ResponseBody {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let is_json = essence == "application/json" || essence.ends_with("+json");
    if !is_json {
        return ResponseBody::Text(raw);
    }
    match serde_json::from_str(&raw) {
        Ok(value) => ResponseBody::Json(value),
        Err(_) => ResponseBody::Text(raw),
    }
}

fn error_message(code: u16, status_text: &str, body: &ResponseBody) -> String {
    if let ResponseBody::Json(Value::Object(map)) = body {
        match map.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    if status_text.trim().is_empty() {
        format!("request failed with status {code}")
    } else {
        status_text.to_string()
    }
}

fn decode<T: DeserializeOwned>(body: ResponseBody) -> Result<T, RequestError> {
    match body {
        ResponseBody::Json(value) => serde_json::from_value(value)
            .map_err(|err| RequestError::new(format!("unexpected response: {err}"))),
        ResponseBody::Text(text) => Err(RequestError::new(format!(
            "expected a JSON response, got: {}",
            text.chars().take(120).collect::<String>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn string_detail_is_used_verbatim() {
        let body = parse_body(
            "application/json",
            r#"{"detail": "Mood must not be blank"}"#.into(),
        );
        assert_eq!(
            error_message(422, "Unprocessable Entity", &body),
            "Mood must not be blank"
        );
    }

    #[test]
    fn structured_detail_is_rendered_as_compact_json() {
        let body = parse_body(
            "application/json; charset=utf-8",
            r#"{"detail": [{"loc": ["body", "mood"], "msg": "field required"}]}"#.into(),
        );
        assert_eq!(
            error_message(422, "Unprocessable Entity", &body),
            r#"[{"loc":["body","mood"],"msg":"field required"}]"#
        );
    }

    #[test]
    fn falls_back_to_status_phrase() {
        let html = parse_body("text/html", "<h1>Bad gateway</h1>".into());
        assert_matches!(html, ResponseBody::Text(_));
        assert_eq!(error_message(502, "Bad Gateway", &html), "Bad Gateway");

        let no_detail = parse_body("application/json", r#"{"error": "x"}"#.into());
        assert_eq!(
            error_message(500, "", &no_detail),
            "request failed with status 500"
        );
    }

    #[test]
    fn json_is_not_parsed_without_a_json_content_type() {
        let body = parse_body("text/plain", r#"{"id": 1}"#.into());
        assert_eq!(body, ResponseBody::Text(r#"{"id": 1}"#.into()));
        assert!(decode::<Value>(body).is_err());

        let problem = parse_body("application/problem+json", r#"{"detail": "nope"}"#.into());
        assert_matches!(problem, ResponseBody::Json(_));
    }

    #[test]
    fn decodes_entry_payloads() {
        let body = parse_body(
            "application/json",
            r#"[{"id": 3, "created_at": "2024-05-01T10:00:00+09:00", "mood": "happy",
                 "body": "Park day", "analysis": {"maternal_feedback": ["Nice outing"]}}]"#
                .into(),
        );
        let entries: Vec<Entry> = decode(body).expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_pending());
    }

    #[test]
    fn decoded_entries_keep_section_order_from_the_wire() {
        let body = parse_body(
            "application/json",
            r#"[{"id": 4, "created_at": "2024-05-02T21:00:00+09:00", "mood": "tired",
                 "body": "Two wake-ups", "analysis": {
                     "maternal_feedback": ["Rest when the baby naps"],
                     "child_development_insights": ["Night waking is common"],
                     "parenting_guidelines": ["Keep the bedtime routine"]}}]"#
                .into(),
        );
        let entries: Vec<Entry> = decode(body).expect("entries");
        let analysis = entries[0].analysis.as_ref().expect("analysis");
        let keys: Vec<_> = analysis.sections().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "maternal_feedback",
                "child_development_insights",
                "parenting_guidelines"
            ]
        );
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let repo = HttpEntryRepository::new(&ServerOptions {
            base_url: "http://localhost:8000/".into(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(repo.url("/entries"), "http://localhost:8000/entries");
    }
}
