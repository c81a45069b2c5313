use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_DISCLAIMER: &str = "This is general information, not a medical diagnosis.";

const SOURCE_KEYS: [&str; 2] = ["sources", "citations"];
const DISCLAIMER_KEY: &str = "disclaimer";
const LABEL_KEYS: [&str; 4] = ["title", "text", "label", "name"];
const URL_KEYS: [&str; 2] = ["url", "source_url"];
const FALLBACK_SECTION: &str = "observations";

/// Commentary the backend attaches to a single entry (or to a range of entries).
///
/// Sections keep the order they arrived in. An analysis whose sections are all
/// empty is still a *present* analysis: callers render it as "nothing to
/// report" and never poll for it again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAnalysis", into = "RawAnalysis")]
pub struct Analysis {
    sections: Vec<AnalysisSection>,
    sources: Vec<Citation>,
    disclaimer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSection {
    pub key: String,
    pub items: Vec<AnalysisItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisItem {
    Text(String),
    Structured(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub label: String,
    pub url: Option<String>,
}

impl Analysis {
    pub fn new(
        sections: Vec<AnalysisSection>,
        sources: Vec<Citation>,
        disclaimer: Option<String>,
    ) -> Self {
        Self {
            sections,
            sources,
            disclaimer,
        }
    }

    pub fn sections(&self) -> &[AnalysisSection] {
        &self.sections
    }

    /// Sections that carry at least one item.
    pub fn populated_sections(&self) -> impl Iterator<Item = &AnalysisSection> {
        self.sections.iter().filter(|section| !section.items.is_empty())
    }

    pub fn sources(&self) -> &[Citation] {
        &self.sources
    }

    pub fn disclaimer(&self) -> Option<&str> {
        self.disclaimer.as_deref()
    }

    pub fn disclaimer_or_default(&self) -> &str {
        self.disclaimer().unwrap_or(DEFAULT_DISCLAIMER)
    }

    pub fn has_content(&self) -> bool {
        self.populated_sections().next().is_some()
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Object(map) => Self::from_fields(map.into_iter().collect()),
            other => Self::from(RawAnalysis::Other(other)),
        }
    }

    pub(crate) fn from_fields(fields: IndexMap<String, Value>) -> Self {
        let mut analysis = Self::default();
        for (key, value) in fields {
            if SOURCE_KEYS.contains(&key.as_str()) {
                analysis.sources.extend(normalize_citations(value));
            } else if key == DISCLAIMER_KEY {
                analysis.disclaimer = normalize_disclaimer(value);
            } else {
                analysis.sections.push(AnalysisSection {
                    items: normalize_items(value),
                    key,
                });
            }
        }
        analysis
    }
}

impl AnalysisSection {
    pub fn new(key: impl Into<String>, items: Vec<AnalysisItem>) -> Self {
        Self {
            key: key.into(),
            items,
        }
    }

    /// `child_development_insights` -> `Child development insights`.
    pub fn title(&self) -> String {
        let spaced = self.key.replace(['_', '-'], " ");
        let mut chars = spaced.trim().chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl AnalysisItem {
    pub fn text(value: impl Into<String>) -> Self {
        AnalysisItem::Text(value.into())
    }

    /// One-line rendering used by the list, result view and CLI.
    pub fn summary(&self) -> String {
        match self {
            AnalysisItem::Text(text) => text.clone(),
            AnalysisItem::Structured(map) => {
                for key in ["text", "summary", "claim", "title"] {
                    if let Some(Value::String(text)) = map.get(key) {
                        if !text.trim().is_empty() {
                            return text.trim().to_string();
                        }
                    }
                }
                map.iter()
                    .map(|(key, value)| format!("{key}: {}", value_to_text(value)))
                    .collect::<Vec<_>>()
                    .join("; ")
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            AnalysisItem::Text(text) => Value::String(text),
            AnalysisItem::Structured(map) => Value::Object(map),
        }
    }
}

impl Citation {
    pub fn new(label: impl Into<String>, url: Option<String>) -> Self {
        Self {
            label: label.into(),
            url,
        }
    }
}

/// Wire shape: any JSON object whose keys are sections, plus the reserved
/// `sources`/`citations` and `disclaimer` keys. Non-object payloads are kept
/// as a single observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawAnalysis {
    Object(IndexMap<String, Value>),
    Other(Value),
}

impl From<RawAnalysis> for Analysis {
    fn from(raw: RawAnalysis) -> Self {
        match raw {
            RawAnalysis::Object(fields) => Analysis::from_fields(fields),
            RawAnalysis::Other(Value::Null) => Analysis::default(),
            RawAnalysis::Other(value) => {
                let text = value_to_text(&value);
                let items = if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![AnalysisItem::Text(text.trim().to_string())]
                };
                Analysis {
                    sections: vec![AnalysisSection::new(FALLBACK_SECTION, items)],
                    ..Analysis::default()
                }
            }
        }
    }
}

impl From<Analysis> for RawAnalysis {
    fn from(analysis: Analysis) -> Self {
        let mut fields = IndexMap::new();
        for section in analysis.sections {
            let items = section
                .items
                .into_iter()
                .map(AnalysisItem::into_value)
                .collect();
            fields.insert(section.key, Value::Array(items));
        }
        let sources = analysis
            .sources
            .into_iter()
            .map(|citation| {
                let mut map = Map::new();
                map.insert("title".into(), Value::String(citation.label));
                if let Some(url) = citation.url {
                    map.insert("url".into(), Value::String(url));
                }
                Value::Object(map)
            })
            .collect();
        fields.insert(SOURCE_KEYS[0].to_string(), Value::Array(sources));
        if let Some(disclaimer) = analysis.disclaimer {
            fields.insert(DISCLAIMER_KEY.to_string(), Value::String(disclaimer));
        }
        RawAnalysis::Object(fields)
    }
}

/// Window metadata returned alongside a range analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub range_days: u32,
    pub entry_count: usize,
}

/// Response of the on-demand range analysis; never polled.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub window: WindowInfo,
    pub analysis: Analysis,
}

impl<'de> Deserialize<'de> for AnalysisSummary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = IndexMap::<String, Value>::deserialize(deserializer)?;
        let window = match fields.shift_remove("window") {
            Some(value) => serde_json::from_value(value).map_err(D::Error::custom)?,
            None => WindowInfo::default(),
        };
        Ok(Self {
            window,
            analysis: Analysis::from_fields(fields),
        })
    }
}

fn normalize_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn normalize_items(value: Value) -> Vec<AnalysisItem> {
    normalize_list(value)
        .into_iter()
        .filter(|item| !is_falsy(item))
        .map(|item| match item {
            Value::Object(map) => AnalysisItem::Structured(map),
            Value::String(text) => AnalysisItem::Text(text.trim().to_string()),
            other => AnalysisItem::Text(value_to_text(&other)),
        })
        .collect()
}

fn normalize_citations(value: Value) -> Vec<Citation> {
    normalize_list(value)
        .into_iter()
        .filter(|item| !is_falsy(item))
        .filter_map(|item| match item {
            Value::Object(map) => {
                let url = first_string(&map, &URL_KEYS);
                let label = first_string(&map, &LABEL_KEYS).or_else(|| url.clone())?;
                Some(Citation { label, url })
            }
            other => Some(Citation {
                label: value_to_text(&other).trim().to_string(),
                url: None,
            }),
        })
        .collect()
}

fn normalize_disclaimer(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter(|part| !is_falsy(part))
                .map(value_to_text)
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        other => Some(value_to_text(&other)),
    }
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
