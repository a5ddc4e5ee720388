use serde::{Deserialize, Serialize};
use tracing::warn;

pub const QUERY_PLACEHOLDER: &str = "{query}";

/// A trailing alias bound to a search engine or browser target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutEntry {
    pub code: String,
    pub label: String,
    pub url_template: String,
}

impl ShortcutEntry {
    pub fn new(code: &str, label: &str, url_template: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            url_template: url_template.to_string(),
        }
    }

    pub fn navigation_for(&self, query: &str) -> NavigationEvent {
        let encoded = url_encode_component(query.trim());
        NavigationEvent {
            code: self.code.clone(),
            label: self.label.clone(),
            query: query.trim().to_string(),
            url: self.url_template.replace(QUERY_PLACEHOLDER, &encoded),
        }
    }
}

pub fn default_shortcuts() -> Vec<ShortcutEntry> {
    vec![
        ShortcutEntry::new("g", "Google", "https://www.google.com/search?q={query}"),
        ShortcutEntry::new("ddg", "DuckDuckGo", "https://duckduckgo.com/?q={query}"),
        ShortcutEntry::new("bing", "Bing", "https://www.bing.com/search?q={query}"),
        ShortcutEntry::new("brave", "Brave", "https://search.brave.com/search?q={query}"),
    ]
}

/// Side effect requested when a query ends in a shortcut code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub code: String,
    pub label: String,
    pub query: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutMatch {
    pub residual: String,
    pub target: ShortcutEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShortcutConfigError {
    #[error("shortcut '{label}' has an empty code")]
    EmptyCode { label: String },
    #[error("shortcut code '{code}' contains whitespace")]
    WhitespaceInCode { code: String },
    #[error("shortcut '{code}' url template lacks {{query}}")]
    MissingPlaceholder { code: String },
    #[error("shortcut codes '{first}' and '{second}' collide by prefix")]
    ConflictingCodes { first: String, second: String },
}

pub trait ShortcutResolver: Send {
    fn detect_trailing_code(&self, text: &str) -> Option<ShortcutMatch>;
}

/// Validated shortcut table; codes are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcutTable {
    entries: Vec<ShortcutEntry>,
}

impl ShortcutTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ShortcutEntry>) -> Result<Self, ShortcutConfigError> {
        let mut normalized: Vec<ShortcutEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            let code = entry.code.trim().to_lowercase();
            if code.is_empty() {
                return Err(ShortcutConfigError::EmptyCode { label: entry.label });
            }
            if code.chars().any(char::is_whitespace) {
                return Err(ShortcutConfigError::WhitespaceInCode { code });
            }
            if !entry.url_template.contains(QUERY_PLACEHOLDER) {
                return Err(ShortcutConfigError::MissingPlaceholder { code });
            }
            if let Some(existing) = normalized
                .iter()
                .find(|other| other.code.starts_with(&code) || code.starts_with(&other.code))
            {
                return Err(ShortcutConfigError::ConflictingCodes {
                    first: existing.code.clone(),
                    second: code,
                });
            }
            normalized.push(ShortcutEntry { code, ..entry });
        }
        Ok(Self {
            entries: normalized,
        })
    }

    /// Validates at load time; an invalid table disables shortcut detection.
    pub fn from_config_or_disabled(entries: &[ShortcutEntry]) -> Self {
        match Self::from_entries(entries.to_vec()) {
            Ok(table) => table,
            Err(error) => {
                warn!(%error, "shortcut table rejected; shortcut detection disabled");
                Self::empty()
            }
        }
    }

    pub fn entries(&self) -> &[ShortcutEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ShortcutResolver for ShortcutTable {
    fn detect_trailing_code(&self, text: &str) -> Option<ShortcutMatch> {
        if self.entries.is_empty() {
            return None;
        }
        let (head, last) = text.trim().rsplit_once(char::is_whitespace)?;
        let residual = head.trim();
        if residual.is_empty() {
            return None;
        }
        let code = last.to_lowercase();
        let target = self.entries.iter().find(|entry| entry.code == code)?;
        Some(ShortcutMatch {
            residual: residual.to_string(),
            target: target.clone(),
        })
    }
}

fn url_encode_component(input: &str) -> String {
    let mut out = String::new();
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else if byte == b' ' {
            out.push('+');
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}
