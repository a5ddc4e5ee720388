use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    App,
    AppShortcut,
    Contact,
    File,
    Setting,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::App,
        SourceType::AppShortcut,
        SourceType::Contact,
        SourceType::File,
        SourceType::Setting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::AppShortcut => "app_shortcut",
            Self::Contact => "contact",
            Self::File => "file",
            Self::Setting => "setting",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "app" | "apps" => Some(Self::App),
            "app_shortcut" | "shortcut" | "shortcuts" => Some(Self::AppShortcut),
            "contact" | "contacts" => Some(Self::Contact),
            "file" | "files" => Some(Self::File),
            "setting" | "settings" => Some(Self::Setting),
            _ => None,
        }
    }

    /// Permission the platform must grant before this section can be shown.
    pub fn required_permission(self) -> Option<Permission> {
        match self {
            Self::Contact => Some(Permission::Contacts),
            Self::File => Some(Permission::Storage),
            Self::App | Self::AppShortcut | Self::Setting => None,
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Contacts,
    Storage,
}

/// One searchable item produced by a source.
///
/// `key` is the source-scoped identity (package name, contact id, file URI,
/// setting id) used for deduplication and for every preference lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: SourceType,
    pub key: String,
    pub name: String,
    pub nickname: Option<String>,
    pub usage: Option<u64>,
    pub detail: Option<String>,
    normalized_name: String,
}

impl Candidate {
    pub fn new(source: SourceType, key: &str, name: &str) -> Self {
        Self::from_owned(source, key.to_string(), name.to_string())
    }

    pub fn from_owned(source: SourceType, key: String, name: String) -> Self {
        let normalized_name = normalize_for_search(&name);
        Self {
            source,
            key,
            name,
            nickname: None,
            usage: None,
            detail: None,
            normalized_name,
        }
    }

    pub fn with_usage(mut self, usage: u64) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_string());
        self
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }
}

/// Immutable view of one user-visible query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    raw: String,
    trimmed: String,
    normalized: String,
    tokens: Vec<String>,
    generation: u64,
}

impl Query {
    pub fn new(raw: &str, generation: u64) -> Self {
        let trimmed = raw.trim().to_string();
        let normalized = normalize_for_search(&trimmed);
        let tokens = tokenize(&normalized);
        Self {
            raw: raw.to_string(),
            trimmed,
            normalized,
            tokens,
            generation,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn trimmed(&self) -> &str {
        &self.trimmed
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_blank(&self) -> bool {
        self.trimmed.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.trimmed.chars().count()
    }
}

/// Match quality tiers; lower is better and `NoMatch` never leaves the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPriority {
    ExactName,
    NameStartsWith,
    ExactNickname,
    AllTokensPrefix,
    NicknameToken,
    NameContains,
    NoMatch,
}

impl MatchPriority {
    pub fn is_match(self) -> bool {
        self != Self::NoMatch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub priority: MatchPriority,
    pub pinned: bool,
}

/// Ranked output of one source for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    source: SourceType,
    generation: u64,
    items: Vec<RankedCandidate>,
}

impl ResultSet {
    pub fn new(source: SourceType, generation: u64, mut items: Vec<RankedCandidate>) -> Self {
        items.retain(|item| item.priority.is_match());
        Self {
            source,
            generation,
            items,
        }
    }

    pub fn empty(source: SourceType, generation: u64) -> Self {
        Self {
            source,
            generation,
            items: Vec::new(),
        }
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn items(&self) -> &[RankedCandidate] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|item| item.candidate.key.as_str())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|item| item.candidate.name.as_str())
            .collect()
    }
}

/// Lowercases and collapses every whitespace run to a single space.
pub fn normalize_for_search(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
