use serde::{Deserialize, Serialize};

use crate::calculator::CalculatorResult;
use crate::controller::{QueryPhase, SearchSnapshot};
use crate::model::{Candidate, MatchPriority, RankedCandidate, ResultSet, SourceType};
use crate::preference_store::ExclusionPurpose;
use crate::section_order::Slot;
use crate::shortcuts::NavigationEvent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRequest {
    pub source: SourceType,
    pub id: String,
}

fn default_purpose() -> ExclusionPurpose {
    ExclusionPurpose::Results
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExclusionRequest {
    pub source: SourceType,
    pub id: String,
    #[serde(default = "default_purpose")]
    pub purpose: ExclusionPurpose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicknameRequest {
    pub source: SourceType,
    pub id: String,
    /// `None` or blank clears the nickname.
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionOrderRequest {
    pub order: Vec<SourceType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionToggleRequest {
    pub source: SourceType,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppDto {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub usage: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppsRequest {
    pub apps: Vec<AppDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDto {
    pub source: SourceType,
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultDto {
    #[serde(flatten)]
    pub item: ItemDto,
    pub priority: MatchPriority,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionDto {
    pub source: SourceType,
    pub results: Vec<ResultDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDto {
    pub generation: u64,
    pub phase: QueryPhase,
    pub query: String,
    pub layout: Vec<Slot>,
    /// Sections in layout order.
    pub sections: Vec<SectionDto>,
    pub calculator: Option<CalculatorResult>,
    pub navigation: Option<NavigationEvent>,
    pub favorites: Vec<ItemDto>,
    pub suggestions: Vec<ItemDto>,
    pub pending: Vec<SourceType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CoreRequest {
    Query(QueryRequest),
    Clear,
    Snapshot,
    Pin(ItemRequest),
    Unpin(ItemRequest),
    Exclude(ExclusionRequest),
    Include(ExclusionRequest),
    SetNickname(NicknameRequest),
    SetSectionOrder(SectionOrderRequest),
    SetSectionDisabled(SectionToggleRequest),
    SetApps(AppsRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CoreResponse {
    Snapshot(SnapshotDto),
    Ack(AckResponse),
}

impl From<&Candidate> for ItemDto {
    fn from(value: &Candidate) -> Self {
        Self {
            source: value.source,
            key: value.key.clone(),
            name: value.name.clone(),
            nickname: value.nickname.clone(),
            detail: value.detail.clone(),
        }
    }
}

impl From<&RankedCandidate> for ResultDto {
    fn from(value: &RankedCandidate) -> Self {
        Self {
            item: ItemDto::from(&value.candidate),
            priority: value.priority,
            pinned: value.pinned,
        }
    }
}

impl From<&ResultSet> for SectionDto {
    fn from(value: &ResultSet) -> Self {
        Self {
            source: value.source(),
            results: value.items().iter().map(ResultDto::from).collect(),
        }
    }
}

impl From<&SearchSnapshot> for SnapshotDto {
    fn from(value: &SearchSnapshot) -> Self {
        Self {
            generation: value.generation,
            phase: value.phase,
            query: value.query.clone(),
            layout: value.layout.clone(),
            sections: value
                .ordered_sections()
                .into_iter()
                .map(SectionDto::from)
                .collect(),
            calculator: value.calculator.clone(),
            navigation: value.navigation.clone(),
            favorites: value.favorites.iter().map(ItemDto::from).collect(),
            suggestions: value.suggestions.iter().map(ItemDto::from).collect(),
            pending: value.pending.iter().copied().collect(),
        }
    }
}

impl From<AppDto> for Candidate {
    fn from(value: AppDto) -> Self {
        let candidate = Candidate::from_owned(SourceType::App, value.key, value.name);
        match value.usage {
            Some(usage) => candidate.with_usage(usage),
            None => candidate,
        }
    }
}
