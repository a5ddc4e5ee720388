use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::model::{Permission, SourceType};

pub const DEFAULT_SECTION_ORDER: [SourceType; 5] = [
    SourceType::App,
    SourceType::AppShortcut,
    SourceType::Setting,
    SourceType::Contact,
    SourceType::File,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Searching,
    Idle,
}

/// One item position in a rendered layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "slot", content = "source", rename_all = "snake_case")]
pub enum Slot {
    /// Shown while an enabled section is held back by a missing permission.
    ErrorBanner,
    Calculator,
    ShortcutNavigation,
    Section(SourceType),
    WebSearch,
    Favorites,
    Suggestions,
}

enum TemplateSlot {
    Fixed(Slot),
    Sections,
}

const SEARCHING_TEMPLATE: &[TemplateSlot] = &[
    TemplateSlot::Fixed(Slot::ErrorBanner),
    TemplateSlot::Fixed(Slot::Calculator),
    TemplateSlot::Fixed(Slot::ShortcutNavigation),
    TemplateSlot::Sections,
    TemplateSlot::Fixed(Slot::WebSearch),
];

const IDLE_TEMPLATE: &[TemplateSlot] = &[
    TemplateSlot::Fixed(Slot::ErrorBanner),
    TemplateSlot::Fixed(Slot::Favorites),
    TemplateSlot::Sections,
    TemplateSlot::Fixed(Slot::Suggestions),
];

impl Layout {
    fn template(self) -> &'static [TemplateSlot] {
        match self {
            Self::Searching => SEARCHING_TEMPLATE,
            Self::Idle => IDLE_TEMPLATE,
        }
    }
}

pub trait PermissionProvider: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
}

/// Permission grants held in memory and flipped by the host.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    granted: RwLock<HashSet<Permission>>,
}

impl StaticPermissions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all_granted() -> Self {
        Self::with_granted(&[Permission::Contacts, Permission::Storage])
    }

    pub fn with_granted(permissions: &[Permission]) -> Self {
        Self {
            granted: RwLock::new(permissions.iter().copied().collect()),
        }
    }

    pub fn grant(&self, permission: Permission) {
        self.granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(permission);
    }

    pub fn revoke(&self, permission: Permission) {
        self.granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&permission);
    }
}

impl PermissionProvider for StaticPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&permission)
    }
}

/// Sections forced off by missing permissions, computed at read time.
pub fn permission_disabled(permissions: &dyn PermissionProvider) -> HashSet<SourceType> {
    SourceType::ALL
        .into_iter()
        .filter(|source| {
            source
                .required_permission()
                .is_some_and(|permission| !permissions.is_granted(permission))
        })
        .collect()
}

/// Turns a stored order into a permutation of every section.
///
/// Duplicates are dropped, and sections missing from the stored order are
/// appended in default order.
pub fn normalize_section_order(user_order: &[SourceType]) -> Vec<SourceType> {
    let mut out: Vec<SourceType> = Vec::with_capacity(DEFAULT_SECTION_ORDER.len());
    for source in user_order.iter().chain(DEFAULT_SECTION_ORDER.iter()) {
        if !out.contains(source) {
            out.push(*source);
        }
    }
    out
}

pub fn order(
    layout: Layout,
    user_section_order: &[SourceType],
    user_disabled: &HashSet<SourceType>,
    permission_disabled: &HashSet<SourceType>,
) -> Vec<Slot> {
    let sections = normalize_section_order(user_section_order);
    let held_back = permission_disabled
        .iter()
        .any(|source| !user_disabled.contains(source));

    let mut slots = Vec::new();
    for template_slot in layout.template() {
        match template_slot {
            TemplateSlot::Fixed(Slot::ErrorBanner) => {
                if held_back {
                    slots.push(Slot::ErrorBanner);
                }
            }
            TemplateSlot::Fixed(slot) => slots.push(*slot),
            TemplateSlot::Sections => slots.extend(
                sections
                    .iter()
                    .filter(|source| {
                        !user_disabled.contains(*source) && !permission_disabled.contains(*source)
                    })
                    .map(|source| Slot::Section(*source)),
            ),
        }
    }
    slots
}

pub fn enabled_sections(slots: &[Slot]) -> Vec<SourceType> {
    slots
        .iter()
        .filter_map(|slot| match slot {
            Slot::Section(source) => Some(*source),
            Slot::ErrorBanner
            | Slot::Calculator
            | Slot::ShortcutNavigation
            | Slot::WebSearch
            | Slot::Favorites
            | Slot::Suggestions => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{enabled_sections, normalize_section_order, order, Layout, Slot};
    use crate::model::SourceType;
    use std::collections::HashSet;

    #[test]
    fn searching_layout_wraps_sections_in_fixed_slots() {
        let slots = order(Layout::Searching, &[], &HashSet::new(), &HashSet::new());
        assert_eq!(slots.first(), Some(&Slot::Calculator));
        assert_eq!(slots.last(), Some(&Slot::WebSearch));
        assert_eq!(enabled_sections(&slots).len(), 5);
    }

    #[test]
    fn user_order_replaces_default_within_section_region() {
        let slots = order(
            Layout::Idle,
            &[SourceType::File, SourceType::App],
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(
            enabled_sections(&slots),
            [
                SourceType::File,
                SourceType::App,
                SourceType::AppShortcut,
                SourceType::Setting,
                SourceType::Contact,
            ]
        );
        assert_eq!(slots[0], Slot::Favorites);
        assert_eq!(slots.last(), Some(&Slot::Suggestions));
    }

    #[test]
    fn normalization_drops_duplicates() {
        let normalized = normalize_section_order(&[SourceType::File, SourceType::File]);
        assert_eq!(normalized.len(), 5);
        assert_eq!(normalized[0], SourceType::File);
    }

    #[test]
    fn error_banner_only_when_enabled_section_is_held_back() {
        let forced: HashSet<SourceType> = [SourceType::Contact].into_iter().collect();
        let with_banner = order(Layout::Searching, &[], &HashSet::new(), &forced);
        assert_eq!(with_banner[0], Slot::ErrorBanner);

        let user_off: HashSet<SourceType> = [SourceType::Contact].into_iter().collect();
        let without_banner = order(Layout::Searching, &[], &user_off, &forced);
        assert!(!without_banner.contains(&Slot::ErrorBanner));
    }
}
