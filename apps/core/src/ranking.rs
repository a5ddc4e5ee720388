use std::cmp::Ordering;

use crate::model::{normalize_for_search, Candidate, MatchPriority, Query, RankedCandidate};

/// Scores one candidate against an already tokenized query.
///
/// `query_tokens` must come from the same query text; callers tokenize once per
/// batch and reuse the tokens for every candidate.
pub fn score(
    name: &str,
    nickname: Option<&str>,
    query: &str,
    query_tokens: &[String],
) -> MatchPriority {
    let query = normalize_for_search(query);
    if query.is_empty() {
        return MatchPriority::NoMatch;
    }
    let name = normalize_for_search(name);
    let nickname = nickname
        .map(normalize_for_search)
        .filter(|value| !value.is_empty());
    score_normalized(&name, nickname.as_deref(), &query, query_tokens)
}

fn score_normalized(
    name: &str,
    nickname: Option<&str>,
    query: &str,
    query_tokens: &[String],
) -> MatchPriority {
    if name == query {
        return MatchPriority::ExactName;
    }
    if name.starts_with(query) {
        return MatchPriority::NameStartsWith;
    }
    if nickname == Some(query) {
        return MatchPriority::ExactNickname;
    }
    if all_tokens_prefix_name(name, query_tokens) {
        return MatchPriority::AllTokensPrefix;
    }
    if nickname.is_some_and(|nick| nick.contains(query)) {
        return MatchPriority::NicknameToken;
    }
    if name.contains(query) {
        return MatchPriority::NameContains;
    }
    MatchPriority::NoMatch
}

fn all_tokens_prefix_name(name: &str, query_tokens: &[String]) -> bool {
    if query_tokens.is_empty() {
        return false;
    }
    query_tokens.iter().all(|token| {
        name_tokens(name).any(|name_token| name_token.starts_with(token.as_str()))
    })
}

fn name_tokens(name: &str) -> impl Iterator<Item = &str> {
    name.split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/' | ','))
        .filter(|token| !token.is_empty())
}

fn score_candidate(candidate: &Candidate, query: &Query) -> MatchPriority {
    if query.normalized().is_empty() {
        return MatchPriority::NoMatch;
    }
    let nickname = candidate
        .nickname
        .as_deref()
        .map(normalize_for_search)
        .filter(|value| !value.is_empty());
    score_normalized(
        candidate.normalized_name(),
        nickname.as_deref(),
        query.normalized(),
        query.tokens(),
    )
}

/// Whether `candidate` would survive ranking for `query`.
pub fn matches(candidate: &Candidate, query: &Query) -> bool {
    score_candidate(candidate, query).is_match()
}

/// Scores, filters and sorts a batch of candidates for one query.
pub fn rank(candidates: Vec<Candidate>, query: &Query, usage_sort: bool) -> Vec<RankedCandidate> {
    if query.normalized().is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let priority = score_candidate(&candidate, query);
            priority.is_match().then_some(RankedCandidate {
                candidate,
                priority,
                pinned: false,
            })
        })
        .collect();

    ranked.sort_by(|a, b| compare_ranked(a, b, usage_sort));
    ranked
}

/// Total order used for every published section.
pub fn compare_ranked(a: &RankedCandidate, b: &RankedCandidate, usage_sort: bool) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| {
            if usage_sort {
                b.candidate.usage.cmp(&a.candidate.usage)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| {
            a.candidate
                .normalized_name()
                .cmp(b.candidate.normalized_name())
        })
        .then_with(|| a.candidate.key.cmp(&b.candidate.key))
}

#[cfg(test)]
mod tests {
    use super::{matches, rank, score};
    use crate::model::{Candidate, MatchPriority, Query, SourceType};

    fn tokens(query: &str) -> Vec<String> {
        query.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn evaluates_tiers_in_priority_order() {
        assert_eq!(score("Maps", None, "maps", &tokens("maps")), MatchPriority::ExactName);
        assert_eq!(
            score("Maps Go", None, "maps", &tokens("maps")),
            MatchPriority::NameStartsWith
        );
        assert_eq!(
            score("Settings", Some("Gear"), "gear", &tokens("gear")),
            MatchPriority::ExactNickname
        );
        assert_eq!(
            score("Google Play Store", None, "pl st", &tokens("pl st")),
            MatchPriority::AllTokensPrefix
        );
        assert_eq!(
            score("Settings", Some("my gear"), "gear", &tokens("gear")),
            MatchPriority::NicknameToken
        );
        assert_eq!(
            score("Photoshop", None, "shop", &tokens("shop")),
            MatchPriority::NameContains
        );
        assert_eq!(
            score("Calculator", None, "xyz", &tokens("xyz")),
            MatchPriority::NoMatch
        );
    }

    #[test]
    fn name_rules_beat_nickname_rules() {
        assert_eq!(
            score("Gear Manager", Some("gear"), "gear", &tokens("gear")),
            MatchPriority::NameStartsWith
        );
    }

    #[test]
    fn name_tokens_split_on_separators() {
        assert_eq!(
            score("Q4_Report.xlsx", None, "rep", &tokens("rep")),
            MatchPriority::AllTokensPrefix
        );
    }

    #[test]
    fn inner_whitespace_runs_do_not_demote_exact_name() {
        let query = Query::new("google  \t maps", 1);
        let ranked = rank(
            vec![Candidate::new(SourceType::App, "maps", "Google Maps")],
            &query,
            false,
        );
        assert_eq!(ranked[0].priority, MatchPriority::ExactName);
        assert_eq!(
            score("Google   Maps", None, "google maps", &tokens("google maps")),
            MatchPriority::ExactName
        );
    }

    #[test]
    fn matches_requires_a_ranking_tier() {
        let query = Query::new("al smith", 1);
        assert!(matches(&Candidate::new(SourceType::Contact, "t", "Alice Smith"), &query));
        assert!(!matches(&Candidate::new(SourceType::Contact, "d", "Alan Doe"), &query));
        let nicknamed = Candidate::new(SourceType::Contact, "n", "Bob").with_nickname("al smith");
        assert!(matches(&nicknamed, &query));
    }

    #[test]
    fn blank_query_never_matches() {
        assert_eq!(score("Anything", None, "  ", &[]), MatchPriority::NoMatch);
    }

    #[test]
    fn usage_sort_orders_by_descending_metric_within_tier() {
        let query = Query::new("sp", 1);
        let ranked = rank(
            vec![
                Candidate::new(SourceType::App, "a", "Sparrow").with_usage(3),
                Candidate::new(SourceType::App, "b", "Spotify").with_usage(9),
                Candidate::new(SourceType::App, "c", "Spark"),
            ],
            &query,
            true,
        );
        let names: Vec<&str> = ranked.iter().map(|r| r.candidate.name.as_str()).collect();
        assert_eq!(names, ["Spotify", "Sparrow", "Spark"]);
    }
}
