//! Block/keep/rewrite rule evaluation.
//!
//! Rules are newline-separated `Field=regex` matchers, e.g.
//! `EntryTitle=(?i)sponsored`. Global rules come from configuration and
//! apply to every feed; feed-level rules layer on top of the global result.
//! Keep rules, when configured at a layer, override block rules for that
//! layer: only matching candidates survive.
//!
//! Rewrite rules are `pattern|||replacement` lines applied with regex
//! substitution — `rewrite_rules` against entry content, `url_rewrite_rules`
//! against the entry URL.
//!
//! An invalid regex or unknown field disables that one rule with a warning;
//! rule problems are configuration mistakes, never pipeline failures.

use regex::Regex;

use crate::storage::{CandidateEntry, Feed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleField {
    Title,
    Url,
    Author,
    Content,
    Tag,
}

#[derive(Debug)]
struct Rule {
    field: RuleField,
    pattern: Regex,
}

impl Rule {
    fn matches(&self, candidate: &CandidateEntry) -> bool {
        match self.field {
            RuleField::Title => self.pattern.is_match(&candidate.title),
            RuleField::Url => self.pattern.is_match(&candidate.url),
            RuleField::Author => self.pattern.is_match(&candidate.author),
            RuleField::Content => self.pattern.is_match(&candidate.content),
            RuleField::Tag => candidate.tags.iter().any(|t| self.pattern.is_match(t)),
        }
    }
}

fn parse_rules(text: &str) -> Vec<Rule> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let Some((field, pattern)) = line.split_once('=') else {
                tracing::warn!(rule = %line, "Filter rule has no '=' separator, ignoring");
                return None;
            };
            let field = match field.trim() {
                "EntryTitle" => RuleField::Title,
                "EntryURL" => RuleField::Url,
                "EntryAuthor" => RuleField::Author,
                "EntryContent" => RuleField::Content,
                "EntryTag" => RuleField::Tag,
                other => {
                    tracing::warn!(field = %other, "Unknown filter rule field, ignoring");
                    return None;
                }
            };
            match Regex::new(pattern.trim()) {
                Ok(pattern) => Some(Rule { field, pattern }),
                Err(e) => {
                    tracing::warn!(rule = %line, error = %e, "Invalid filter rule regex, ignoring");
                    None
                }
            }
        })
        .collect()
}

fn parse_rewrites(text: &str) -> Vec<(Regex, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let Some((pattern, replacement)) = line.split_once("|||") else {
                tracing::warn!(rule = %line, "Rewrite rule has no '|||' separator, ignoring");
                return None;
            };
            match Regex::new(pattern.trim()) {
                Ok(pattern) => Some((pattern, replacement.trim().to_string())),
                Err(e) => {
                    tracing::warn!(rule = %line, error = %e, "Invalid rewrite rule regex, ignoring");
                    None
                }
            }
        })
        .collect()
}

/// One layer of block/keep rules. Keep, when present, wins.
fn passes(block: &[Rule], keep: &[Rule], candidate: &CandidateEntry) -> bool {
    if !keep.is_empty() {
        return keep.iter().any(|rule| rule.matches(candidate));
    }
    !block.iter().any(|rule| rule.matches(candidate))
}

pub struct FilterEngine {
    global_block: Vec<Rule>,
    global_keep: Vec<Rule>,
}

impl FilterEngine {
    pub fn new(block_rules: &str, keep_rules: &str) -> Self {
        Self {
            global_block: parse_rules(block_rules),
            global_keep: parse_rules(keep_rules),
        }
    }

    /// Apply global rules, feed rules, and rewrites, in that order.
    /// Pure rule evaluation; the crawler sub-fetch happens after filtering,
    /// in the pipeline, so only surviving new entries are scraped.
    pub fn apply(&self, feed: &Feed, candidates: Vec<CandidateEntry>) -> Vec<CandidateEntry> {
        let feed_block = parse_rules(feed.blocklist_rules.as_deref().unwrap_or(""));
        let feed_keep = parse_rules(feed.keeplist_rules.as_deref().unwrap_or(""));
        let content_rewrites = parse_rewrites(feed.rewrite_rules.as_deref().unwrap_or(""));
        let url_rewrites = parse_rewrites(feed.url_rewrite_rules.as_deref().unwrap_or(""));

        let before = candidates.len();
        let mut kept: Vec<CandidateEntry> = candidates
            .into_iter()
            .filter(|c| passes(&self.global_block, &self.global_keep, c))
            .filter(|c| passes(&feed_block, &feed_keep, c))
            .collect();

        if kept.len() < before {
            tracing::debug!(
                feed_id = feed.id,
                dropped = before - kept.len(),
                "Filter rules dropped candidates"
            );
        }

        for candidate in &mut kept {
            for (pattern, replacement) in &content_rewrites {
                candidate.content = pattern
                    .replace_all(&candidate.content, replacement.as_str())
                    .into_owned();
            }
            for (pattern, replacement) in &url_rewrites {
                candidate.url = pattern
                    .replace_all(&candidate.url, replacement.as_str())
                    .into_owned();
            }
        }

        kept
    }
}
