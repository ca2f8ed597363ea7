//! Markdown report rendering.
//!
//! Every result gets a heading and a fenced body. When the whole report would
//! exceed `max_chars`, bodies are cut down (never headings) and followed by a
//! truncation note.

use std::fmt::Write as _;

use crate::results::{ResultSet, RuleResult};

/// GitHub rejects comments over 65,536 characters.
pub const DEFAULT_MAX_COMMENT_CHARS: usize = 65_000;

const TITLE: &str = "## AutoAgent Review";
const FOOTER: &str = "---\n<sub>Generated by autoagent. Agent output is advisory; verify findings before acting on them.</sub>\n";
const EMPTY_OUTPUT_NOTE: &str = "> **Warning:** the agent returned no output for this rule.";
const MIN_FENCE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub max_chars: usize,
    /// Agent name shown in the summary line.
    pub agent: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_COMMENT_CHARS,
            agent: None,
        }
    }
}

/// Render `results` as one Markdown document. Deterministic.
pub fn render(results: &ResultSet, options: &ReportOptions) -> String {
    let header = header(results, options);
    let sections: Vec<String> = results
        .iter()
        .map(|r| render_section(r, body_of(r), None))
        .collect();

    let full = assemble(&header, &sections);
    if char_len(&full) <= options.max_chars {
        return full;
    }

    let fixed = char_len(&assemble(&header, &[]));
    let overhead: usize = results.iter().map(section_overhead).sum();
    let available = options.max_chars.saturating_sub(fixed + overhead);
    let lengths: Vec<usize> = results.iter().map(|r| char_len(body_of(r))).collect();
    let allowances = fair_shares(&lengths, available);

    let sections: Vec<String> = results
        .iter()
        .zip(lengths.iter().zip(&allowances))
        .map(|(result, (&total, &allowed))| {
            if allowed >= total {
                render_section(result, body_of(result), None)
            } else {
                let cut: String = body_of(result).chars().take(allowed).collect();
                render_section(result, &cut, Some((allowed, total)))
            }
        })
        .collect();
    assemble(&header, &sections)
}

fn header(results: &ResultSet, options: &ReportOptions) -> String {
    let mut out = format!("{TITLE}\n\nRan {} rule(s)", results.len());
    if let Some(agent) = &options.agent {
        let _ = write!(out, " with `{}`", agent.replace('`', ""));
    }
    out.push('.');
    let failed = results.failed_count();
    if failed > 0 {
        let _ = write!(out, " {failed} failed.");
    }
    out.push_str("\n\n");
    out
}

fn assemble(header: &str, sections: &[String]) -> String {
    let mut out = String::from(header);
    for section in sections {
        out.push_str(section);
    }
    out.push_str(FOOTER);
    out
}

fn body_of(result: &RuleResult) -> &str {
    result.output.trim_end()
}

fn render_section(result: &RuleResult, body: &str, truncated: Option<(usize, usize)>) -> String {
    let mut out = format!("### {}", escape_heading(&result.label));
    if !result.succeeded {
        out.push_str(" (failed)");
    }
    out.push_str("\n\n");

    if result.output.trim().is_empty() {
        out.push_str(EMPTY_OUTPUT_NOTE);
        out.push_str("\n\n");
        return out;
    }

    let fence = fence_for(body);
    let _ = write!(out, "{fence}\n{body}\n{fence}\n\n");
    if let Some((shown, total)) = truncated {
        out.push_str(&truncation_note(shown, total));
        out.push_str("\n\n");
    }
    out
}

/// Section size with an empty body, its current fence and the largest
/// possible truncation note.
fn section_overhead(result: &RuleResult) -> usize {
    let body = body_of(result);
    let total = char_len(body);
    let skeleton = render_section(result, "", None);
    if result.output.trim().is_empty() {
        return char_len(&skeleton);
    }
    // Cutting a body never lengthens its longest backtick run.
    let fence_growth = fence_for(body).len() - MIN_FENCE;
    char_len(&skeleton) + 2 * fence_growth + char_len(&truncation_note(total, total)) + 2
}

fn truncation_note(shown: usize, total: usize) -> String {
    format!("_[output truncated: showing {shown} of {total} characters]_")
}

/// A backtick fence strictly longer than any backtick run in `body`.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(MIN_FENCE))
}

/// Headings are single-line; Markdown punctuation is backslash-escaped.
fn escape_heading(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\n' | '\r' => out.push(' '),
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '#' | '|' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split `budget` across bodies: short bodies keep everything, the rest
/// share what is left evenly.
fn fair_shares(lengths: &[usize], budget: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by_key(|&i| (lengths[i], i));

    let mut shares = vec![0; lengths.len()];
    let mut remaining = budget;
    let mut left = lengths.len();
    for i in order {
        let share = remaining / left;
        let take = lengths[i].min(share);
        shares[i] = take;
        remaining -= take;
        left -= 1;
    }
    shares
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(results: &[(&str, &str)]) -> ResultSet {
        results
            .iter()
            .map(|(label, output)| RuleResult::new(*label, *output))
            .collect()
    }

    #[test]
    fn sections_in_order_with_footer() {
        let report = render(
            &set(&[("owasp-check", "no issues"), ("custom", "looks fine")]),
            &ReportOptions {
                agent: Some("claude".into()),
                ..Default::default()
            },
        );
        assert!(report.starts_with("## AutoAgent Review\n\nRan 2 rule(s) with `claude`."));
        let a = report.find("### owasp-check").unwrap();
        let b = report.find("### custom").unwrap();
        assert!(a < b);
        assert!(report.ends_with(FOOTER));
        assert!(report.contains("```\nno issues\n```"));
    }

    #[test]
    fn backtick_runs_cannot_close_the_fence() {
        let body = "before\n```\nbreakout\n`````\nafter";
        let report = render(&set(&[("x", body)]), &ReportOptions::default());
        assert!(report.contains(&format!("``````\n{body}\n``````")));
    }

    #[test]
    fn headings_are_escaped_and_single_line() {
        assert_eq!(escape_heading("a_b*c\n# d"), "a\\_b\\*c \\# d");
    }

    #[test]
    fn failed_rules_are_marked() {
        let mut results = ResultSet::new();
        results.push(RuleResult::failed("code-review", "Error: amp: no invocation strategy succeeded (3 attempted)"));
        let report = render(&results, &ReportOptions::default());
        assert!(report.contains("### code-review (failed)"));
        assert!(report.contains("Ran 1 rule(s). 1 failed."));
    }

    #[test]
    fn empty_output_gets_warning_instead_of_fence() {
        let report = render(&set(&[("quiet", "  \n")]), &ReportOptions::default());
        assert!(report.contains("### quiet\n\n> **Warning:**"));
        assert!(!report.contains("```"));
    }

    #[test]
    fn rendering_is_idempotent() {
        let results = set(&[("a", "x".repeat(5000).as_str()), ("b", "y")]);
        let options = ReportOptions {
            max_chars: 2000,
            agent: None,
        };
        assert_eq!(render(&results, &options), render(&results, &options));
    }

    #[test]
    fn truncation_keeps_every_heading_within_budget() {
        let long = "z".repeat(40_000);
        let results = set(&[
            ("first", long.as_str()),
            ("second", long.as_str()),
            ("tiny", "short and sweet"),
        ]);
        let options = ReportOptions {
            max_chars: 10_000,
            agent: None,
        };
        let report = render(&results, &options);
        assert!(char_len(&report) <= options.max_chars, "len {}", char_len(&report));
        for heading in ["### first", "### second", "### tiny"] {
            assert!(report.contains(heading));
        }
        assert!(report.contains("short and sweet"));
        assert_eq!(report.matches("_[output truncated: showing").count(), 2);
        assert!(report.contains("of 40000 characters]_"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "é".repeat(3000);
        let results = set(&[("accents", long.as_str())]);
        let options = ReportOptions {
            max_chars: 1000,
            agent: None,
        };
        let report = render(&results, &options);
        assert!(char_len(&report) <= 1000);
        assert!(report.contains("### accents"));
    }

    #[test]
    fn tiny_budget_still_lists_headings() {
        let results = set(&[("a", "body a"), ("b", "body b")]);
        let report = render(
            &results,
            &ReportOptions {
                max_chars: 10,
                agent: None,
            },
        );
        assert!(report.contains("### a"));
        assert!(report.contains("### b"));
        assert!(!report.contains("body a"));
    }

    #[test]
    fn fair_shares_give_leftovers_to_long_bodies() {
        assert_eq!(fair_shares(&[10, 1000, 1000], 310), vec![10, 150, 150]);
        assert_eq!(fair_shares(&[5, 5], 100), vec![5, 5]);
        assert_eq!(fair_shares(&[], 100), Vec::<usize>::new());
    }
}
