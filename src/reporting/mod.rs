//! Reporting: read-only views over the lead store.

pub mod export;

use chrono::{DateTime, Utc};

use crate::channels::escape_html;
use crate::funnel::templates::{excerpt, problem_display};
use crate::store::{LeadStats, ProblemCategory, traits::percent};

pub use export::{ExportArtifact, ExportOutcome, export_leads};

/// Custom-problem excerpt length in the recent-leads list.
const RECENT_EXCERPT_CHARS: usize = 30;

/// Render the operator's statistics message.
pub fn render_stats(stats: &LeadStats, generated_at: DateTime<Utc>) -> String {
    let mut text = format!(
        "📈 <b>FUNNEL STATISTICS</b>\n\n\
         👥 <b>Users:</b> {}\n\
         📝 <b>Requests:</b> {}\n\
         📊 <b>Conversion:</b> {}%\n\n",
        stats.total_users,
        stats.complete_records,
        stats.conversion_percent(),
    );

    if !stats.by_category.is_empty() {
        text.push_str("<b>Problems:</b>\n");
        for (category, count) in &stats.by_category {
            text.push_str(&format!(
                "• {}: {} ({}%)\n",
                category.label(),
                count,
                percent(*count, stats.total_users)
            ));
        }
    }

    if !stats.recent.is_empty() {
        text.push_str("\n<b>Latest requests:</b>\n");
        for lead in &stats.recent {
            let problem = match (&lead.problem.category, &lead.problem.custom_text) {
                (Some(ProblemCategory::Custom), Some(custom)) => {
                    format!("Own: {}", escape_html(&excerpt(custom, RECENT_EXCERPT_CHARS)))
                }
                _ => problem_display(&lead.problem, RECENT_EXCERPT_CHARS),
            };
            text.push_str(&format!(
                "• {} ({}) - @{} - {}\n",
                escape_html(&lead.contact_name),
                lead.age,
                escape_html(&lead.contact_handle),
                problem
            ));
        }
    }

    text.push_str(&format!(
        "\n⏰ <i>Updated: {}</i>",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    text
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::{LeadSummary, StoredProblem};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_stats_render_zeroes() {
        let text = render_stats(&LeadStats::default(), at());
        assert!(text.contains("<b>Users:</b> 0"));
        assert!(text.contains("<b>Conversion:</b> 0%"));
        assert!(!text.contains("Problems:"));
        assert!(!text.contains("Latest requests:"));
        assert!(text.contains("2026-05-01 12:00:00"));
    }

    #[test]
    fn stats_render_distribution_and_recent() {
        let stats = LeadStats {
            total_users: 4,
            complete_records: 1,
            by_category: vec![
                (ProblemCategory::Anxiety, 2),
                (ProblemCategory::Custom, 1),
            ],
            recent: vec![LeadSummary {
                user_id: "1".into(),
                contact_name: "Anna".into(),
                age: 29,
                contact_handle: "anna_t".into(),
                problem: StoredProblem {
                    category: Some(ProblemCategory::Custom),
                    custom_text: Some(
                        "Feeling exhausted all the time and losing interest".into(),
                    ),
                },
                created_at: at(),
            }],
        };

        let text = render_stats(&stats, at());
        assert!(text.contains("<b>Conversion:</b> 25%"));
        assert!(text.contains("• Anxiety / Stress: 2 (50%)"));
        assert!(text.contains("• Own problem: 1 (25%)"));
        assert!(text.contains("• Anna (29) - @anna_t - Own: Feeling exhausted all the time…"));
    }
}
