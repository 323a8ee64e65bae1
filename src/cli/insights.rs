//! `insights`, `suggest`, `clear-cache` and `stats` command handlers.

use anyhow::{Context, Result};

use schoolbrief::insights::{PrioritySource, RankedSchool};
use schoolbrief::{GenerationResult, InsightService, School};

/// Handle `schoolbrief insights <URN|NAME>`.
pub(crate) async fn cmd_insights(
    service: &InsightService,
    urn_or_name: &str,
    refresh: bool,
    json: bool,
) -> Result<()> {
    let school = service.store().resolve(urn_or_name)?;
    if !json {
        println!("Preparing briefing for {}...", school.name);
    }
    let result = service.get_insights(&school.urn, refresh).await?;

    if json {
        let out = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
        println!("{}", out);
    } else {
        print!("{}", render_insights(school, &result));
    }
    Ok(())
}

/// Handle `schoolbrief suggest`.
pub(crate) fn cmd_suggest(service: &InsightService, limit: usize) {
    let ranked = service.high_priority_schools(limit);
    if ranked.is_empty() {
        println!("No schools loaded.");
        return;
    }
    print!("{}", render_suggestions(&ranked));
}

/// Handle `schoolbrief clear-cache [URN|NAME] [--expired]`.
pub(crate) fn cmd_clear_cache(
    service: &InsightService,
    school: Option<&str>,
    expired: bool,
) -> Result<()> {
    if expired {
        let purged = service.purge_expired_cache()?;
        println!("Removed {} expired entr{}.", purged, plural_y(purged));
        return Ok(());
    }
    let urn = match school {
        Some(s) => Some(service.store().resolve(s)?.urn.as_str()),
        None => None,
    };
    let removed = service.clear_cache(urn)?;
    match urn {
        Some(id) if removed == 0 => println!("No cached insights for {}.", id),
        Some(id) => println!("Cleared cached insights for {}.", id),
        None => println!("Cleared {} cached entr{}.", removed, plural_y(removed)),
    }
    Ok(())
}

/// Handle `schoolbrief stats`.
pub(crate) fn cmd_stats(service: &InsightService) -> Result<()> {
    let stats = service.statistics()?;
    let s = &stats.schools;

    println!("Data source:        {}", s.data_source);
    println!("Schools:            {}", s.total_schools);
    println!("With agency spend:  {}", s.with_agency_spend);
    for (phase, count) in &s.by_phase {
        println!("  {:<18}{}", format!("{phase}:"), count);
    }
    let p = &stats.priorities;
    println!(
        "Priority:           {} high, {} medium, {} low ({} from briefings)",
        p.high, p.medium, p.low, p.rated
    );
    println!();
    println!("Provider:           {}", stats.provider);
    println!(
        "Cache entries:      {} ({} expired)",
        stats.cache.total_entries, stats.cache.expired_entries
    );
    println!("Cache directory:    {}", service.cache().dir().display());
    Ok(())
}

pub(crate) fn render_insights(school: &School, result: &GenerationResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{} ({})\n", school.name, school.urn));
    out.push_str(&format!("Sales priority: {}\n", result.sales_priority));
    if let Some(summary) = &result.summary {
        out.push_str(&format!("\n{}\n", summary));
    }
    out.push_str("\nConversation starters:\n");
    for (i, starter) in result.starters.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", i + 1, starter.topic));
        out.push_str(&format!("   {}\n", starter.detail));
        let mut meta = Vec::new();
        if let Some(source) = &starter.source {
            meta.push(format!("source: {source}"));
        }
        if let Some(score) = starter.relevance_score {
            meta.push(format!("relevance: {:.0}%", score * 100.0));
        }
        if !meta.is_empty() {
            out.push_str(&format!("   ({})\n", meta.join(", ")));
        }
    }
    out.push_str(&format!(
        "\nGenerated {} by {}\n",
        result.generated_at.format("%Y-%m-%d %H:%M UTC"),
        result.model
    ));
    out
}

pub(crate) fn render_suggestions(ranked: &[RankedSchool<'_>]) -> String {
    let mut out = format!("{:<4} {:<14} {:<44} {:<8} {}\n", "#", "URN", "Name", "Priority", "Basis");
    out.push_str(&"-".repeat(84));
    out.push('\n');
    for (i, r) in ranked.iter().enumerate() {
        let basis = match r.source {
            PrioritySource::Rated => "briefing",
            PrioritySource::Estimated => "spend data",
        };
        out.push_str(&format!(
            "{:<4} {:<14} {:<44} {:<8} {}\n",
            i + 1,
            r.school.urn,
            r.school.name,
            r.priority.as_str(),
            basis
        ));
    }
    out
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use schoolbrief::{ConversationStarter, SalesPriority};

    fn result() -> GenerationResult {
        GenerationResult {
            starters: vec![
                ConversationStarter {
                    topic: "Agency spend".into(),
                    detail: "Agency costs sit well above similar schools.".into(),
                    source: Some("agency_supply_costs".into()),
                    relevance_score: Some(0.85),
                },
                ConversationStarter {
                    topic: "New head".into(),
                    detail: "Leadership changed this year.".into(),
                    source: None,
                    relevance_score: None,
                },
            ],
            summary: Some("High agency reliance.".into()),
            sales_priority: SalesPriority::High,
            model: "anthropic:claude-sonnet-4-20250514".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_insights_lists_starters_in_order() {
        let school = School::new("school-002", "Beta Nursery");
        let out = render_insights(&school, &result());
        let first = out.find("1. Agency spend").unwrap();
        let second = out.find("2. New head").unwrap();
        assert!(first < second);
        assert!(out.contains("Sales priority: HIGH"));
        assert!(out.contains("(source: agency_supply_costs, relevance: 85%)"));
        assert!(out.contains("Generated 2026-10-16 09:30 UTC by anthropic:"));
    }

    #[test]
    fn test_render_suggestions_marks_basis() {
        let a = School::new("school-002", "Beta Nursery");
        let b = School::new("school-001", "Alpha Primary");
        let ranked = vec![
            RankedSchool {
                school: &a,
                priority: SalesPriority::High,
                source: PrioritySource::Rated,
            },
            RankedSchool {
                school: &b,
                priority: SalesPriority::Low,
                source: PrioritySource::Estimated,
            },
        ];
        let out = render_suggestions(&ranked);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("1 "));
        assert!(lines[2].contains("school-002") && lines[2].contains("HIGH") && lines[2].ends_with("briefing"));
        assert!(lines[3].contains("LOW") && lines[3].ends_with("spend data"));
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural_y(1), "y");
        assert_eq!(plural_y(0), "ies");
    }
}
