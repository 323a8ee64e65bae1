//! `list` and `show` command handlers.

use anyhow::Result;

use schoolbrief::{School, SchoolStore};

/// Handle `schoolbrief list`.
pub(crate) fn cmd_list(store: &SchoolStore, search: Option<&str>, agency_spend: bool) {
    let mut schools: Vec<&School> = match search {
        Some(q) => store.search(q),
        None => store.all().iter().collect(),
    };
    if agency_spend {
        schools.retain(|s| s.financial.has_agency_spend());
    }

    if schools.is_empty() {
        println!("No schools match.");
        return;
    }

    println!("{:<14} {:<44} {:<16} {:<8}", "URN", "Name", "Phase", "Priority");
    println!("{}", "-".repeat(85));
    for school in &schools {
        println!(
            "{:<14} {:<44} {:<16} {:<8}",
            school.urn,
            truncate(&school.name, 44),
            school.phase.as_deref().unwrap_or("-"),
            school.financial.estimated_priority(),
        );
    }
    println!();
    println!("{} of {} schools", schools.len(), store.len());
}

/// Handle `schoolbrief show <URN|NAME>`.
pub(crate) fn cmd_show(store: &SchoolStore, urn_or_name: &str) -> Result<()> {
    let school = store.resolve(urn_or_name)?;
    print!("{}", render_school(school));
    Ok(())
}

pub(crate) fn render_school(school: &School) -> String {
    let mut out = format!("{} ({})\n", school.name, school.urn);
    let mut line = |label: &str, value: Option<&str>| {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            out.push_str(&format!("  {:<34} {}\n", format!("{label}:"), v));
        }
    };

    line("Type", school.school_type.as_deref());
    line("Phase", school.phase.as_deref());
    line("Local authority", school.local_authority.as_deref());
    line("Trust", school.trust_name.as_deref());
    line("Address", school.full_address().as_deref());
    line("Phone", school.phone.as_deref());
    line("Website", school.website.as_deref());
    let pupils = school.pupil_count.map(|n| n.to_string());
    line("Pupils", pupils.as_deref());
    let priority = school.financial.estimated_priority().to_string();
    line("Estimated priority", Some(priority.as_str()));
    if let Some(head) = &school.headteacher {
        let name = match &head.title {
            Some(title) => format!("{} {}", title, head.full_name),
            None => head.full_name.clone(),
        };
        line("Headteacher", Some(name.as_str()));
    }
    for (label, value) in school.financial.labelled() {
        line(label, Some(value));
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut t: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    t.push('…');
    t
}
