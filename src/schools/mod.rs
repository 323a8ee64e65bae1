//! School records and the read-only store that holds them.

pub mod store;

pub use store::{SchoolStatistics, SchoolStore, REQUIRED_COLUMNS};

use serde::{Deserialize, Serialize};

use crate::insights::SalesPriority;

/// A named contact at a school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub full_name: String,
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Benchmarking figures, kept as the human-readable strings they arrive as
/// (e.g. `"£102 per pupil"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialData {
    pub teaching_support_spend_per_pupil: Option<String>,
    pub comparison_to_other_schools: Option<String>,
    pub teaching_staff_costs: Option<String>,
    pub supply_teaching_costs: Option<String>,
    pub agency_supply_costs: Option<String>,
    pub educational_support_costs: Option<String>,
    pub educational_consultancy_costs: Option<String>,
}

impl FinancialData {
    /// Agency supply spend as a number, if the field holds one.
    ///
    /// Takes the first number in the string, ignoring currency symbols and
    /// thousands separators.
    pub fn agency_spend_amount(&self) -> Option<f64> {
        self.agency_supply_costs.as_deref().and_then(first_amount)
    }

    pub fn has_agency_spend(&self) -> bool {
        self.agency_spend_amount().is_some_and(|v| v > 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.labelled().is_empty()
    }

    /// Priority guess from the spend figures alone, used until a generated
    /// briefing supplies the model's own rating.
    ///
    /// - `HIGH`: any agency supply spend.
    /// - `MEDIUM`: supply teaching spend, or spending above similar schools.
    /// - `LOW`: everything else, including missing figures.
    pub fn estimated_priority(&self) -> SalesPriority {
        if self.has_agency_spend() {
            return SalesPriority::High;
        }
        let supply = self
            .supply_teaching_costs
            .as_deref()
            .and_then(first_amount)
            .is_some_and(|v| v > 0.0);
        let above_peers = self.comparison_to_other_schools.as_deref().is_some_and(|c| {
            let c = c.to_lowercase();
            c.contains("higher") || c.contains("above")
        });
        if supply || above_peers {
            SalesPriority::Medium
        } else {
            SalesPriority::Low
        }
    }

    /// Populated fields with display labels, in a fixed order.
    pub fn labelled(&self) -> Vec<(&'static str, &str)> {
        [
            (
                "Teaching support spend per pupil",
                &self.teaching_support_spend_per_pupil,
            ),
            (
                "Comparison to similar schools",
                &self.comparison_to_other_schools,
            ),
            ("Teaching staff costs", &self.teaching_staff_costs),
            ("Supply teaching costs", &self.supply_teaching_costs),
            ("Agency supply costs", &self.agency_supply_costs),
            ("Educational support costs", &self.educational_support_costs),
            (
                "Educational consultancy costs",
                &self.educational_consultancy_costs,
            ),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }
}

/// One school. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    /// Unique reference number. Stable identifier.
    pub urn: String,
    pub name: String,
    pub local_authority: Option<String>,
    pub school_type: Option<String>,
    pub phase: Option<String>,
    pub address: Vec<String>,
    pub town: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub trust_name: Option<String>,
    pub pupil_count: Option<u32>,
    pub headteacher: Option<Contact>,
    pub financial: FinancialData,
}

impl School {
    /// Minimal record; remaining attributes default to empty.
    pub fn new(urn: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            name: name.into(),
            local_authority: None,
            school_type: None,
            phase: None,
            address: Vec::new(),
            town: None,
            county: None,
            postcode: None,
            phone: None,
            website: None,
            trust_name: None,
            pupil_count: None,
            headteacher: None,
            financial: FinancialData::default(),
        }
    }

    /// Single-line postal address.
    pub fn full_address(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .address
            .iter()
            .map(String::as_str)
            .chain(self.town.as_deref())
            .chain(self.county.as_deref())
            .chain(self.postcode.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

fn first_amount(s: &str) -> Option<f64> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let digits: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    digits.trim_end_matches('.').parse().ok()
}
