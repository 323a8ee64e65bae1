//! In-memory school store loaded once from a CSV export.
//!
//! The header is schema-checked before any row is read: every column in
//! [`REQUIRED_COLUMNS`] must be present. Rows with an empty `urn` or
//! `school_name`, an unparseable `pupil_count`, or a duplicate `urn` fail the
//! whole load with [`BriefError::DataSource`]. There is no partial load.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{BriefError, Result};
use crate::insights::SalesPriority;

use super::{Contact, FinancialData, School};

/// Columns that must appear in the CSV header. Cells may still be empty,
/// except `urn` and `school_name`.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "urn",
    "school_name",
    "phone",
    "headteacher",
    "comparison_to_other_schools",
    "agency_supply_costs",
];

/// Read-only collection of schools indexed by URN.
#[derive(Debug, Clone)]
pub struct SchoolStore {
    schools: Vec<School>,
    by_urn: HashMap<String, usize>,
    source: String,
}

/// Summary counts for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolStatistics {
    pub total_schools: usize,
    pub with_agency_spend: usize,
    pub by_phase: BTreeMap<String, usize>,
    /// Counts by [`FinancialData::estimated_priority`].
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    pub data_source: String,
}

impl SchoolStore {
    /// Load and validate a CSV file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            BriefError::DataSource(format!("cannot open {}: {}", path.display(), e))
        })?;
        let store = Self::from_reader(file, &path.display().to_string())?;
        info!(
            path = %path.display(),
            schools = store.len(),
            "Loaded school data"
        );
        Ok(store)
    }

    /// Parse CSV from any reader. `origin` names the source in errors.
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| BriefError::DataSource(format!("{origin}: unreadable header: {e}")))?
            .clone();
        let columns = Columns::new(&headers);

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !columns.has(c))
            .collect();
        if !missing.is_empty() {
            return Err(BriefError::DataSource(format!(
                "{origin}: missing required column(s): {}",
                missing.join(", ")
            )));
        }

        let mut schools = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| BriefError::DataSource(format!("{origin}: malformed row: {e}")))?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let school = columns
                .to_school(&record)
                .map_err(|msg| BriefError::DataSource(format!("{origin} line {line}: {msg}")))?;
            schools.push(school);
        }

        Self::build(schools, origin)
    }

    /// Build a store from records constructed in code.
    pub fn from_records(schools: Vec<School>) -> Result<Self> {
        for school in &schools {
            if school.urn.trim().is_empty() || school.name.trim().is_empty() {
                return Err(BriefError::DataSource(format!(
                    "record with urn '{}' is missing its urn or name",
                    school.urn
                )));
            }
        }
        Self::build(schools, "memory")
    }

    fn build(schools: Vec<School>, origin: &str) -> Result<Self> {
        let mut by_urn = HashMap::with_capacity(schools.len());
        for (idx, school) in schools.iter().enumerate() {
            if by_urn.insert(school.urn.clone(), idx).is_some() {
                return Err(BriefError::DataSource(format!(
                    "{origin}: duplicate urn '{}'",
                    school.urn
                )));
            }
        }
        debug!(origin, count = schools.len(), "Indexed schools");
        Ok(Self {
            schools,
            by_urn,
            source: origin.to_string(),
        })
    }

    /// Look a school up by URN.
    pub fn lookup(&self, urn: &str) -> Result<&School> {
        self.by_urn
            .get(urn)
            .map(|&idx| &self.schools[idx])
            .ok_or_else(|| BriefError::NotFound(urn.to_string()))
    }

    /// All schools in load order.
    pub fn all(&self) -> &[School] {
        &self.schools
    }

    /// Exact name match, ignoring case and surrounding whitespace.
    pub fn find_by_name(&self, name: &str) -> Option<&School> {
        let name = name.trim();
        self.schools
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Look a school up by URN, falling back to its name.
    pub fn resolve(&self, urn_or_name: &str) -> Result<&School> {
        match self.lookup(urn_or_name) {
            Ok(school) => Ok(school),
            Err(err) => self.find_by_name(urn_or_name).ok_or(err),
        }
    }

    /// Case-insensitive substring match on the school name.
    pub fn search(&self, query: &str) -> Vec<&School> {
        let needle = query.to_lowercase();
        self.schools
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn with_agency_spend(&self) -> Vec<&School> {
        self.schools
            .iter()
            .filter(|s| s.financial.has_agency_spend())
            .collect()
    }

    pub fn statistics(&self) -> SchoolStatistics {
        let mut by_phase = BTreeMap::new();
        let (mut high, mut medium, mut low) = (0, 0, 0);
        for school in &self.schools {
            let phase = school.phase.clone().unwrap_or_else(|| "Unknown".to_string());
            *by_phase.entry(phase).or_insert(0) += 1;
            match school.financial.estimated_priority() {
                SalesPriority::High => high += 1,
                SalesPriority::Medium => medium += 1,
                SalesPriority::Low => low += 1,
            }
        }
        SchoolStatistics {
            total_schools: self.schools.len(),
            with_agency_spend: self.with_agency_spend().len(),
            by_phase,
            high_priority: high,
            medium_priority: medium,
            low_priority: low,
            data_source: self.source.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.schools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schools.is_empty()
    }
}

/// Header name → column index.
struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
            .collect();
        Self { index }
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Trimmed, non-empty cell value.
    fn get(&self, record: &StringRecord, name: &str) -> Option<String> {
        let idx = *self.index.get(name)?;
        record
            .get(idx)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    fn to_school(&self, record: &StringRecord) -> std::result::Result<School, String> {
        let urn = self
            .get(record, "urn")
            .ok_or_else(|| "empty urn".to_string())?;
        let name = self
            .get(record, "school_name")
            .ok_or_else(|| format!("empty school_name for urn '{urn}'"))?;

        let pupil_count = match self.get(record, "pupil_count") {
            Some(raw) => Some(parse_count(&raw).ok_or_else(|| {
                format!("invalid pupil_count '{raw}' for urn '{urn}'")
            })?),
            None => None,
        };

        let phone = self.get(record, "phone");
        let headteacher = self.get(record, "headteacher").map(|full_name| Contact {
            full_name,
            title: self.get(record, "head_title"),
            first_name: self.get(record, "head_first_name"),
            last_name: self.get(record, "head_last_name"),
            phone: phone.clone(),
        });

        let financial = FinancialData {
            teaching_support_spend_per_pupil: self
                .get(record, "total_teaching_support_spend_per_pupil"),
            comparison_to_other_schools: self.get(record, "comparison_to_other_schools"),
            teaching_staff_costs: self.get(record, "teaching_staff_costs"),
            supply_teaching_costs: self.get(record, "supply_teaching_costs"),
            agency_supply_costs: self.get(record, "agency_supply_costs"),
            educational_support_costs: self.get(record, "educational_support_costs"),
            educational_consultancy_costs: self.get(record, "educational_consultancy_costs"),
        };

        Ok(School {
            urn,
            name,
            local_authority: self.get(record, "la_name"),
            school_type: self.get(record, "school_type"),
            phase: self.get(record, "phase"),
            address: ["address_1", "address_2", "address_3"]
                .iter()
                .filter_map(|c| self.get(record, c))
                .collect(),
            town: self.get(record, "town"),
            county: self.get(record, "county"),
            postcode: self.get(record, "postcode"),
            phone,
            website: self.get(record, "website"),
            trust_name: self.get(record, "trust_name"),
            pupil_count,
            headteacher,
            financial,
        })
    }
}

/// Accepts `"116"` and spreadsheet-style `"116.0"`.
fn parse_count(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let f: f64 = raw.parse().ok()?;
    (f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX)).then_some(f as u32)
}
