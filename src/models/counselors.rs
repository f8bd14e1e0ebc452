use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/*
Money is stored in minor units (cents) as BIGINT to keep fee arithmetic exact.
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Counselor {
    pub id: Uuid,
    pub name: String,
    pub region: Option<String>,
    pub specializations: Vec<String>,
    pub online: bool,
    pub booking_fee_cents: i64,
    pub rating: f64,
    pub rating_count: i64,
    pub total_cases: i64,
    pub completed_cases: i64,
    pub gross_earnings_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Counselor {
    pub fn new(name: impl Into<String>, booking_fee_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            region: None,
            specializations: Vec::new(),
            online: false,
            booking_fee_cents,
            rating: 0.0,
            rating_count: 0,
            total_cases: 0,
            completed_cases: 0,
            gross_earnings_cents: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_specialization(&self, category: &str) -> bool {
        self.specializations
            .iter()
            .any(|s| s.eq_ignore_ascii_case(category))
    }

    pub fn in_region(&self, region: &str) -> bool {
        self.region
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(region))
    }
}

/// Financial bookkeeping applied once when a linked session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseCredit {
    pub counselor_id: Uuid,
    pub completed: bool,
    pub earnings_cents: i64,
}

/// Normalizes a specialization list into a sorted, de-duplicated set.
pub fn normalize_specializations<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specializations_are_deduplicated_and_trimmed() {
        let specs = normalize_specializations(["Family ", "labor", "family", "  "]);
        assert_eq!(specs, vec!["family".to_string(), "labor".to_string()]);
    }

    #[test]
    fn region_match_ignores_case() {
        let mut c = Counselor::new("Amina", 1000);
        c.region = Some("Algiers".into());
        assert!(c.in_region("algiers"));
        assert!(!c.in_region("Oran"));
    }
}
