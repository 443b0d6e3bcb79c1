//! # Location Matching
//!
//! Exact (state, county) matching between a declaration and business locations.
//! There is no wildcard: a statewide declaration published with county `000` only
//! matches locations that also carry county `000`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{Disaster, LocationAddress};
use crate::error::RepositoryError;
use crate::repositories::LocationDirectory;

/// Returns the locations whose codes equal the disaster's, deduplicated by id,
/// preserving input order.
pub fn match_locations(disaster: &Disaster, candidates: &[LocationAddress]) -> Vec<LocationAddress> {
    let key = disaster.admin_codes();
    let mut seen = HashSet::new();

    candidates
        .iter()
        .filter(|location| location.admin_codes() == key)
        .filter(|location| seen.insert(location.id))
        .cloned()
        .collect()
}

/// Looks up candidate locations through the directory and applies [`match_locations`].
pub struct LocationMatcher {
    locations: Arc<dyn LocationDirectory>,
}

impl LocationMatcher {
    pub fn new(locations: Arc<dyn LocationDirectory>) -> Self {
        Self { locations }
    }

    pub async fn find_affected(
        &self,
        disaster: &Disaster,
    ) -> Result<Vec<LocationAddress>, RepositoryError> {
        let candidates = self
            .locations
            .find_locations_by_admin_codes(disaster.admin_codes())
            .await?;
        let matched = match_locations(disaster, &candidates);
        debug!(
            disaster_id = %disaster.id,
            codes = %disaster.admin_codes(),
            candidates = candidates.len(),
            matched = matched.len(),
            "matched locations"
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn disaster(state: i32, county: i32) -> Disaster {
        Disaster {
            id: "d-1".into(),
            disaster_number: 4834,
            fips_state_code: state,
            fips_county_code: county,
            declaration_date: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
            incident_begin_date: None,
            incident_end_date: None,
            declaration_type: "DR".into(),
            designated_area: "Middlesex (County)".into(),
            designated_incident_types: Some("F".into()),
            last_refresh: Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap(),
        }
    }

    fn location(company_id: Uuid, state: i32, county: i32) -> LocationAddress {
        LocationAddress {
            id: Uuid::new_v4(),
            company_id,
            alias: None,
            street_address: "1 Main St".into(),
            city: "Springfield".into(),
            state_province: "MA".into(),
            postal_code: "01101".into(),
            country: "US".into(),
            fips_state_code: state,
            fips_county_code: county,
        }
    }

    #[test]
    fn only_exact_pair_matches() {
        let company = Uuid::new_v4();
        let target = location(company, 25, 17);
        let candidates = vec![
            target.clone(),
            location(company, 25, 21),
            location(company, 36, 17),
        ];

        let matched = match_locations(&disaster(25, 17), &candidates);
        assert_eq!(matched, vec![target]);
    }

    #[test]
    fn statewide_code_is_not_a_wildcard() {
        let company = Uuid::new_v4();
        let candidates = vec![location(company, 25, 17), location(company, 25, 0)];

        let matched = match_locations(&disaster(25, 0), &candidates);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].fips_county_code, 0);
    }

    #[test]
    fn keeps_all_locations_of_a_company_but_drops_duplicates() {
        let company = Uuid::new_v4();
        let first = location(company, 25, 17);
        let second = location(company, 25, 17);
        let candidates = vec![first.clone(), second.clone(), first.clone()];

        let matched = match_locations(&disaster(25, 17), &candidates);
        assert_eq!(matched, vec![first, second]);
    }

    #[test]
    fn no_candidates_no_matches() {
        assert!(match_locations(&disaster(25, 17), &[]).is_empty());
    }
}
