//! FEMA declaration-type and incident-type vocabularies.

/// Single-character incident codes used in `designatedIncidentTypes`.
pub const INCIDENT_CODES: &[(&str, &str)] = &[
    ("0", "Not applicable"),
    ("1", "Explosion"),
    ("2", "Straight-Line Winds"),
    ("3", "Tidal Wave"),
    ("4", "Tropical Storm"),
    ("5", "Winter Storm"),
    ("8", "Tropical Depression"),
    ("A", "Tsunami"),
    ("B", "Biological"),
    ("C", "Coastal Storm"),
    ("D", "Drought"),
    ("E", "Earthquake"),
    ("F", "Flood"),
    ("G", "Freezing"),
    ("H", "Hurricane"),
    ("I", "Terrorist"),
    ("J", "Typhoon"),
    ("K", "Dam/Levee Break"),
    ("L", "Chemical"),
    ("M", "Mud/Landslide"),
    ("N", "Nuclear"),
    ("O", "Severe Ice Storm"),
    ("P", "Fishing Losses"),
    ("Q", "Crop Losses"),
    ("R", "Fire"),
    ("S", "Snowstorm"),
    ("T", "Tornado"),
    ("U", "Civil Unrest"),
    ("V", "Volcanic Eruption"),
    ("W", "Severe Storm"),
    ("X", "Toxic Substances"),
    ("Y", "Human Cause"),
    ("Z", "Other"),
];

/// Human readable meaning of an incident code.
pub fn incident_meaning(code: &str) -> Option<&'static str> {
    INCIDENT_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, meaning)| *meaning)
}

/// Code for a feed `incidentType` label such as `"Severe Storm"`. Case-insensitive.
pub fn code_for_label(label: &str) -> Option<&'static str> {
    let label = label.trim();
    INCIDENT_CODES
        .iter()
        .find(|(_, meaning)| meaning.eq_ignore_ascii_case(label))
        .map(|(code, _)| *code)
}

pub fn is_known_code(code: &str) -> bool {
    incident_meaning(code).is_some()
}

/// Meaning of a two-letter declaration type.
pub fn declaration_type_meaning(code: &str) -> Option<&'static str> {
    match code {
        "DR" => Some("Major disaster"),
        "EM" => Some("Emergency declaration"),
        "FM" => Some("Fire management"),
        _ => None,
    }
}

/// Splits a comma-delimited code list, dropping blanks.
pub fn split_codes(codes: &str) -> impl Iterator<Item = &str> {
    codes.split(',').map(str::trim).filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup_ignores_case() {
        assert_eq!(code_for_label("severe storm"), Some("W"));
        assert_eq!(code_for_label("Flood"), Some("F"));
        assert_eq!(code_for_label("Meteor"), None);
    }

    #[test]
    fn declaration_types() {
        assert_eq!(declaration_type_meaning("DR"), Some("Major disaster"));
        assert_eq!(declaration_type_meaning("XX"), None);
    }

    #[test]
    fn split_skips_blanks() {
        let codes: Vec<_> = split_codes(" F, ,W,").collect();
        assert_eq!(codes, vec!["F", "W"]);
    }
}
