//! Schema validation of raw FEMA declaration records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::Disaster;
use crate::incident;

const STATE_CODE_RANGE: (i64, i64) = (0, 56);
const COUNTY_CODE_RANGE: (i64, i64) = (0, 999);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record does not match the declaration schema: {0}")]
    Malformed(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a valid timestamp: '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("field '{field}' is not numeric: '{value}'")]
    NotNumeric { field: &'static str, value: String },
    #[error("field '{field}' value {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("declaration type must be two uppercase letters, got '{0}'")]
    DeclarationType(String),
    #[error("incident begins {begin} after it ends {end}")]
    IncidentDatesInverted {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("unknown incident code '{0}'")]
    UnknownIncidentCode(String),
}

/// Administrative codes arrive as zero-padded strings (`"017"`) or plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CodeValue {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeclaration {
    id: Option<String>,
    disaster_number: Option<i64>,
    fips_state_code: Option<CodeValue>,
    fips_county_code: Option<CodeValue>,
    declaration_date: Option<String>,
    incident_begin_date: Option<String>,
    incident_end_date: Option<String>,
    declaration_type: Option<String>,
    designated_area: Option<String>,
    designated_incident_types: Option<String>,
    incident_type: Option<String>,
    last_refresh: Option<String>,
}

/// Validates one feed record and normalises it into a [`Disaster`].
pub fn validate_declaration(record: &Value) -> Result<Disaster, ValidationError> {
    let raw: RawDeclaration = serde_json::from_value(record.clone())
        .map_err(|err| ValidationError::Malformed(err.to_string()))?;

    let id = required_text(raw.id, "id")?;

    let disaster_number = raw
        .disaster_number
        .ok_or(ValidationError::MissingField("disasterNumber"))?;
    let disaster_number = in_range("disasterNumber", disaster_number, 1, i64::from(i32::MAX))?;

    let fips_state_code = admin_code(raw.fips_state_code, "fipsStateCode", STATE_CODE_RANGE)?;
    let fips_county_code = admin_code(raw.fips_county_code, "fipsCountyCode", COUNTY_CODE_RANGE)?;

    let declaration_date = parse_timestamp(
        "declarationDate",
        &required_text(raw.declaration_date, "declarationDate")?,
    )?;
    let last_refresh = parse_timestamp(
        "lastRefresh",
        &required_text(raw.last_refresh, "lastRefresh")?,
    )?;
    let incident_begin_date = optional_timestamp("incidentBeginDate", raw.incident_begin_date)?;
    let incident_end_date = optional_timestamp("incidentEndDate", raw.incident_end_date)?;
    if let (Some(begin), Some(end)) = (incident_begin_date, incident_end_date)
        && begin > end
    {
        return Err(ValidationError::IncidentDatesInverted { begin, end });
    }

    let declaration_type = required_text(raw.declaration_type, "declarationType")?;
    if declaration_type.len() != 2 || !declaration_type.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::DeclarationType(declaration_type));
    }

    let designated_area = required_text(raw.designated_area, "designatedArea")?;
    let designated_incident_types =
        merge_incident_types(raw.designated_incident_types.as_deref(), raw.incident_type.as_deref())?;

    Ok(Disaster {
        id,
        disaster_number,
        fips_state_code,
        fips_county_code,
        declaration_date,
        incident_begin_date,
        incident_end_date,
        declaration_type,
        designated_area,
        designated_incident_types,
        last_refresh,
    })
}

/// Folds the `incidentType` label into the designated code list, keeping first-seen order.
fn merge_incident_types(
    designated: Option<&str>,
    label: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    let mut codes: Vec<String> = Vec::new();

    for code in designated.into_iter().flat_map(incident::split_codes) {
        if !incident::is_known_code(code) {
            return Err(ValidationError::UnknownIncidentCode(code.to_string()));
        }
        if !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }

    // Unrecognised labels carry no code; the designated list still stands.
    if let Some(code) = label.and_then(incident::code_for_label)
        && !codes.iter().any(|c| c == code)
    {
        codes.push(code.to_string());
    }

    Ok(if codes.is_empty() {
        None
    } else {
        Some(codes.join(","))
    })
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

fn in_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<i32, ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    i32::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        value,
        min,
        max,
    })
}

fn admin_code(
    value: Option<CodeValue>,
    field: &'static str,
    (min, max): (i64, i64),
) -> Result<i32, ValidationError> {
    let number = match value.ok_or(ValidationError::MissingField(field))? {
        CodeValue::Number(n) => n,
        CodeValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(ValidationError::MissingField(field));
            }
            if !trimmed.chars().all(|c| c.is_ascii_digit()) {
                return Err(ValidationError::NotNumeric { field, value: text });
            }
            trimmed
                .parse::<i64>()
                .map_err(|_| ValidationError::NotNumeric { field, value: text.clone() })?
        }
    };
    in_range(field, number, min, max)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

fn optional_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_timestamp(field, text).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "id": "6c2f3b0e-5d3a-4b8e-9d1c-0a3f5e7b9c11",
            "disasterNumber": 4834,
            "fipsStateCode": "25",
            "fipsCountyCode": "017",
            "declarationDate": "2025-09-01T00:00:00.000Z",
            "incidentBeginDate": "2025-08-28T00:00:00.000Z",
            "incidentEndDate": "2025-08-30T00:00:00.000Z",
            "declarationType": "DR",
            "designatedArea": "Middlesex (County)",
            "designatedIncidentTypes": "W",
            "incidentType": "Flood",
            "lastRefresh": "2025-09-02T10:15:00.000Z"
        })
    }

    #[test]
    fn accepts_padded_codes_and_merges_label() {
        let disaster = validate_declaration(&valid()).unwrap();
        assert_eq!(disaster.fips_state_code, 25);
        assert_eq!(disaster.fips_county_code, 17);
        assert_eq!(disaster.designated_incident_types.as_deref(), Some("W,F"));
        assert_eq!(
            disaster.last_refresh,
            Utc.with_ymd_and_hms(2025, 9, 2, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn numeric_codes_are_accepted() {
        let mut record = valid();
        record["fipsStateCode"] = json!(6);
        record["fipsCountyCode"] = json!(37);
        let disaster = validate_declaration(&record).unwrap();
        assert_eq!((disaster.fips_state_code, disaster.fips_county_code), (6, 37));
    }

    #[test]
    fn label_already_designated_is_not_duplicated() {
        let mut record = valid();
        record["designatedIncidentTypes"] = json!("F, W");
        let disaster = validate_declaration(&record).unwrap();
        assert_eq!(disaster.designated_incident_types.as_deref(), Some("F,W"));
    }

    #[test]
    fn rejects_out_of_range_state() {
        let mut record = valid();
        record["fipsStateCode"] = json!("72");
        assert!(matches!(
            validate_declaration(&record),
            Err(ValidationError::OutOfRange {
                field: "fipsStateCode",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_numeric_county() {
        let mut record = valid();
        record["fipsCountyCode"] = json!("01A");
        assert!(matches!(
            validate_declaration(&record),
            Err(ValidationError::NotNumeric { .. })
        ));
    }

    #[test]
    fn rejects_bad_declaration_type() {
        for bad in ["D", "DRX", "dr"] {
            let mut record = valid();
            record["declarationType"] = json!(bad);
            assert!(
                matches!(
                    validate_declaration(&record),
                    Err(ValidationError::DeclarationType(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_missing_fields() {
        for field in ["id", "declarationDate", "designatedArea", "lastRefresh"] {
            let mut record = valid();
            record.as_object_mut().unwrap().remove(field);
            assert_eq!(
                validate_declaration(&record),
                Err(ValidationError::MissingField(field))
            );
        }
    }

    #[test]
    fn rejects_inverted_incident_dates() {
        let mut record = valid();
        record["incidentEndDate"] = json!("2025-08-01T00:00:00.000Z");
        assert!(matches!(
            validate_declaration(&record),
            Err(ValidationError::IncidentDatesInverted { .. })
        ));
    }

    #[test]
    fn rejects_unknown_incident_code() {
        let mut record = valid();
        record["designatedIncidentTypes"] = json!("F,9");
        assert_eq!(
            validate_declaration(&record),
            Err(ValidationError::UnknownIncidentCode("9".to_string()))
        );
    }

    #[test]
    fn null_end_date_is_allowed() {
        let mut record = valid();
        record["incidentEndDate"] = Value::Null;
        assert!(validate_declaration(&record).unwrap().incident_end_date.is_none());
    }

    #[test]
    fn non_object_is_malformed() {
        assert!(matches!(
            validate_declaration(&json!("nope")),
            Err(ValidationError::Malformed(_))
        ));
    }
}
