//! Deterministic rendering of [`EmailDispatchJob`]s.
//!
//! Output depends on the job alone, so a redelivered job produces a byte-identical email.

use chrono::{DateTime, NaiveDate};
use thiserror::Error;

use super::EmailDispatchJob;
use crate::incident;

const HEADING: &str = "FEMA Disaster Alert";
const SIGN_OFF_TEAM: &str = "Prisere Team";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("declarationDate '{0}' is not a valid date")]
    InvalidDate(String),
}

/// A fully rendered message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn render(job: &EmailDispatchJob) -> Result<RenderedEmail, RenderError> {
    let date = format_declaration_date(&job.declaration_date)?;
    let type_line = match incident::declaration_type_meaning(&job.declaration_type) {
        Some(meaning) => format!("{} ({meaning})", job.declaration_type),
        None => job.declaration_type.clone(),
    };

    Ok(RenderedEmail {
        from: job.from.clone(),
        to: job.to.clone(),
        subject: job.subject.clone(),
        html: render_html(job, &date, &type_line),
        text: render_text(job, &date, &type_line),
    })
}

fn render_html(job: &EmailDispatchJob, date: &str, type_line: &str) -> String {
    let mut details = vec![
        detail_item("Declaration Date", date),
        detail_item("Declaration Type", type_line),
    ];
    if let Some(city) = &job.city {
        details.push(detail_item("Location", city));
    }
    if let Some(company) = &job.company_name {
        details.push(detail_item("Company", company));
    }

    let lines = [
        "<!DOCTYPE html>".to_string(),
        "<html>".to_string(),
        format!("<head><meta charset=\"utf-8\"><title>{HEADING}</title></head>"),
        "<body style=\"font-family: Arial, sans-serif; line-height: 1.6; color: #333333;\">"
            .to_string(),
        "<div style=\"max-width: 600px; margin: 0 auto; padding: 20px;\">".to_string(),
        format!("<h1 style=\"color: #b91c1c;\">{HEADING}</h1>"),
        format!("<p>Hello {},</p>", escape_html(&job.first_name)),
        format!(
            "<p>A {} disaster has been declared in your area.</p>",
            escape_html(&job.declaration_type)
        ),
        "<ul>".to_string(),
        details.join("\n"),
        "</ul>".to_string(),
        "<p>Review your business continuity plan and start documenting any impact to your operations.</p>"
            .to_string(),
        format!("<p>Stay safe,<br>{SIGN_OFF_TEAM}</p>"),
        "<hr>".to_string(),
        format!(
            "<p style=\"font-size: 12px; color: #777777;\">Notification ID: {}<br>Disaster ID: {}</p>",
            escape_html(&job.notification_id),
            escape_html(&job.disaster_id)
        ),
        "</div>".to_string(),
        "</body>".to_string(),
        "</html>".to_string(),
    ];
    lines.join("\n")
}

fn render_text(job: &EmailDispatchJob, date: &str, type_line: &str) -> String {
    let mut lines = vec![
        HEADING.to_string(),
        String::new(),
        format!("Hello {},", job.first_name),
        String::new(),
        format!(
            "A {} disaster has been declared in your area.",
            job.declaration_type
        ),
        String::new(),
        format!("Declaration Date: {date}"),
        format!("Declaration Type: {type_line}"),
    ];
    if let Some(city) = &job.city {
        lines.push(format!("Location: {city}"));
    }
    if let Some(company) = &job.company_name {
        lines.push(format!("Company: {company}"));
    }
    lines.extend([
        String::new(),
        "Review your business continuity plan and start documenting any impact to your operations."
            .to_string(),
        String::new(),
        "Stay safe,".to_string(),
        SIGN_OFF_TEAM.to_string(),
        String::new(),
        format!("Notification ID: {}", job.notification_id),
        format!("Disaster ID: {}", job.disaster_id),
    ]);
    lines.join("\n")
}

fn detail_item(label: &str, value: &str) -> String {
    format!("<li><strong>{label}:</strong> {}</li>", escape_html(value))
}

/// Formats the declaration date as e.g. `September 1, 2025`.
fn format_declaration_date(value: &str) -> Result<String, RenderError> {
    let date = DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.date_naive())
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| RenderError::InvalidDate(value.to_string()))?;
    Ok(date.format("%B %-d, %Y").to_string())
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
