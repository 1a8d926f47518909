//! Recipient ingestion
//!
//! Normalizes recipient rows before a campaign is created: header
//! synonyms are mapped case-insensitively with whitespace, dash and
//! underscore stripped; rows without a valid email are dropped; emails
//! are lowercased and de-duplicated keeping the first occurrence; every
//! unmapped non-empty column lands in the recipient's variable map.
//! Spreadsheet parsing itself happens upstream; this module only sees
//! header + row values.

use cadence_common::types::EmailAddress;
use cadence_storage::models::NewRecipient;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Structured recipient input, as a caller of `CreateCampaign` provides it
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RecipientInput {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// What happened to the submitted rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub invalid: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    Email,
    FirstName,
    LastName,
    Company,
    Other,
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase()
}

fn map_header(header: &str) -> HeaderField {
    match normalize_header(header).as_str() {
        "email" | "emailaddress" | "mail" => HeaderField::Email,
        "firstname" | "fname" | "givenname" | "name" => HeaderField::FirstName,
        "lastname" | "lname" | "surname" | "familyname" => HeaderField::LastName,
        "company" | "organization" | "org" | "business" | "employer" => HeaderField::Company,
        _ => HeaderField::Other,
    }
}

/// Validate, lowercase and de-duplicate structured recipient inputs
pub fn prepare_recipients(inputs: Vec<RecipientInput>) -> (Vec<NewRecipient>, IngestSummary) {
    let mut summary = IngestSummary::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut recipients = Vec::new();

    for input in inputs {
        let Some(address) = EmailAddress::parse(&input.email) else {
            summary.invalid += 1;
            continue;
        };
        let email = address.to_string().to_lowercase();

        if !seen.insert(email.clone()) {
            summary.duplicates += 1;
            continue;
        }

        summary.accepted += 1;
        recipients.push(NewRecipient {
            email,
            first_name: non_empty(input.first_name),
            last_name: non_empty(input.last_name),
            variables: Value::Object(input.variables),
        });
    }

    (recipients, summary)
}

/// Map tabular rows (first row upstream was the header) into recipient
/// inputs, then validate and de-duplicate them.
pub fn normalize_rows(
    headers: &[String],
    rows: &[Vec<String>],
) -> (Vec<NewRecipient>, IngestSummary) {
    let fields: Vec<HeaderField> = headers.iter().map(|h| map_header(h)).collect();

    let inputs: Vec<RecipientInput> = rows
        .iter()
        .map(|row| {
            let mut email = String::new();
            let mut first_name = None;
            let mut last_name = None;
            let mut variables = Map::new();

            for (index, value) in row.iter().enumerate() {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                match fields.get(index).copied().unwrap_or(HeaderField::Other) {
                    HeaderField::Email => email = value.to_string(),
                    HeaderField::FirstName => first_name = Some(value.to_string()),
                    HeaderField::LastName => last_name = Some(value.to_string()),
                    HeaderField::Company => {
                        variables.insert("company".to_string(), Value::String(value.to_string()));
                    }
                    HeaderField::Other => {
                        if let Some(header) = headers.get(index) {
                            variables.insert(
                                header.trim().to_string(),
                                Value::String(value.to_string()),
                            );
                        }
                    }
                }
            }

            RecipientInput {
                email,
                first_name,
                last_name,
                variables,
            }
        })
        .collect();

    prepare_recipients(inputs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(email: &str) -> RecipientInput {
        RecipientInput {
            email: email.to_string(),
            first_name: None,
            last_name: None,
            variables: Map::new(),
        }
    }

    #[test]
    fn test_invalid_emails_dropped() {
        let (recipients, summary) = prepare_recipients(vec![
            input("good@example.com"),
            input("no-at-sign"),
            input("@example.com"),
        ]);

        assert_eq!(recipients.len(), 1);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.invalid, 2);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let mut first = input("Ada@X.com");
        first.first_name = Some("Ada".to_string());
        let mut second = input("ada@x.com");
        second.first_name = Some("Other".to_string());

        let (recipients, summary) = prepare_recipients(vec![first, second]);

        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "ada@x.com");
        assert_eq!(recipients[0].first_name.as_deref(), Some("Ada"));
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn test_emails_lowercased() {
        let (recipients, _) = prepare_recipients(vec![input("USER@EXAMPLE.COM")]);
        assert_eq!(recipients[0].email, "user@example.com");
    }

    #[test]
    fn test_header_synonyms() {
        assert_eq!(map_header("E-Mail"), HeaderField::Email);
        assert_eq!(map_header("email address"), HeaderField::Email);
        assert_eq!(map_header("MAIL"), HeaderField::Email);
        assert_eq!(map_header("First Name"), HeaderField::FirstName);
        assert_eq!(map_header("fname"), HeaderField::FirstName);
        assert_eq!(map_header("given_name"), HeaderField::FirstName);
        assert_eq!(map_header("Name"), HeaderField::FirstName);
        assert_eq!(map_header("last-name"), HeaderField::LastName);
        assert_eq!(map_header("Surname"), HeaderField::LastName);
        assert_eq!(map_header("family_name"), HeaderField::LastName);
        assert_eq!(map_header("Organization"), HeaderField::Company);
        assert_eq!(map_header("employer"), HeaderField::Company);
        assert_eq!(map_header("favourite color"), HeaderField::Other);
    }

    #[test]
    fn test_normalize_rows_maps_and_collects_variables() {
        let headers = vec![
            "E-Mail".to_string(),
            "First Name".to_string(),
            "Surname".to_string(),
            "Org".to_string(),
            "Plan".to_string(),
        ];
        let rows = vec![
            vec![
                "Ada@X.com".to_string(),
                "Ada".to_string(),
                "Lovelace".to_string(),
                "Analytical".to_string(),
                "premium".to_string(),
            ],
            vec![
                "bad".to_string(),
                "Nobody".to_string(),
                String::new(),
                String::new(),
                String::new(),
            ],
        ];

        let (recipients, summary) = normalize_rows(&headers, &rows);

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.invalid, 1);
        let ada = &recipients[0];
        assert_eq!(ada.email, "ada@x.com");
        assert_eq!(ada.first_name.as_deref(), Some("Ada"));
        assert_eq!(ada.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(ada.variables["company"], "Analytical");
        assert_eq!(ada.variables["Plan"], "premium");
    }

    #[test]
    fn test_normalize_rows_empty_cells_skipped() {
        let headers = vec!["email".to_string(), "company".to_string()];
        let rows = vec![vec!["a@x.com".to_string(), "   ".to_string()]];

        let (recipients, _) = normalize_rows(&headers, &rows);
        assert!(recipients[0].variables.get("company").is_none());
    }
}
