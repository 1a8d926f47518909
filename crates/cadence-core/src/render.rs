//! Template rendering
//!
//! Produces the subject and HTML body for a template + recipient pair.
//! Rendering is pure: no I/O, deterministic, byte-stable across identical
//! inputs, safe to call concurrently.

use cadence_storage::models::{CampaignRecipient, Template};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

/// Substitution tokens: `{{identifier}}`
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap());

/// Characters escaped in the unsubscribe URL query value
const QUERY_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'=');

/// Rendered output of one template + recipient pair
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Template renderer
#[derive(Debug, Clone)]
pub struct Renderer {
    /// Host used for generated unsubscribe links
    public_host: String,
}

impl Renderer {
    pub fn new(public_host: impl Into<String>) -> Self {
        Self {
            public_host: public_host.into(),
        }
    }

    /// Render subject and HTML body for a recipient
    pub fn render(&self, template: &Template, recipient: &CampaignRecipient) -> RenderedEmail {
        let unsubscribe_url = self.unsubscribe_url(&recipient.email);

        let subject = substitute(&template.subject, recipient, &unsubscribe_url);
        let mut body = substitute(&template.body, recipient, &unsubscribe_url);

        body = body.replace(
            "[UNSUBSCRIBE]",
            &format!("<a href=\"{}\">Unsubscribe</a>", unsubscribe_url),
        );

        if !has_document_root(&body) {
            body = wrap_in_shell(&body, &unsubscribe_url);
        }

        RenderedEmail {
            subject,
            html_body: body,
        }
    }

    /// Deterministic per-recipient unsubscribe URL
    pub fn unsubscribe_url(&self, email: &str) -> String {
        format!(
            "https://{}/unsubscribe?email={}",
            self.public_host,
            utf8_percent_encode(email, QUERY_ENCODE)
        )
    }
}

/// Substitute every `{{identifier}}` token. Resolution order: the
/// recipient's variable map, built-ins derived from the recipient, the
/// unsubscribe URL. Unresolved tokens become the empty string.
fn substitute(input: &str, recipient: &CampaignRecipient, unsubscribe_url: &str) -> String {
    TOKEN_RE
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];

            if let Some(value) = recipient.variables.get(name) {
                return json_to_string(value);
            }

            match name {
                "email" => recipient.email.clone(),
                "firstName" => recipient.first_name.clone().unwrap_or_default(),
                "lastName" => recipient.last_name.clone().unwrap_or_default(),
                "fullName" => full_name(recipient),
                "unsubscribe_url" => unsubscribe_url.to_string(),
                _ => String::new(),
            }
        })
        .into_owned()
}

fn full_name(recipient: &CampaignRecipient) -> String {
    format!(
        "{} {}",
        recipient.first_name.as_deref().unwrap_or(""),
        recipient.last_name.as_deref().unwrap_or("")
    )
    .trim()
    .to_string()
}

fn json_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn has_document_root(body: &str) -> bool {
    body.to_lowercase().contains("<html")
}

/// Fixed responsive shell: container plus a footer carrying the
/// unsubscribe affordance. Byte-stable for identical inputs.
fn wrap_in_shell(body: &str, unsubscribe_url: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         </head>\n\
         <body style=\"margin:0;padding:0;background-color:#f4f4f4;\">\n\
         <div style=\"max-width:600px;margin:0 auto;padding:20px;background-color:#ffffff;font-family:Arial,sans-serif;\">\n\
         {}\n\
         <div style=\"margin-top:30px;padding-top:15px;border-top:1px solid #e0e0e0;font-size:12px;color:#888888;text-align:center;\">\n\
         <a href=\"{}\" style=\"color:#888888;\">Unsubscribe</a>\n\
         </div>\n\
         </div>\n\
         </body>\n\
         </html>",
        body, unsubscribe_url
    )
}

/// Extract the set of `{{identifier}}` variables used by a subject and
/// body, in order of first appearance. Recomputed on every template write.
pub fn extract_variables(subject: &str, body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut variables = Vec::new();

    for input in [subject, body] {
        for caps in TOKEN_RE.captures_iter(input) {
            let name = caps[1].to_string();
            if seen.insert(name.clone()) {
                variables.push(name);
            }
        }
    }

    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn recipient(
        email: &str,
        first: Option<&str>,
        last: Option<&str>,
        variables: Value,
    ) -> CampaignRecipient {
        CampaignRecipient {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            variables,
            status: "pending".to_string(),
            seq: 0,
            sent_at: None,
            failed_reason: None,
            smtp_account_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn template(subject: &str, body: &str) -> Template {
        Template {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "test".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            variables: serde_json::json!([]),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_builtin_substitution() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("ada@x.com", Some("Ada"), Some("Lovelace"), serde_json::json!({}));
        let t = template("Hi {{firstName}}", "Hello {{fullName}} ({{email}})");

        let rendered = renderer.render(&t, &r);
        assert_eq!(rendered.subject, "Hi Ada");
        assert!(rendered.html_body.contains("Hello Ada Lovelace (ada@x.com)"));
    }

    #[test]
    fn test_variable_map_wins_over_builtins() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient(
            "ada@x.com",
            Some("Ada"),
            None,
            serde_json::json!({"firstName": "Override", "company": "X"}),
        );
        let t = template("{{firstName}} at {{company}}", "body");

        let rendered = renderer.render(&t, &r);
        assert_eq!(rendered.subject, "Override at X");
    }

    #[test]
    fn test_unresolved_tokens_become_empty() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", None, None, serde_json::json!({}));
        let t = template("Hello {{nothing}}!", "{{alsoNothing}} body");

        let rendered = renderer.render(&t, &r);
        assert_eq!(rendered.subject, "Hello !");
        assert!(rendered.html_body.contains("<div") || rendered.html_body.starts_with(" body"));
    }

    #[test]
    fn test_global_substitution() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", Some("Ada"), None, serde_json::json!({}));
        let t = template("{{firstName}} {{firstName}}", "x");

        let rendered = renderer.render(&t, &r);
        assert_eq!(rendered.subject, "Ada Ada");
    }

    #[test]
    fn test_unsubscribe_url_percent_encodes_email() {
        let renderer = Renderer::new("mail.example.com");
        assert_eq!(
            renderer.unsubscribe_url("a+b@x.com"),
            "https://mail.example.com/unsubscribe?email=a%2Bb%40x.com"
        );
    }

    #[test]
    fn test_unsubscribe_marker_becomes_anchor() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", None, None, serde_json::json!({}));
        let t = template("s", "Bye. [UNSUBSCRIBE]");

        let rendered = renderer.render(&t, &r);
        assert!(rendered.html_body.contains(
            "<a href=\"https://mail.example.com/unsubscribe?email=a%40x.com\">Unsubscribe</a>"
        ));
    }

    #[test]
    fn test_shell_wrap_when_no_document_root() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", None, None, serde_json::json!({}));
        let t = template("s", "<p>plain fragment</p>");

        let rendered = renderer.render(&t, &r);
        assert!(rendered.html_body.starts_with("<!DOCTYPE html>"));
        assert!(rendered.html_body.contains("<p>plain fragment</p>"));
        assert!(rendered.html_body.contains("Unsubscribe"));
    }

    #[test]
    fn test_no_shell_when_document_root_present() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", None, None, serde_json::json!({}));
        let t = template("s", "<HTML><body>full doc</body></HTML>");

        let rendered = renderer.render(&t, &r);
        assert!(!rendered.html_body.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient("a@x.com", Some("Ada"), None, serde_json::json!({"k": 1}));
        let t = template("Hi {{firstName}} {{k}}", "B {{unsubscribe_url}}");

        let first = renderer.render(&t, &r);
        let second = renderer.render(&t, &r);
        assert_eq!(first, second);
    }

    #[test]
    fn test_number_and_bool_variables() {
        let renderer = Renderer::new("mail.example.com");
        let r = recipient(
            "a@x.com",
            None,
            None,
            serde_json::json!({"count": 3, "vip": true}),
        );
        let t = template("{{count}} {{vip}}", "x");

        let rendered = renderer.render(&t, &r);
        assert_eq!(rendered.subject, "3 true");
    }

    #[test]
    fn test_extract_variables() {
        let variables = extract_variables(
            "Hi {{firstName}}",
            "Hello {{firstName}} at {{company}}, {{unsubscribe_url}}",
        );
        assert_eq!(variables, vec!["firstName", "company", "unsubscribe_url"]);
    }

    #[test]
    fn test_extract_variables_ignores_malformed() {
        let variables = extract_variables("{{1bad}} {{good_one}}", "{{ spaced }}");
        assert_eq!(variables, vec!["good_one"]);
    }
}
