use std::fmt::{self, Debug};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use persona_relay_model::{ContactMessage, Mailer, ServiceError};
use reqwest::{Client, header};
use serde::Serialize;

use crate::http::{default_client, send};

const DEFAULT_BASE_URL: &str = "https://api.resend.com";
const DEFAULT_FROM: &str = "Chat Bot <onboarding@resend.dev>";
const DEFAULT_SUBJECT: &str = "[Website] New contact message";
const TOKYO_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: String,
}

/// Delivers contact messages through the Resend API.
#[derive(Clone)]
pub struct ResendMailer {
    client: Client,
    api_key: String,
    base_url: String,
    from: String,
    to: String,
    subject: String,
}

impl ResendMailer {
    /// Creates a mailer delivering to `to`.
    pub fn new(api_key: &str, to: &str) -> Self {
        Self {
            client: default_client(),
            api_key: api_key.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            from: DEFAULT_FROM.to_owned(),
            to: to.to_owned(),
            subject: DEFAULT_SUBJECT.to_owned(),
        }
    }

    /// Sets the sender address.
    pub fn with_from(mut self, from: &str) -> Self {
        self.from = from.to_owned();
        self
    }

    /// Sets the subject line.
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_owned();
        self
    }

    /// Points the mailer at another API host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }
}

impl Debug for ResendMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendMailer")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_contact(
        &self,
        message: &ContactMessage,
    ) -> Result<(), ServiceError> {
        let email = SendEmail {
            from: &self.from,
            to: &self.to,
            subject: &self.subject,
            html: render_contact_html(message),
        };
        let req = self
            .client
            .post(format!("{}/emails", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&email);
        send(req).await.inspect_err(|err| {
            error!("mail provider refused the message: {err}");
        })?;
        Ok(())
    }
}

/// Escapes the characters that would let a message inject markup.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders the notification email for a contact message.
pub fn render_contact_html(message: &ContactMessage) -> String {
    let tokyo =
        FixedOffset::east_opt(TOKYO_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    let received_at = DateTime::from_timestamp_millis(message.received_at_ms)
        .unwrap_or_default()
        .with_timezone(&tokyo)
        .format("%Y-%m-%d %H:%M:%S");
    let user_agent = message.user_agent.as_deref().unwrap_or("Unknown");

    format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto;padding:20px;">
  <h2 style="color:#4fc3f7;border-bottom:1px solid #eee;padding-bottom:10px;">New contact message</h2>
  <div style="background:#f8f9fa;border-radius:8px;padding:16px;margin:16px 0;white-space:pre-wrap;line-height:1.6;">{body}</div>
  <div style="color:#999;font-size:12px;margin-top:20px;">
    <p>Received: {received_at} (Tokyo time)</p>
    <p>User-Agent: {user_agent}</p>
  </div>
</div>"#,
        body = escape_html(&message.body),
        user_agent = escape_html(user_agent),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>Tom & Jerry</b>"),
            "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_render_contact_html() {
        let message = ContactMessage {
            body: "<script>hi</script>".to_owned(),
            user_agent: None,
            // 2024-01-01T00:00:00Z
            received_at_ms: 1_704_067_200_000,
        };
        let html = render_contact_html(&message);
        assert!(html.contains("&lt;script&gt;hi&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("2024-01-01 09:00:00 (Tokyo time)"));
        assert!(html.contains("User-Agent: Unknown"));
    }
}
