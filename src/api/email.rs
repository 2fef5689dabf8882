use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

use crate::infra::{app_error::AppError, config::EmailConfig};

#[derive(Serialize, Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Serialize)]
struct SendEmailReq<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

pub async fn send_email(client: &Client, config: &EmailConfig, message: &EmailMessage) -> Result<()> {
    let Some(url) = config.api_url.as_deref() else {
        tracing::info!(
            "Email delivery disabled, skipping \"{}\" to {}",
            message.subject,
            message.to
        );
        return Ok(());
    };

    let mut request = client.post(url).json(&SendEmailReq {
        from: &config.from,
        to: &message.to,
        subject: &message.subject,
        text: &message.text,
    });
    if let Some(key) = config.api_key.as_deref() {
        request = request.bearer_auth(key);
    }

    request
        .send()
        .await
        .map_err(|_| AppError::ServiceUnreachable("EmailService".into()))?
        .error_for_status()
        .context("Email service rejected the message")?;

    Ok(())
}

/// Sends in the background; failures are logged and never reach the caller.
pub fn send_email_detached(client: Client, config: EmailConfig, message: EmailMessage) {
    tokio::spawn(async move {
        if let Err(err) = send_email(&client, &config, &message).await {
            tracing::warn!("Failed to send email to {}: {:?}", message.to, err);
        }
    });
}

pub fn welcome(to: &str, display_name: &str, awaiting_approval: bool) -> EmailMessage {
    let text = if awaiting_approval {
        format!(
            "Hello {}, your MedBook account has been created and is awaiting administrator approval.",
            display_name
        )
    } else {
        format!("Hello {}, welcome to MedBook!", display_name)
    };
    EmailMessage {
        to: to.to_string(),
        subject: "Welcome to MedBook".into(),
        text,
    }
}

pub fn approval_changed(to: &str, approved: bool) -> EmailMessage {
    let (subject, text) = if approved {
        (
            "Your MedBook account has been approved",
            "Your account is now visible to patients on MedBook.",
        )
    } else {
        (
            "Your MedBook account approval was revoked",
            "Your account is no longer visible to patients. Contact support for details.",
        )
    };
    EmailMessage {
        to: to.to_string(),
        subject: subject.into(),
        text: text.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_without_url() {
        let config = EmailConfig {
            api_url: None,
            api_key: None,
            from: "no-reply@medbook.local".into(),
        };
        let message = welcome("a@b.c", "Ann", false);
        assert!(send_email(&Client::new(), &config, &message).await.is_ok());
    }

    #[test]
    fn welcome_mentions_pending_approval() {
        assert!(welcome("a@b.c", "Lab", true).text.contains("awaiting"));
        assert!(!welcome("a@b.c", "Ann", false).text.contains("awaiting"));
    }
}
