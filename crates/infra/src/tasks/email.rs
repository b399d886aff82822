//! Outgoing e-mail tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use printopt_core::Lane;

use crate::jobs::{HandlerError, RegistryError, RetryPolicy, TaskDefinition, TaskOutput, TaskRegistry};

use super::{decode_payload, CollaboratorError, SEND_EMAIL, SEND_QUOTE_EMAIL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Email {
    fn validate(&self) -> Result<(), HandlerError> {
        let to = self.to.trim();
        if to.is_empty() || !to.contains('@') {
            return Err(HandlerError::new(format!("invalid recipient: {:?}", self.to)));
        }
        Ok(())
    }
}

/// Input of `emails.send_quote_email`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEmail {
    pub quote_id: i64,
    pub user_id: i64,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<(), CollaboratorError>;

    /// Render and send the quote document to its customer.
    fn send_quote(&self, quote_id: i64, user_id: i64) -> Result<(), CollaboratorError>;
}

pub fn register(registry: &mut TaskRegistry, mailer: Arc<dyn Mailer>) -> Result<(), RegistryError> {
    let m = mailer.clone();
    registry.register(
        TaskDefinition::new(SEND_EMAIL, Lane::Emails, RetryPolicy::email()),
        move |task| {
            let email: Email = decode_payload(task)?;
            email.validate()?;
            m.send(&email)?;
            info!(task_id = %task.id, recipient = %email.to, "email sent");
            Ok(TaskOutput::Report(json!({ "recipient": email.to })))
        },
    )?;

    let m = mailer;
    registry.register(
        TaskDefinition::new(SEND_QUOTE_EMAIL, Lane::Emails, RetryPolicy::email()),
        move |task| {
            let QuoteEmail { quote_id, user_id } = decode_payload(task)?;
            m.send_quote(quote_id, user_id)?;
            info!(task_id = %task.id, quote_id, "quote email sent");
            Ok(TaskOutput::Report(json!({ "quote_id": quote_id })))
        },
    )?;

    Ok(())
}
