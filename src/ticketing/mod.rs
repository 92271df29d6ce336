//! Remediation ticketing: the ServiceNow-style incident client used by the
//! cycle driver, plus the mock incident-table service it is tested against.

pub mod mock;

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::Severity;
use crate::AGENT_ID;

/// Incident state codes carried by the ticketing system.
pub const STATE_NEW: i64 = 1;
pub const STATE_IN_PROGRESS: i64 = 2;
pub const STATE_RESOLVED: i64 = 6;
pub const STATE_CLOSED: i64 = 7;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticketing service call failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The subset of an incident record the agent reads back.
#[derive(Debug, Clone, Deserialize)]
pub struct Incident {
    pub sys_id: String,
    pub number: String,
    pub state: i64,
    pub priority: i64,
    #[serde(default)]
    pub short_description: String,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.state == STATE_NEW || self.state == STATE_IN_PROGRESS
    }
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

pub struct TicketingClient {
    http: reqwest::Client,
    base_url: String,
}

impl TicketingClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fails until the service answers its health endpoint; used by the
    /// startup wait loop.
    pub async fn ping(&self) -> Result<(), TicketError> {
        self.http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Open a remediation incident for a failed control. Severity maps to
    /// priority (critical→1, high→2, medium→3, low→4); the control id and
    /// evidence UUID travel as extra incident fields for traceability.
    pub async fn create_ticket(
        &self,
        control_id: &str,
        short_description: &str,
        description: &str,
        severity: Severity,
        evidence_id: Uuid,
    ) -> Result<Incident, TicketError> {
        let payload = json!({
            "short_description": short_description,
            "description": description,
            "priority": severity.priority(),
            "category": "compliance",
            "caller_id": AGENT_ID,
            "control_id": control_id,
            "evidence_id": evidence_id.to_string(),
        });
        let resp = self
            .http
            .post(format!("{}/api/now/table/incident", self.base_url))
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let envelope: ResultEnvelope<Incident> = resp.json().await?;
        info!(
            number = %envelope.result.number,
            control_id,
            priority = envelope.result.priority,
            "created remediation ticket"
        );
        Ok(envelope.result)
    }

    /// Fetch an incident by sys_id, `None` when the record is gone.
    pub async fn get_ticket(&self, sys_id: &str) -> Result<Option<Incident>, TicketError> {
        let resp = self
            .http
            .get(format!("{}/api/now/table/incident/{sys_id}", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ResultEnvelope<Incident> = resp.error_for_status()?.json().await?;
        Ok(Some(envelope.result))
    }

    /// True iff the incident exists and is still new or in progress.
    pub async fn is_ticket_open(&self, sys_id: &str) -> Result<bool, TicketError> {
        Ok(self.get_ticket(sys_id).await?.map(|t| t.is_open()).unwrap_or(false))
    }
}
