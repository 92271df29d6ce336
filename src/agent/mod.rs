//! The cycle driver.
//!
//! One cycle walks the configured controls in order and, for each one,
//! runs the ordered pipeline: check → evidence payload → sign → Merkle
//! append → persist → claim → trust envelope per product → ticket
//! lifecycle → run row. Controls are strictly sequential; nothing in a
//! cycle runs concurrently, which keeps Merkle indices dense and makes the
//! root embedded in each envelope deterministic.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::checks::{CheckKind, CheckResult, CheckStatus};
use crate::claims::build_claim;
use crate::config::{products_by_control, ControlsFile, ProductsFile};
use crate::crypto::keys::KeyPair;
use crate::crypto::merkle::MerkleLog;
use crate::envelope::{build_trust_envelope, DisclosureLevel};
use crate::idp::KeycloakClient;
use crate::store::{Store, StoreError};
use crate::ticketing::TicketingClient;
use crate::AGENT_ID;

/// Everything a cycle needs besides the store and the Merkle log. Built
/// once at startup; immutable afterwards.
pub struct AgentContext {
    pub controls: ControlsFile,
    pub products: ProductsFile,
    pub keys: KeyPair,
    pub idp: KeycloakClient,
    pub ticketing: TicketingClient,
}

/// The canonical evidence unit: exactly these eight fields, in canonical
/// JSON, are what gets signed and Merkle-chained. Adding a field would
/// change every leaf hash, so the shape is fixed.
#[derive(Debug, Clone)]
pub struct EvidencePayload {
    pub control_id: String,
    pub control_name: String,
    pub check: String,
    pub collected_at: String,
    pub collector: String,
    pub realm: String,
    pub status: CheckStatus,
    pub summary: Value,
}

impl EvidencePayload {
    pub fn to_value(&self) -> Value {
        json!({
            "control_id": self.control_id,
            "control_name": self.control_name,
            "check": self.check,
            "collected_at": self.collected_at,
            "collector": self.collector,
            "realm": self.realm,
            "status": self.status.as_str(),
            "summary": self.summary,
        })
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Decide whether a failing control reuses its previous ticket.
///
/// Reuse requires a previously recorded ticket number whose sys_id still
/// refers to an open incident (new or in progress). Store errors here skip
/// ticket handling for this run rather than risking a duplicate incident.
async fn resolve_ticket(
    ctx: &AgentContext,
    store: &mut Store,
    control_id: &str,
    result: &CheckResult,
    severity: crate::config::Severity,
    evidence_id: uuid::Uuid,
) -> (Option<String>, Option<String>) {
    let last_number = match store.get_last_ticket(control_id) {
        Ok(last) => last,
        Err(e) => {
            error!("{control_id}: cannot read last ticket, skipping ticket handling: {e}");
            return (None, None);
        }
    };

    if let Some(last_number) = last_number {
        let last_sys_id = match store.get_last_ticket_sys_id(control_id) {
            Ok(sys_id) => sys_id,
            Err(e) => {
                error!("{control_id}: cannot read last ticket sys_id, skipping ticket handling: {e}");
                return (None, None);
            }
        };
        if let Some(sys_id) = last_sys_id {
            match ctx.ticketing.is_ticket_open(&sys_id).await {
                Ok(true) => {
                    info!("{control_id}: open ticket {last_number} already exists - skipping creation");
                    return (Some(last_number), Some(sys_id));
                }
                Ok(false) => {}
                Err(e) => warn!("{control_id}: could not check ticket {sys_id} state: {e}"),
            }
        }
    }

    match ctx
        .ticketing
        .create_ticket(
            control_id,
            &result.short_description,
            &result.description,
            severity,
            evidence_id,
        )
        .await
    {
        Ok(ticket) => (Some(ticket.number), Some(ticket.sys_id)),
        Err(e) => {
            error!("failed to create ticket for {control_id}: {e}");
            (None, None)
        }
    }
}

/// Run one full control-evaluation cycle.
///
/// Per-control failures never abort the cycle: check errors downgrade to
/// `error` evidence, envelope and ticket failures are logged and the loop
/// continues. A failed evidence persist retracts the in-memory Merkle
/// append (keeping indices dense) and skips the rest of that control. Any
/// store failure is reported back so the caller can reconnect before the
/// next cycle.
pub async fn run_cycle(
    ctx: &AgentContext,
    store: &mut Store,
    merkle: &mut MerkleLog,
) -> Result<(), StoreError> {
    let realm = ctx.controls.agent.realm.clone();
    let ctrl_products = products_by_control(&ctx.products);
    let run_start = now_iso();
    let mut store_failure: Option<StoreError> = None;

    info!("=== starting control run ({} controls) ===", ctx.controls.controls.len());

    for ctrl in &ctx.controls.controls {
        let Some(check) = CheckKind::from_name(&ctrl.check) else {
            error!("unknown check '{}' for control {} - skipping", ctrl.check, ctrl.id);
            continue;
        };
        let product_ids = ctrl_products.get(&ctrl.id).cloned().unwrap_or_default();

        info!("running {} ({}) …", ctrl.id, ctrl.check);
        let result = check.run(&ctx.idp, &ctrl.params).await;

        // Assemble, sign, chain, and persist the evidence for this run.
        let payload = EvidencePayload {
            control_id: ctrl.id.clone(),
            control_name: ctrl.name.clone(),
            check: ctrl.check.clone(),
            collected_at: now_iso(),
            collector: AGENT_ID.to_string(),
            realm: realm.clone(),
            status: result.status,
            summary: result.summary.clone(),
        };
        let payload_value = payload.to_value();
        let signature = ctx.keys.sign(&payload_value);

        let leaf_hash = merkle.append(&payload_value);
        let leaf_index = (merkle.count() - 1) as i32;

        let evidence_id = match store.insert_evidence(
            &ctrl.id,
            &ctrl.check,
            &payload_value,
            &signature,
            Some(&leaf_hash),
            Some(leaf_index),
        ) {
            Ok(id) => id,
            Err(e) => {
                // Keep the in-memory log aligned with durable state.
                merkle.retract_last();
                error!("{}: evidence persist failed, control aborted: {e}", ctrl.id);
                store_failure = Some(e);
                continue;
            }
        };

        let claim = build_claim(&result, evidence_id, ctrl, &ctx.keys, &product_ids);

        for product_id in &product_ids {
            let envelope = build_trust_envelope(
                ctrl,
                product_id,
                std::slice::from_ref(&claim),
                merkle,
                &ctx.keys,
                &run_start,
                DisclosureLevel::Full,
            );
            match store.insert_trust_envelope(&envelope) {
                Ok(_) => info!(
                    "  envelope {} [{}] stored for {}/{} (confidence={:.2})",
                    &envelope.envelope_id[..8],
                    envelope.trust_level.as_str(),
                    ctrl.id,
                    product_id,
                    envelope.composite_confidence
                ),
                Err(e) => {
                    error!("failed to store envelope for {}/{}: {e}", ctrl.id, product_id)
                }
            }
        }

        let (ticket_number, ticket_sys_id) = if result.status == CheckStatus::Fail {
            resolve_ticket(ctx, store, &ctrl.id, &result, ctrl.severity, evidence_id).await
        } else {
            (None, None)
        };

        if let Err(e) = store.insert_run(
            &ctrl.id,
            result.status.as_str(),
            Some(evidence_id),
            &result.summary,
            ticket_number.as_deref(),
            ticket_sys_id.as_deref(),
        ) {
            error!("{}: failed to record control run: {e}", ctrl.id);
            store_failure = Some(e);
        }

        match &ticket_number {
            Some(number) => info!("{} [{}] → {number}", ctrl.id, result.status.as_str()),
            None => info!("{} [{}]", ctrl.id, result.status.as_str()),
        }
    }

    info!(
        "=== run complete - merkle log has {} leaves, root={} ===",
        merkle.count(),
        merkle.root().as_deref().map(|r| &r[..16]).unwrap_or("none")
    );

    match store_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_payload_has_exactly_the_eight_canonical_fields() {
        let payload = EvidencePayload {
            control_id: "LA.01".to_string(),
            control_name: "New access approval".to_string(),
            check: "new_access_no_approval".to_string(),
            collected_at: "2026-08-01T00:00:00.000000+00:00".to_string(),
            collector: AGENT_ID.to_string(),
            realm: "master".to_string(),
            status: CheckStatus::Pass,
            summary: json!({"recent_users_checked": 3, "missing_approval": 0}),
        };
        let value = payload.to_value();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "check",
                "collected_at",
                "collector",
                "control_id",
                "control_name",
                "realm",
                "status",
                "summary"
            ]
        );
        assert_eq!(value["status"], "pass");
        assert_eq!(value["collector"], "trustagent");
    }

    #[test]
    fn payload_value_is_stable_for_hashing() {
        let payload = EvidencePayload {
            control_id: "LA.02".to_string(),
            control_name: "Termination SLA".to_string(),
            check: "terminations_sla".to_string(),
            collected_at: "2026-08-01T12:00:00.000000+00:00".to_string(),
            collector: AGENT_ID.to_string(),
            realm: "master".to_string(),
            status: CheckStatus::Fail,
            summary: json!({"sla_days": 1, "sla_breaches": 2, "disabled_users_with_sla_tracking": 3}),
        };
        let first = crate::crypto::canonical::canonical_json(&payload.to_value());
        let second = crate::crypto::canonical::canonical_json(&payload.clone().to_value());
        assert_eq!(first, second);

        let mut log = MerkleLog::new();
        let leaf = log.append(&payload.to_value());
        assert_eq!(Some(leaf), log.root());
    }
}
