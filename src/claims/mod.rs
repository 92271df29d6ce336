//! Claims layer.
//!
//! A Claim sits between a raw [`CheckResult`](crate::checks::CheckResult)
//! and a TrustEnvelope: the agent's graded, signed assertion about one
//! control domain, with a plain-English opinion, a confidence score,
//! caveats, and remediation recommendations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::checks::{CheckResult, CheckStatus};
use crate::config::ControlDef;
use crate::crypto::keys::KeyPair;
use crate::{AGENT_ID, AGENT_VERSION};

/// Claims expire after one run-cycle window.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimResult {
    Satisfied,
    NotSatisfied,
    Partial,
    Indeterminate,
    NotApplicable,
}

impl ClaimResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimResult::Satisfied => "SATISFIED",
            ClaimResult::NotSatisfied => "NOT_SATISFIED",
            ClaimResult::Partial => "PARTIAL",
            ClaimResult::Indeterminate => "INDETERMINATE",
            ClaimResult::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

/// Dotted taxonomy path for a control id. Unmapped controls derive a
/// synthetic default under the same logical-access branch.
pub fn control_domain(control_id: &str) -> String {
    match control_id {
        "LA.01" => "identity_and_access.logical_access.new_access".to_string(),
        "LA.02" => "identity_and_access.logical_access.terminations".to_string(),
        "LA.03" => "identity_and_access.logical_access.user_access_review".to_string(),
        "LA.04" => "identity_and_access.logical_access.admin_access".to_string(),
        other => format!(
            "identity_and_access.logical_access.{}",
            other.to_lowercase().replace('.', "_")
        ),
    }
}

/// Round to four decimal places, the precision every confidence score in
/// the pipeline carries.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn summary_u64(summary: &Value, key: &str) -> u64 {
    summary.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Confidence in [0.0, 1.0] for a check result.
///
/// `error` → 0.1, `pass` → 1.0. A `fail` on the population controls
/// (LA.01, LA.02) scores the surviving fraction of the population so
/// partial compliance is visible; the remaining controls are binary.
pub fn compute_confidence(result: &CheckResult, control_id: &str) -> f64 {
    match result.status {
        CheckStatus::Error => return 0.1,
        CheckStatus::Pass => return 1.0,
        CheckStatus::Fail => {}
    }

    match control_id {
        "LA.01" => {
            let checked = summary_u64(&result.summary, "recent_users_checked");
            let missing = summary_u64(&result.summary, "missing_approval");
            if checked > 0 {
                round4(1.0 - missing as f64 / checked as f64)
            } else {
                0.0
            }
        }
        "LA.02" => {
            let tracked = summary_u64(&result.summary, "disabled_users_with_sla_tracking");
            let breaches = summary_u64(&result.summary, "sla_breaches");
            if tracked > 0 {
                round4(1.0 - breaches as f64 / tracked as f64)
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn grade(result: &CheckResult, confidence: f64) -> ClaimResult {
    match result.status {
        CheckStatus::Pass => ClaimResult::Satisfied,
        CheckStatus::Error => ClaimResult::Indeterminate,
        CheckStatus::Fail if confidence > 0.0 && confidence < 1.0 => ClaimResult::Partial,
        CheckStatus::Fail => ClaimResult::NotSatisfied,
    }
}

fn build_opinion(result: &CheckResult, control_id: &str, control_name: &str) -> String {
    let summary = &result.summary;
    match result.status {
        CheckStatus::Pass => {
            return format!("All checks for {control_id} ({control_name}) passed. No issues found.")
        }
        CheckStatus::Error => {
            let err = summary.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            return format!(
                "The agent encountered an error evaluating {control_id}: {err}. Results are inconclusive."
            );
        }
        CheckStatus::Fail => {}
    }

    match control_id {
        "LA.01" => {
            let checked = summary_u64(summary, "recent_users_checked");
            let missing = summary_u64(summary, "missing_approval");
            let lookback = summary_u64(summary, "lookback_days");
            let attr = summary
                .get("required_attribute")
                .and_then(Value::as_str)
                .unwrap_or("approvedBy");
            format!(
                "Of {checked} account(s) provisioned in the last {lookback} days, {missing} lack \
                 the '{attr}' approval attribute. This indicates accounts provisioned outside the \
                 approved workflow."
            )
        }
        "LA.02" => {
            let breaches = summary_u64(summary, "sla_breaches");
            let tracked = summary_u64(summary, "disabled_users_with_sla_tracking");
            let sla = summary_u64(summary, "sla_days");
            format!(
                "{breaches} of {tracked} terminated account(s) were not disabled within the \
                 {sla}-day SLA. Delayed revocation leaves residual access active."
            )
        }
        "LA.03" => match summary.get("days_since_uar").and_then(Value::as_i64) {
            None => "No User Access Review completion date is recorded. The UAR is overdue."
                .to_string(),
            Some(days) => {
                let max_days = summary_u64(summary, "max_days_since_uar");
                format!(
                    "The last User Access Review was completed {days} days ago, exceeding the \
                     required cadence of every {max_days} days."
                )
            }
        },
        "LA.04" => {
            let count = summary_u64(summary, "admin_count");
            let allowed = summary_u64(summary, "max_allowed");
            let role = summary.get("role_name").and_then(Value::as_str).unwrap_or("admin");
            format!(
                "There are {count} users with the '{role}' role, exceeding the approved maximum \
                 of {allowed}. Excess privileged accounts expand blast radius."
            )
        }
        _ => {
            if result.short_description.is_empty() {
                format!("{control_id} control check failed.")
            } else {
                result.short_description.clone()
            }
        }
    }
}

fn build_caveats(result: &CheckResult, control_id: &str) -> Vec<String> {
    if result.status == CheckStatus::Error {
        return vec!["Check failed with an error; evidence may be incomplete.".to_string()];
    }
    if result.status != CheckStatus::Fail {
        return Vec::new();
    }

    let summary = &result.summary;
    let mut caveats = Vec::new();
    match control_id {
        "LA.01" => {
            let missing = summary_u64(summary, "missing_approval");
            caveats.push(format!(
                "{missing} account(s) are missing the required approval attribute and may \
                 represent unauthorised access grants."
            ));
        }
        "LA.02" => {
            for finding in &result.findings {
                let overdue = finding.get("days_overdue").and_then(Value::as_i64).unwrap_or(0);
                let username = finding.get("username").and_then(Value::as_str).unwrap_or("?");
                caveats.push(format!(
                    "User '{username}' is {overdue} day(s) overdue for access revocation."
                ));
            }
        }
        "LA.03" => match summary.get("days_since_uar").and_then(Value::as_i64) {
            None => caveats
                .push("No UAR completion date found in the realm configuration.".to_string()),
            Some(days) => {
                let max_days = summary.get("max_days_since_uar").and_then(Value::as_i64).unwrap_or(90);
                caveats.push(format!("Access review is {} day(s) overdue.", days - max_days));
            }
        },
        "LA.04" => {
            let excess = summary_u64(summary, "admin_count") as i64
                - summary_u64(summary, "max_allowed") as i64;
            caveats.push(format!(
                "{excess} excess privileged account(s) require immediate review and removal."
            ));
        }
        _ => {}
    }
    caveats
}

fn build_recommendations(result: &CheckResult, control_id: &str) -> Vec<String> {
    if result.status != CheckStatus::Fail {
        return Vec::new();
    }
    let recs: &[&str] = match control_id {
        "LA.01" => &[
            "Audit provisioning workflow to enforce approval gates before account creation.",
            "Set the required 'approvedBy' attribute for all flagged accounts retroactively.",
            "Enable automated provisioning enforcement that blocks account creation without an approved request.",
        ],
        "LA.02" => &[
            "Immediately disable access for all accounts past the SLA deadline.",
            "Implement automated deprovisioning triggered by termination events.",
            "Review and tighten the offboarding SLA with HR and IT operations.",
        ],
        "LA.03" => &[
            "Complete a User Access Review immediately and record the date in realm attributes.",
            "Schedule quarterly UAR reminders and assign a named owner.",
            "Automate UAR initiation and tracking within the IAM platform.",
        ],
        "LA.04" => &[
            "Immediately remove or downgrade excess privileged accounts.",
            "Implement a Just-in-Time (JIT) privileged access model.",
            "Establish a periodic admin account review cadence.",
        ],
        _ => &["Review and remediate the identified control failure."],
    };
    recs.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimScope {
    pub environment: String,
    pub products: Vec<String>,
    pub systems: Vec<String>,
    pub realm: String,
}

/// A signed, graded assertion about one control domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub domain: String,
    pub assertion: String,
    pub result: ClaimResult,
    pub confidence: f64,
    pub evidence_refs: Vec<String>,
    pub opinion: String,
    pub caveats: Vec<String>,
    pub recommendations: Vec<String>,
    pub scope: ClaimScope,
    pub valid_from: String,
    pub ttl_seconds: u64,
    pub agent_id: String,
    pub agent_version: String,
    pub signature: String,
}

impl Claim {
    /// The signing payload: every field except `signature`. Kept as an
    /// explicit enumeration so signing and verification stay symmetric.
    pub fn signable_value(&self) -> Value {
        json!({
            "claim_id": self.claim_id,
            "domain": self.domain,
            "assertion": self.assertion,
            "result": self.result.as_str(),
            "confidence": self.confidence,
            "evidence_refs": self.evidence_refs,
            "opinion": self.opinion,
            "caveats": self.caveats,
            "recommendations": self.recommendations,
            "scope": {
                "environment": self.scope.environment,
                "products": self.scope.products,
                "systems": self.scope.systems,
                "realm": self.scope.realm,
            },
            "valid_from": self.valid_from,
            "ttl_seconds": self.ttl_seconds,
            "agent_id": self.agent_id,
            "agent_version": self.agent_version,
        })
    }

    /// Full serialized form, signature included, as embedded in envelopes.
    pub fn to_value(&self) -> Value {
        let mut value = self.signable_value();
        if let Some(map) = value.as_object_mut() {
            map.insert("signature".to_string(), json!(self.signature));
        }
        value
    }
}

/// Build and sign a Claim from a check result.
///
/// `evidence_id` is the UUID of the already-persisted evidence row the
/// claim refers back to; `product_ids` scope the claim to the products
/// that carry this control.
pub fn build_claim(
    result: &CheckResult,
    evidence_id: Uuid,
    ctrl: &ControlDef,
    keys: &KeyPair,
    product_ids: &[String],
) -> Claim {
    let confidence = compute_confidence(result, &ctrl.id);
    // The control name only stands in when no description key was declared;
    // a declared empty description is carried as-is.
    let assertion = ctrl.description.clone().unwrap_or_else(|| ctrl.name.clone());

    let mut claim = Claim {
        claim_id: Uuid::new_v4().to_string(),
        domain: control_domain(&ctrl.id),
        assertion: assertion.trim().to_string(),
        result: grade(result, confidence),
        confidence,
        evidence_refs: vec![evidence_id.to_string()],
        opinion: build_opinion(result, &ctrl.id, &ctrl.name),
        caveats: build_caveats(result, &ctrl.id),
        recommendations: build_recommendations(result, &ctrl.id),
        scope: ClaimScope {
            environment: "production".to_string(),
            products: product_ids.to_vec(),
            systems: vec!["keycloak".to_string()],
            realm: "master".to_string(),
        },
        valid_from: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
        ttl_seconds: DEFAULT_TTL_SECONDS,
        agent_id: AGENT_ID.to_string(),
        agent_version: AGENT_VERSION.to_string(),
        signature: String::new(),
    };
    claim.signature = keys.sign(&claim.signable_value());
    claim
}
