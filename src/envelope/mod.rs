//! TrustEnvelope - the agent's top-level output for one control × product
//! combination. Wraps the serialized signed Claims, an evidence summary
//! anchored to the Merkle log, a composite trust level, and the agent's
//! public key; the envelope itself is signed.

use std::collections::BTreeMap;

use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::claims::{round4, Claim, ClaimResult};
use crate::config::ControlDef;
use crate::crypto::keys::KeyPair;
use crate::crypto::merkle::MerkleLog;
use crate::{AGENT_ID, AGENT_VERSION};

/// Envelope validity window, matching the claim TTL.
pub const VALIDITY_SECONDS: i64 = 86_400;

/// Qualitative band for a composite confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    Verified,
    High,
    Medium,
    Low,
    Critical,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::Verified => "VERIFIED",
            TrustLevel::High => "HIGH",
            TrustLevel::Medium => "MEDIUM",
            TrustLevel::Low => "LOW",
            TrustLevel::Critical => "CRITICAL",
        }
    }
}

/// Threshold mapping from composite confidence to trust level:
/// ≥ 0.95 VERIFIED, ≥ 0.75 HIGH, ≥ 0.55 MEDIUM, ≥ 0.30 LOW, else CRITICAL.
pub fn trust_level_for(composite_confidence: f64) -> TrustLevel {
    if composite_confidence >= 0.95 {
        TrustLevel::Verified
    } else if composite_confidence >= 0.75 {
        TrustLevel::High
    } else if composite_confidence >= 0.55 {
        TrustLevel::Medium
    } else if composite_confidence >= 0.30 {
        TrustLevel::Low
    } else {
        TrustLevel::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisclosureLevel {
    Full,
    ClaimsOnly,
    ZeroKnowledge,
}

impl DisclosureLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DisclosureLevel::Full => "FULL",
            DisclosureLevel::ClaimsOnly => "CLAIMS_ONLY",
            DisclosureLevel::ZeroKnowledge => "ZERO_KNOWLEDGE",
        }
    }
}

/// Snapshot of the evidence log at envelope-construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub total_items: usize,
    pub merkle_root: Option<String>,
    pub collection_window_start: String,
    pub collection_window_end: String,
    pub domains_covered: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScore {
    pub satisfied: usize,
    pub total: usize,
    pub avg_confidence: f64,
}

/// Per-domain aggregate over the enclosed claims.
fn compute_domain_scores(claims: &[Claim]) -> BTreeMap<String, DomainScore> {
    let mut sums: BTreeMap<String, (usize, usize, f64)> = BTreeMap::new();
    for claim in claims {
        let entry = sums.entry(claim.domain.clone()).or_insert((0, 0, 0.0));
        entry.1 += 1;
        entry.2 += claim.confidence;
        if claim.result == ClaimResult::Satisfied {
            entry.0 += 1;
        }
    }
    sums.into_iter()
        .map(|(domain, (satisfied, total, confidence_sum))| {
            let avg = if total > 0 { round4(confidence_sum / total as f64) } else { 0.0 };
            (domain, DomainScore { satisfied, total, avg_confidence: avg })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustEnvelope {
    pub envelope_id: String,
    pub control_id: String,
    pub control_name: String,
    pub product_id: String,
    /// Serialized signed Claim dicts, embedded verbatim.
    pub claims: Vec<Value>,
    pub evidence_summary: EvidenceSummary,
    pub trust_level: TrustLevel,
    pub composite_confidence: f64,
    pub domain_scores: BTreeMap<String, DomainScore>,
    pub disclosure_level: DisclosureLevel,
    pub valid_from: String,
    pub valid_until: String,
    pub agent_id: String,
    pub agent_version: String,
    /// Agent Ed25519 public key, hex, so the envelope verifies stand-alone.
    pub public_key: String,
    pub framework_mappings: BTreeMap<String, Vec<String>>,
    pub signature: String,
}

impl TrustEnvelope {
    /// The signing payload: every field except `signature`.
    pub fn signable_value(&self) -> Value {
        json!({
            "envelope_id": self.envelope_id,
            "control_id": self.control_id,
            "control_name": self.control_name,
            "product_id": self.product_id,
            "claims": self.claims,
            "evidence_summary": {
                "total_items": self.evidence_summary.total_items,
                "merkle_root": self.evidence_summary.merkle_root,
                "collection_window_start": self.evidence_summary.collection_window_start,
                "collection_window_end": self.evidence_summary.collection_window_end,
                "domains_covered": self.evidence_summary.domains_covered,
            },
            "trust_level": self.trust_level.as_str(),
            "composite_confidence": self.composite_confidence,
            "domain_scores": self.domain_scores.iter().map(|(domain, score)| {
                (domain.clone(), json!({
                    "satisfied": score.satisfied,
                    "total": score.total,
                    "avg_confidence": score.avg_confidence,
                }))
            }).collect::<serde_json::Map<String, Value>>(),
            "disclosure_level": self.disclosure_level.as_str(),
            "valid_from": self.valid_from,
            "valid_until": self.valid_until,
            "agent_id": self.agent_id,
            "agent_version": self.agent_version,
            "public_key": self.public_key,
            "framework_mappings": self.framework_mappings,
        })
    }

    /// Full serialized form, signature included, as persisted.
    pub fn to_value(&self) -> Value {
        let mut value = self.signable_value();
        if let Some(map) = value.as_object_mut() {
            map.insert("signature".to_string(), json!(self.signature));
        }
        value
    }
}

/// Construct and sign a TrustEnvelope for one control × product.
///
/// The evidence summary reflects the Merkle log exactly as it stands when
/// this is called, which the serialized cycle driver makes deterministic.
pub fn build_trust_envelope(
    ctrl: &ControlDef,
    product_id: &str,
    claims: &[Claim],
    merkle: &MerkleLog,
    keys: &KeyPair,
    collection_window_start: &str,
    disclosure_level: DisclosureLevel,
) -> TrustEnvelope {
    let now = Utc::now();
    let valid_from = now.to_rfc3339_opts(SecondsFormat::Micros, false);
    let valid_until =
        (now + Duration::seconds(VALIDITY_SECONDS)).to_rfc3339_opts(SecondsFormat::Micros, false);

    let composite_confidence = if claims.is_empty() {
        0.0
    } else {
        round4(claims.iter().map(|c| c.confidence).sum::<f64>() / claims.len() as f64)
    };
    let domain_scores = compute_domain_scores(claims);

    let evidence_summary = EvidenceSummary {
        total_items: merkle.count(),
        merkle_root: merkle.root(),
        collection_window_start: collection_window_start.to_string(),
        collection_window_end: valid_from.clone(),
        domains_covered: domain_scores.keys().cloned().collect(),
    };

    let mut envelope = TrustEnvelope {
        envelope_id: Uuid::new_v4().to_string(),
        control_id: ctrl.id.clone(),
        control_name: ctrl.name.clone(),
        product_id: product_id.to_string(),
        claims: claims.iter().map(Claim::to_value).collect(),
        evidence_summary,
        trust_level: trust_level_for(composite_confidence),
        composite_confidence,
        domain_scores,
        disclosure_level,
        valid_from,
        valid_until,
        agent_id: AGENT_ID.to_string(),
        agent_version: AGENT_VERSION.to_string(),
        public_key: keys.public_key_hex(),
        framework_mappings: ctrl.framework_mappings.clone(),
        signature: String::new(),
    };
    envelope.signature = keys.sign(&envelope.signable_value());
    envelope
}
