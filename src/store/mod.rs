//! PostgreSQL persistence.
//!
//! Three relations back the pipeline: `evidence` (signed payloads with
//! Merkle metadata), `control_runs` (one row per control per cycle, with
//! optional ticket references), and `trust_envelopes` (append-only envelope
//! history, the dashboard's sole read path). Schema management is
//! idempotent; every write commits per call and never half-commits.

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::envelope::TrustEnvelope;
use crate::AGENT_ID;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(#[from] diesel::ConnectionError),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
}

pub mod schema {
    diesel::table! {
        evidence (id) {
            id -> Uuid,
            control_id -> Text,
            check_name -> Text,
            collected_at -> Timestamptz,
            collector -> Text,
            raw_data -> Jsonb,
            signature -> Text,
            merkle_leaf_hash -> Nullable<Text>,
            merkle_index -> Nullable<Int4>,
        }
    }

    diesel::table! {
        control_runs (id) {
            id -> Uuid,
            control_id -> Text,
            run_at -> Timestamptz,
            status -> Text,
            evidence_id -> Nullable<Uuid>,
            summary -> Nullable<Jsonb>,
            ticket_number -> Nullable<Text>,
            ticket_sys_id -> Nullable<Text>,
        }
    }

    diesel::table! {
        trust_envelopes (id) {
            id -> Uuid,
            envelope_id -> Text,
            control_id -> Text,
            product_id -> Text,
            created_at -> Timestamptz,
            trust_level -> Text,
            composite_confidence -> Float8,
            merkle_root -> Nullable<Text>,
            envelope_data -> Jsonb,
            signature -> Text,
        }
    }
}

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS evidence (
    id               UUID PRIMARY KEY,
    control_id       TEXT        NOT NULL,
    check_name       TEXT        NOT NULL,
    collected_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    collector        TEXT        NOT NULL DEFAULT 'trustagent',
    raw_data         JSONB       NOT NULL,
    signature        TEXT        NOT NULL,
    merkle_leaf_hash TEXT,
    merkle_index     INTEGER
);

CREATE TABLE IF NOT EXISTS control_runs (
    id            UUID PRIMARY KEY,
    control_id    TEXT        NOT NULL,
    run_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    status        TEXT        NOT NULL CHECK (status IN ('pass', 'fail', 'error')),
    evidence_id   UUID        REFERENCES evidence(id),
    summary       JSONB,
    ticket_number TEXT,
    ticket_sys_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_control_runs_control_id
    ON control_runs (control_id, run_at DESC);

CREATE TABLE IF NOT EXISTS trust_envelopes (
    id                   UUID PRIMARY KEY,
    envelope_id          TEXT        NOT NULL,
    control_id           TEXT        NOT NULL,
    product_id           TEXT        NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    trust_level          TEXT        NOT NULL,
    composite_confidence FLOAT       NOT NULL,
    merkle_root          TEXT,
    envelope_data        JSONB       NOT NULL,
    signature            TEXT        NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trust_envelopes_control_product
    ON trust_envelopes (control_id, product_id, created_at DESC);
"#;

// Upgrades for evidence tables created before Merkle chaining existed.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE evidence ADD COLUMN IF NOT EXISTS merkle_leaf_hash TEXT",
    "ALTER TABLE evidence ADD COLUMN IF NOT EXISTS merkle_index INTEGER",
];

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::evidence)]
struct NewEvidence {
    id: Uuid,
    control_id: String,
    check_name: String,
    collected_at: DateTime<Utc>,
    collector: String,
    raw_data: Value,
    signature: String,
    merkle_leaf_hash: Option<String>,
    merkle_index: Option<i32>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::control_runs)]
struct NewControlRun {
    id: Uuid,
    control_id: String,
    run_at: DateTime<Utc>,
    status: String,
    evidence_id: Option<Uuid>,
    summary: Option<Value>,
    ticket_number: Option<String>,
    ticket_sys_id: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::trust_envelopes)]
struct NewTrustEnvelope {
    id: Uuid,
    envelope_id: String,
    control_id: String,
    product_id: String,
    created_at: DateTime<Utc>,
    trust_level: String,
    composite_confidence: f64,
    merkle_root: Option<String>,
    envelope_data: Value,
    signature: String,
}

/// A persisted trust envelope as the dashboard reads it back.
#[derive(Debug, Clone, Queryable)]
pub struct TrustEnvelopeRow {
    pub id: Uuid,
    pub envelope_id: String,
    pub control_id: String,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
    pub trust_level: String,
    pub composite_confidence: f64,
    pub merkle_root: Option<String>,
    pub envelope_data: Value,
    pub signature: String,
}

/// Single-user connection to the agent database.
pub struct Store {
    conn: PgConnection,
}

impl Store {
    pub fn connect(dsn: &str) -> Result<Self, StoreError> {
        let conn = PgConnection::establish(dsn)?;
        Ok(Self { conn })
    }

    /// Idempotent schema creation and column migration. Safe against an
    /// empty database and against one that already carries a superset of
    /// these columns.
    pub fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.conn.batch_execute(DDL)?;
        for migration in MIGRATIONS {
            if let Err(e) = self.conn.batch_execute(migration) {
                warn!("migration skipped ({}): {e}", &migration[..migration.len().min(60)]);
            }
        }
        info!("database schema ready");
        Ok(())
    }

    /// Insert one evidence row in a single committed write and return its
    /// UUID.
    pub fn insert_evidence(
        &mut self,
        control_id: &str,
        check_name: &str,
        raw_data: &Value,
        signature: &str,
        merkle_leaf_hash: Option<&str>,
        merkle_index: Option<i32>,
    ) -> Result<Uuid, StoreError> {
        let row = NewEvidence {
            id: Uuid::new_v4(),
            control_id: control_id.to_string(),
            check_name: check_name.to_string(),
            collected_at: Utc::now(),
            collector: AGENT_ID.to_string(),
            raw_data: raw_data.clone(),
            signature: signature.to_string(),
            merkle_leaf_hash: merkle_leaf_hash.map(str::to_string),
            merkle_index,
        };
        diesel::insert_into(schema::evidence::table).values(&row).execute(&mut self.conn)?;
        Ok(row.id)
    }

    /// Record the outcome of one control run, with optional ticket refs.
    pub fn insert_run(
        &mut self,
        control_id: &str,
        status: &str,
        evidence_id: Option<Uuid>,
        summary: &Value,
        ticket_number: Option<&str>,
        ticket_sys_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let row = NewControlRun {
            id: Uuid::new_v4(),
            control_id: control_id.to_string(),
            run_at: Utc::now(),
            status: status.to_string(),
            evidence_id,
            summary: Some(summary.clone()),
            ticket_number: ticket_number.map(str::to_string),
            ticket_sys_id: ticket_sys_id.map(str::to_string),
        };
        diesel::insert_into(schema::control_runs::table).values(&row).execute(&mut self.conn)?;
        Ok(())
    }

    /// Persist a signed TrustEnvelope and return its row UUID.
    pub fn insert_trust_envelope(&mut self, envelope: &TrustEnvelope) -> Result<Uuid, StoreError> {
        let row = NewTrustEnvelope {
            id: Uuid::new_v4(),
            envelope_id: envelope.envelope_id.clone(),
            control_id: envelope.control_id.clone(),
            product_id: envelope.product_id.clone(),
            created_at: Utc::now(),
            trust_level: envelope.trust_level.as_str().to_string(),
            composite_confidence: envelope.composite_confidence,
            merkle_root: envelope.evidence_summary.merkle_root.clone(),
            envelope_data: envelope.to_value(),
            signature: envelope.signature.clone(),
        };
        diesel::insert_into(schema::trust_envelopes::table)
            .values(&row)
            .execute(&mut self.conn)?;
        Ok(row.id)
    }

    /// Most recent ticket number recorded for this control, if any.
    pub fn get_last_ticket(&mut self, for_control: &str) -> Result<Option<String>, StoreError> {
        use schema::control_runs::dsl::*;
        let row: Option<Option<String>> = control_runs
            .filter(control_id.eq(for_control))
            .filter(ticket_number.is_not_null())
            .order(run_at.desc())
            .select(ticket_number)
            .first(&mut self.conn)
            .optional()?;
        Ok(row.flatten())
    }

    /// Most recent ticket sys_id recorded for this control, if any. Paired
    /// with [`Store::get_last_ticket`] by the dedup decision in the cycle
    /// driver.
    pub fn get_last_ticket_sys_id(
        &mut self,
        for_control: &str,
    ) -> Result<Option<String>, StoreError> {
        use schema::control_runs::dsl::*;
        let row: Option<Option<String>> = control_runs
            .filter(control_id.eq(for_control))
            .filter(ticket_sys_id.is_not_null())
            .order(run_at.desc())
            .select(ticket_sys_id)
            .first(&mut self.conn)
            .optional()?;
        Ok(row.flatten())
    }

    /// All Merkle leaf hashes ordered by `merkle_index` ascending, for log
    /// reconstruction at startup.
    pub fn get_evidence_leaf_hashes(&mut self) -> Result<Vec<String>, StoreError> {
        use schema::evidence::dsl::*;
        let rows: Vec<Option<String>> = evidence
            .filter(merkle_leaf_hash.is_not_null())
            .order(merkle_index.asc())
            .select(merkle_leaf_hash)
            .load(&mut self.conn)?;
        Ok(rows.into_iter().flatten().collect())
    }

    /// Newest `limit` trust envelopes, `envelope_data` parsed. The sole
    /// read path used by the dashboard collaborator.
    pub fn get_trust_envelopes(&mut self, limit: i64) -> Result<Vec<TrustEnvelopeRow>, StoreError> {
        use schema::trust_envelopes::dsl::*;
        Ok(trust_envelopes.order(created_at.desc()).limit(limit).load(&mut self.conn)?)
    }
}
