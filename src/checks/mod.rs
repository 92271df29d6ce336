//! Control check implementations.
//!
//! Each check evaluates one identity-access rule against a fresh IdP
//! snapshot and returns a [`CheckResult`]. Checks never abort the cycle:
//! IdP failures become `status = error` results, and bad per-user data is
//! skipped with a warning.
//!
//! Day arithmetic in the SLA checks is whole days (floor) in UTC.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::idp::{KeycloakClient, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Error => "error",
        }
    }
}

/// Raw outcome of one control evaluation. `short_description` and
/// `description` feed the remediation ticket and are only set on `fail`.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub summary: Value,
    pub findings: Vec<Value>,
    pub short_description: String,
    pub description: String,
}

impl CheckResult {
    pub fn pass(summary: Value) -> Self {
        Self {
            status: CheckStatus::Pass,
            summary,
            findings: Vec::new(),
            short_description: String::new(),
            description: String::new(),
        }
    }

    pub fn fail(
        summary: Value,
        findings: Vec<Value>,
        short_description: String,
        description: String,
    ) -> Self {
        Self { status: CheckStatus::Fail, summary, findings, short_description, description }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::error_with_summary(json!({ "error": message.into() }))
    }

    pub fn error_with_summary(summary: Value) -> Self {
        Self {
            status: CheckStatus::Error,
            summary,
            findings: Vec::new(),
            short_description: String::new(),
            description: String::new(),
        }
    }
}

/// The closed set of registered checks. Controls name their check by
/// string in `controls.yaml`; [`CheckKind::from_name`] is the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    NewAccessNoApproval,
    TerminationsSla,
    QuarterlyUar,
    AdminAccessCount,
}

impl CheckKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "new_access_no_approval" => Some(Self::NewAccessNoApproval),
            "terminations_sla" => Some(Self::TerminationsSla),
            "quarterly_uar" => Some(Self::QuarterlyUar),
            "admin_access_count" => Some(Self::AdminAccessCount),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NewAccessNoApproval => "new_access_no_approval",
            Self::TerminationsSla => "terminations_sla",
            Self::QuarterlyUar => "quarterly_uar",
            Self::AdminAccessCount => "admin_access_count",
        }
    }

    pub async fn run(self, idp: &KeycloakClient, params: &Value) -> CheckResult {
        match self {
            Self::NewAccessNoApproval => new_access_no_approval(idp, params).await,
            Self::TerminationsSla => terminations_sla(idp, params).await,
            Self::QuarterlyUar => quarterly_uar(idp, params).await,
            Self::AdminAccessCount => admin_access_count(idp, params).await,
        }
    }
}

/// Parse an ISO-8601 timestamp the way operators actually record them:
/// full RFC 3339, a naive datetime (T or space separated), or a bare date.
/// Naive values are taken as UTC.
fn parse_iso8601_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

fn iso_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

fn usernames(findings: &[Value]) -> String {
    findings
        .iter()
        .filter_map(|f| f.get("username").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── LA.01 ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NewAccessParams {
    #[serde(default = "default_lookback_days")]
    lookback_days: i64,
    #[serde(default = "default_required_attribute")]
    required_attribute: String,
}

fn default_lookback_days() -> i64 {
    30
}

fn default_required_attribute() -> String {
    "approvedBy".to_string()
}

/// LA.01 - accounts created inside the lookback window must carry an
/// approval attribute.
pub async fn new_access_no_approval(idp: &KeycloakClient, params: &Value) -> CheckResult {
    let params: NewAccessParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return CheckResult::error(format!("invalid params: {e}")),
    };

    let cutoff_ms = (Utc::now() - Duration::days(params.lookback_days)).timestamp_millis();

    let users = match idp.list_users().await {
        Ok(users) => users,
        Err(e) => {
            error!("new_access_no_approval: failed to list users: {e}");
            return CheckResult::error(e.to_string());
        }
    };

    let recent: Vec<&User> =
        users.iter().filter(|u| u.enabled && u.created_timestamp >= cutoff_ms).collect();

    let mut non_compliant = Vec::new();
    for user in &recent {
        let approved = user
            .attributes
            .get(&params.required_attribute)
            .map(|values| !values.is_empty())
            .unwrap_or(false);
        if !approved {
            let created = Utc
                .timestamp_millis_opt(user.created_timestamp)
                .single()
                .map(iso_utc)
                .unwrap_or_default();
            non_compliant.push(json!({
                "username": user.username,
                "user_id": user.id,
                "created": created,
            }));
        }
    }

    let count = non_compliant.len();
    let summary = json!({
        "lookback_days": params.lookback_days,
        "required_attribute": params.required_attribute,
        "recent_users_checked": recent.len(),
        "missing_approval": count,
    });

    if count > 0 {
        let names = usernames(&non_compliant);
        let short = format!("LA.01: {count} new account(s) provisioned without approval record");
        let description = format!(
            "{count} account(s) created in the last {} days lack the '{}' attribute.\nAffected: {names}",
            params.lookback_days, params.required_attribute
        );
        return CheckResult::fail(summary, non_compliant, short, description);
    }
    CheckResult::pass(summary)
}

// ── LA.02 ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TerminationsParams {
    #[serde(default = "default_sla_days")]
    sla_days: i64,
    #[serde(default = "default_termination_attribute")]
    termination_attribute: String,
}

fn default_sla_days() -> i64 {
    1
}

fn default_termination_attribute() -> String {
    "terminationRequestDate".to_string()
}

/// LA.02 - terminated (disabled) accounts must have been actioned within
/// the SLA window. Overdue time is measured in whole days, UTC.
pub async fn terminations_sla(idp: &KeycloakClient, params: &Value) -> CheckResult {
    let params: TerminationsParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return CheckResult::error(format!("invalid params: {e}")),
    };

    let users = match idp.list_users().await {
        Ok(users) => users,
        Err(e) => {
            error!("terminations_sla: failed to list users: {e}");
            return CheckResult::error(e.to_string());
        }
    };

    let now = Utc::now();
    let mut tracked = 0usize;
    let mut breaches = Vec::new();

    for user in users.iter().filter(|u| !u.enabled) {
        let Some(raw) = user
            .attributes
            .get(&params.termination_attribute)
            .and_then(|values| values.first())
        else {
            continue; // no SLA tracking attribute
        };
        let Some(term_date) = parse_iso8601_utc(raw) else {
            warn!(username = %user.username, value = %raw, "terminations_sla: unparseable termination date");
            continue;
        };
        tracked += 1;
        let days_open = (now - term_date).num_days();
        if days_open > params.sla_days {
            breaches.push(json!({
                "username": user.username,
                "user_id": user.id,
                "termination_requested": iso_utc(term_date),
                "days_open": days_open,
                "days_overdue": days_open - params.sla_days,
            }));
        }
    }

    let count = breaches.len();
    let summary = json!({
        "sla_days": params.sla_days,
        "disabled_users_with_sla_tracking": tracked,
        "sla_breaches": count,
    });

    if count > 0 {
        let names = usernames(&breaches);
        let worst = breaches
            .iter()
            .filter_map(|b| b.get("days_overdue").and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        let short = format!(
            "LA.02: {count} terminated account(s) breached the {}-day SLA (worst: {worst}d overdue)",
            params.sla_days
        );
        let description = format!(
            "{count} account(s) were not disabled within the {}-day SLA after termination request, \
             measured in whole days (UTC).\nAffected: {names}",
            params.sla_days
        );
        return CheckResult::fail(summary, breaches, short, description);
    }
    CheckResult::pass(summary)
}

// ── LA.03 ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UarParams {
    #[serde(default = "default_max_days_since_uar")]
    max_days_since_uar: i64,
    #[serde(default = "default_uar_attribute")]
    uar_attribute: String,
}

fn default_max_days_since_uar() -> i64 {
    90
}

fn default_uar_attribute() -> String {
    "lastUarCompletedDate".to_string()
}

/// LA.03 - a User Access Review must have been completed within the
/// required cadence. Elapsed time is measured in whole days, UTC.
pub async fn quarterly_uar(idp: &KeycloakClient, params: &Value) -> CheckResult {
    let params: UarParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return CheckResult::error(format!("invalid params: {e}")),
    };

    let realm = match idp.get_realm().await {
        Ok(realm) => realm,
        Err(e) => {
            error!("quarterly_uar: failed to read realm: {e}");
            return CheckResult::error(e.to_string());
        }
    };

    let uar_value = realm.attributes.get(&params.uar_attribute).filter(|v| !v.is_empty());

    let Some(raw) = uar_value else {
        let summary = json!({
            "max_days_since_uar": params.max_days_since_uar,
            "uar_attribute": params.uar_attribute,
            "last_uar_date": null,
            "days_since_uar": null,
        });
        return CheckResult::fail(
            summary,
            Vec::new(),
            "LA.03: No UAR completion date recorded - review overdue".to_string(),
            "No User Access Review completion date found in the realm attributes. \
             A UAR must be completed and the date recorded."
                .to_string(),
        );
    };

    let Some(uar_date) = parse_iso8601_utc(raw) else {
        return CheckResult::error(format!("Invalid {} value: '{raw}'", params.uar_attribute));
    };

    let days_since = (Utc::now() - uar_date).num_days();
    let summary = json!({
        "max_days_since_uar": params.max_days_since_uar,
        "uar_attribute": params.uar_attribute,
        "last_uar_date": raw,
        "days_since_uar": days_since,
    });

    if days_since > params.max_days_since_uar {
        let short = format!(
            "LA.03: UAR overdue - last completed {days_since} days ago (SLA: every {} days)",
            params.max_days_since_uar
        );
        let description = format!(
            "The last User Access Review was completed {days_since} whole days (UTC) ago ({raw}). \
             The required cadence is every {} days.",
            params.max_days_since_uar
        );
        return CheckResult::fail(summary, Vec::new(), short, description);
    }
    CheckResult::pass(summary)
}

// ── LA.04 ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AdminCountParams {
    #[serde(default = "default_role_name")]
    role_name: String,
    #[serde(default = "default_max_admins")]
    max_admins: usize,
}

fn default_role_name() -> String {
    "admin".to_string()
}

fn default_max_admins() -> usize {
    3
}

/// LA.04 - privileged role membership must not exceed the approved count.
pub async fn admin_access_count(idp: &KeycloakClient, params: &Value) -> CheckResult {
    let params: AdminCountParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return CheckResult::error(format!("invalid params: {e}")),
    };

    let admins = match idp.get_role_users(&params.role_name).await {
        Ok(users) => users,
        Err(e) => {
            error!("admin_access_count: could not fetch users for role '{}': {e}", params.role_name);
            return CheckResult::error_with_summary(json!({
                "error": e.to_string(),
                "role_name": params.role_name,
            }));
        }
    };

    let count = admins.len();
    let summary = json!({
        "role_name": params.role_name,
        "admin_count": count,
        "max_allowed": params.max_admins,
    });

    if count > params.max_admins {
        let findings = admins
            .iter()
            .map(|u| json!({"username": u.username, "user_id": u.id}))
            .collect::<Vec<_>>();
        let short = format!(
            "LA.04: Admin account count ({count}) exceeds threshold ({})",
            params.max_admins
        );
        let description = format!(
            "The realm has {count} users with the '{}' role, exceeding the approved maximum of {}.",
            params.role_name, params.max_admins
        );
        return CheckResult::fail(summary, findings, short, description);
    }
    CheckResult::pass(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> KeycloakClient {
        KeycloakClient::new(&server.url(), "master", "admin", "admin")
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/realms/master/protocol/openid-connect/token")
            .with_body(json!({"access_token": "tok"}).to_string())
            .create_async()
            .await
    }

    async fn mock_users(server: &mut mockito::ServerGuard, users: Value) -> mockito::Mock {
        server
            .mock("GET", "/admin/realms/master/users")
            .match_query(Matcher::Any)
            .with_body(users.to_string())
            .create_async()
            .await
    }

    fn user(
        id: &str,
        enabled: bool,
        created: chrono::DateTime<Utc>,
        attributes: Value,
    ) -> Value {
        json!({
            "id": id,
            "username": id,
            "enabled": enabled,
            "createdTimestamp": created.timestamp_millis(),
            "attributes": attributes,
        })
    }

    #[test]
    fn registry_resolves_known_names_only() {
        assert_eq!(CheckKind::from_name("new_access_no_approval"), Some(CheckKind::NewAccessNoApproval));
        assert_eq!(CheckKind::from_name("terminations_sla"), Some(CheckKind::TerminationsSla));
        assert_eq!(CheckKind::from_name("quarterly_uar"), Some(CheckKind::QuarterlyUar));
        assert_eq!(CheckKind::from_name("admin_access_count"), Some(CheckKind::AdminAccessCount));
        assert_eq!(CheckKind::from_name("nope"), None);
        assert_eq!(CheckKind::from_name(CheckKind::QuarterlyUar.name()), Some(CheckKind::QuarterlyUar));
    }

    #[test]
    fn iso8601_parsing_accepts_operator_formats() {
        assert!(parse_iso8601_utc("2026-07-25T10:00:00+00:00").is_some());
        assert!(parse_iso8601_utc("2026-07-25T10:00:00Z").is_some());
        assert!(parse_iso8601_utc("2026-07-25T10:00:00").is_some());
        assert!(parse_iso8601_utc("2026-07-25 10:00:00").is_some());
        assert!(parse_iso8601_utc("2026-07-25").is_some());
        assert!(parse_iso8601_utc("not-a-date").is_none());
        assert!(parse_iso8601_utc("").is_none());

        // Naive values are interpreted as UTC.
        let naive = parse_iso8601_utc("2026-07-25T10:00:00").unwrap();
        let explicit = parse_iso8601_utc("2026-07-25T10:00:00+00:00").unwrap();
        assert_eq!(naive, explicit);
    }

    #[tokio::test]
    async fn la01_flags_recent_users_without_approval() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let now = Utc::now();
        let _users = mock_users(
            &mut server,
            json!([
                user("u1", true, now - Duration::days(2), json!({"approvedBy": ["mgr"]})),
                user("u2", true, now - Duration::days(3), json!({})),
                user("u3", true, now - Duration::days(4), json!({"approvedBy": []})),
                user("u4", true, now - Duration::days(5), json!({"approvedBy": ["mgr"]})),
                user("u5", true, now - Duration::days(6), json!({"approvedBy": ["mgr"]})),
                user("u6", true, now - Duration::days(7), json!({"approvedBy": ["mgr"]})),
                // Outside the lookback window and a disabled user: ignored.
                user("old", true, now - Duration::days(90), json!({})),
                user("gone", false, now - Duration::days(1), json!({})),
            ]),
        ).await;

        let result = new_access_no_approval(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.summary["recent_users_checked"], 6);
        assert_eq!(result.summary["missing_approval"], 2);
        assert_eq!(result.findings.len(), 2);
        assert!(result.short_description.contains("2 new account(s)"));
        assert!(result.description.contains("approvedBy"));
    }

    #[tokio::test]
    async fn la01_passes_when_all_recent_users_are_approved() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let now = Utc::now();
        let _users = mock_users(
            &mut server,
            json!([
                user("u1", true, now - Duration::days(1), json!({"approvedBy": ["a"]})),
                user("u2", true, now - Duration::days(2), json!({"approvedBy": ["b"]})),
                user("u3", true, now - Duration::days(3), json!({"approvedBy": ["c"]})),
            ]),
        ).await;

        let result = new_access_no_approval(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.summary["recent_users_checked"], 3);
        assert_eq!(result.summary["missing_approval"], 0);
        assert!(result.short_description.is_empty());
    }

    #[tokio::test]
    async fn la01_reports_error_when_idp_is_down() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _users = server
            .mock("GET", "/admin/realms/master/users")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let result = new_access_no_approval(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.summary.get("error").is_some());
    }

    #[tokio::test]
    async fn la02_counts_breaches_in_whole_days() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let now = Utc::now();
        let term = |days: i64| json!({"terminationRequestDate": [iso_utc(now - Duration::days(days))]});
        let _users = mock_users(
            &mut server,
            json!([
                user("seven", false, now - Duration::days(40), term(7)),
                user("four", false, now - Duration::days(40), term(4)),
                user("today", false, now - Duration::days(40), json!({"terminationRequestDate": [iso_utc(now)]})),
                // Disabled but untracked, unparseable, and enabled users are
                // not part of the population.
                user("untracked", false, now - Duration::days(40), json!({})),
                user("bad-date", false, now - Duration::days(40), json!({"terminationRequestDate": ["soon"]})),
                user("active", true, now - Duration::days(40), term(30)),
            ]),
        ).await;

        let result = terminations_sla(&client(&server), &json!({"sla_days": 1})).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.summary["disabled_users_with_sla_tracking"], 3);
        assert_eq!(result.summary["sla_breaches"], 2);
        assert!(result.short_description.contains("worst: 6d overdue"));
        let overdue: Vec<i64> = result
            .findings
            .iter()
            .map(|f| f["days_overdue"].as_i64().unwrap())
            .collect();
        assert_eq!(overdue, vec![6, 3]);
    }

    #[tokio::test]
    async fn la02_passes_without_breaches() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let now = Utc::now();
        let _users = mock_users(
            &mut server,
            json!([user("fresh", false, now, json!({"terminationRequestDate": [iso_utc(now)]}))]),
        ).await;
        let result = terminations_sla(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.summary["sla_breaches"], 0);
    }

    async fn realm_with(server: &mut mockito::ServerGuard, attributes: Value) -> mockito::Mock {
        server
            .mock("GET", "/admin/realms/master")
            .with_body(json!({"realm": "master", "attributes": attributes}).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn la03_fails_with_null_summary_when_uar_date_missing() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _realm = realm_with(&mut server, json!({})).await;

        let result = quarterly_uar(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.summary["last_uar_date"], Value::Null);
        assert_eq!(result.summary["days_since_uar"], Value::Null);
        assert!(result.short_description.contains("No UAR completion date"));
    }

    #[tokio::test]
    async fn la03_errors_on_unparseable_uar_date() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _realm = realm_with(&mut server, json!({"lastUarCompletedDate": "Q3-ish"})).await;

        let result = quarterly_uar(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.summary["error"].as_str().unwrap().contains("Q3-ish"));
    }

    #[tokio::test]
    async fn la03_pass_and_fail_around_the_cadence() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let recent = iso_utc(Utc::now() - Duration::days(10));
        let _realm = realm_with(&mut server, json!({"lastUarCompletedDate": recent})).await;
        let result = quarterly_uar(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.summary["days_since_uar"], 10);

        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let stale = iso_utc(Utc::now() - Duration::days(120));
        let _realm = realm_with(&mut server, json!({"lastUarCompletedDate": stale})).await;
        let result = quarterly_uar(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.summary["days_since_uar"], 120);
        assert!(result.description.contains("every 90 days"));
    }

    #[tokio::test]
    async fn la04_compares_member_count_to_threshold() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let members = json!([
        {"id": "a", "username": "a"}, {"id": "b", "username": "b"},
        {"id": "c", "username": "c"}, {"id": "d", "username": "d"}
        ]);
        let _role = server
            .mock("GET", "/admin/realms/master/roles/admin/users")
            .with_body(members.to_string())
            .create_async()
            .await;

        let result = admin_access_count(&client(&server), &json!({"max_admins": 3})).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.summary["admin_count"], 4);
        assert_eq!(result.summary["max_allowed"], 3);
        assert_eq!(result.findings.len(), 4);

        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _role = server
            .mock("GET", "/admin/realms/master/roles/admin/users")
            .with_body(json!([{"id": "a", "username": "a"}]).to_string())
            .create_async()
            .await;
        let result = admin_access_count(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.summary["admin_count"], 1);
    }

    #[tokio::test]
    async fn la04_error_summary_includes_role_name() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _role = server
            .mock("GET", "/admin/realms/master/roles/admin/users")
            .with_status(502)
            .create_async()
            .await;

        let result = admin_access_count(&client(&server), &json!({})).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.summary["role_name"], "admin");
    }
}
