//! Postgres-backed policy rows, identity records and rate-limit counters.
//!
//! # Data model
//! - `principals` and `rate_limit_counters` have fixed names and are created
//!   by the embedded migrations.
//! - Policy rows live in three tables named from a configured prefix
//!   (`<prefix>roles`, `<prefix>policies`, `<prefix>groupings`). The names are
//!   validated as plain SQL identifiers before they are interpolated into any
//!   statement, and the tables are created on connect when missing.
//!
//! # Operational notes
//! - Migrations run at connect, before any request is served.
//! - Pool acquire and connect timeouts are always set so a dead database
//!   surfaces as an error instead of a hung request.
//! - Database URLs may contain credentials; never log them.
use super::{
    CounterError, CounterStore, IdentityStore, PrincipalRecord, StoreError, StoreResult,
    WindowCount,
};
use crate::config::PostgresConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use portcullis_authz::{
    GroupingRule, PolicyRecord, PolicyRule, PolicyStore, PolicyStoreError, PrincipalId,
    PrincipalKind,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// Longest identifier Postgres keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTables {
    pub roles: String,
    pub policies: String,
    pub groupings: String,
}

impl PolicyTables {
    pub fn from_prefix(prefix: &str) -> StoreResult<Self> {
        let tables = Self {
            roles: format!("{prefix}roles"),
            policies: format!("{prefix}policies"),
            groupings: format!("{prefix}groupings"),
        };
        for name in [&tables.roles, &tables.policies, &tables.groupings] {
            if !is_plain_identifier(name) {
                return Err(StoreError::Unexpected(anyhow!(
                    "invalid policy table name {name:?}"
                )));
            }
        }
        Ok(tables)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub struct PostgresStore {
    pool: PgPool,
    tables: PolicyTables,
}

#[derive(Debug, Clone, FromRow)]
struct DbPolicy {
    subject: String,
    object: String,
    action: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbGrouping {
    member: String,
    grp: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    name: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbPrincipal {
    kind: String,
    id: i64,
    credential_version: i64,
    invalid_before: i64,
    disabled: bool,
    is_super: bool,
}

impl DbPrincipal {
    fn into_record(self) -> StoreResult<PrincipalRecord> {
        let kind = self
            .kind
            .parse::<PrincipalKind>()
            .map_err(|err| StoreError::Unexpected(anyhow!("principal kind: {err}")))?;
        let id = u64::try_from(self.id)
            .map_err(|_| StoreError::Unexpected(anyhow!("negative principal id {}", self.id)))?;
        let credential_version = u64::try_from(self.credential_version).map_err(|_| {
            StoreError::Unexpected(anyhow!(
                "negative credential version {} for {kind}:{id}",
                self.credential_version
            ))
        })?;
        Ok(PrincipalRecord {
            principal: PrincipalId::new(kind, id),
            credential_version,
            invalid_before_unix: self.invalid_before,
            disabled: self.disabled,
            is_super: self.is_super,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbWindow {
    count: i64,
    ttl_secs: f64,
}

const PRINCIPAL_COLUMNS: &str = "kind, id, credential_version, invalid_before, disabled, is_super";

impl PostgresStore {
    /// Connect, run migrations, and create the policy tables if missing.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let tables = PolicyTables::from_prefix(&pg.policy_table_prefix)?;
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = tokio::time::timeout(
            Duration::from_millis(pg.connect_timeout_ms),
            PgPoolOptions::new()
                .max_connections(pg.max_connections)
                .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
                .connect_with(connect_options),
        )
        .await
        .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;

        sqlx::migrate!("./migrations").run(&pool).await?;
        let store = Self { pool, tables };
        store.ensure_policy_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &PolicyTables {
        &self.tables
    }

    async fn ensure_policy_tables(&self) -> StoreResult<()> {
        let PolicyTables {
            roles,
            policies,
            groupings,
        } = &self.tables;
        let statements = [
            format!("CREATE TABLE IF NOT EXISTS {roles} (name TEXT PRIMARY KEY)"),
            format!(
                "CREATE TABLE IF NOT EXISTS {policies} (\
                 subject TEXT NOT NULL, object TEXT NOT NULL, action TEXT NOT NULL, \
                 PRIMARY KEY (subject, object, action))"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {groupings} (\
                 member TEXT NOT NULL, grp TEXT NOT NULL, \
                 PRIMARY KEY (member, grp))"
            ),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_principal(&self, principal: &PrincipalId) -> StoreResult<Option<PrincipalRecord>> {
        let Ok(id) = i64::try_from(principal.id) else {
            return Ok(None);
        };
        let row: Option<DbPrincipal> = sqlx::query_as(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE kind = $1 AND id = $2"
        ))
        .bind(principal.kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DbPrincipal::into_record).transpose()
    }

    async fn update_principal(
        &self,
        principal: &PrincipalId,
        assignment: &str,
        value: Option<i64>,
        flag: Option<bool>,
    ) -> StoreResult<PrincipalRecord> {
        let id = i64::try_from(principal.id)
            .map_err(|_| StoreError::NotFound(principal.to_string()))?;
        let sql = format!(
            "UPDATE principals SET {assignment}, updated_at = now() \
             WHERE kind = $1 AND id = $2 RETURNING {PRINCIPAL_COLUMNS}"
        );
        let mut query = sqlx::query_as::<_, DbPrincipal>(&sql)
            .bind(principal.kind.as_str())
            .bind(id);
        if let Some(value) = value {
            query = query.bind(value);
        }
        if let Some(flag) = flag {
            query = query.bind(flag);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(principal.to_string()))?;
        row.into_record()
    }
}

fn policy_store_error(err: sqlx::Error) -> PolicyStoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PolicyStoreError::Unavailable(err.to_string())
        }
        other => PolicyStoreError::Backend(Box::new(other)),
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError> {
        let PolicyTables {
            roles,
            policies,
            groupings,
        } = &self.tables;
        let role_rows: Vec<DbRole> = sqlx::query_as(&format!("SELECT name FROM {roles}"))
            .fetch_all(&self.pool)
            .await
            .map_err(policy_store_error)?;
        let policy_rows: Vec<DbPolicy> =
            sqlx::query_as(&format!("SELECT subject, object, action FROM {policies}"))
                .fetch_all(&self.pool)
                .await
                .map_err(policy_store_error)?;
        let grouping_rows: Vec<DbGrouping> =
            sqlx::query_as(&format!("SELECT member, grp FROM {groupings}"))
                .fetch_all(&self.pool)
                .await
                .map_err(policy_store_error)?;

        let mut records =
            Vec::with_capacity(role_rows.len() + policy_rows.len() + grouping_rows.len());
        records.extend(role_rows.into_iter().map(|row| PolicyRecord::Role(row.name)));
        records.extend(policy_rows.into_iter().map(|row| {
            PolicyRecord::Policy(PolicyRule::new(row.subject, row.object, row.action))
        }));
        records.extend(
            grouping_rows
                .into_iter()
                .map(|row| PolicyRecord::Grouping(GroupingRule::new(row.member, row.grp))),
        );
        Ok(records)
    }

    async fn insert(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError> {
        let result = match record {
            PolicyRecord::Role(name) => {
                sqlx::query(&format!(
                    "INSERT INTO {} (name) VALUES ($1) ON CONFLICT DO NOTHING",
                    self.tables.roles
                ))
                .bind(name)
                .execute(&self.pool)
                .await
            }
            PolicyRecord::Policy(rule) => {
                sqlx::query(&format!(
                    "INSERT INTO {} (subject, object, action) VALUES ($1, $2, $3) \
                     ON CONFLICT DO NOTHING",
                    self.tables.policies
                ))
                .bind(&rule.subject)
                .bind(&rule.object)
                .bind(&rule.action)
                .execute(&self.pool)
                .await
            }
            PolicyRecord::Grouping(rule) => {
                sqlx::query(&format!(
                    "INSERT INTO {} (member, grp) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    self.tables.groupings
                ))
                .bind(&rule.member)
                .bind(&rule.group)
                .execute(&self.pool)
                .await
            }
        };
        result.map_err(policy_store_error)?;
        metrics::counter!("portcullis_policy_rows_written_total", "kind" => record.kind())
            .increment(1);
        Ok(())
    }

    async fn delete(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError> {
        let result = match record {
            PolicyRecord::Role(name) => {
                sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.tables.roles))
                    .bind(name)
                    .execute(&self.pool)
                    .await
            }
            PolicyRecord::Policy(rule) => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE subject = $1 AND object = $2 AND action = $3",
                    self.tables.policies
                ))
                .bind(&rule.subject)
                .bind(&rule.object)
                .bind(&rule.action)
                .execute(&self.pool)
                .await
            }
            PolicyRecord::Grouping(rule) => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE member = $1 AND grp = $2",
                    self.tables.groupings
                ))
                .bind(&rule.member)
                .bind(&rule.group)
                .execute(&self.pool)
                .await
            }
        };
        result.map_err(policy_store_error)?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    async fn get_principal(&self, principal: &PrincipalId) -> StoreResult<Option<PrincipalRecord>> {
        self.fetch_principal(principal).await
    }

    async fn upsert_principal(&self, record: &PrincipalRecord) -> StoreResult<()> {
        let id = i64::try_from(record.principal.id)
            .map_err(|_| StoreError::Unexpected(anyhow!("principal id out of range")))?;
        let version = i64::try_from(record.credential_version)
            .map_err(|_| StoreError::Unexpected(anyhow!("credential version out of range")))?;
        sqlx::query(
            "INSERT INTO principals \
             (kind, id, credential_version, invalid_before, disabled, is_super) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (kind, id) DO UPDATE SET \
             credential_version = EXCLUDED.credential_version, \
             invalid_before = EXCLUDED.invalid_before, \
             disabled = EXCLUDED.disabled, \
             is_super = EXCLUDED.is_super, \
             updated_at = now()",
        )
        .bind(record.principal.kind.as_str())
        .bind(id)
        .bind(version)
        .bind(record.invalid_before_unix)
        .bind(record.disabled)
        .bind(record.is_super)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bump_credential_version(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<PrincipalRecord> {
        let record = self
            .update_principal(
                principal,
                "credential_version = credential_version + 1",
                None,
                None,
            )
            .await?;
        metrics::counter!("portcullis_identity_revocations_total", "op" => "bump_version")
            .increment(1);
        Ok(record)
    }

    async fn invalidate_before(
        &self,
        principal: &PrincipalId,
        cutoff_unix: i64,
    ) -> StoreResult<PrincipalRecord> {
        let record = self
            .update_principal(
                principal,
                "invalid_before = GREATEST(invalid_before, $3)",
                Some(cutoff_unix),
                None,
            )
            .await?;
        metrics::counter!("portcullis_identity_revocations_total", "op" => "invalidate_before")
            .increment(1);
        Ok(record)
    }

    async fn set_disabled(
        &self,
        principal: &PrincipalId,
        disabled: bool,
    ) -> StoreResult<PrincipalRecord> {
        self.update_principal(principal, "disabled = $3", None, Some(disabled))
            .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl CounterStore for PostgresStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        // One statement: start a new window when the stored one has expired,
        // otherwise bump it, and report the count and remaining seconds.
        let row: DbWindow = sqlx::query_as(
            "INSERT INTO rate_limit_counters AS c (key, count, expires_at) \
             VALUES ($1, 1, now() + make_interval(secs => $2)) \
             ON CONFLICT (key) DO UPDATE SET \
             count = CASE WHEN c.expires_at <= now() THEN 1 ELSE c.count + 1 END, \
             expires_at = CASE WHEN c.expires_at <= now() THEN EXCLUDED.expires_at \
             ELSE c.expires_at END \
             RETURNING count, \
             CAST(GREATEST(EXTRACT(EPOCH FROM (expires_at - now())), 0) AS DOUBLE PRECISION) \
             AS ttl_secs",
        )
        .bind(key)
        .bind(window.as_secs_f64())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                CounterError::Unavailable(err.to_string())
            }
            other => CounterError::Backend(anyhow::Error::new(other)),
        })?;
        Ok(WindowCount {
            count: u64::try_from(row.count).unwrap_or(0),
            ttl: Duration::try_from_secs_f64(row.ttl_secs).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        for good in ["rbac_policies", "_x", "A1_b2"] {
            assert!(is_plain_identifier(good), "{good}");
        }
        let too_long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        for bad in [
            "",
            "1table",
            "rbac-policies",
            "rbac policies",
            "x;DROP TABLE y",
            "\"quoted\"",
            too_long.as_str(),
        ] {
            assert!(!is_plain_identifier(bad), "{bad:?}");
        }
    }

    #[test]
    fn tables_follow_prefix() {
        let tables = PolicyTables::from_prefix("authz_").expect("tables");
        assert_eq!(tables.roles, "authz_roles");
        assert_eq!(tables.policies, "authz_policies");
        assert_eq!(tables.groupings, "authz_groupings");
        assert!(PolicyTables::from_prefix("bad-prefix_").is_err());
        assert!(PolicyTables::from_prefix("x; --").is_err());
    }

    #[test]
    fn db_principal_conversion() {
        let row = DbPrincipal {
            kind: "admin".to_string(),
            id: 7,
            credential_version: 2,
            invalid_before: 10,
            disabled: false,
            is_super: true,
        };
        let record = row.into_record().expect("record");
        assert_eq!(record.principal, PrincipalId::admin(7));
        assert!(record.is_super);

        let bad = DbPrincipal {
            kind: "robot".to_string(),
            id: 1,
            credential_version: 0,
            invalid_before: 0,
            disabled: false,
            is_super: false,
        };
        assert!(bad.into_record().is_err());
    }

    #[test]
    fn negative_credential_version_is_corrupt() {
        let row = DbPrincipal {
            kind: "user".to_string(),
            id: 3,
            credential_version: -1,
            invalid_before: 0,
            disabled: false,
            is_super: false,
        };
        let err = row.into_record().expect_err("negative version");
        assert!(matches!(err, StoreError::Unexpected(_)));
        assert!(err.to_string().contains("negative credential version"));
    }

    #[test]
    fn pool_timeouts_are_unavailable() {
        assert!(matches!(
            policy_store_error(sqlx::Error::PoolTimedOut),
            PolicyStoreError::Unavailable(_)
        ));
        assert!(matches!(
            policy_store_error(sqlx::Error::RowNotFound),
            PolicyStoreError::Backend(_)
        ));
    }
}
