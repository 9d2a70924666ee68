use chrono::NaiveDateTime;
use sqlx::{query, query_as, query_scalar, FromRow};
use std::sync::Arc;
use tracing::{debug, error};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::{get_config, DatabaseConfig};
use crate::errors::{GateError, GateResult};
use crate::license::{
    check_duplicate, check_preconditions, ActivationPolicy, ActivationRecord, LicenseRecord,
    LicenseStateError, Subscription, SubscriptionRow,
};

/// A product row. The loader itself is a product; its row carries the
/// authoritative release for the version gate.
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub latest_version: String,
    pub checksum: String,
    pub download_url: Option<String>,
    pub patch_note: Option<String>,
}

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        name           TEXT NOT NULL UNIQUE,
        latest_version TEXT NOT NULL,
        checksum       TEXT NOT NULL,
        download_url   TEXT,
        patch_note     TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        license_key   TEXT NOT NULL UNIQUE,
        product_id    INTEGER NOT NULL REFERENCES products(id),
        user_id       INTEGER,
        status        TEXT NOT NULL DEFAULT 'fresh' CHECK (status IN ('fresh', 'used')),
        duration_days INTEGER NOT NULL DEFAULT 30
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_licenses_user ON licenses(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activations (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        license_id   INTEGER NOT NULL UNIQUE REFERENCES licenses(id),
        hwid         TEXT NOT NULL,
        activated_at TIMESTAMP NOT NULL
    )
    "#,
];

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id             BIGSERIAL PRIMARY KEY,
        name           TEXT NOT NULL UNIQUE,
        latest_version TEXT NOT NULL,
        checksum       TEXT NOT NULL,
        download_url   TEXT,
        patch_note     TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id            BIGSERIAL PRIMARY KEY,
        license_key   TEXT NOT NULL UNIQUE,
        product_id    BIGINT NOT NULL REFERENCES products(id),
        user_id       BIGINT,
        status        TEXT NOT NULL DEFAULT 'fresh' CHECK (status IN ('fresh', 'used')),
        duration_days BIGINT NOT NULL DEFAULT 30
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_licenses_user ON licenses(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activations (
        id           BIGSERIAL PRIMARY KEY,
        license_id   BIGINT NOT NULL UNIQUE REFERENCES licenses(id),
        hwid         TEXT NOT NULL,
        activated_at TIMESTAMP NOT NULL
    )
    "#,
];

fn storage_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> GateError {
    move |e| {
        error!("{op} failed: {e}");
        GateError::Storage(format!("{op}: {e}"))
    }
}

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Initialize the database connection from the global configuration.
    pub async fn new() -> GateResult<Arc<Self>> {
        let config = get_config()?;
        Ok(Arc::new(Self::connect(&config.database).await?))
    }

    /// Connect using an explicit database configuration.
    pub async fn connect(db_config: &DatabaseConfig) -> GateResult<Self> {
        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        GateError::Storage(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Database::SQLite(pool))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(GateError::Config(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        GateError::Storage(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Database::Postgres(pool))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(GateError::Config(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(GateError::Config(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Create the products, licenses and activations tables if missing.
    pub async fn init_schema(&self) -> GateResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                for statement in SQLITE_SCHEMA.iter().copied() {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(storage_error("SQLite init_schema"))?;
                }
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                for statement in POSTGRES_SCHEMA.iter().copied() {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(storage_error("Postgres init_schema"))?;
                }
            }
        }

        debug!(db_type = self.db_type(), "schema ready");
        Ok(())
    }

    /// Cheap connectivity check for the health endpoint.
    pub async fn ping(&self) -> bool {
        let result = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("SELECT 1").execute(pool).await.map(|_| ()),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query("SELECT 1").execute(pool).await.map(|_| ()),
        };
        result.is_ok()
    }

    /// Fetch a product by its unique name.
    pub async fn get_product_by_name(&self, name: &str) -> GateResult<Option<Product>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as::<_, Product>(
                    "SELECT id, name, latest_version, checksum, download_url, patch_note \
                     FROM products WHERE name = ?",
                )
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(storage_error("SQLite get_product_by_name"))
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, Product>(
                    "SELECT id, name, latest_version, checksum, download_url, patch_note \
                     FROM products WHERE name = $1",
                )
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(storage_error("Postgres get_product_by_name"))
            }
        }
    }

    /// Fetch a license by key, without locking.
    pub async fn get_license_by_key(&self, license_key: &str) -> GateResult<Option<LicenseRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LicenseRecord>(
                "SELECT id, license_key, product_id, user_id, status, duration_days \
                 FROM licenses WHERE license_key = ?",
            )
            .bind(license_key)
            .fetch_optional(pool)
            .await
            .map_err(storage_error("SQLite get_license_by_key")),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LicenseRecord>(
                "SELECT id, license_key, product_id, user_id, status, duration_days \
                 FROM licenses WHERE license_key = $1",
            )
            .bind(license_key)
            .fetch_optional(pool)
            .await
            .map_err(storage_error("Postgres get_license_by_key")),
        }
    }

    /// Number of activation rows recorded for a license key.
    pub async fn count_activations(&self, license_key: &str) -> GateResult<i64> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM activations a \
                 JOIN licenses l ON l.id = a.license_id \
                 WHERE l.license_key = ?",
            )
            .bind(license_key)
            .fetch_one(pool)
            .await
            .map_err(storage_error("SQLite count_activations")),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM activations a \
                 JOIN licenses l ON l.id = a.license_id \
                 WHERE l.license_key = $1",
            )
            .bind(license_key)
            .fetch_one(pool)
            .await
            .map_err(storage_error("Postgres count_activations")),
        }
    }

    /// Activated licenses of a user, with days remaining as of `now`.
    pub async fn list_subscriptions(
        &self,
        user_id: i64,
        now: NaiveDateTime,
    ) -> GateResult<Vec<Subscription>> {
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, SubscriptionRow>(
                "SELECT p.name AS product_name, p.latest_version, p.patch_note, \
                        a.activated_at, l.duration_days \
                 FROM licenses l \
                 JOIN activations a ON a.license_id = l.id \
                 JOIN products p ON p.id = l.product_id \
                 WHERE l.user_id = ? \
                 ORDER BY a.activated_at, a.id",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(storage_error("SQLite list_subscriptions"))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, SubscriptionRow>(
                "SELECT p.name AS product_name, p.latest_version, p.patch_note, \
                        a.activated_at, l.duration_days \
                 FROM licenses l \
                 JOIN activations a ON a.license_id = l.id \
                 JOIN products p ON p.id = l.product_id \
                 WHERE l.user_id = $1 \
                 ORDER BY a.activated_at, a.id",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(storage_error("Postgres list_subscriptions"))?,
        };

        Ok(rows.into_iter().map(|row| row.into_subscription(now)).collect())
    }

    /// Activate a license: the one-way `fresh -> used` transition.
    pub async fn activate_license(
        &self,
        license_key: &str,
        hwid: &str,
        policy: &ActivationPolicy,
        now: NaiveDateTime,
    ) -> GateResult<ActivationRecord> {
        self.activate_license_with(license_key, hwid, policy, now, |_| Ok(()))
            .await
            .map(|(record, ())| record)
    }

    /// Activate a license and run `finalize` before the commit.
    ///
    /// Inside one transaction: lock the license row together with the
    /// owner's other licenses for the product, run the guard chain
    /// (exists, assigned, fresh, no duplicate subscription), flip the status
    /// to `used`, insert the activation row, call `finalize`, commit. Any
    /// error, including one returned by `finalize`, rolls everything back.
    /// So does dropping the future before it completes.
    pub async fn activate_license_with<T, F>(
        &self,
        license_key: &str,
        hwid: &str,
        policy: &ActivationPolicy,
        now: NaiveDateTime,
        finalize: F,
    ) -> GateResult<(ActivationRecord, T)>
    where
        F: FnOnce(&ActivationRecord) -> GateResult<T> + Send,
        T: Send,
    {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(storage_error("SQLite begin activation"))?;

                // SQLite has no row locks: a no-op write takes the database
                // write lock before anything is read.
                query("UPDATE licenses SET status = status WHERE license_key = ?")
                    .bind(license_key)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error("SQLite lock license"))?;

                let license = query_as::<_, LicenseRecord>(
                    "SELECT id, license_key, product_id, user_id, status, duration_days \
                     FROM licenses WHERE license_key = ?",
                )
                .bind(license_key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error("SQLite read license"))?;

                let license = check_preconditions(license, policy)?;

                let holds_product = match license.user_id {
                    Some(user_id) => {
                        query_scalar::<_, i64>(
                            "SELECT COUNT(*) FROM licenses \
                             WHERE user_id = ? AND product_id = ? AND status = 'used' AND id <> ?",
                        )
                        .bind(user_id)
                        .bind(license.product_id)
                        .bind(license.id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(storage_error("SQLite duplicate check"))?
                            > 0
                    }
                    None => false,
                };
                check_duplicate(policy, holds_product)?;

                let flipped = query(
                    "UPDATE licenses SET status = 'used' WHERE id = ? AND status = 'fresh'",
                )
                .bind(license.id)
                .execute(&mut *tx)
                .await
                .map_err(storage_error("SQLite mark license used"))?
                .rows_affected();
                if flipped != 1 {
                    return Err(LicenseStateError::AlreadyUsed.into());
                }

                let activation_id = query_scalar::<_, i64>(
                    "INSERT INTO activations (license_id, hwid, activated_at) \
                     VALUES (?, ?, ?) RETURNING id",
                )
                .bind(license.id)
                .bind(hwid)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_error("SQLite insert activation"))?;

                let record = activation_record(license, activation_id, hwid, now);
                let extra = finalize(&record)?;

                tx.commit()
                    .await
                    .map_err(storage_error("SQLite commit activation"))?;

                Ok((record, extra))
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(storage_error("Postgres begin activation"))?;

                // Lock every license the owner holds for this product, in id
                // order, so a concurrent activation of a sibling key waits
                // here and then sees this one as used.
                query_scalar::<_, i64>(
                    "SELECT id FROM licenses \
                     WHERE license_key = $1 \
                        OR (user_id, product_id) = \
                           (SELECT user_id, product_id FROM licenses WHERE license_key = $1) \
                     ORDER BY id FOR UPDATE",
                )
                .bind(license_key)
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_error("Postgres lock owner licenses"))?;

                let license = query_as::<_, LicenseRecord>(
                    "SELECT id, license_key, product_id, user_id, status, duration_days \
                     FROM licenses WHERE license_key = $1 FOR UPDATE",
                )
                .bind(license_key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error("Postgres lock license"))?;

                let license = check_preconditions(license, policy)?;

                let holds_product = match license.user_id {
                    Some(user_id) => {
                        query_scalar::<_, i64>(
                            "SELECT COUNT(*) FROM licenses \
                             WHERE user_id = $1 AND product_id = $2 AND status = 'used' AND id <> $3",
                        )
                        .bind(user_id)
                        .bind(license.product_id)
                        .bind(license.id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(storage_error("Postgres duplicate check"))?
                            > 0
                    }
                    None => false,
                };
                check_duplicate(policy, holds_product)?;

                let flipped = query(
                    "UPDATE licenses SET status = 'used' WHERE id = $1 AND status = 'fresh'",
                )
                .bind(license.id)
                .execute(&mut *tx)
                .await
                .map_err(storage_error("Postgres mark license used"))?
                .rows_affected();
                if flipped != 1 {
                    return Err(LicenseStateError::AlreadyUsed.into());
                }

                let activation_id = query_scalar::<_, i64>(
                    "INSERT INTO activations (license_id, hwid, activated_at) \
                     VALUES ($1, $2, $3) RETURNING id",
                )
                .bind(license.id)
                .bind(hwid)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_error("Postgres insert activation"))?;

                let record = activation_record(license, activation_id, hwid, now);
                let extra = finalize(&record)?;

                tx.commit()
                    .await
                    .map_err(storage_error("Postgres commit activation"))?;

                Ok((record, extra))
            }
        }
    }
}

fn activation_record(
    license: LicenseRecord,
    activation_id: i64,
    hwid: &str,
    now: NaiveDateTime,
) -> ActivationRecord {
    ActivationRecord {
        activation_id,
        license_id: license.id,
        license_key: license.license_key,
        product_id: license.product_id,
        user_id: license.user_id,
        hwid: hwid.to_string(),
        activated_at: now,
    }
}
