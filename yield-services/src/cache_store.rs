//! Cache Store
//!
//! SQLite-backed key/value cache with per-entry TTL and access bookkeeping,
//! plus typed tables for protocol volume, user and chain-level metrics.
//!
//! Expiry is lazy: reads delete and miss on expired rows, and
//! [`CacheStore::cleanup_expired`] sweeps the rest on a schedule.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use yield_core::{AggregatedMetrics, UserMetrics, VolumeData};

/// TTL for per-protocol volume rows
pub const VOLUME_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for per-protocol user metric rows
pub const USER_METRICS_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for chain-level aggregates
pub const AGGREGATED_METRICS_TTL: Duration = Duration::from_secs(30 * 60);

/// Share of `max_entries` evicted when the cache is full
const EVICTION_FRACTION: f64 = 0.2;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pick one
    pub default_ttl_secs: u64,
    /// Maximum number of generic entries before eviction
    pub max_entries: usize,
    /// How often the background sweep removes expired rows
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_entries: 10_000,
            cleanup_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Bookkeeping for a single generic entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub volume_rows: usize,
    pub user_metric_rows: usize,
    pub aggregated_rows: usize,
    pub total_hits: u64,
    pub max_entries: usize,
}

/// SQLite TTL cache
pub struct CacheStore {
    conn: Mutex<Connection>,
    config: CacheConfig,
}

impl CacheStore {
    /// Open (or create) the cache database at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P, config: CacheConfig) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Io(format!("Failed to create cache directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;

        info!(
            "Opened cache database at {} (max {} entries)",
            db_path.as_ref().display(),
            store.config.max_entries
        );
        Ok(store)
    }

    /// In-memory cache (useful for testing)
    pub fn new_in_memory(config: CacheConfig) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires
            ON cache_entries(expires_at);

            CREATE INDEX IF NOT EXISTS idx_cache_accessed
            ON cache_entries(last_accessed);

            CREATE TABLE IF NOT EXISTS volume_data (
                protocol TEXT NOT NULL,
                pool TEXT NOT NULL DEFAULT '',
                volume_24h TEXT NOT NULL,
                volume_7d TEXT NOT NULL,
                volume_30d TEXT NOT NULL,
                concentration_risk REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (protocol, pool)
            );

            CREATE TABLE IF NOT EXISTS user_metrics (
                protocol TEXT PRIMARY KEY,
                unique_users_24h INTEGER NOT NULL,
                unique_users_7d INTEGER NOT NULL,
                unique_users_30d INTEGER NOT NULL,
                active_wallets INTEGER NOT NULL,
                new_users INTEGER NOT NULL,
                user_retention REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS aggregated_metrics (
                chain TEXT PRIMARY KEY,
                total_volume_24h TEXT NOT NULL,
                total_volume_7d TEXT NOT NULL,
                total_volume_30d TEXT NOT NULL,
                total_users_24h INTEGER NOT NULL,
                total_users_7d INTEGER NOT NULL,
                total_users_30d INTEGER NOT NULL,
                protocol_count INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    // ========================================================================
    // Generic entries
    // ========================================================================

    /// Store `data` under `key` for `ttl`, replacing any previous entry
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(data)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let now = now_ms();
        let expires_at = now.saturating_add(duration_ms(ttl));

        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM cache_entries WHERE key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if !exists {
            Self::make_room(&conn, self.config.max_entries, now)?;
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (key, data, created_at, expires_at, last_accessed, access_count)
            VALUES (?1, ?2, ?3, ?4, ?3, 0)
            "#,
            params![key, json, now, expires_at],
        )?;

        debug!("Cached {} ({} bytes, ttl {:?})", key, json.len(), ttl);
        Ok(())
    }

    /// Fetch and decode `key`, or `None` when absent or expired
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let now = now_ms();
        let conn = self.conn.lock();

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT data, expires_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((data, expires_at)) = row else {
            return Ok(None);
        };

        if now > expires_at {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            debug!("Cache entry {} expired", key);
            return Ok(None);
        }

        conn.execute(
            "UPDATE cache_entries SET last_accessed = ?2, access_count = access_count + 1 WHERE key = ?1",
            params![key, now],
        )?;

        match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // A row written by an older shape is treated as a miss
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(None)
            }
        }
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Remove every entry in every table
    pub fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            DELETE FROM cache_entries;
            DELETE FROM volume_data;
            DELETE FROM user_metrics;
            DELETE FROM aggregated_metrics;
            "#,
        )?;
        info!("Cache cleared");
        Ok(())
    }

    /// Bookkeeping for `key`, without touching its access counters
    pub fn entry_info(&self, key: &str) -> Result<Option<CacheEntryInfo>, CacheError> {
        let conn = self.conn.lock();
        let info = conn
            .query_row(
                "SELECT created_at, expires_at, last_accessed, access_count FROM cache_entries WHERE key = ?1",
                params![key],
                |row| {
                    let created_at: i64 = row.get(0)?;
                    let expires_at: i64 = row.get(1)?;
                    let last_accessed: i64 = row.get(2)?;
                    let access_count: i64 = row.get(3)?;
                    Ok(CacheEntryInfo {
                        key: key.to_string(),
                        created_at: from_ms(created_at),
                        expires_at: from_ms(expires_at),
                        last_accessed: from_ms(last_accessed),
                        access_count: access_count.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    /// Evict when inserting one more entry would exceed `max_entries`.
    ///
    /// Expired rows go first; if the table is still full the least recently
    /// accessed `ceil(20%)` of capacity is dropped.
    fn make_room(conn: &Connection, max_entries: usize, now: i64) -> Result<(), CacheError> {
        let count = Self::count(conn, "cache_entries")?;
        if count < max_entries {
            return Ok(());
        }

        let expired = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at < ?1",
            params![now],
        )?;
        if count - expired < max_entries {
            debug!("Made room by removing {} expired entries", expired);
            return Ok(());
        }

        let to_evict = ((max_entries as f64) * EVICTION_FRACTION).ceil().max(1.0) as i64;
        let evicted = conn.execute(
            r#"
            DELETE FROM cache_entries WHERE key IN (
                SELECT key FROM cache_entries ORDER BY last_accessed ASC LIMIT ?1
            )
            "#,
            params![to_evict],
        )?;

        info!(
            "Cache full ({} entries), evicted {} least recently used",
            count, evicted
        );
        Ok(())
    }

    fn count(conn: &Connection, table: &str) -> Result<usize, CacheError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    // ========================================================================
    // Typed metrics
    // ========================================================================

    pub fn set_volume(&self, volume: &VolumeData) -> Result<(), CacheError> {
        let expires_at = now_ms().saturating_add(duration_ms(VOLUME_TTL));
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO volume_data
            (protocol, pool, volume_24h, volume_7d, volume_30d, concentration_risk, timestamp, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                volume.protocol,
                volume.pool.as_deref().unwrap_or(""),
                volume.volume_24h.to_string(),
                volume.volume_7d.to_string(),
                volume.volume_30d.to_string(),
                volume.concentration_risk,
                volume.timestamp.timestamp_millis(),
                expires_at,
            ],
        )?;
        Ok(())
    }

    /// Volume for a protocol (`pool = None`) or a single pool
    pub fn get_volume(&self, protocol: &str, pool: Option<&str>) -> Result<Option<VolumeData>, CacheError> {
        let pool_key = pool.unwrap_or("");
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                r#"
                SELECT volume_24h, volume_7d, volume_30d, concentration_risk, timestamp, expires_at
                FROM volume_data WHERE protocol = ?1 AND pool = ?2
                "#,
                params![protocol, pool_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((v24, v7, v30, concentration_risk, timestamp, expires_at)) = row else {
            return Ok(None);
        };

        if now_ms() > expires_at {
            conn.execute(
                "DELETE FROM volume_data WHERE protocol = ?1 AND pool = ?2",
                params![protocol, pool_key],
            )?;
            return Ok(None);
        }

        Ok(Some(VolumeData {
            protocol: protocol.to_string(),
            pool: pool.map(str::to_string),
            volume_24h: parse_decimal(&v24)?,
            volume_7d: parse_decimal(&v7)?,
            volume_30d: parse_decimal(&v30)?,
            concentration_risk,
            timestamp: from_ms(timestamp),
        }))
    }

    pub fn set_user_metrics(&self, metrics: &UserMetrics) -> Result<(), CacheError> {
        let expires_at = now_ms().saturating_add(duration_ms(USER_METRICS_TTL));
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO user_metrics
            (protocol, unique_users_24h, unique_users_7d, unique_users_30d, active_wallets,
             new_users, user_retention, timestamp, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                metrics.protocol,
                metrics.unique_users_24h as i64,
                metrics.unique_users_7d as i64,
                metrics.unique_users_30d as i64,
                metrics.active_wallets as i64,
                metrics.new_users as i64,
                metrics.user_retention,
                metrics.timestamp.timestamp_millis(),
                expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_user_metrics(&self, protocol: &str) -> Result<Option<UserMetrics>, CacheError> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                r#"
                SELECT unique_users_24h, unique_users_7d, unique_users_30d, active_wallets,
                       new_users, user_retention, timestamp, expires_at
                FROM user_metrics WHERE protocol = ?1
                "#,
                params![protocol],
                |row| {
                    Ok((
                        UserMetrics {
                            protocol: protocol.to_string(),
                            unique_users_24h: row.get::<_, i64>(0)?.max(0) as u64,
                            unique_users_7d: row.get::<_, i64>(1)?.max(0) as u64,
                            unique_users_30d: row.get::<_, i64>(2)?.max(0) as u64,
                            active_wallets: row.get::<_, i64>(3)?.max(0) as u64,
                            new_users: row.get::<_, i64>(4)?.max(0) as u64,
                            user_retention: row.get(5)?,
                            timestamp: from_ms(row.get(6)?),
                        },
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((_, expires_at)) if now_ms() > expires_at => {
                conn.execute("DELETE FROM user_metrics WHERE protocol = ?1", params![protocol])?;
                Ok(None)
            }
            Some((metrics, _)) => Ok(Some(metrics)),
            None => Ok(None),
        }
    }

    pub fn set_aggregated_metrics(&self, metrics: &AggregatedMetrics) -> Result<(), CacheError> {
        let expires_at = now_ms().saturating_add(duration_ms(AGGREGATED_METRICS_TTL));
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO aggregated_metrics
            (chain, total_volume_24h, total_volume_7d, total_volume_30d, total_users_24h,
             total_users_7d, total_users_30d, protocol_count, timestamp, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                metrics.chain,
                metrics.total_volume_24h.to_string(),
                metrics.total_volume_7d.to_string(),
                metrics.total_volume_30d.to_string(),
                metrics.total_users_24h as i64,
                metrics.total_users_7d as i64,
                metrics.total_users_30d as i64,
                metrics.protocol_count,
                metrics.timestamp.timestamp_millis(),
                expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_aggregated_metrics(&self, chain: &str) -> Result<Option<AggregatedMetrics>, CacheError> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                r#"
                SELECT total_volume_24h, total_volume_7d, total_volume_30d, total_users_24h,
                       total_users_7d, total_users_30d, protocol_count, timestamp, expires_at
                FROM aggregated_metrics WHERE chain = ?1
                "#,
                params![chain],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((v24, v7, v30, u24, u7, u30, protocol_count, timestamp, expires_at)) = row else {
            return Ok(None);
        };

        if now_ms() > expires_at {
            conn.execute("DELETE FROM aggregated_metrics WHERE chain = ?1", params![chain])?;
            return Ok(None);
        }

        Ok(Some(AggregatedMetrics {
            chain: chain.to_string(),
            total_volume_24h: parse_decimal(&v24)?,
            total_volume_7d: parse_decimal(&v7)?,
            total_volume_30d: parse_decimal(&v30)?,
            total_users_24h: u24.max(0) as u64,
            total_users_7d: u7.max(0) as u64,
            total_users_30d: u30.max(0) as u64,
            protocol_count,
            timestamp: from_ms(timestamp),
        }))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every expired row across all tables. Returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let now = now_ms();
        let conn = self.conn.lock();

        let mut removed = 0;
        for table in ["cache_entries", "volume_data", "user_metrics", "aggregated_metrics"] {
            let sql = format!("DELETE FROM {} WHERE expires_at < ?1", table);
            removed += conn.execute(&sql, params![now])?;
        }

        if removed > 0 {
            info!("Removed {} expired cache rows", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = now_ms();
        let conn = self.conn.lock();

        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at < ?1",
            params![now],
            |row| row.get(0),
        )?;
        let hits: i64 = conn.query_row(
            "SELECT COALESCE(SUM(access_count), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        Ok(CacheStats {
            total_entries: Self::count(&conn, "cache_entries")?,
            expired_entries: expired.max(0) as usize,
            volume_rows: Self::count(&conn, "volume_data")?,
            user_metric_rows: Self::count(&conn, "user_metrics")?,
            aggregated_rows: Self::count(&conn, "aggregated_metrics")?,
            total_hits: hits.max(0) as u64,
            max_entries: self.config.max_entries,
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn parse_decimal(s: &str) -> Result<Decimal, CacheError> {
    Decimal::from_str(s).map_err(|e| CacheError::Serialization(format!("{}: {}", s, e)))
}

/// Errors from cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}
