//! Checkpoint store
//!
//! Checkpoints live in the human-editable settings area, so every value is a
//! string and may have been touched by hand. Reads go through typed accessors
//! that fall back to a default on blank or unparsable input; writes go
//! through [`SettingValue`] so the stored text is always canonical.
//!
//! Physical row positions are cached in the [`InvocationContext`]: the
//! settings area is scanned once per invocation, after which every read and
//! write addresses its row directly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::database::Database;
use crate::error::DbError;
use crate::models::{keys, Checkpoint, CheckpointTrack};
use crate::sync::context::InvocationContext;

/// Key → physical row cache, filled by one scan per invocation
#[derive(Debug, Default)]
pub struct PositionCache {
    rows: HashMap<(String, String), i64>,
    scanned: bool,
    scans: u32,
}

impl PositionCache {
    /// Number of full scans performed
    pub fn scans(&self) -> u32 {
        self.scans
    }

    fn get(&self, scope_id: &str, key: &str) -> Option<i64> {
        self.rows
            .get(&(scope_id.to_string(), key.to_string()))
            .copied()
    }

    fn insert(&mut self, scope_id: &str, key: &str, id: i64) {
        self.rows.insert((scope_id.to_string(), key.to_string()), id);
    }

    fn forget(&mut self, scope_id: &str, key: &str) {
        self.rows.remove(&(scope_id.to_string(), key.to_string()));
    }
}

/// Canonical string encoding of a setting value
pub trait SettingValue {
    /// Render for storage
    fn to_setting(&self) -> String;
}

impl SettingValue for i64 {
    fn to_setting(&self) -> String {
        self.to_string()
    }
}

impl SettingValue for bool {
    fn to_setting(&self) -> String {
        let text = if *self { "true" } else { "false" };
        text.to_string()
    }
}

impl SettingValue for str {
    fn to_setting(&self) -> String {
        self.to_string()
    }
}

impl SettingValue for String {
    fn to_setting(&self) -> String {
        self.clone()
    }
}

impl SettingValue for DateTime<Utc> {
    fn to_setting(&self) -> String {
        self.to_rfc3339()
    }
}

/// Typed access to per-scope settings
#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<dyn Database>,
}

impl CheckpointStore {
    /// Create a store on top of the database
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Fill the position cache if this invocation has not scanned yet
    async fn ensure_scanned(&self, ctx: &mut InvocationContext) -> Result<(), DbError> {
        if ctx.positions.scanned {
            return Ok(());
        }

        let entries = self.db.scan_settings().await?;
        debug!(entries = entries.len(), "Scanned settings area");
        for entry in entries {
            ctx.positions.insert(&entry.scope_id, &entry.key, entry.id);
        }
        ctx.positions.scanned = true;
        ctx.positions.scans += 1;
        Ok(())
    }

    /// Raw value, None when absent
    pub async fn get_raw(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
    ) -> Result<Option<String>, DbError> {
        self.ensure_scanned(ctx).await?;

        if let Some(id) = ctx.positions.get(scope_id, key) {
            match self.db.read_setting_at(id).await? {
                Some(value) => return Ok(Some(value)),
                // Row removed by hand since the scan
                None => ctx.positions.forget(scope_id, key),
            }
        }

        // Key may have been created by another invocation after our scan
        match self.db.find_setting(scope_id, key).await? {
            Some(entry) => {
                ctx.positions.insert(scope_id, key, entry.id);
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    /// String value; blank or absent gives `default`
    pub async fn get_string(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
        default: &str,
    ) -> Result<String, DbError> {
        Ok(self
            .get_raw(ctx, scope_id, key)
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Integer value; blank, absent or unparsable gives `default`
    pub async fn get_i64(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
        default: i64,
    ) -> Result<i64, DbError> {
        Ok(self
            .get_raw(ctx, scope_id, key)
            .await?
            .and_then(|v| parse_i64(&v))
            .unwrap_or(default))
    }

    /// Boolean value; blank, absent or unparsable gives `default`
    pub async fn get_bool(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
        default: bool,
    ) -> Result<bool, DbError> {
        Ok(self
            .get_raw(ctx, scope_id, key)
            .await?
            .and_then(|v| parse_bool(&v))
            .unwrap_or(default))
    }

    /// Timestamp value, normalized to UTC
    pub async fn get_timestamp(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self
            .get_raw(ctx, scope_id, key)
            .await?
            .and_then(|v| parse_timestamp(&v)))
    }

    /// Write a value
    pub async fn set<V: SettingValue + ?Sized>(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        key: &str,
        value: &V,
    ) -> Result<(), DbError> {
        self.ensure_scanned(ctx).await?;
        let value = value.to_setting();

        if let Some(id) = ctx.positions.get(scope_id, key) {
            if self.db.write_setting_at(id, &value).await? {
                return Ok(());
            }
            ctx.positions.forget(scope_id, key);
        }

        let id = self.db.upsert_setting(scope_id, key, &value).await?;
        ctx.positions.insert(scope_id, key, id);
        Ok(())
    }

    /// Typed checkpoint for a scope on a track
    pub async fn load(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        track: CheckpointTrack,
    ) -> Result<Checkpoint, DbError> {
        let defaults = Checkpoint::default();

        Ok(Checkpoint {
            cursor: self
                .get_i64(ctx, scope_id, &track.key(keys::CURSOR), defaults.cursor)
                .await?,
            total_units: self
                .get_i64(ctx, scope_id, &track.key(keys::TOTAL_UNITS), defaults.total_units)
                .await?,
            total_records: self
                .get_i64(
                    ctx,
                    scope_id,
                    &track.key(keys::TOTAL_RECORDS),
                    defaults.total_records,
                )
                .await?,
            completed: self
                .get_bool(ctx, scope_id, &track.key(keys::COMPLETED), false)
                .await?,
            tail_dirty: self
                .get_bool(ctx, scope_id, &track.key(keys::TAIL_DIRTY), false)
                .await?,
            last_sync: self
                .get_timestamp(ctx, scope_id, &track.key(keys::LAST_SYNC))
                .await?,
        })
    }

    /// Create the checkpoint at cursor -1 if it has never been written
    pub async fn initialize(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        track: CheckpointTrack,
    ) -> Result<(), DbError> {
        let key = track.key(keys::CURSOR);
        if self.get_raw(ctx, scope_id, &key).await?.is_none() {
            self.set(ctx, scope_id, &key, &-1i64).await?;
        }
        Ok(())
    }

    /// Clear a track back to NOT_STARTED
    pub async fn reset(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        track: CheckpointTrack,
    ) -> Result<(), DbError> {
        self.set(ctx, scope_id, &track.key(keys::CURSOR), &-1i64)
            .await?;
        self.set(ctx, scope_id, &track.key(keys::TOTAL_UNITS), &-1i64)
            .await?;
        self.set(ctx, scope_id, &track.key(keys::TOTAL_RECORDS), &-1i64)
            .await?;
        self.set(ctx, scope_id, &track.key(keys::COMPLETED), &false)
            .await?;
        self.set(ctx, scope_id, &track.key(keys::TAIL_DIRTY), &false)
            .await?;
        self.set(ctx, scope_id, &track.key(keys::LAST_SYNC), "")
            .await?;
        Ok(())
    }
}

/// Parse an integer, accepting float artifacts such as `3.0`
pub fn parse_i64(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Parse a boolean flag
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a timestamp in any of the formats the store may hold
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and Unix epoch
/// seconds or milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        // Anything past the year 2286 in seconds is taken as milliseconds
        return if epoch.abs() >= 10_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    None
}
