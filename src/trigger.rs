//! File-backed store for the most recent chart trigger.
//!
//! The dispatch endpoint writes the request body verbatim; an automation run
//! reads it back exactly once. Only `jwt_token` is required, everything else
//! falls back to configured defaults or is skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::TriggerConfig;

/// The only trigger source allowed to start a run.
pub const CLICK_SOURCE: &str = "click";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to read trigger file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write trigger file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("trigger file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no jwt_token found in trigger data")]
    MissingToken,
}

/// A price as sent by the frontend: either a JSON number or a string.
/// Kept verbatim so labels and price fields get exactly what was clicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Number(n) => write!(f, "{}", n),
            Price::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRecord {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub jwt_token: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub trendline_color: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
}

impl TriggerRecord {
    pub fn is_click(&self) -> bool {
        self.source.as_deref() == Some(CLICK_SOURCE)
    }

    /// The bearer token for the profile service. Empty counts as missing.
    pub fn token(&self) -> Result<&str, TriggerError> {
        match self.jwt_token.as_deref() {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => Err(TriggerError::MissingToken),
        }
    }

    pub fn effective_symbol<'a>(&'a self, defaults: &'a TriggerConfig) -> &'a str {
        self.symbol.as_deref().unwrap_or(&defaults.default_symbol)
    }

    pub fn effective_timeframe<'a>(&'a self, defaults: &'a TriggerConfig) -> &'a str {
        self.timeframe.as_deref().unwrap_or(&defaults.default_timeframe)
    }

    /// Both ends of the trend line, or `None` when either is missing.
    pub fn time_range(&self) -> Option<(&str, &str)> {
        match (self.start_time.as_deref(), self.end_time.as_deref()) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => {
                Some((start, end))
            }
            _ => None,
        }
    }
}

/// Reads and writes the trigger file at a fixed path.
#[derive(Debug, Clone)]
pub struct TriggerStore {
    path: PathBuf,
}

impl TriggerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the raw request body, pretty-printed, replacing any previous trigger.
    pub async fn write_raw(&self, body: &Value) -> Result<(), TriggerError> {
        let write_err = |source| TriggerError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }
        let text = serde_json::to_string_pretty(body).map_err(|e| TriggerError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        tokio::fs::write(&self.path, text).await.map_err(write_err)?;
        info!(path = %self.path.display(), "Trigger data saved");
        Ok(())
    }

    /// Load the current trigger and check that it carries a token.
    pub async fn load(&self) -> Result<TriggerRecord, TriggerError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TriggerError::Read {
                path: self.path.clone(),
                source,
            })?;
        let record: TriggerRecord =
            serde_json::from_str(&text).map_err(|source| TriggerError::Parse {
                path: self.path.clone(),
                source,
            })?;
        record.token()?;
        info!(
            symbol = record.symbol.as_deref().unwrap_or("-"),
            timeframe = record.timeframe.as_deref().unwrap_or("-"),
            "Trigger data loaded"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> TriggerConfig {
        TriggerConfig::default()
    }

    #[test]
    fn test_missing_symbol_and_timeframe_use_defaults() {
        let record: TriggerRecord =
            serde_json::from_value(json!({"source": "click", "jwt_token": "t"})).unwrap();
        let cfg = defaults();
        assert_eq!(record.effective_symbol(&cfg), "GOLD");
        assert_eq!(record.effective_timeframe(&cfg), "5");
    }

    #[test]
    fn test_explicit_symbol_and_timeframe_win() {
        let record: TriggerRecord = serde_json::from_value(json!({
            "jwt_token": "t",
            "symbol": "BTCUSD",
            "timeframe": "15"
        }))
        .unwrap();
        let cfg = defaults();
        assert_eq!(record.effective_symbol(&cfg), "BTCUSD");
        assert_eq!(record.effective_timeframe(&cfg), "15");
    }

    #[test]
    fn test_null_fields_count_as_missing() {
        let record: TriggerRecord = serde_json::from_value(json!({
            "jwt_token": "t",
            "symbol": null,
            "price": null
        }))
        .unwrap();
        assert_eq!(record.effective_symbol(&defaults()), "GOLD");
        assert!(record.price.is_none());
    }

    #[test]
    fn test_price_keeps_number_or_text_verbatim() {
        let record: TriggerRecord =
            serde_json::from_value(json!({"jwt_token": "t", "price": 2345.5})).unwrap();
        assert_eq!(record.price.unwrap().to_string(), "2345.5");

        let record: TriggerRecord =
            serde_json::from_value(json!({"jwt_token": "t", "price": "101.25"})).unwrap();
        assert_eq!(record.price.unwrap().to_string(), "101.25");
    }

    #[test]
    fn test_time_range_requires_both_ends() {
        let mut record = TriggerRecord {
            start_time: Some("2024-03-01 09:15".into()),
            ..Default::default()
        };
        assert!(record.time_range().is_none());
        record.end_time = Some("2024-03-01 10:00".into());
        assert_eq!(
            record.time_range(),
            Some(("2024-03-01 09:15", "2024-03-01 10:00"))
        );
    }

    #[test]
    fn test_is_click() {
        let mut record = TriggerRecord::default();
        assert!(!record.is_click());
        record.source = Some("other".into());
        assert!(!record.is_click());
        record.source = Some("click".into());
        assert!(record.is_click());
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TriggerStore::new(dir.path().join("nested").join("trigger_data.json"));
        let body = json!({
            "source": "click",
            "jwt_token": "abc",
            "symbol": "GOLD",
            "extra": {"kept": true}
        });
        store.write_raw(&body).await.unwrap();

        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(on_disk.contains('\n'), "trigger file should be pretty-printed");
        let reparsed: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(reparsed, body);

        let record = store.load().await.unwrap();
        assert_eq!(record.token().unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_load_missing_token_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TriggerStore::new(dir.path().join("t.json"));
        store
            .write_raw(&json!({"source": "click", "jwt_token": ""}))
            .await
            .unwrap();
        assert!(matches!(store.load().await, Err(TriggerError::MissingToken)));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TriggerStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load().await, Err(TriggerError::Read { .. })));
    }

    #[tokio::test]
    async fn test_load_malformed_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = TriggerStore::new(path);
        assert!(matches!(store.load().await, Err(TriggerError::Parse { .. })));
    }
}
