//! One automation run: trigger → credentials → logged-in session → symbol,
//! timeframe and trend line → pause → close.
//!
//! Only data errors, credential errors and session errors end a run early.
//! Chart steps that fail are logged and the run moves on to the next one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::browser::Ui;
use crate::config::AppConfig;
use crate::credentials::CredentialFetcher;
use crate::drafter::{draw_trendline_between, TrendlineSpec};
use crate::navigator::{search_symbol, set_timeframe};
use crate::session::ensure_logged_in_session;
use crate::trigger::{TriggerRecord, TriggerStore};

/// What happens between drawing and closing the browser.
#[derive(Debug, Clone, Copy)]
pub enum Pause {
    /// Block until a human presses Enter on stdin.
    UntilEnter,
    /// Keep the browser open for a fixed time (zero closes right away).
    For(Duration),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub symbol: String,
    pub timeframe: String,
    pub trendline_label: Option<String>,
    pub trendline_drawn: bool,
    /// Steps that failed without stopping the run.
    pub step_failures: Vec<String>,
}

/// Executes a run for a trigger. The job worker depends on this seam.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, record: TriggerRecord) -> anyhow::Result<RunSummary>;
}

/// The real executor: drives Chromium against the charting site.
pub struct BrowserExecutor {
    config: Arc<AppConfig>,
    pause: Pause,
}

impl BrowserExecutor {
    pub fn new(config: Arc<AppConfig>, pause: Pause) -> Self {
        Self { config, pause }
    }
}

#[async_trait]
impl RunExecutor for BrowserExecutor {
    async fn execute(&self, record: TriggerRecord) -> anyhow::Result<RunSummary> {
        run_once(&self.config, &record, self.pause).await
    }
}

/// Read the trigger file and run once. Used by the `run` command.
pub async fn run_from_trigger_file(config: &AppConfig, pause: Pause) -> anyhow::Result<RunSummary> {
    let store = TriggerStore::new(&config.trigger.path);
    let record = store.load().await?;
    run_once(config, &record, pause).await
}

pub async fn run_once(
    config: &AppConfig,
    record: &TriggerRecord,
    pause: Pause,
) -> anyhow::Result<RunSummary> {
    let token = record.token()?;

    let fetcher = CredentialFetcher::new(&config.profile_service)?;
    let credentials = fetcher.fetch(token).await?;

    info!("Opening charting site");
    let session = ensure_logged_in_session(
        &config.browser,
        &config.automation,
        &config.browser.user_data_dir,
        &credentials,
    )
    .await?;

    let summary = {
        let ui = Ui::new(session.page(), &config.automation);
        drive_chart(&ui, config, record).await
    };

    info!("Chart is ready for manual use");
    hold(pause).await;
    session.close().await;
    Ok(summary)
}

/// The chart steps of a run, on an already logged-in page.
pub async fn drive_chart(ui: &Ui<'_>, config: &AppConfig, record: &TriggerRecord) -> RunSummary {
    let symbol = record.effective_symbol(&config.trigger).to_string();
    let timeframe = record.effective_timeframe(&config.trigger).to_string();
    let mut summary = RunSummary {
        symbol: symbol.clone(),
        timeframe: timeframe.clone(),
        ..Default::default()
    };

    if let Err(e) = search_symbol(ui, &symbol).await {
        error!(symbol = %symbol, error = %e, "Symbol search failed");
        summary.step_failures.push(format!("symbol search: {}", e));
    }

    if let Err(e) = set_timeframe(ui, &timeframe).await {
        error!(timeframe = %timeframe, error = %e, "Timeframe setting failed");
        summary.step_failures.push(format!("timeframe: {}", e));
    }

    let Some((start, end)) = record.time_range() else {
        warn!("No start_time/end_time provided, skipping trend line");
        return summary;
    };

    let price = record.price.as_ref().map(|p| p.to_string());
    match draw_trendline_between(
        ui,
        start,
        end,
        record.trendline_color.as_deref(),
        price.as_deref(),
        config.automation.click_offset_x,
    )
    .await
    {
        Ok(spec) => {
            let TrendlineSpec { label, .. } = spec;
            summary.trendline_drawn = true;
            summary.trendline_label = label;
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to draw trend line");
            summary.step_failures.push(format!("trend line: {:#}", e));
        }
    }

    summary
}

async fn hold(pause: Pause) {
    match pause {
        Pause::UntilEnter => {
            println!("Press Enter to close the browser...");
            let mut line = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = stdin.read_line(&mut line).await {
                warn!("Failed to read stdin: {}", e);
            }
        }
        Pause::For(duration) if !duration.is_zero() => {
            info!(secs = duration.as_secs(), "Holding browser open");
            tokio::time::sleep(duration).await;
        }
        Pause::For(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::SEARCH_INPUT;
    use crate::testing::{fast_automation_config, Action, FakePage};
    use serde_json::json;

    fn config() -> AppConfig {
        AppConfig {
            automation: fast_automation_config(),
            ..Default::default()
        }
    }

    fn record(value: serde_json::Value) -> TriggerRecord {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_used_when_symbol_and_timeframe_missing() {
        let page = FakePage::chart_site();
        let cfg = config();
        let ui = Ui::new(&page, &cfg.automation);
        let summary = drive_chart(&ui, &cfg, &record(json!({"jwt_token": "t"}))).await;

        assert_eq!(summary.symbol, "GOLD");
        assert_eq!(summary.timeframe, "5");
        assert!(page.actions().contains(&Action::Insert("GOLD".into())));
        assert!(!summary.trendline_drawn);
        assert!(summary.step_failures.is_empty());
    }

    #[tokio::test]
    async fn test_full_chart_pass() {
        let page = FakePage::chart_site();
        let cfg = config();
        let ui = Ui::new(&page, &cfg.automation);
        let summary = drive_chart(
            &ui,
            &cfg,
            &record(json!({
                "jwt_token": "t",
                "symbol": "XAUUSD",
                "timeframe": "15",
                "start_time": "2024-03-01 09:15",
                "end_time": "2024-03-01 11:00",
                "trendline_color": "#00FF00",
                "price": 2031.4
            })),
        )
        .await;

        assert!(summary.trendline_drawn);
        assert_eq!(summary.trendline_label.as_deref(), Some("low/2031.4"));
        assert!(summary.step_failures.is_empty());
    }

    #[tokio::test]
    async fn test_symbol_failure_does_not_stop_run() {
        let page = FakePage::chart_site().failing(SEARCH_INPUT);
        let cfg = config();
        let ui = Ui::new(&page, &cfg.automation);
        let summary = drive_chart(
            &ui,
            &cfg,
            &record(json!({"jwt_token": "t", "timeframe": "60"})),
        )
        .await;

        assert_eq!(summary.step_failures.len(), 1);
        assert!(summary.step_failures[0].starts_with("symbol search"));
        let presses = page.presses();
        assert!(presses.ends_with(&["6".to_string(), "0".to_string(), "Enter".to_string()]));
    }

    #[tokio::test]
    async fn test_run_without_token_fails_before_network() {
        let cfg = config();
        let err = run_once(&cfg, &record(json!({"source": "click"})), Pause::For(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("jwt_token"));
    }

    #[tokio::test]
    async fn test_run_from_missing_trigger_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.trigger.path = dir.path().join("none.json").display().to_string();
        assert!(run_from_trigger_file(&cfg, Pause::For(Duration::ZERO))
            .await
            .is_err());
    }
}
