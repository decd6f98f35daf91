//! Trend-line drawing between two chart timestamps, plus the settings dialog
//! pass that sets its colour, label and price coordinates.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::browser::{Rect, Target, Ui};
use crate::navigator::{go_to_date_time, CHART_CANVAS};

pub const TREND_LINE_SHORTCUT: &str = "Alt+T";
/// The trend-line button in the left toolbar once the tool is armed.
pub const TREND_TOOL_ACTIVE: Target =
    Target::css("div[data-name='linetool-group-trend-line'] [class*='isActive']");
pub const SETTINGS_BUTTON: Target =
    Target::css("div.floating-toolbar-react-widgets__button[data-name='settings']");
pub const STYLE_TAB: Target =
    Target::css("button#style, [data-id='source-properties-editor-tabs-style']");
pub const COLOR_SWATCH: Target = Target::css("div[class*='swatch-']");
pub const CUSTOM_COLOR_BUTTON: Target = Target::css("button[class*='customButton-']");
pub const ADD_COLOR_BUTTON: Target = Target::css("button[class*='primary-']").with_text("Add");
pub const TEXT_TAB: Target =
    Target::css("button#text, [data-id='source-properties-editor-tabs-text']");
pub const LABEL_TEXTAREA: Target = Target::css("textarea[class*='textarea-']");
pub const COORDINATES_TAB: Target =
    Target::css("button#coordinates, [data-id='source-properties-editor-tabs-coordinates']");
pub const PRICE_INPUT: Target = Target::css("input[name='y-input']");
pub const OK_BUTTON: Target = Target::css("button").with_text("Ok");

const TRIGGER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const TOOL_ARM_WAIT: Duration = Duration::from_secs(1);
const TOOLBAR_WAIT: Duration = Duration::from_secs(1);

/// Which candle price a trend line marks, encoded in its colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Open,
    Close,
    High,
    Low,
}

impl SemanticType {
    /// `#000000` open, `#FFA500` close, `#FF0000` high, `#00FF00` low;
    /// anything else (or no colour) is open.
    pub fn from_color(color_hex: Option<&str>) -> Self {
        match color_hex.map(|c| c.trim().to_ascii_uppercase()).as_deref() {
            Some("#FFA500") => SemanticType::Close,
            Some("#FF0000") => SemanticType::High,
            Some("#00FF00") => SemanticType::Low,
            _ => SemanticType::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Open => "open",
            SemanticType::Close => "close",
            SemanticType::High => "high",
            SemanticType::Low => "low",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"<semantic-type>/<price>"`, the text shown on the line.
pub fn compose_label(color_hex: Option<&str>, price: &str) -> String {
    format!("{}/{}", SemanticType::from_color(color_hex), price)
}

/// What ended up on the chart.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendlineSpec {
    pub start_point: (f64, f64),
    pub end_point: (f64, f64),
    pub color_hex: Option<String>,
    pub label: Option<String>,
    pub price: Option<String>,
}

/// A trigger timestamp split the way the go-to dialog wants it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChartMoment {
    date: String,
    time: String,
}

fn parse_moment(raw: &str) -> anyhow::Result<ChartMoment> {
    let dt = NaiveDateTime::parse_from_str(raw.trim(), TRIGGER_TIME_FORMAT)
        .with_context(|| format!("Invalid time '{}', expected YYYY-MM-DD HH:MM", raw))?;
    Ok(ChartMoment {
        date: dt.format("%Y-%m-%d").to_string(),
        time: dt.format("%H:%M").to_string(),
    })
}

/// Canvas centre shifted right by `offset_x`; halves are floored.
pub fn endpoint_for(canvas: &Rect, offset_x: f64) -> (f64, f64) {
    (
        canvas.x + (canvas.width / 2.0).floor() + offset_x,
        canvas.y + (canvas.height / 2.0).floor(),
    )
}

/// Draw a trend line from `start` to `end` and style it.
///
/// The chart is moved to `start` before the first click and to `end` before
/// the second; swapping them inverts the line. The first failing step ends
/// the whole operation and nothing already placed is undone.
pub async fn draw_trendline_between(
    ui: &Ui<'_>,
    start: &str,
    end: &str,
    color_hex: Option<&str>,
    price: Option<&str>,
    offset_x: f64,
) -> anyhow::Result<TrendlineSpec> {
    let start = parse_moment(start)?;
    let end = parse_moment(end)?;
    info!(start = %format!("{} {}", start.date, start.time), end = %format!("{} {}", end.date, end.time), "Placing trend line");

    go_to_date_time(ui, Some(&start.date), Some(&start.time))
        .await
        .context("Failed to move chart to start time")?;

    ui.press(TREND_LINE_SHORTCUT).await?;
    let arm_wait = ui.timeout().min(TOOL_ARM_WAIT);
    if !ui.appears_within(&TREND_TOOL_ACTIVE, arm_wait).await? {
        warn!("Trend-line tool not shown as active, placing the line anyway");
    }

    let canvas = ui.wait_visible(&CHART_CANVAS).await?;
    let start_point = endpoint_for(&canvas, offset_x);
    ui.click_at(start_point.0, start_point.1).await?;

    go_to_date_time(ui, Some(&end.date), Some(&end.time))
        .await
        .context("Failed to move chart to end time")?;

    // the canvas can resize after navigating
    let canvas = ui.wait_visible(&CHART_CANVAS).await?;
    let end_point = endpoint_for(&canvas, offset_x);
    ui.click_at(end_point.0, end_point.1).await?;

    let label = style_trendline(ui, color_hex, end_point, price).await?;

    Ok(TrendlineSpec {
        start_point,
        end_point,
        color_hex: color_hex.map(str::to_string),
        label,
        price: price.map(str::to_string),
    })
}

/// Open the line's settings and apply colour, label and price coordinates.
/// Returns the label written, if any.
pub async fn style_trendline(
    ui: &Ui<'_>,
    color_hex: Option<&str>,
    anchor: (f64, f64),
    price: Option<&str>,
) -> anyhow::Result<Option<String>> {
    info!(
        color = color_hex.unwrap_or("-"),
        anchor_x = anchor.0,
        anchor_y = anchor.1,
        "Styling trend line"
    );

    // the floating toolbar only shows while the line is selected
    let toolbar_wait = ui.timeout().min(TOOLBAR_WAIT);
    if !ui.appears_within(&SETTINGS_BUTTON, toolbar_wait).await? {
        info!("Line toolbar not shown, re-selecting the line at its anchor");
        ui.click_at(anchor.0, anchor.1).await?;
    }
    ui.click(&SETTINGS_BUTTON).await?;
    ui.click(&STYLE_TAB).await?;

    if let Some(hex) = color_hex {
        ui.click(&COLOR_SWATCH).await?;
        ui.click(&CUSTOM_COLOR_BUTTON).await?;
        // the hex field takes focus when the custom colour form opens
        ui.press("Control+A").await?;
        ui.press("Backspace").await?;
        ui.insert_text(hex).await?;
        ui.click(&ADD_COLOR_BUTTON).await?;
        info!(color = hex, "Trend line colour set");
    }

    ui.click(&TEXT_TAB).await?;
    ui.wait_visible(&LABEL_TEXTAREA).await?;
    let label = match price {
        Some(price) => {
            let label = compose_label(color_hex, price);
            ui.fill(&LABEL_TEXTAREA, &label).await?;
            info!(label = %label, "Trend line text set");
            Some(label)
        }
        None => {
            ui.click(&LABEL_TEXTAREA).await?;
            None
        }
    };

    ui.click(&COORDINATES_TAB).await?;
    if let Some(price) = price {
        // both ends at the same price makes the line horizontal
        ui.fill(&PRICE_INPUT.nth(0), price).await?;
        ui.fill(&PRICE_INPUT.nth(1), price).await?;
    }

    ui.click(&OK_BUTTON).await?;
    info!("Trend line settings confirmed");
    Ok(label)
}
