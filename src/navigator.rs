//! Keyboard-driven chart navigation: symbol search, timeframe entry and the
//! "go to date/time" dialog.

use std::time::Duration;

use tracing::info;

use crate::browser::{Target, Ui};

pub const SEARCH_INPUT: Target = Target::css("input[type='search']");
pub const CHART_CANVAS: Target = Target::css("canvas[data-name='pane-top-canvas']");
pub const GOTO_DATE_INPUT: Target = Target::css("input[data-qa-id='ui-lib-Input-input']");
pub const GOTO_TIME_INPUT: Target = GOTO_DATE_INPUT.nth(1);
pub const GOTO_BUTTON: Target = Target::css("button").with_text("Go to");
/// Opens on the first digit typed over the chart; Enter applies and closes it.
pub const INTERVAL_DIALOG: Target = Target::css("div[data-dialog-name='change-interval-dialog']");

const SEARCH_SHORTCUT: &str = "Control+K";
const GOTO_SHORTCUT: &str = "Alt+G";
const GOTO_BUTTON_WAIT: Duration = Duration::from_secs(2);

/// Open the symbol search, enter `symbol` and confirm. Whether the site
/// recognises the symbol is not checked.
pub async fn search_symbol(ui: &Ui<'_>, symbol: &str) -> anyhow::Result<()> {
    info!(symbol, "Searching for symbol");
    ui.press(SEARCH_SHORTCUT).await?;
    ui.wait_visible(&SEARCH_INPUT).await?;
    ui.fill(&SEARCH_INPUT, symbol).await?;
    ui.press("Enter").await?;
    ui.wait_hidden(&SEARCH_INPUT).await?;
    info!(symbol, "Symbol selected");
    Ok(())
}

/// Type the timeframe one key at a time (the site's timeframe shortcut
/// takes digit-by-digit input), then confirm with Enter.
pub async fn set_timeframe(ui: &Ui<'_>, timeframe: &str) -> anyhow::Result<()> {
    info!(timeframe, "Setting timeframe");
    for (i, key) in timeframe.chars().enumerate() {
        ui.press(&key.to_string()).await?;
        if i == 0 {
            ui.wait_visible(&INTERVAL_DIALOG).await?;
        }
    }
    ui.press("Enter").await?;
    ui.wait_hidden(&INTERVAL_DIALOG).await?;
    ui.wait_stable(&CHART_CANVAS).await?;
    info!(timeframe, "Timeframe set");
    Ok(())
}

/// Move the chart to a date and/or time through the go-to dialog. Each part
/// opens the dialog on its own; the date goes in the first field, the time
/// in the second.
pub async fn go_to_date_time(
    ui: &Ui<'_>,
    date: Option<&str>,
    time: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(date) = date {
        info!(date, "Going to date");
        ui.press(GOTO_SHORTCUT).await?;
        ui.wait_visible(&GOTO_DATE_INPUT).await?;
        ui.fill(&GOTO_DATE_INPUT, date).await?;
        ui.press("Enter").await?;
        ui.wait_hidden(&GOTO_DATE_INPUT).await?;
    }

    if let Some(time) = time {
        info!(time, "Going to time");
        ui.press(GOTO_SHORTCUT).await?;
        ui.wait_visible(&GOTO_TIME_INPUT).await?;
        ui.fill(&GOTO_TIME_INPUT, time).await?;

        let button_wait = ui.timeout().min(GOTO_BUTTON_WAIT);
        if ui.appears_within(&GOTO_BUTTON, button_wait).await? {
            ui.click(&GOTO_BUTTON).await?;
        } else {
            ui.press("Enter").await?;
        }
        ui.wait_hidden(&GOTO_TIME_INPUT).await?;
    }

    ui.wait_stable(&CHART_CANVAS).await?;
    info!(
        date = date.unwrap_or(""),
        time = time.unwrap_or(""),
        "Chart moved"
    );
    Ok(())
}
