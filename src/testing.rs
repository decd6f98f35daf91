//! Test infrastructure: a scripted in-memory [`ChartPage`].
//!
//! `FakePage` keeps a set of visible elements, flips visibility in response
//! to key presses and clicks, and records every action in order so tests can
//! assert on exact UI sequences.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::browser::{ChartPage, Rect, Target};
use crate::config::AutomationConfig;
use crate::drafter::{
    ADD_COLOR_BUTTON, COLOR_SWATCH, COORDINATES_TAB, CUSTOM_COLOR_BUTTON, LABEL_TEXTAREA,
    OK_BUTTON, PRICE_INPUT, SETTINGS_BUTTON, STYLE_TAB, TEXT_TAB, TREND_LINE_SHORTCUT,
    TREND_TOOL_ACTIVE,
};
use crate::navigator::{
    CHART_CANVAS, GOTO_DATE_INPUT, GOTO_TIME_INPUT, INTERVAL_DIALOG, SEARCH_INPUT,
};
use crate::session::PAGE_READY;

/// A recorded call against the fake page.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Goto(String),
    Press(String),
    Insert(String),
    Click(String),
    ClickAt(f64, f64),
    Close,
}

pub const DEFAULT_RECT: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 100.0,
    height: 40.0,
};

/// Identity used by the fake: selector, required text and, past the first
/// match, the index.
pub fn target_key(target: &Target) -> String {
    let mut key = target.css.to_string();
    if let Some(text) = target.text {
        key.push_str("::");
        key.push_str(text);
    }
    if target.nth > 0 {
        key.push_str(&format!("#{}", target.nth));
    }
    key
}

#[derive(Default)]
pub struct FakePage {
    visible: Mutex<HashSet<String>>,
    boxes: HashMap<String, Rect>,
    press_effects: HashMap<String, Vec<(String, bool)>>,
    click_effects: HashMap<String, Vec<(String, bool)>>,
    click_at_effects: Vec<((f64, f64), String, bool)>,
    failing: HashSet<String>,
    log: Mutex<Vec<Action>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The charting site with every static control rendered and overlays
    /// that open on their shortcuts and close on Enter.
    pub fn chart_site() -> Self {
        let mut page = Self::new()
            .with_box(
                CHART_CANVAS,
                Rect {
                    x: 0.0,
                    y: 80.0,
                    width: 1200.0,
                    height: 600.0,
                },
            )
            .on_press("Control+K", SEARCH_INPUT, true)
            .on_press("Enter", SEARCH_INPUT, false)
            .on_press("Alt+G", GOTO_DATE_INPUT, true)
            .on_press("Alt+G", GOTO_TIME_INPUT, true)
            .on_press("Enter", GOTO_DATE_INPUT, false)
            .on_press("Enter", GOTO_TIME_INPUT, false)
            .on_press("Enter", INTERVAL_DIALOG, false)
            .on_press(TREND_LINE_SHORTCUT, TREND_TOOL_ACTIVE, true);
        for digit in '0'..='9' {
            page = page.on_press(&digit.to_string(), INTERVAL_DIALOG, true);
        }
        for target in [
            PAGE_READY,
            CHART_CANVAS,
            SETTINGS_BUTTON,
            STYLE_TAB,
            COLOR_SWATCH,
            CUSTOM_COLOR_BUTTON,
            ADD_COLOR_BUTTON,
            TEXT_TAB,
            LABEL_TEXTAREA,
            COORDINATES_TAB,
            PRICE_INPUT,
            PRICE_INPUT.nth(1),
            OK_BUTTON,
        ] {
            page = page.show(target);
        }
        page
    }

    pub fn show(self, target: Target) -> Self {
        self.set_visible(&target_key(&target), true);
        self
    }

    pub fn with_box(mut self, target: Target, rect: Rect) -> Self {
        self.boxes.insert(target_key(&target), rect);
        self
    }

    /// Pressing `chord` shows (`true`) or hides (`false`) `target`.
    pub fn on_press(mut self, chord: &str, target: Target, visible: bool) -> Self {
        self.press_effects
            .entry(chord.to_string())
            .or_default()
            .push((target_key(&target), visible));
        self
    }

    /// Clicking `clicked` shows or hides `target`.
    pub fn on_click(mut self, clicked: Target, target: Target, visible: bool) -> Self {
        self.click_effects
            .entry(target_key(&clicked))
            .or_default()
            .push((target_key(&target), visible));
        self
    }

    /// Clicking at exactly (`x`, `y`) shows or hides `target`.
    pub fn on_click_at(mut self, x: f64, y: f64, target: Target, visible: bool) -> Self {
        self.click_at_effects
            .push(((x, y), target_key(&target), visible));
        self
    }

    /// Any lookup of `target` returns an error.
    pub fn failing(mut self, target: Target) -> Self {
        self.failing.insert(target_key(&target));
        self
    }

    pub fn hide(&self, target: Target) {
        self.set_visible(&target_key(&target), false);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.log.lock().unwrap().clone()
    }

    /// Only key presses, in order.
    pub fn presses(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Press(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    fn set_visible(&self, key: &str, visible: bool) {
        let mut set = self.visible.lock().unwrap();
        if visible {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    fn record(&self, action: Action) {
        self.log.lock().unwrap().push(action);
    }

    fn apply(&self, effects: Option<&Vec<(String, bool)>>) {
        for (key, visible) in effects.into_iter().flatten() {
            self.set_visible(key, *visible);
        }
    }
}

#[async_trait]
impl ChartPage for FakePage {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.record(Action::Goto(url.to_string()));
        Ok(())
    }

    async fn press(&self, chord: &str) -> anyhow::Result<()> {
        self.record(Action::Press(chord.to_string()));
        self.apply(self.press_effects.get(chord));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> anyhow::Result<()> {
        self.record(Action::Insert(text.to_string()));
        Ok(())
    }

    async fn bounding_box(&self, target: &Target) -> anyhow::Result<Option<Rect>> {
        let key = target_key(target);
        if self.failing.contains(&key) {
            anyhow::bail!("lookup of '{}' failed", target);
        }
        if !self.visible.lock().unwrap().contains(&key) {
            return Ok(None);
        }
        Ok(Some(self.boxes.get(&key).copied().unwrap_or(DEFAULT_RECT)))
    }

    async fn click_at(&self, x: f64, y: f64) -> anyhow::Result<()> {
        self.record(Action::ClickAt(x, y));
        for ((ex, ey), key, visible) in &self.click_at_effects {
            if *ex == x && *ey == y {
                self.set_visible(key, *visible);
            }
        }
        Ok(())
    }

    async fn click(&self, target: &Target) -> anyhow::Result<()> {
        let key = target_key(target);
        if !self.visible.lock().unwrap().contains(&key) {
            anyhow::bail!("Element '{}' is not visible", target);
        }
        self.record(Action::Click(key.clone()));
        self.apply(self.click_effects.get(&key));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.record(Action::Close);
        Ok(())
    }
}

/// Automation timings small enough for unit tests.
pub fn fast_automation_config() -> AutomationConfig {
    AutomationConfig {
        poll_interval_ms: 1,
        probe_timeout_ms: 20,
        element_timeout_ms: 20,
        navigation_timeout_ms: 20,
        login_timeout_ms: 20,
        click_offset_x: 60.0,
        hold_open_secs: 0,
    }
}
