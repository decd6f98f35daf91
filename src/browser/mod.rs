//! The seam between the chart automation and a real browser.
//!
//! Everything the automation does to the charting site goes through
//! [`ChartPage`]: key chords, text insertion, element lookup by selector and
//! mouse clicks. [`Ui`] layers bounded, polled waits on top so no step
//! depends on a fixed sleep.

pub mod chromium;

use std::fmt;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::AutomationConfig;

pub use chromium::{BrowserSession, ChromiumPage};

/// An element on the page: CSS selector, optional required text content and
/// the index among matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub css: &'static str,
    pub text: Option<&'static str>,
    pub nth: usize,
}

impl Target {
    pub const fn css(css: &'static str) -> Self {
        Self {
            css,
            text: None,
            nth: 0,
        }
    }

    /// Match only elements whose rendered text contains `text`.
    pub const fn with_text(self, text: &'static str) -> Self {
        Self {
            text: Some(text),
            ..self
        }
    }

    pub const fn nth(self, nth: usize) -> Self {
        Self { nth, ..self }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.css)?;
        if let Some(text) = self.text {
            write!(f, " (text \"{}\")", text)?;
        }
        if self.nth > 0 {
            write!(f, " #{}", self.nth)?;
        }
        Ok(())
    }
}

/// Viewport-relative box of a visible element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[async_trait]
pub trait ChartPage: Send + Sync {
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    /// Press a key chord such as `Control+K`, `Alt+G`, `Enter` or `5`.
    async fn press(&self, chord: &str) -> anyhow::Result<()>;

    /// Type text into whatever currently has focus.
    async fn insert_text(&self, text: &str) -> anyhow::Result<()>;

    /// Box of the target when it exists and is rendered, `None` otherwise.
    async fn bounding_box(&self, target: &Target) -> anyhow::Result<Option<Rect>>;

    async fn click_at(&self, x: f64, y: f64) -> anyhow::Result<()>;

    async fn is_visible(&self, target: &Target) -> anyhow::Result<bool> {
        Ok(self.bounding_box(target).await?.is_some())
    }

    /// Click the centre of the target.
    async fn click(&self, target: &Target) -> anyhow::Result<()> {
        let Some(rect) = self.bounding_box(target).await? else {
            bail!("Element '{}' is not visible", target);
        };
        let (x, y) = rect.center();
        self.click_at(x, y).await
    }

    async fn close(&self) -> anyhow::Result<()>;
}

/// A page plus the polling policy used for every wait.
pub struct Ui<'a> {
    page: &'a dyn ChartPage,
    poll: Duration,
    timeout: Duration,
}

impl<'a> Ui<'a> {
    pub fn new(page: &'a dyn ChartPage, config: &AutomationConfig) -> Self {
        Self {
            page,
            poll: config.poll_interval(),
            timeout: config.element_timeout(),
        }
    }

    pub fn page(&self) -> &'a dyn ChartPage {
        self.page
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same page and poll interval, different default timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Ui<'a> {
        Ui {
            page: self.page,
            poll: self.poll,
            timeout,
        }
    }

    pub async fn press(&self, chord: &str) -> anyhow::Result<()> {
        self.page.press(chord).await
    }

    pub async fn insert_text(&self, text: &str) -> anyhow::Result<()> {
        self.page.insert_text(text).await
    }

    pub async fn click_at(&self, x: f64, y: f64) -> anyhow::Result<()> {
        self.page.click_at(x, y).await
    }

    /// Poll until the target is rendered, failing after the timeout.
    pub async fn wait_visible(&self, target: &Target) -> anyhow::Result<Rect> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(rect) = self.page.bounding_box(target).await? {
                return Ok(rect);
            }
            if Instant::now() >= deadline {
                bail!(
                    "Timeout: element '{}' not visible after {}ms",
                    target,
                    self.timeout.as_millis()
                );
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    pub async fn wait_hidden(&self, target: &Target) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if !self.page.is_visible(target).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "Timeout: element '{}' still visible after {}ms",
                    target,
                    self.timeout.as_millis()
                );
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Wait until the target's box is identical on two consecutive polls.
    pub async fn wait_stable(&self, target: &Target) -> anyhow::Result<Rect> {
        let deadline = Instant::now() + self.timeout;
        let mut last: Option<Rect> = None;
        loop {
            let current = self.page.bounding_box(target).await?;
            if let (Some(prev), Some(now)) = (last, current) {
                if prev == now {
                    return Ok(now);
                }
            }
            if Instant::now() >= deadline {
                bail!(
                    "Timeout: element '{}' did not settle after {}ms",
                    target,
                    self.timeout.as_millis()
                );
            }
            last = current;
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Whether the target becomes visible within `within`. Never errors on timeout.
    pub async fn appears_within(&self, target: &Target, within: Duration) -> anyhow::Result<bool> {
        match self.with_timeout(within).wait_visible(target).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn click(&self, target: &Target) -> anyhow::Result<()> {
        self.wait_visible(target).await?;
        self.page.click(target).await
    }

    /// Replace the contents of an input: click it, select all, delete, type.
    pub async fn fill(&self, target: &Target, text: &str) -> anyhow::Result<()> {
        self.click(target).await?;
        self.page.press("Control+A").await?;
        self.page.press("Backspace").await?;
        self.page.insert_text(text).await
    }
}
