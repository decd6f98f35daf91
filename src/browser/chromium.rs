use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeBrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::layout::Point;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{ChartPage, Rect, Target};
use crate::config::BrowserConfig;

/// A running Chromium bound to a persistent profile directory.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch (or re-open) the persistent profile at `profile_dir`.
    pub async fn launch(config: &BrowserConfig, profile_dir: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::tilde(profile_dir).to_string();
        std::fs::create_dir_all(&expanded)
            .with_context(|| format!("Failed to create profile directory {}", expanded))?;

        let mut builder = ChromeBrowserConfig::builder()
            .user_data_dir(&expanded)
            .window_size(config.window_width, config.window_height)
            .arg("--disable-session-crashed-bubble")
            .arg("--no-default-browser-check")
            .arg("--no-first-run");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(ref exe) = config.executable {
            builder = builder.chrome_executable(shellexpand::tilde(exe).to_string());
        }

        let browser_config = builder.build().map_err(|e| {
            anyhow!(
                "Failed to build browser config: {}. Is Chrome/Chromium installed?",
                e
            )
        })?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            anyhow!(
                "Failed to launch browser: {}. Make sure Chrome or Chromium is installed.",
                e
            )
        })?;

        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        info!(profile_dir = %expanded, headless = config.headless, "Browser launched");
        Ok(Self { browser, handler })
    }

    /// The first page the profile already has open, or a fresh one.
    pub async fn first_page(&self) -> anyhow::Result<ChromiumPage> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| anyhow!("Failed to get pages: {}", e))?;

        let page = match pages.into_iter().next() {
            Some(page) => page,
            None => self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| anyhow!("Failed to create new page: {}", e))?,
        };
        Ok(ChromiumPage { page })
    }

    /// Close the browser. The profile directory stays on disk.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        self.handler.abort();
        info!("Browser session closed");
    }
}

pub struct ChromiumPage {
    page: Page,
}

/// Modifier bits as defined by `Input.dispatchKeyEvent`.
fn modifier_bit(name: &str) -> Option<i64> {
    match name {
        "Alt" => Some(1),
        "Control" => Some(2),
        "Meta" => Some(4),
        "Shift" => Some(8),
        _ => None,
    }
}

/// A key resolved to the fields Chrome needs for a key event.
#[derive(Debug, PartialEq)]
struct KeyStroke {
    key: String,
    code: String,
    virtual_key: i64,
    text: Option<String>,
    modifiers: i64,
}

fn parse_chord(chord: &str) -> anyhow::Result<KeyStroke> {
    let mut parts: Vec<&str> = chord.split('+').collect();
    // "Control++" style chords are not used; the last part is the key.
    let key = parts
        .pop()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("Empty key chord '{}'", chord))?;

    let mut modifiers = 0;
    for part in parts {
        modifiers |= modifier_bit(part).ok_or_else(|| anyhow!("Unknown modifier '{}'", part))?;
    }

    let (key, code, virtual_key, text) = match key {
        "Enter" => ("Enter".to_string(), "Enter".to_string(), 13, Some("\r".to_string())),
        "Backspace" => ("Backspace".to_string(), "Backspace".to_string(), 8, None),
        "Escape" => ("Escape".to_string(), "Escape".to_string(), 27, None),
        "Tab" => ("Tab".to_string(), "Tab".to_string(), 9, None),
        single if single.chars().count() == 1 => {
            let c = single.chars().next().unwrap_or_default();
            let code = if c.is_ascii_alphabetic() {
                format!("Key{}", c.to_ascii_uppercase())
            } else if c.is_ascii_digit() {
                format!("Digit{}", c)
            } else {
                String::new()
            };
            let virtual_key = c.to_ascii_uppercase() as i64;
            // Shortcuts with Ctrl/Alt/Meta must not also insert the character.
            let text = if modifiers & !8 == 0 {
                Some(c.to_string())
            } else {
                None
            };
            let key = if modifiers & 8 != 0 {
                c.to_ascii_uppercase().to_string()
            } else {
                c.to_ascii_lowercase().to_string()
            };
            (key, code, virtual_key, text)
        }
        other => anyhow::bail!("Unsupported key '{}' in chord '{}'", other, chord),
    };

    Ok(KeyStroke {
        key,
        code,
        virtual_key,
        text,
        modifiers,
    })
}

fn locator_script(target: &Target) -> anyhow::Result<String> {
    let css = serde_json::to_string(target.css)?;
    let text = serde_json::to_string(&target.text)?;
    Ok(format!(
        r#"(() => {{
    const text = {text};
    let els = Array.from(document.querySelectorAll({css}));
    if (text !== null) {{
        els = els.filter(e => (e.innerText || e.textContent || '').includes(text));
        // innermost matches only, so broad selectors land on the labelled node
        els = els.filter(e => !els.some(o => o !== e && e.contains(o)));
    }}
    const el = els[{nth}];
    if (!el) return null;
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    if (r.width === 0 || r.height === 0 || s.visibility === 'hidden' || s.display === 'none') return null;
    return {{ x: r.x, y: r.y, width: r.width, height: r.height }};
}})()"#,
        text = text,
        css = css,
        nth = target.nth
    ))
}

impl ChromiumPage {
    async fn key_event(
        &self,
        kind: DispatchKeyEventType,
        stroke: &KeyStroke,
        with_text: bool,
    ) -> anyhow::Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .modifiers(stroke.modifiers)
            .key(stroke.key.clone())
            .code(stroke.code.clone())
            .windows_virtual_key_code(stroke.virtual_key)
            .native_virtual_key_code(stroke.virtual_key);
        if with_text {
            if let Some(ref text) = stroke.text {
                builder = builder.text(text.clone()).unmodified_text(text.clone());
            }
        }
        let params = builder
            .build()
            .map_err(|e| anyhow!("Invalid key event: {}", e))?;
        self.page.execute(params).await?;
        Ok(())
    }
}

#[async_trait]
impl ChartPage for ChromiumPage {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("Failed to navigate to {}: {}", url, e))?;
        Ok(())
    }

    async fn press(&self, chord: &str) -> anyhow::Result<()> {
        let stroke = parse_chord(chord)?;
        let down = if stroke.text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        };
        self.key_event(down, &stroke, true).await?;
        self.key_event(DispatchKeyEventType::KeyUp, &stroke, false)
            .await
            .with_context(|| format!("Failed to press '{}'", chord))
    }

    async fn insert_text(&self, text: &str) -> anyhow::Result<()> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(|e| anyhow!("Failed to type text: {}", e))?;
        Ok(())
    }

    async fn bounding_box(&self, target: &Target) -> anyhow::Result<Option<Rect>> {
        let result = self
            .page
            .evaluate(locator_script(target)?)
            .await
            .map_err(|e| anyhow!("Failed to locate '{}': {}", target, e))?;
        let value = result.value().cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    async fn click_at(&self, x: f64, y: f64) -> anyhow::Result<()> {
        self.page
            .click(Point { x, y })
            .await
            .map_err(|e| anyhow!("Failed to click at ({}, {}): {}", x, y, e))?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
