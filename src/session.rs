//! Logged-in browser session on the charting site.
//!
//! Opens the persistent profile, lands on the home page and signs in with the
//! fetched credentials when the site shows the anonymous user menu.

use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{BrowserSession, ChartPage, ChromiumPage, Target, Ui};
use crate::config::{AutomationConfig, BrowserConfig};
use crate::credentials::Credentials;

pub const PAGE_READY: Target = Target::css("header");
pub const ANONYMOUS_BUTTON: Target =
    Target::css("button.tv-header__user-menu-button--anonymous");
pub const SIGN_IN_ITEM: Target =
    Target::css("[role='menuitem'], button, a, span").with_text("Sign in");
pub const USERNAME_INPUT: Target = Target::css("input#id_username");
pub const PASSWORD_INPUT: Target = Target::css("input#id_password");
pub const SUBMIT_BUTTON: Target = Target::css("button[class*='submitButton']");

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(anyhow::Error),
    #[error("site did not load: {0}")]
    Navigation(anyhow::Error),
    #[error("login step failed: {0}")]
    LoginStep(anyhow::Error),
    #[error("login rejected: site still shows the anonymous user menu")]
    LoginRejected,
}

/// A browser on the persistent profile plus the page the run drives.
pub struct LiveSession {
    browser: BrowserSession,
    page: ChromiumPage,
}

impl LiveSession {
    pub fn page(&self) -> &ChromiumPage {
        &self.page
    }

    /// Close the page and the browser. The profile stays on disk.
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            warn!("Page close failed: {}", e);
        }
        self.browser.close().await;
    }
}

/// Open (or reuse) the profile at `profile_dir` and return a logged-in page.
pub async fn ensure_logged_in_session(
    browser_config: &BrowserConfig,
    automation: &AutomationConfig,
    profile_dir: &str,
    credentials: &Credentials,
) -> Result<LiveSession, SessionError> {
    let browser = BrowserSession::launch(browser_config, profile_dir)
        .await
        .map_err(SessionError::Launch)?;
    let page = match browser.first_page().await {
        Ok(page) => page,
        Err(e) => {
            browser.close().await;
            return Err(SessionError::Launch(e));
        }
    };

    let outcome = {
        let ui = Ui::new(&page, automation);
        establish(&ui, automation, &browser_config.home_url, credentials).await
    };
    match outcome {
        Ok(()) => Ok(LiveSession { browser, page }),
        Err(e) => {
            LiveSession { browser, page }.close().await;
            Err(e)
        }
    }
}

/// Navigate home, wait for the page to render and log in if needed.
pub async fn establish(
    ui: &Ui<'_>,
    automation: &AutomationConfig,
    home_url: &str,
    credentials: &Credentials,
) -> Result<(), SessionError> {
    ui.page()
        .goto(home_url)
        .await
        .map_err(SessionError::Navigation)?;
    ui.with_timeout(automation.navigation_timeout())
        .wait_visible(&PAGE_READY)
        .await
        .map_err(SessionError::Navigation)?;
    info!(url = home_url, "Charting site opened");

    if is_logged_in(ui, automation).await {
        info!("Already logged in");
        return Ok(());
    }

    perform_login(ui, automation, credentials).await?;
    info!("Session is ready and logged in");
    Ok(())
}

/// The anonymous user button showing up within the probe window means "not
/// logged in". Its absence, or a failed probe, is taken as logged in; a
/// failed probe cannot be told apart from an authenticated page here.
pub async fn is_logged_in(ui: &Ui<'_>, automation: &AutomationConfig) -> bool {
    match ui
        .with_timeout(automation.probe_timeout())
        .wait_visible(&ANONYMOUS_BUTTON)
        .await
    {
        Ok(_) => {
            info!("User not logged in, login required");
            false
        }
        Err(e) => {
            if ui.page().bounding_box(&ANONYMOUS_BUTTON).await.is_err() {
                warn!(error = %e, "Login probe failed, assuming logged in");
            }
            true
        }
    }
}

async fn perform_login(
    ui: &Ui<'_>,
    automation: &AutomationConfig,
    credentials: &Credentials,
) -> Result<(), SessionError> {
    info!("Starting login");

    let steps = async {
        ui.click(&ANONYMOUS_BUTTON).await?;
        ui.click(&SIGN_IN_ITEM).await?;
        ui.with_timeout(automation.login_timeout())
            .wait_visible(&USERNAME_INPUT)
            .await?;
        ui.fill(&USERNAME_INPUT, &credentials.username).await?;
        ui.fill(&PASSWORD_INPUT, &credentials.password).await?;
        ui.click(&SUBMIT_BUTTON).await?;
        Ok::<(), anyhow::Error>(())
    };
    steps.await.map_err(SessionError::LoginStep)?;

    if let Err(e) = ui
        .with_timeout(automation.login_timeout())
        .wait_hidden(&ANONYMOUS_BUTTON)
        .await
    {
        warn!(error = %e, "Anonymous menu did not go away after submitting");
    }

    if is_logged_in(ui, automation).await {
        info!("Login successful");
        Ok(())
    } else {
        Err(SessionError::LoginRejected)
    }
}
