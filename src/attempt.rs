//! One clock-in attempt for one account.
//!
//! The portal layout is fixed: a page with two nested frames, a login form
//! with a captcha, then a "Punto de Fichaje" page whose submit button records
//! the clock-in. Every failure is turned into an `ERROR` result row, so the
//! caller only ever sees an [`Outcome`].

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::browser::{BrowserError, FormPage, Locator};
use crate::captcha::CaptchaSolver;
use crate::classifier::{classify, Classification, Tier, Verdict};
use crate::console::Console;
use crate::notify::{now_label, Notifier, Severity};
use crate::records::{Credential, Outcome, ResultRecord, ResultsLog};
use crate::utils::{timestamped_name, truncate};

const OUTER_FRAME: &str = "cuerpo_WCRONOS";
const INNER_FRAME: &str = "principal_wcronos";

const USER_FIELD: Locator = Locator::Id("USUARIO");
const PASSWORD_FIELD: Locator = Locator::Id("CONTRASENA");
const CAPTCHA_FIELD: Locator = Locator::Name("codigo_captcha");
const LOGIN_LABEL: &str = "entrar";
const CLOCK_IN_NAV: Locator = Locator::XPath("//button[contains(@onclick, 'form_pfichaje.submit')]");
const SUBMIT_BUTTON: Locator = Locator::Id("btnEnviarForm");
const SUBMIT_BY_TEXT: Locator =
    Locator::XPath("//button[contains(., 'Realizar Fichaje')] | //button[contains(., 'Fichar')]");
const FORCE_SUBMIT: &str = "let btn = document.getElementById('btnEnviarForm');\n\
                            if (btn && btn.form) btn.form.submit();";

const CAPTCHA_MARKERS: &[&str] = &["captcha", "codigo"];

/// Fixed waits between steps, the portal does not signal when it is ready
#[derive(Debug, Clone)]
pub struct Pacing {
    pub after_load: Duration,
    pub after_frame: Duration,
    pub after_fill: Duration,
    pub after_login: Duration,
    pub before_navigation: Duration,
    pub after_navigation: Duration,
    pub before_verify: Duration,
    /// Between two accounts of the same batch
    pub between_rows: Duration,
    /// After closing a browser, before opening the next one
    pub after_restart: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            after_load: Duration::from_secs(3),
            after_frame: Duration::from_secs(1),
            after_fill: Duration::from_millis(500),
            after_login: Duration::from_secs(5),
            before_navigation: Duration::from_secs(2),
            after_navigation: Duration::from_secs(4),
            before_verify: Duration::from_secs(3),
            between_rows: Duration::from_secs(3),
            after_restart: Duration::from_secs(2),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            after_load: Duration::ZERO,
            after_frame: Duration::ZERO,
            after_fill: Duration::ZERO,
            after_login: Duration::ZERO,
            before_navigation: Duration::ZERO,
            after_navigation: Duration::ZERO,
            before_verify: Duration::ZERO,
            between_rows: Duration::ZERO,
            after_restart: Duration::ZERO,
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub url: String,
    pub screenshots_dir: PathBuf,
    pub element_wait: Duration,
    pub captcha_fallback: String,
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("No se pudo hacer clic en ENTRAR")]
    Login,
}

impl AttemptError {
    fn is_session_lost(&self) -> bool {
        matches!(self, AttemptError::Browser(BrowserError::Session(_)))
    }
}

struct PageResult {
    classification: Classification,
    screenshot: Option<PathBuf>,
}

pub struct ClockIn<'a> {
    pub settings: &'a AttemptSettings,
    pub solver: Option<&'a dyn CaptchaSolver>,
    pub notifier: &'a Notifier,
    pub results: &'a ResultsLog,
    pub console: &'a Console,
    pub pacing: &'a Pacing,
}

impl<'a> ClockIn<'a> {
    pub async fn run(&self, page: &mut dyn FormPage, credential: &Credential) -> Outcome {
        let user = credential.identifier.as_str();
        info!("Starting clock-in for {}", user);
        self.console.line(format!("Iniciando fichaje para {}...", user));

        match self.perform(page, credential).await {
            Ok(result) => self.report(user, result).await,
            Err(e) => self.report_error(page, user, e).await,
        }
    }

    async fn perform(&self, page: &mut dyn FormPage, credential: &Credential) -> Result<PageResult, AttemptError> {
        let user = credential.identifier.as_str();

        debug!("Loading {}", self.settings.url);
        self.console.line("Cargando página de login...");
        page.goto(&self.settings.url).await?;
        pause(self.pacing.after_load).await;

        self.console.line("Accediendo al sistema...");
        self.enter_frames(page).await?;

        self.console.line("Localizando formulario de login...");
        page.wait_for(USER_FIELD, self.settings.element_wait).await?;
        page.wait_for(PASSWORD_FIELD, self.settings.element_wait).await?;
        page.wait_for(CAPTCHA_FIELD, self.settings.element_wait).await?;

        let captcha = self.read_captcha(page).await;

        self.console.line("Ingresando credenciales...");
        for (field, value) in [
            (USER_FIELD, credential.identifier.as_str()),
            (PASSWORD_FIELD, credential.password.as_str()),
            (CAPTCHA_FIELD, captcha.as_str()),
        ] {
            page.fill(field, value).await?;
            pause(self.pacing.after_fill).await;
        }
        self.save_screenshot(page, &format!("antes_login_{}.png", user)).await;

        self.console.line("Haciendo login...");
        if !page.click_labelled(LOGIN_LABEL).await? {
            return Err(AttemptError::Login);
        }
        pause(self.pacing.after_login).await;
        info!("Logged in as {}", user);

        self.console.line("Navegando a punto de fichaje...");
        pause(self.pacing.before_navigation).await;
        let onclick = page
            .attribute(CLOCK_IN_NAV, "onclick")
            .await?
            .ok_or_else(|| BrowserError::NotFound(format!("onclick of {}", CLOCK_IN_NAV)))?;
        page.execute(&onclick).await?;
        pause(self.pacing.after_navigation).await;

        page.leave_frames().await?;
        pause(self.pacing.after_frame).await;
        self.enter_frames(page).await?;

        self.console.line("Realizando fichaje...");
        self.submit_clock_in(page).await?;

        pause(self.pacing.before_verify).await;
        let screenshot = self.save_screenshot(page, &format!("resultado_{}.png", user)).await;
        let html = page.source().await?;
        self.dump_html(user, &html).await;
        let title = page.title().await.unwrap_or_default();

        Ok(PageResult {
            classification: classify(&html, &title),
            screenshot,
        })
    }

    async fn enter_frames(&self, page: &mut dyn FormPage) -> Result<(), BrowserError> {
        for frame in [OUTER_FRAME, INNER_FRAME] {
            page.enter_frame(frame).await?;
            pause(self.pacing.after_frame).await;
        }
        Ok(())
    }

    /// Submit button by id, then by text, then a forced form submission
    async fn submit_clock_in(&self, page: &mut dyn FormPage) -> Result<(), BrowserError> {
        if page.click(SUBMIT_BUTTON).await.unwrap_or(false) {
            return Ok(());
        }
        debug!("Submit button not found by id, trying by text");
        if page.click(SUBMIT_BY_TEXT).await.unwrap_or(false) {
            return Ok(());
        }
        warn!("Submit button not clickable, forcing the form submission");
        page.execute(FORCE_SUBMIT).await
    }

    /// Solves the captcha when the page shows one, otherwise the fallback value
    async fn read_captcha(&self, page: &mut dyn FormPage) -> String {
        let fallback = self.settings.captcha_fallback.clone();

        let sources = match page.image_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!("Unable to list page images: {}", e);
                return fallback;
            }
        };

        let Some(index) = sources.iter().position(|src| {
            let src = src.to_lowercase();
            CAPTCHA_MARKERS.iter().any(|marker| src.contains(marker))
        }) else {
            warn!("No captcha image found, using fallback value");
            return fallback;
        };
        info!("Captcha image found");

        let Some(solver) = self.solver else {
            warn!("No captcha solver configured, using fallback value");
            return fallback;
        };

        self.console.line("Resolviendo captcha...");
        let image = match page.capture_image(index).await {
            Ok(image) => image,
            Err(e) => {
                error!("Unable to capture the captcha image: {}", e);
                return fallback;
            }
        };

        match solver.solve(&image).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                warn!("Captcha not solved ({}), using fallback value", e);
                fallback
            }
        }
    }

    async fn save_screenshot(&self, page: &mut dyn FormPage, name: &str) -> Option<PathBuf> {
        let bytes = match page.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Unable to take screenshot {}: {}", name, e);
                return None;
            }
        };
        match save_artifact(&self.settings.screenshots_dir, &timestamped_name(name), &bytes).await {
            Ok(path) => {
                info!("Screenshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Unable to save screenshot {}: {}", name, e);
                None
            }
        }
    }

    async fn dump_html(&self, user: &str, html: &str) {
        let name = format!("html_{}", timestamped_name(&format!("{}.html", user)));
        match save_artifact(&self.settings.screenshots_dir, &name, html.as_bytes()).await {
            Ok(path) => info!("Page source saved: {}", path.display()),
            Err(e) => error!("Unable to save page source: {}", e),
        }
    }

    async fn report(&self, user: &str, result: PageResult) -> Outcome {
        let PageResult {
            classification,
            screenshot,
        } = result;
        let phrase = classification.phrase.unwrap_or_default();

        match classification.verdict {
            Verdict::Success => {
                let (message, detail) = match classification.tier {
                    Some(Tier::Title) => (
                        "Fichaje completado (título)".to_string(),
                        "Detectado en título de página".to_string(),
                    ),
                    _ => (format!("Fichaje completado: {}", phrase), phrase.to_string()),
                };
                info!(
                    "Clock-in succeeded for {} ({} match: '{}')",
                    user,
                    classification.tier.map(|t| t.to_string()).unwrap_or_default(),
                    phrase
                );
                self.console.line(format!("✅ Fichaje exitoso para {}", user));
                self.results
                    .record(&ResultRecord::now(user, Outcome::Success, &message, screenshot.as_deref()));
                self.notifier
                    .notify(
                        "Fichaje Exitoso",
                        &format!(
                            "Usuario: {}\nEstado: {}\nMensaje: {}\nFecha: {}",
                            user,
                            Outcome::Success,
                            detail,
                            now_label()
                        ),
                        Severity::Success,
                    )
                    .await;
                Outcome::Success
            }
            Verdict::Failure => {
                error!("Clock-in failed for {}: '{}'", user, phrase);
                self.console.line(format!("❌ Error en fichaje para {}", user));
                self.results.record(&ResultRecord::now(
                    user,
                    Outcome::Failure,
                    &format!("Error específico: {}", phrase),
                    screenshot.as_deref(),
                ));
                self.notifier
                    .notify(
                        "Fichaje Fallido",
                        &format!(
                            "Usuario: {}\nEstado: {}\nMensaje: {}\nFecha: {}",
                            user,
                            Outcome::Failure,
                            phrase,
                            now_label()
                        ),
                        Severity::Error,
                    )
                    .await;
                Outcome::Failure
            }
            Verdict::Unknown => {
                let shot = screenshot
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!("Unknown clock-in state for {}, check screenshot {}", user, shot);
                self.console.line(format!("⚠️ Estado desconocido para {}", user));
                self.results.record(&ResultRecord::now(
                    user,
                    Outcome::Unknown,
                    "Estado no determinado - revisar screenshot",
                    screenshot.as_deref(),
                ));
                self.notifier
                    .notify(
                        "Estado Desconocido",
                        &format!(
                            "Usuario: {}\nEstado: {}\nMensaje: No se pudo determinar el resultado\nRevisa el screenshot: {}\nFecha: {}",
                            user,
                            Outcome::Unknown,
                            shot,
                            now_label()
                        ),
                        Severity::Warning,
                    )
                    .await;
                Outcome::Unknown
            }
        }
    }

    async fn report_error(&self, page: &mut dyn FormPage, user: &str, e: AttemptError) -> Outcome {
        let (title, message) = if e.is_session_lost() {
            error!("Browser session lost for {}: {}", user, e);
            self.console.line(format!("❌ Error de Chrome para {}", user));
            ("Error de Chrome", "Chrome crash".to_string())
        } else {
            error!("Clock-in error for {}: {}", user, e);
            self.console.line(format!("❌ Error: {}", truncate(&e.to_string(), 50)));
            ("Error en Fichaje", truncate(&e.to_string(), 200))
        };

        let screenshot = self.save_screenshot(page, &format!("error_{}.png", user)).await;
        self.results.record(&ResultRecord::now(
            user,
            Outcome::Error,
            &message,
            screenshot.as_deref(),
        ));
        self.notifier
            .notify(
                title,
                &format!(
                    "Usuario: {}\nEstado: {}\nMensaje: {}\nFecha: {}",
                    user,
                    Outcome::Error,
                    message,
                    now_label()
                ),
                Severity::Error,
            )
            .await;
        Outcome::Error
    }
}

async fn save_artifact(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
