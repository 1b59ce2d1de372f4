use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::wd::TimeoutConfiguration;
use fantoccini::{Client, ClientBuilder, Locator as WdLocator};
use log::{debug, info, warn};
use std::time::Duration;

use super::{BrowserError, FormPage, Locator, SessionFactory};

const WINDOW_WIDTH: u32 = 1200;
const WINDOW_HEIGHT: u32 = 900;
const SCROLL_SETTLE: Duration = Duration::from_millis(300);

/// chromedriver messages meaning the browser is gone, for replies that do not
/// carry a standard error code
const SESSION_LOST: &[&str] = &[
    "invalid session id",
    "chrome not reachable",
    "session deleted",
    "disconnected",
    "no such window",
];

impl From<CmdError> for BrowserError {
    fn from(e: CmdError) -> Self {
        let message = e.to_string();
        let lost = matches!(e, CmdError::Lost(_) | CmdError::Failed(_) | CmdError::FailedC(_))
            || e.is_invalid_session_id()
            || e.is_no_such_window();
        if e.is_no_such_element() {
            BrowserError::NotFound(message)
        } else if lost || SESSION_LOST.iter().any(|m| message.to_lowercase().contains(m)) {
            BrowserError::Session(message)
        } else {
            BrowserError::Command(message)
        }
    }
}

/// Opens Chrome sessions through a running chromedriver
pub struct WebDriverSessions {
    webdriver_url: String,
    headless: bool,
    page_load: Duration,
}

impl WebDriverSessions {
    pub fn new(webdriver_url: &str, headless: bool, page_load: Duration) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            headless,
            page_load,
        }
    }

    fn capabilities(&self) -> serde_json::map::Map<String, serde_json::Value> {
        let mut args = vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--disable-software-rasterizer",
            "--disable-extensions",
            "--disable-blink-features=AutomationControlled",
        ];
        if self.headless {
            args.push("--headless=new");
        }

        let chrome_opts = serde_json::json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
            "useAutomationExtension": false,
            "prefs": {
                "profile.default_content_setting_values.notifications": 2,
                "profile.default_content_settings.popups": 0
            }
        });

        let mut caps = serde_json::map::Map::new();
        caps.insert("browserName".to_string(), serde_json::json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), chrome_opts);
        caps
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessions {
    async fn open(&self) -> Result<Box<dyn FormPage>, BrowserError> {
        debug!("Connecting to WebDriver at {}", self.webdriver_url);
        let mut builder = ClientBuilder::native();
        let builder = builder.capabilities(self.capabilities());
        let client = builder
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| BrowserError::Session(format!("{} ({})", e, self.webdriver_url)))?;

        client.set_window_size(WINDOW_WIDTH, WINDOW_HEIGHT).await?;
        client
            .update_timeouts(TimeoutConfiguration::new(None, Some(self.page_load), None))
            .await?;

        info!(
            "Chrome session started ({})",
            if self.headless { "headless" } else { "visible" }
        );
        Ok(Box::new(WebDriverPage { client }))
    }
}

pub struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    async fn find_all(&self, locator: Locator) -> Result<Vec<Element>, BrowserError> {
        let elements = match locator {
            Locator::Id(id) => self.client.find_all(WdLocator::Id(id)).await?,
            Locator::Name(name) => {
                let css = format!("[name='{}']", name);
                self.client.find_all(WdLocator::Css(&css)).await?
            }
            Locator::Css(css) => self.client.find_all(WdLocator::Css(css)).await?,
            Locator::XPath(xpath) => self.client.find_all(WdLocator::XPath(xpath)).await?,
        };
        Ok(elements)
    }

    async fn find(&self, locator: Locator) -> Result<Element, BrowserError> {
        self.find_all(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NotFound(locator.to_string()))
    }

    /// Scrolls the element into view and clicks it, falling back to a script click
    async fn safe_click(&self, element: &Element, description: &str) -> bool {
        let handle = match serde_json::to_value(element) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Unable to reference {} from a script: {}", description, e);
                return false;
            }
        };

        let scrolled = self
            .client
            .execute("arguments[0].scrollIntoView({block: 'center'});", vec![handle.clone()])
            .await;
        if let Err(e) = scrolled {
            debug!("Scrolling to {} failed: {}", description, e);
        }
        tokio::time::sleep(SCROLL_SETTLE).await;

        match element.clone().click().await {
            Ok(_) => {
                info!("Clicked {}", description);
                true
            }
            Err(e) => {
                debug!("Native click on {} failed ({}), trying a script click", description, e);
                match self.client.execute("arguments[0].click();", vec![handle]).await {
                    Ok(_) => {
                        info!("Clicked {} through script", description);
                        true
                    }
                    Err(e) => {
                        warn!("Unable to click {}: {}", description, e);
                        false
                    }
                }
            }
        }
    }
}

#[async_trait]
impl FormPage for WebDriverPage {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.client.goto(url).await?;
        Ok(())
    }

    async fn enter_frame(&mut self, name: &str) -> Result<(), BrowserError> {
        let css = format!("frame[name='{0}'], iframe[name='{0}'], frame#{0}, iframe#{0}", name);
        let frame = self
            .client
            .find(WdLocator::Css(&css))
            .await
            .map_err(|_| BrowserError::NotFound(format!("frame '{}'", name)))?;
        frame.enter_frame().await?;
        Ok(())
    }

    async fn leave_frames(&mut self) -> Result<(), BrowserError> {
        self.client.enter_frame(None).await?;
        Ok(())
    }

    async fn wait_for(&mut self, locator: Locator, timeout: Duration) -> Result<(), BrowserError> {
        let css;
        let wd_locator = match locator {
            Locator::Id(id) => WdLocator::Id(id),
            Locator::Name(name) => {
                css = format!("[name='{}']", name);
                WdLocator::Css(&css)
            }
            Locator::Css(css) => WdLocator::Css(css),
            Locator::XPath(xpath) => WdLocator::XPath(xpath),
        };

        match self.client.wait().at_most(timeout).for_element(wd_locator).await {
            Ok(_) => Ok(()),
            Err(CmdError::WaitTimeout) => Err(BrowserError::NotFound(format!(
                "{} after {:?}",
                locator, timeout
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn fill(&mut self, locator: Locator, value: &str) -> Result<(), BrowserError> {
        let field = self.find(locator).await?;
        field.clear().await?;
        field.send_keys(value).await?;
        Ok(())
    }

    async fn image_sources(&mut self) -> Result<Vec<String>, BrowserError> {
        let mut sources = Vec::new();
        for image in self.find_all(Locator::Css("img")).await? {
            sources.push(image.attr("src").await?.unwrap_or_default());
        }
        Ok(sources)
    }

    async fn capture_image(&mut self, index: usize) -> Result<Vec<u8>, BrowserError> {
        let image = self
            .find_all(Locator::Css("img"))
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| BrowserError::NotFound(format!("image #{}", index)))?;
        Ok(image.screenshot().await?)
    }

    async fn click_labelled(&mut self, label: &str) -> Result<bool, BrowserError> {
        let label = label.to_lowercase();
        let candidates = self
            .find_all(Locator::XPath("//button | //input[@type='submit']"))
            .await?;

        for candidate in candidates {
            let text = candidate.text().await.unwrap_or_default().to_lowercase();
            let value = candidate
                .attr("value")
                .await
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_lowercase();

            if (text.contains(&label) || value.contains(&label))
                && self.safe_click(&candidate, &format!("button '{}'", label)).await
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn click(&mut self, locator: Locator) -> Result<bool, BrowserError> {
        let Some(element) = self.find_all(locator).await?.into_iter().next() else {
            return Ok(false);
        };
        Ok(self.safe_click(&element, &locator.to_string()).await)
    }

    async fn attribute(&mut self, locator: Locator, name: &str) -> Result<Option<String>, BrowserError> {
        let element = self.find(locator).await?;
        Ok(element.attr(name).await?)
    }

    async fn execute(&mut self, script: &str) -> Result<(), BrowserError> {
        self.client.execute(script, vec![]).await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Ok(self.client.screenshot().await?)
    }

    async fn source(&mut self) -> Result<String, BrowserError> {
        Ok(self.client.source().await?)
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.client.title().await?)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.client.clone().close().await?;
        Ok(())
    }
}
