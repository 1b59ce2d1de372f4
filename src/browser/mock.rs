//! Scripted pages for exercising the automation without a browser

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BrowserError, FormPage, Locator, SessionFactory};

#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub result_html: String,
    pub result_title: String,
    pub images: Vec<String>,
    /// Locators that are never found
    pub missing: Vec<Locator>,
    /// Button labels present on the login page
    pub labels: Vec<String>,
    /// Every call goes through here, in order
    pub actions: Arc<Mutex<Vec<String>>>,
    /// Simulates a crashed browser from the first navigation on
    pub crashed: bool,
    live: Option<Arc<AtomicUsize>>,
}

impl MockPage {
    pub fn with_result(html: &str) -> Self {
        Self {
            result_html: html.to_string(),
            result_title: "WCRONOS".to_string(),
            labels: vec!["Entrar".to_string()],
            ..Default::default()
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }

    fn check(&self, locator: Locator) -> Result<(), BrowserError> {
        if self.missing.contains(&locator) {
            return Err(BrowserError::NotFound(locator.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FormPage for MockPage {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.record(format!("goto {}", url));
        if self.crashed {
            return Err(BrowserError::Session("chrome not reachable".to_string()));
        }
        Ok(())
    }

    async fn enter_frame(&mut self, name: &str) -> Result<(), BrowserError> {
        self.record(format!("frame {}", name));
        Ok(())
    }

    async fn leave_frames(&mut self) -> Result<(), BrowserError> {
        self.record("leave frames".to_string());
        Ok(())
    }

    async fn wait_for(&mut self, locator: Locator, _timeout: Duration) -> Result<(), BrowserError> {
        self.record(format!("wait {}", locator));
        self.check(locator)
    }

    async fn fill(&mut self, locator: Locator, value: &str) -> Result<(), BrowserError> {
        self.check(locator)?;
        self.record(format!("fill {} = {}", locator, value));
        Ok(())
    }

    async fn image_sources(&mut self) -> Result<Vec<String>, BrowserError> {
        Ok(self.images.clone())
    }

    async fn capture_image(&mut self, index: usize) -> Result<Vec<u8>, BrowserError> {
        self.record(format!("capture image {}", index));
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn click_labelled(&mut self, label: &str) -> Result<bool, BrowserError> {
        let found = self
            .labels
            .iter()
            .any(|l| l.to_lowercase().contains(&label.to_lowercase()));
        if found {
            self.record(format!("click '{}'", label));
        }
        Ok(found)
    }

    async fn click(&mut self, locator: Locator) -> Result<bool, BrowserError> {
        if self.missing.contains(&locator) {
            return Ok(false);
        }
        self.record(format!("click {}", locator));
        Ok(true)
    }

    async fn attribute(&mut self, locator: Locator, name: &str) -> Result<Option<String>, BrowserError> {
        self.check(locator)?;
        Ok(Some(format!("{}-of-{}", name, locator)))
    }

    async fn execute(&mut self, script: &str) -> Result<(), BrowserError> {
        self.record(format!("execute {}", script.trim()));
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        if self.crashed {
            return Err(BrowserError::Session("chrome not reachable".to_string()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn source(&mut self) -> Result<String, BrowserError> {
        Ok(self.result_html.clone())
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.result_title.clone())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.record("close".to_string());
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out the scripted pages in order and tracks how many are open at once
#[derive(Default)]
pub struct MockSessions {
    pages: Mutex<VecDeque<MockPage>>,
    live: Arc<AtomicUsize>,
    pub max_live: AtomicUsize,
    pub opened: AtomicUsize,
}

impl MockSessions {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Default::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockSessions {
    async fn open(&self) -> Result<Box<dyn FormPage>, BrowserError> {
        let mut page = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BrowserError::Session("chromedriver refused the session".to_string()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        page.live = Some(self.live.clone());
        Ok(Box::new(page))
    }
}
