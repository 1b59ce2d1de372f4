//! Browser seam for the clock-in portal.
//!
//! The automation only needs a handful of page operations, gathered in
//! [`FormPage`]. The WebDriver implementation lives in [`webdriver`]; tests
//! drive the same code through a scripted page.

pub mod webdriver;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Id(&'static str),
    Name(&'static str),
    Css(&'static str),
    XPath(&'static str),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Name(name) => write!(f, "[name='{}']", name),
            Locator::Css(css) => write!(f, "{}", css),
            Locator::XPath(xpath) => write!(f, "xpath {}", xpath),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser could not be started or the session was lost
    #[error("browser session error: {0}")]
    Session(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("browser command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait FormPage: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Descends into the frame with the given name, relative to the current one
    async fn enter_frame(&mut self, name: &str) -> Result<(), BrowserError>;

    /// Returns to the top-level document
    async fn leave_frames(&mut self) -> Result<(), BrowserError>;

    async fn wait_for(&mut self, locator: Locator, timeout: Duration) -> Result<(), BrowserError>;

    /// Clears the field and types the value into it
    async fn fill(&mut self, locator: Locator, value: &str) -> Result<(), BrowserError>;

    /// `src` of every image in the current frame, in document order
    async fn image_sources(&mut self) -> Result<Vec<String>, BrowserError>;

    /// PNG capture of the image at `index` in [`FormPage::image_sources`] order
    async fn capture_image(&mut self, index: usize) -> Result<Vec<u8>, BrowserError>;

    /// Clicks the first button or submit input whose text or value contains
    /// `label` (case-insensitive). Returns false when none was clicked.
    async fn click_labelled(&mut self, label: &str) -> Result<bool, BrowserError>;

    /// Clicks the first element matching the locator. Returns false when
    /// nothing matches or the click was refused.
    async fn click(&mut self, locator: Locator) -> Result<bool, BrowserError>;

    async fn attribute(&mut self, locator: Locator, name: &str) -> Result<Option<String>, BrowserError>;

    async fn execute(&mut self, script: &str) -> Result<(), BrowserError>;

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    async fn source(&mut self) -> Result<String, BrowserError>;

    async fn title(&mut self) -> Result<String, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Starts fresh browser sessions, one per credential
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FormPage>, BrowserError>;
}
