use chrono::Local;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Sink {
    Stdout,
    Capture(Arc<Mutex<Vec<String>>>),
    Silent,
}

/// Live progress pane shown to the operator while a batch runs.
/// Lines are prefixed with the local time, e.g. `[07:30:02] Procesando 1/3`.
#[derive(Clone)]
pub struct Console {
    sink: Sink,
}

impl Console {
    pub fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    pub fn silent() -> Self {
        Self { sink: Sink::Silent }
    }

    /// Keeps the messages (without the time prefix) for inspection
    pub fn capture() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sink: Sink::Capture(lines.clone()),
            },
            lines,
        )
    }

    pub fn line(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        match &self.sink {
            Sink::Stdout => println!("[{}] {}", Local::now().format("%H:%M:%S"), message),
            Sink::Capture(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(message.to_string());
                }
            }
            Sink::Silent => {}
        }
    }

    pub fn rule(&self) {
        self.line("=".repeat(60));
    }
}
