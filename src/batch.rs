//! Processes every row of the credentials file, one fresh browser per row.

use anyhow::Result;
use log::{error, info, warn};
use std::path::PathBuf;
use tokio::time::sleep;

use crate::attempt::{AttemptSettings, ClockIn, Pacing};
use crate::browser::{FormPage, SessionFactory};
use crate::captcha::CaptchaSolver;
use crate::console::Console;
use crate::notify::{now_label, Notifier, Severity};
use crate::records::{load_credentials, Outcome, ResultRecord, ResultsLog};
use crate::utils::{expand_timestamp, truncate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub exitos: usize,
    pub fallos: usize,
    pub desconocidos: usize,
    pub errores: usize,
    pub total: usize,
}

impl BatchSummary {
    pub fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Success => self.exitos += 1,
            Outcome::Failure => self.fallos += 1,
            Outcome::Unknown => self.desconocidos += 1,
            Outcome::Error => self.errores += 1,
        }
    }

    /// Errors count as failures here
    pub fn severity(&self) -> Severity {
        if self.fallos + self.errores == 0 {
            Severity::Success
        } else if self.exitos > 0 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }

    fn report(&self, results: &ResultsLog) -> String {
        format!(
            "Total procesados: {}\n✅ Exitosos: {}\n❌ Fallidos: {}\n⚠️ Desconocidos: {}\n💥 Errores: {}\n\nArchivo de resultados: {}\nFecha: {}",
            self.total,
            self.exitos,
            self.fallos,
            self.desconocidos,
            self.errores,
            results.path().display(),
            now_label()
        )
    }
}

/// Everything a batch needs, shared between manual and scheduled runs
pub struct BatchRunner {
    pub credentials_file: PathBuf,
    /// Results file name, strftime placeholders expanded at the start of each batch
    pub results_template: String,
    pub settings: AttemptSettings,
    pub sessions: Box<dyn SessionFactory>,
    pub solver: Option<Box<dyn CaptchaSolver>>,
    pub notifier: Notifier,
    pub pacing: Pacing,
}

impl BatchRunner {
    pub fn results_log(&self) -> ResultsLog {
        ResultsLog::new(PathBuf::from(expand_timestamp(&self.results_template)))
    }

    pub async fn run(&self, console: &Console) -> Result<BatchSummary> {
        console.line("Iniciando sistema de fichaje...");

        let credentials = match load_credentials(&self.credentials_file) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Unable to load credentials: {:#}", e);
                console.line(format!("❌ {:#}", e));
                return Err(e);
            }
        };
        let count = credentials.len();
        info!("Loaded {} credentials from {}", count, self.credentials_file.display());
        console.line(format!("✅ Cargados {} usuarios", count));

        self.notifier
            .notify(
                "Inicio de Proceso de Fichaje",
                &format!("Iniciando proceso para {} usuarios\nFecha: {}", count, now_label()),
                Severity::Info,
            )
            .await;

        let results = self.results_log();
        let attempt = ClockIn {
            settings: &self.settings,
            solver: self.solver.as_deref(),
            notifier: &self.notifier,
            results: &results,
            console,
            pacing: &self.pacing,
        };

        let mut summary = BatchSummary::default();
        let mut previous: Option<Box<dyn FormPage>> = None;

        for (i, credential) in credentials.iter().enumerate() {
            console.rule();
            console.line(format!("📋 Procesando {}/{}: {}", i + 1, count, credential.identifier));

            if let Some(mut page) = previous.take() {
                if let Err(e) = page.close().await {
                    warn!("Unable to close previous browser: {}", e);
                }
                if !self.pacing.after_restart.is_zero() {
                    sleep(self.pacing.after_restart).await;
                }
            }

            match self.sessions.open().await {
                Ok(mut page) => {
                    let outcome = attempt.run(page.as_mut(), credential).await;
                    summary.add(outcome);
                    previous = Some(page);
                }
                Err(e) => {
                    error!("Unable to start browser for {}: {}", credential.identifier, e);
                    console.line(format!("💥 Error crítico: {}", truncate(&e.to_string(), 100)));
                    results.record(&ResultRecord::now(
                        &credential.identifier,
                        Outcome::Error,
                        &format!("Error crítico: {}", truncate(&e.to_string(), 100)),
                        None,
                    ));
                    self.notifier
                        .notify(
                            "Error de Chrome",
                            &format!(
                                "Usuario: {}\nEstado: {}\nMensaje: {}\nFecha: {}",
                                credential.identifier,
                                Outcome::Error,
                                truncate(&e.to_string(), 200),
                                now_label()
                            ),
                            Severity::Error,
                        )
                        .await;
                    summary.add(Outcome::Error);
                }
            }

            if i + 1 < count && !self.pacing.between_rows.is_zero() {
                console.line(format!(
                    "⏳ Esperando {} segundos...",
                    self.pacing.between_rows.as_secs()
                ));
                sleep(self.pacing.between_rows).await;
            }
        }

        if let Some(mut page) = previous.take() {
            if let Err(e) = page.close().await {
                warn!("Unable to close browser: {}", e);
            }
        }

        info!(
            "Batch finished: {} processed, {} succeeded, {} failed, {} unknown, {} errors",
            summary.total, summary.exitos, summary.fallos, summary.desconocidos, summary.errores
        );
        console.rule();
        console.line("📊 RESUMEN FINAL:");
        console.line(format!("   Total procesados: {}", summary.total));
        console.line(format!("   ✅ Exitosos: {}", summary.exitos));
        console.line(format!("   ❌ Fallidos: {}", summary.fallos));
        console.line(format!("   ⚠️ Desconocidos: {}", summary.desconocidos));
        console.line(format!("   💥 Errores: {}", summary.errores));
        console.line(format!("   📁 Resultados en: {}", results.path().display()));
        console.rule();

        self.notifier
            .notify("Resumen de Fichajes", &summary.report(&results), summary.severity())
            .await;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockPage, MockSessions};
    use crate::notify::settings::NotificationSettings;
    use crate::notify::testing::RecordingChannel;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct SharedSessions(Arc<MockSessions>);

    #[async_trait::async_trait]
    impl SessionFactory for SharedSessions {
        async fn open(&self) -> Result<Box<dyn FormPage>, crate::browser::BrowserError> {
            self.0.open().await
        }
    }

    fn runner(
        dir: &std::path::Path,
        csv: Option<&str>,
        pages: Vec<MockPage>,
    ) -> (
        BatchRunner,
        Arc<MockSessions>,
        Arc<Mutex<Vec<crate::notify::Notification>>>,
    ) {
        let credentials_file = dir.join("datos.csv");
        if let Some(csv) = csv {
            std::fs::write(&credentials_file, csv).unwrap();
        }
        let sessions = Arc::new(MockSessions::new(pages));
        let (channel, sent) = RecordingChannel::new();
        let runner = BatchRunner {
            credentials_file,
            results_template: dir.join("resultados.csv").display().to_string(),
            settings: AttemptSettings {
                url: "http://fichaje.local/".to_string(),
                screenshots_dir: dir.join("screenshots"),
                element_wait: Duration::from_secs(1),
                captcha_fallback: "0000".to_string(),
            },
            sessions: Box::new(SharedSessions(sessions.clone())),
            solver: None,
            notifier: Notifier::new(vec![Box::new(channel)]),
            pacing: Pacing::none(),
        };
        (runner, sessions, sent)
    }

    #[tokio::test]
    async fn test_two_rows_one_success_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, sessions, sent) = runner(
            dir.path(),
            Some("tarjeta,contrasena\nA,p1\nB,p2\n"),
            vec![
                MockPage::with_result("El fichaje se a realizado correctamente"),
                MockPage::with_result("Ha habido un error al realizar el fichaje"),
            ],
        );

        let summary = runner.run(&Console::silent()).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                exitos: 1,
                fallos: 1,
                desconocidos: 0,
                errores: 0,
                total: 2
            }
        );
        assert_eq!(summary.severity(), Severity::Warning);

        let records = runner.results_log().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier, "A");
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(records[1].identifier, "B");
        assert_eq!(records[1].outcome, Outcome::Failure);

        // One browser at a time, and none left open
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.live(), 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.first().unwrap().title, "Inicio de Proceso de Fichaje");
        let last = sent.last().unwrap();
        assert_eq!(last.title, "Resumen de Fichajes");
        assert_eq!(last.severity, Severity::Warning);
        assert!(last.body.contains("Total procesados: 2"));
    }

    #[tokio::test]
    async fn test_every_row_produces_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut crashed = MockPage::with_result("");
        crashed.crashed = true;
        // Four rows but only three sessions: the last open fails
        let (runner, sessions, _sent) = runner(
            dir.path(),
            Some("tarjeta,contrasena\nA,1\nB,2\nC,3\nD,4\n"),
            vec![
                MockPage::with_result("fichaje registrado"),
                crashed,
                MockPage::with_result("nada que ver"),
            ],
        );

        let summary = runner.run(&Console::silent()).await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.exitos, 1);
        assert_eq!(summary.desconocidos, 1);
        assert_eq!(summary.errores, 2);
        assert_eq!(summary.severity(), Severity::Warning);

        let records = runner.results_log().read_all().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].identifier, "D");
        assert!(records[3].message.starts_with("Error crítico: "));
        assert_eq!(records[3].screenshot, "");
        assert_eq!(sessions.live(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_stops_without_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, sessions, sent) = runner(dir.path(), None, vec![]);
        let (console, lines) = Console::capture();

        assert!(runner.run(&console).await.is_err());
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 0);
        assert!(lines.lock().unwrap().iter().any(|l| l.starts_with("❌")));
    }

    #[tokio::test]
    async fn test_placeholder_notification_settings_send_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("notificaciones.ini");
        std::fs::write(
            &ini,
            "[telegram]\ntoken = AQUI_TU_TOKEN\nchat_id = AQUI_TU_CHAT_ID\n\
             [email]\nsmtp_server = AQUI_TU_SERVIDOR_SMTP\nsmtp_port = 587\n\
             email_from = AQUI_TU_EMAIL\nemail_password = x\nemail_to = y\n",
        )
        .unwrap();

        let settings = NotificationSettings::load(&ini).unwrap();
        let (mut runner, sessions, _sent) = runner(
            dir.path(),
            Some("tarjeta,contrasena\nA,p1\n"),
            vec![MockPage::with_result("fichaje registrado")],
        );
        runner.notifier = Notifier::from_settings(&settings);
        assert!(!runner.notifier.is_enabled());
        assert!(runner.notifier.channel_names().is_empty());

        let summary = runner.run(&Console::silent()).await.unwrap();
        assert_eq!(summary.exitos, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summary_severity() {
        let mut summary = BatchSummary::default();
        summary.add(Outcome::Success);
        summary.add(Outcome::Unknown);
        assert_eq!(summary.severity(), Severity::Success);
        summary.add(Outcome::Error);
        assert_eq!(summary.severity(), Severity::Warning);

        let mut failed = BatchSummary::default();
        failed.add(Outcome::Failure);
        assert_eq!(failed.severity(), Severity::Error);
    }
}
