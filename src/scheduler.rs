use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use signal_hook::consts::SIGTERM;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::batch::BatchRunner;
use crate::config::dayofweek::DayOfWeek;
use crate::console::Console;
use crate::notify::{now_label, Severity};
use crate::schedule::{ScheduleBook, TimeOfDay};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One firing slot: an entry's time on one of its weekdays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub time: TimeOfDay,
    /// Weekday set of the entry this job comes from
    pub days: Vec<DayOfWeek>,
    pub weekday: DayOfWeek,
    pub next_run: DateTime<Tz>,
}

/// First `time` on `weekday` strictly after `after`. Local times skipped by a
/// DST change are skipped too.
pub fn next_occurrence(time: TimeOfDay, weekday: DayOfWeek, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = after.timezone();
    let start = after.date_naive();
    (0..=14)
        .filter_map(|offset| start.checked_add_signed(TimeDelta::days(offset)))
        .filter(|date| date.weekday() == weekday.to_weekday())
        .filter_map(|date| tz.from_local_datetime(&date.and_time(time.to_naive())).earliest())
        .find(|candidate| *candidate > after)
}

/// Human label for a firing time, e.g. `Lunes 03/03/2025 07:30:00`
pub fn describe(at: &DateTime<Tz>) -> String {
    format!(
        "{} {}",
        DayOfWeek::from_weekday(at.weekday()).full_name(),
        at.format("%d/%m/%Y %H:%M:%S")
    )
}

#[derive(Debug)]
pub struct JobTable {
    jobs: Vec<Job>,
    /// Last instant the table was built or checked for due jobs
    checked: DateTime<Tz>,
}

impl JobTable {
    /// One job per weekday of every enabled entry
    pub fn build(book: &ScheduleBook, now: DateTime<Tz>) -> Self {
        let mut jobs = Vec::new();
        for entry in book.entries().iter().filter(|e| e.enabled) {
            for &weekday in &entry.days {
                match next_occurrence(entry.time, weekday, now) {
                    Some(next_run) => {
                        debug!("Job {} {} next at {}", entry.time, weekday, next_run);
                        jobs.push(Job {
                            time: entry.time,
                            days: entry.days.clone(),
                            weekday,
                            next_run,
                        });
                    }
                    None => warn!("No upcoming run for {} on {}", entry.time, weekday.full_name()),
                }
            }
        }
        Self { jobs, checked: now }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn next_run(&self) -> Option<DateTime<Tz>> {
        self.jobs.iter().map(|job| job.next_run).min()
    }

    /// Returns the jobs due at `now` and reschedules them for the following
    /// week
    pub fn take_due(&mut self, now: DateTime<Tz>) -> Vec<Job> {
        self.checked = now;
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_run <= now {
                due.push(job.clone());
                match next_occurrence(job.time, job.weekday, now) {
                    Some(next_run) => job.next_run = next_run,
                    None => job.next_run = now + TimeDelta::days(7),
                }
            }
        }
        due
    }
}

/// Fires the batch runner at the times of the schedule book.
///
/// The loop stops on its next poll once `stop` is raised, a batch already
/// running is never interrupted.
pub struct Scheduler {
    book: Arc<Mutex<ScheduleBook>>,
    runner: Arc<BatchRunner>,
    timezone: Tz,
    console: Console,
    active: AtomicBool,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(book: Arc<Mutex<ScheduleBook>>, runner: Arc<BatchRunner>, timezone: Tz, console: Console) -> Self {
        Self {
            book,
            runner,
            timezone,
            console,
            active: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising this flag stops the poll loop
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn now(&self) -> DateTime<Tz> {
        self.timezone.from_utc_datetime(&Utc::now().naive_utc())
    }

    /// INACTIVE -> ACTIVE. Needs at least one schedule entry.
    pub async fn activate(&self, now: DateTime<Tz>) -> Result<JobTable> {
        let table = {
            let book = self.book.lock().await;
            if book.is_empty() {
                bail!("Add at least one schedule before starting the scheduler");
            }
            for line in book.listing() {
                self.console.line(format!("   {}", line));
            }
            JobTable::build(&book, now)
        };

        if table.is_empty() {
            warn!("Every schedule entry is disabled, nothing will run");
        }
        self.active.store(true, Ordering::SeqCst);
        info!("Scheduler activated with {} jobs ({})", table.len(), self.timezone);
        self.console.line("🟢 Programador ACTIVADO");

        self.runner
            .notifier
            .notify(
                "Programador Activado",
                &format!("Horarios programados: {}\nFecha: {}", table.len(), now_label()),
                Severity::Info,
            )
            .await;
        self.report_next_run(&table);
        Ok(table)
    }

    /// ACTIVE -> INACTIVE
    pub async fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Scheduler stopped");
        self.console.line("🔴 Programador DETENIDO");
        self.runner
            .notifier
            .notify(
                "Programador Detenido",
                &format!("El programador ha sido detenido\nFecha: {}", now_label()),
                Severity::Info,
            )
            .await;
    }

    fn report_next_run(&self, table: &JobTable) {
        match table.next_run() {
            Some(next) => {
                info!("Next clock-in run at {}", next);
                self.console.line(format!("📅 Próxima ejecución: {}", describe(&next)));
            }
            None => self.console.line("📅 No hay ejecuciones programadas"),
        }
    }

    /// Picks up edits made to the schedule file by other processes. Returns
    /// true when the entries changed.
    fn reload(book: &mut ScheduleBook) -> bool {
        match book.reload_if_changed() {
            Ok(changed) => changed,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Rebuilds the job table from the current entries. Jobs already checked
    /// are not fired again.
    async fn reprogram(&self, table: &mut JobTable) {
        let book = self.book.lock().await;
        *table = JobTable::build(&book, table.checked);
        info!("Schedule file changed, {} jobs programmed", table.len());
        self.console.line(format!("🔄 Horarios reprogramados: {}", table.len()));
    }

    /// Runs the due jobs one after another. Returns how many fired.
    pub async fn tick(&self, table: &mut JobTable, now: DateTime<Tz>) -> usize {
        let changed = Self::reload(&mut *self.book.lock().await);
        if changed {
            self.reprogram(table).await;
            self.report_next_run(table);
        }

        let due = table.take_due(now);
        let mut edited = false;
        for job in &due {
            info!("Scheduled run {} ({}) is due", job.time, job.weekday.full_name());
            self.console
                .line(format!("⏰ Ejecutando fichaje programado: {} {}", job.weekday.full_name(), job.time));

            {
                let mut book = self.book.lock().await;
                edited |= Self::reload(&mut book);
                if book.mark_run(job.time, &job.days, now.naive_local()) {
                    if let Err(e) = book.save() {
                        error!("{}", e);
                    }
                }
            }

            if let Err(e) = self.runner.run(&self.console).await {
                error!("Scheduled batch failed: {:#}", e);
            }
        }
        if edited {
            self.reprogram(table).await;
        }
        if !due.is_empty() {
            self.report_next_run(table);
        }
        due.len()
    }

    /// Activates, polls until the stop flag is raised, then deactivates
    pub async fn run_until_stopped(&self, poll: Duration) -> Result<()> {
        let mut table = self.activate(self.now()).await?;
        while !self.stop.load(Ordering::SeqCst) {
            sleep(poll).await;
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.tick(&mut table, self.now()).await;
        }
        self.deactivate().await;
        Ok(())
    }
}

/// SIGTERM stops the scheduler right away, Ctrl+C asks first
pub fn install_stop_handlers(stop: Arc<AtomicBool>, console: Console) -> Result<()> {
    signal_hook::flag::register(SIGTERM, stop.clone())?;

    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl+C: {}", e);
                return;
            }
            match tokio::task::spawn_blocking(confirm_stop).await {
                Ok(true) => {
                    console.line("Deteniendo programador...");
                    stop.store(true, Ordering::SeqCst);
                    return;
                }
                Ok(false) => console.line("El programador sigue activo"),
                Err(e) => {
                    error!("Unable to read confirmation: {}", e);
                    return;
                }
            }
        }
    });
    Ok(())
}

fn confirm_stop() -> bool {
    print!("\nEl programador está activo. ¿Deseas detenerlo? [s/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "s" | "si" | "sí" | "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{AttemptSettings, Pacing};
    use crate::browser::mock::{MockPage, MockSessions};
    use crate::notify::testing::RecordingChannel;
    use crate::notify::Notifier;
    use chrono_tz::Europe::Madrid;
    use crate::config::dayofweek::DayOfWeek::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Tz> {
        Madrid.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn time(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_occurrence() {
        // 2025-03-03 is a Monday
        let monday_morning = at(2025, 3, 3, 7, 0, 0);
        assert_eq!(
            next_occurrence(time("07:30"), Lun, monday_morning),
            Some(at(2025, 3, 3, 7, 30, 0))
        );
        // Same minute already passed: next week
        assert_eq!(
            next_occurrence(time("07:30"), Lun, at(2025, 3, 3, 7, 30, 0)),
            Some(at(2025, 3, 10, 7, 30, 0))
        );
        assert_eq!(
            next_occurrence(time("15:00"), Vie, monday_morning),
            Some(at(2025, 3, 7, 15, 0, 0))
        );
        assert_eq!(
            next_occurrence(time("06:00"), Dom, at(2025, 3, 3, 7, 0, 0)),
            Some(at(2025, 3, 9, 6, 0, 0))
        );
    }

    #[test]
    fn test_next_occurrence_skips_dst_gap() {
        // 02:30 does not exist in Madrid on 2025-03-30
        let saturday = at(2025, 3, 29, 12, 0, 0);
        assert_eq!(
            next_occurrence(time("02:30"), Dom, saturday),
            Some(at(2025, 4, 6, 2, 30, 0))
        );
    }

    #[test]
    fn test_describe_uses_spanish_day_names() {
        assert_eq!(describe(&at(2025, 3, 5, 7, 30, 0)), "Miércoles 05/03/2025 07:30:00");
    }

    #[test]
    fn test_job_table() {
        let mut book = ScheduleBook::empty("unused.json");
        book.add(time("07:30"), &[Lun, Mie]).unwrap();
        book.add(time("15:00"), &[Vie]).unwrap();
        book.set_enabled(2, false).unwrap();

        let now = at(2025, 3, 3, 7, 0, 0);
        let mut table = JobTable::build(&book, now);
        assert_eq!(table.len(), 2);
        assert_eq!(table.next_run(), Some(at(2025, 3, 3, 7, 30, 0)));

        assert!(table.take_due(at(2025, 3, 3, 7, 29, 59)).is_empty());
        let due = table.take_due(at(2025, 3, 3, 7, 30, 0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].weekday, Lun);
        // Fired jobs are not due again until next week
        assert!(table.take_due(at(2025, 3, 3, 7, 30, 1)).is_empty());
        assert_eq!(table.next_run(), Some(at(2025, 3, 5, 7, 30, 0)));
    }

    fn scheduler(
        dir: &std::path::Path,
        book: ScheduleBook,
        pages: Vec<MockPage>,
    ) -> (Scheduler, Arc<MockSessions>, Arc<std::sync::Mutex<Vec<crate::notify::Notification>>>) {
        struct Shared(Arc<MockSessions>);

        #[async_trait::async_trait]
        impl crate::browser::SessionFactory for Shared {
            async fn open(&self) -> Result<Box<dyn crate::browser::FormPage>, crate::browser::BrowserError> {
                self.0.open().await
            }
        }

        std::fs::write(dir.join("datos.csv"), "tarjeta,contrasena\nA,p1\n").unwrap();
        let sessions = Arc::new(MockSessions::new(pages));
        let (channel, sent) = RecordingChannel::new();
        let runner = BatchRunner {
            credentials_file: dir.join("datos.csv"),
            results_template: dir.join("resultados.csv").display().to_string(),
            settings: AttemptSettings {
                url: "http://fichaje.local/".to_string(),
                screenshots_dir: dir.join("screenshots"),
                element_wait: Duration::from_secs(1),
                captcha_fallback: "0000".to_string(),
            },
            sessions: Box::new(Shared(sessions.clone())),
            solver: None,
            notifier: Notifier::new(vec![Box::new(channel)]),
            pacing: Pacing::none(),
        };
        let scheduler = Scheduler::new(
            Arc::new(Mutex::new(book)),
            Arc::new(runner),
            Madrid,
            Console::silent(),
        );
        (scheduler, sessions, sent)
    }

    #[tokio::test]
    async fn test_activation_requires_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _sessions, sent) =
            scheduler(dir.path(), ScheduleBook::empty(dir.path().join("h.json")), vec![]);

        assert!(scheduler.activate(at(2025, 3, 3, 7, 0, 0)).await.is_err());
        assert!(!scheduler.is_active());
        assert!(sent.lock().unwrap().is_empty());

        // Deactivating an inactive scheduler is a no-op
        scheduler.deactivate().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_job_stamps_entry_and_runs_batch() {
        let dir = tempfile::tempdir().unwrap();
        let schedule_path = dir.path().join("horarios_config.json");
        let mut book = ScheduleBook::empty(&schedule_path);
        book.add(time("07:30"), &[Lun]).unwrap();
        let (scheduler, sessions, sent) = scheduler(
            dir.path(),
            book,
            vec![MockPage::with_result("fichaje registrado")],
        );

        let mut table = scheduler.activate(at(2025, 3, 3, 7, 0, 0)).await.unwrap();
        assert!(scheduler.is_active());
        assert_eq!(scheduler.tick(&mut table, at(2025, 3, 3, 7, 15, 0)).await, 0);
        assert_eq!(scheduler.tick(&mut table, at(2025, 3, 3, 7, 30, 0)).await, 1);
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 1);

        let saved = ScheduleBook::load(&schedule_path).unwrap();
        assert_eq!(saved.entries()[0].last_run_label(), "03/03/2025 07:30:00");

        scheduler.deactivate().await;
        assert!(!scheduler.is_active());

        let titles: Vec<String> = sent.lock().unwrap().iter().map(|n| n.title.clone()).collect();
        assert_eq!(
            titles,
            vec![
                "Programador Activado",
                "Inicio de Proceso de Fichaje",
                "Fichaje Exitoso",
                "Resumen de Fichajes",
                "Programador Detenido",
            ]
        );
    }

    #[tokio::test]
    async fn test_edits_from_another_process_survive_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let schedule_path = dir.path().join("horarios_config.json");
        let mut book = ScheduleBook::empty(&schedule_path);
        book.add(time("07:30"), &[Lun]).unwrap();
        book.save().unwrap();
        let (scheduler, sessions, _sent) = scheduler(
            dir.path(),
            book,
            vec![
                MockPage::with_result("fichaje registrado"),
                MockPage::with_result("fichaje registrado"),
            ],
        );

        let mut table = scheduler.activate(at(2025, 3, 3, 7, 0, 0)).await.unwrap();
        assert_eq!(table.len(), 1);

        // `schedule add 15:00 --days V` from another shell
        let mut edited = ScheduleBook::load(&schedule_path).unwrap();
        edited.add(time("15:00"), &[Vie]).unwrap();
        edited.save().unwrap();

        assert_eq!(scheduler.tick(&mut table, at(2025, 3, 3, 7, 30, 0)).await, 1);
        assert_eq!(table.len(), 2);

        let saved = ScheduleBook::load(&schedule_path).unwrap();
        assert_eq!(
            saved.listing(),
            vec![
                " 1. 07:30 - Días: L - ACTIVO - Última: 03/03/2025 07:30:00",
                " 2. 15:00 - Días: V - ACTIVO - Última: Nunca",
            ]
        );

        // The added entry fires on its own day
        assert_eq!(table.next_run(), Some(at(2025, 3, 7, 15, 0, 0)));
        assert_eq!(scheduler.tick(&mut table, at(2025, 3, 7, 15, 0, 0)).await, 1);
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 2);

        // Removing it drops its job on the next poll
        let mut edited = ScheduleBook::load(&schedule_path).unwrap();
        edited.remove(2).unwrap();
        edited.save().unwrap();
        assert_eq!(scheduler.tick(&mut table, at(2025, 3, 10, 7, 0, 0)).await, 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_run(), Some(at(2025, 3, 10, 7, 30, 0)));
    }

    #[tokio::test]
    async fn test_stop_flag_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = ScheduleBook::empty(dir.path().join("h.json"));
        book.add(time("07:30"), &DayOfWeek::WORKDAYS).unwrap();
        let (scheduler, _sessions, _sent) = scheduler(dir.path(), book, vec![]);

        let stop = scheduler.stop_flag();
        let handle = tokio::spawn(async move {
            scheduler.run_until_stopped(Duration::from_millis(10)).await.unwrap();
            scheduler.is_active()
        });
        sleep(Duration::from_millis(50)).await;
        stop.store(true, Ordering::SeqCst);
        assert!(!handle.await.unwrap());
    }
}
