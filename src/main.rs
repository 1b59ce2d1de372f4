mod attempt;
mod batch;
mod browser;
mod captcha;
mod classifier;
mod config;
mod console;
mod logging;
mod notify;
mod records;
mod schedule;
mod scheduler;
mod utils;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use attempt::{AttemptSettings, Pacing};
use batch::BatchRunner;
use browser::webdriver::WebDriverSessions;
use captcha::{CaptchaSolver, TwoCaptcha};
use config::validation::{validate_config, ValidationResult};
use config::{load_config, Config};
use console::Console;
use notify::settings::NotificationSettings;
use notify::{now_label, Notifier, Severity};
use schedule::{parse_days, ScheduleBook, TimeOfDay};
use scheduler::{install_stop_handlers, Scheduler, POLL_INTERVAL};
use utils::format_duration;

#[derive(Parser, Debug)]
#[command(version, about = "Automated clock-in for the WCRONOS portal", long_about = None)]
struct Args {
    /// Path to the config file, defaults are used when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Print config validation result
    #[arg(long)]
    validate: bool,

    /// Credentials CSV (tarjeta,contrasena), overrides the config file
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Clock in every account of the credentials file now
    Run,
    /// Run the scheduler until stopped (Ctrl+C asks for confirmation)
    Start,
    /// Manage the schedule entries
    #[command(subcommand)]
    Schedule(ScheduleCmd),
    /// Send a test message through every enabled notification channel
    NotifyTest,
}

#[derive(Subcommand, Debug)]
enum ScheduleCmd {
    /// List the entries, numbered from 1
    List,
    /// Add an entry, e.g. `schedule add 07:30 --days LMXJV`
    Add {
        time: TimeOfDay,
        /// Weekday letters among L M X J V S D
        #[arg(short, long, default_value = "LMXJV")]
        days: String,
    },
    Remove {
        index: usize,
    },
    Enable {
        index: usize,
    },
    Disable {
        index: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config_file, mut config) = load_config(args.config.as_deref())?;
    if let Some(credentials) = &args.credentials {
        config.credentials_file = credentials.clone();
    }
    if args.headless {
        config.headless = true;
    }

    // Setup logging
    logging::setup_logging(&config.logging)?;

    info!(
        "Starting fichaje-rs with config file: {}",
        args.config.as_deref().unwrap_or("<defaults>")
    );

    // Validate config file
    if args.validate {
        let info = validate_config(&config_file);

        for msg in &info {
            match msg {
                ValidationResult::Error(m) => {
                    error!("{}", m);
                }
                ValidationResult::Warning(m) => {
                    warn!("{}", m);
                }
            }
        }

        if info.is_empty() {
            info!("Config file is valid");
        }
    }

    debug!("Parsed config: {:?}", config);

    let Some(command) = args.command else {
        if !args.validate {
            Args::command().print_help()?;
        }
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute(command, config))?;

    info!("Exiting");
    Ok(())
}

async fn execute(command: Cmd, config: Config) -> anyhow::Result<()> {
    match command {
        Cmd::Run => {
            let runner = build_runner(&config)?;
            let start = Instant::now();
            runner.run(&Console::stdout()).await?;
            info!("Batch completed in {}", format_duration(start.elapsed()));
        }
        Cmd::Start => {
            let console = Console::stdout();
            let book = ScheduleBook::load(&config.schedule_file)?;
            let scheduler = Scheduler::new(
                Arc::new(tokio::sync::Mutex::new(book)),
                Arc::new(build_runner(&config)?),
                config.timezone,
                console.clone(),
            );
            install_stop_handlers(scheduler.stop_flag(), console)?;
            scheduler.run_until_stopped(POLL_INTERVAL).await?;
        }
        Cmd::Schedule(command) => edit_schedule(command, &config)?,
        Cmd::NotifyTest => {
            let settings = NotificationSettings::load(&config.notifications_file)?;
            let notifier = Notifier::from_settings(&settings);
            if !notifier.is_enabled() {
                println!("No hay canales de notificación configurados en {}", config.notifications_file.display());
                return Ok(());
            }

            let channels = notifier.channel_names().join(", ");
            println!("Canales activos: {}", channels);
            notifier
                .notify(
                    "Prueba de Notificación",
                    &format!(
                        "Este es un mensaje de prueba del sistema de fichaje.\nCanales activos: {}\nFecha: {}",
                        channels,
                        now_label()
                    ),
                    Severity::Info,
                )
                .await;
        }
    }
    Ok(())
}

fn edit_schedule(command: ScheduleCmd, config: &Config) -> anyhow::Result<()> {
    let mut book = ScheduleBook::load(&config.schedule_file)?;

    match command {
        ScheduleCmd::List => {
            if book.is_empty() {
                println!("No hay horarios configurados");
            }
            for line in book.listing() {
                println!("{}", line);
            }
            return Ok(());
        }
        ScheduleCmd::Add { time, days } => {
            let days = parse_days(&days)?;
            let entry = book.add(time, &days)?;
            println!("Horario añadido: {}", entry);
        }
        ScheduleCmd::Remove { index } => {
            let entry = book.remove(index)?;
            println!("Horario eliminado: {}", entry);
        }
        ScheduleCmd::Enable { index } => {
            let entry = book.set_enabled(index, true)?;
            println!("{}", entry);
        }
        ScheduleCmd::Disable { index } => {
            let entry = book.set_enabled(index, false)?;
            println!("{}", entry);
        }
    }

    book.save()
        .with_context(|| format!("Unable to save {}", config.schedule_file.display()))?;
    Ok(())
}

fn build_runner(config: &Config) -> anyhow::Result<BatchRunner> {
    let settings = NotificationSettings::load(&config.notifications_file)?;
    let notifier = Notifier::from_settings(&settings);
    if notifier.is_enabled() {
        info!("Notification channels: {}", notifier.channel_names().join(", "));
    }

    let solver = TwoCaptcha::from_config(&config.captcha).map(|s| Box::new(s) as Box<dyn CaptchaSolver>);
    if solver.is_none() {
        warn!(
            "No captcha API key configured, captcha field will be filled with '{}'",
            config.captcha.fallback
        );
    }

    Ok(BatchRunner {
        credentials_file: config.credentials_file.clone(),
        results_template: config.results_file.clone(),
        settings: AttemptSettings {
            url: config.url.clone(),
            screenshots_dir: config.screenshots_dir.clone(),
            element_wait: config.timeouts.element_wait,
            captcha_fallback: config.captcha.fallback.clone(),
        },
        sessions: Box::new(WebDriverSessions::new(
            &config.webdriver_url,
            config.headless,
            config.timeouts.page_load,
        )),
        solver,
        notifier,
        pacing: Pacing::default(),
    })
}
