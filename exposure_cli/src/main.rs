use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use exposure_core::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long a command waits for another uvdose process to release the session
const LOCK_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "uvdose")]
#[command(about = "UV exposure countdown and dose tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the time to burn at a constant UV Index
    BurnTime {
        #[command(flatten)]
        exposure: ExposureArgs,
    },

    /// Start an exposure session
    Start {
        #[command(flatten)]
        exposure: ExposureArgs,
    },

    /// Show the current session (default)
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Report a new UV Index reading
    Uv {
        /// Current UV Index
        #[arg(allow_negative_numbers = true)]
        uv_index: f64,
    },

    /// Grant extra exposure time at the current UV Index
    Extend,

    /// Stop the running session
    Stop,

    /// Checkpoint the running session to disk
    Suspend,

    /// Follow the countdown until the session finishes
    Watch,

    /// Save profile defaults
    Profile {
        /// Skin class (1-6)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
        skin_class: Option<u8>,

        /// Preferred sun protection factor
        #[arg(long)]
        spf: Option<f64>,

        /// Finish notification sound (default, ringtone, mute)
        #[arg(long)]
        sound: Option<String>,
    },
}

#[derive(clap::Args)]
struct ExposureArgs {
    /// Skin class (1-6), defaults to the profile
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
    skin_class: Option<u8>,

    /// Current UV Index
    #[arg(long)]
    uv: f64,

    /// Sun protection factor, defaults to the profile
    #[arg(long)]
    spf: Option<f64>,
}

impl ExposureArgs {
    fn resolve(&self, profile: &config::ProfileConfig) -> Result<(SkinClass, f64)> {
        let class = match self.skin_class {
            Some(n) => SkinClass::from_number(n)
                .ok_or_else(|| Error::Config(format!("skin class must be 1-6, got {}", n)))?,
            None => profile.skin_class.ok_or_else(|| {
                Error::Config(
                    "no skin class given; pass --skin-class or run `uvdose profile --skin-class N`"
                        .into(),
                )
            })?,
        };
        Ok((class, self.spf.unwrap_or(profile.protection_factor)))
    }
}

fn main() -> Result<()> {
    // Initialize logging
    exposure_core::logging::init();

    let cli = Cli::parse();

    let saved_config = Config::load()?;
    let mut config = saved_config.clone();
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    // Commands that never touch the session
    match &cli.command {
        Some(Commands::Profile {
            skin_class,
            spf,
            sound,
        }) => return cmd_profile(saved_config, *skin_class, *spf, sound.clone()),
        Some(Commands::BurnTime { exposure }) => return cmd_burn_time(exposure, &config),
        _ => {}
    }

    tracing::info!("Using data directory {:?}", config.data.data_dir);
    // Held until exit, across `watch` too
    let _lock = SessionLock::acquire(config.data.lock_path(), LOCK_WAIT)?;

    let clock = SystemClock;
    let mut controller = open_controller(&config);
    match controller.reconcile(clock.now()) {
        Some(SessionEvent::Finished { snapshot }) => {
            println!("Your last session ended while uvdose was not running.");
            print_snapshot(&snapshot);
            println!();
        }
        Some(event) => tracing::debug!("Reconciled session: {:?}", event),
        None => {}
    }
    // Snapshots are journaled on finish; the CLI has nothing else to hand them to
    controller.take_finished();

    match cli.command {
        Some(Commands::Start { exposure }) => {
            cmd_start(&mut controller, &exposure, &config, clock.now())
        }
        Some(Commands::Status { json }) => cmd_status(&controller, json, clock.now()),
        Some(Commands::Uv { uv_index }) => cmd_uv(&mut controller, uv_index, clock.now()),
        Some(Commands::Extend) => cmd_extend(&mut controller, clock.now()),
        Some(Commands::Stop) => cmd_stop(&mut controller, clock.now()),
        Some(Commands::Suspend) => cmd_suspend(&mut controller, clock.now()),
        Some(Commands::Watch) => cmd_watch(controller, &config),
        Some(Commands::Profile { .. }) | Some(Commands::BurnTime { .. }) => Ok(()),
        None => cmd_status(&controller, false, clock.now()),
    }
}

fn open_controller(config: &Config) -> SessionController {
    SessionController::new(
        SessionSettings::from(config),
        Collaborators {
            persistence: Box::new(SessionStore::new(config.data.session_path())),
            presentation: Box::new(TracingPresentation::new()),
            journal: Box::new(JsonlJournal::new(config.data.journal_path())),
        },
    )
}

fn cmd_burn_time(exposure: &ExposureArgs, config: &Config) -> Result<()> {
    let (class, protection_factor) = exposure.resolve(&config.profile)?;
    let seconds = seconds_to_burn(class, exposure.uv, protection_factor);

    println!(
        "Skin class {} at UV {:.1} ({}) with SPF {}:",
        class.number(),
        exposure.uv,
        UvLevel::from_index(exposure.uv).label(),
        protection_factor
    );
    println!("  {} seconds ({})", seconds, format_duration(seconds));
    if seconds >= MAX_REMAINING_SECONDS {
        println!("  (capped at the 12 hour maximum)");
    }
    Ok(())
}

fn cmd_start(
    controller: &mut SessionController,
    exposure: &ExposureArgs,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<()> {
    let (class, protection_factor) = exposure.resolve(&config.profile)?;
    controller.start(class, exposure.uv, protection_factor, now)?;

    println!("✓ Session started");
    print_status(&controller.status(now));
    Ok(())
}

fn cmd_status(controller: &SessionController, json: bool, now: DateTime<Utc>) -> Result<()> {
    let status = controller.status(now);
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn cmd_uv(controller: &mut SessionController, uv_index: f64, now: DateTime<Utc>) -> Result<()> {
    match controller.update_uv_index(uv_index, now) {
        None => println!("No active session."),
        Some(SessionEvent::Finished { snapshot }) => {
            println!("Your burn threshold has been reached.");
            print_snapshot(&snapshot);
        }
        Some(_) => {
            println!("✓ UV Index updated");
            print_status(&controller.status(now));
        }
    }
    Ok(())
}

fn cmd_extend(controller: &mut SessionController, now: DateTime<Utc>) -> Result<()> {
    match controller.extend(now) {
        None => println!("No active session."),
        Some(SessionEvent::Finished { snapshot }) => print_snapshot(&snapshot),
        Some(_) => {
            println!(
                "✓ Extended by {}",
                format_duration(controller.settings().extension_seconds)
            );
            print_status(&controller.status(now));
        }
    }
    Ok(())
}

fn cmd_stop(controller: &mut SessionController, now: DateTime<Utc>) -> Result<()> {
    match controller.stop(now, true) {
        Some(SessionEvent::Finished { snapshot }) => {
            println!("✓ Session stopped");
            print_snapshot(&snapshot);
        }
        _ => println!("No active session."),
    }
    Ok(())
}

fn cmd_suspend(controller: &mut SessionController, now: DateTime<Utc>) -> Result<()> {
    match controller.suspend(now) {
        Some(_) => println!("✓ Session saved"),
        None => println!("No active session."),
    }
    Ok(())
}

fn cmd_watch(controller: SessionController, config: &Config) -> Result<()> {
    if !controller.is_running() {
        println!("No active session.");
        return Ok(());
    }

    let interval = config.session.presentation_interval_seconds.max(1);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    print_status(&controller.status(clock.now()));
    println!();

    let (runtime, events) =
        SessionRuntime::spawn(controller, clock, Some(Duration::from_secs(1)));

    for event in events.iter() {
        match event {
            SessionEvent::Ticked {
                remaining_seconds,
                accumulated_dose,
                ..
            } if remaining_seconds % interval == 0 => {
                println!(
                    "  {} remaining, dose {:.0}",
                    format_duration(remaining_seconds),
                    accumulated_dose
                );
            }
            SessionEvent::Finished { snapshot } => {
                println!("\nYour burn threshold has been reached. Get out of the sun!");
                print_snapshot(&snapshot);
                break;
            }
            _ => {}
        }
    }

    let controller = runtime.shutdown()?;
    tracing::debug!("Watch finished with controller {:?}", controller.state());
    Ok(())
}

fn cmd_profile(
    mut config: Config,
    skin_class: Option<u8>,
    spf: Option<f64>,
    sound: Option<String>,
) -> Result<()> {
    if let Some(n) = skin_class {
        config.profile.skin_class = SkinClass::from_number(n);
    }
    if let Some(spf) = spf {
        config.profile.protection_factor = spf;
    }
    if let Some(sound) = sound {
        config.profile.notification_sound = parse_sound(&sound)?;
    }
    config.validate()?;
    config.save()?;

    println!("✓ Profile saved");
    match config.profile.skin_class {
        Some(class) => println!("  Skin class: {}", class.number()),
        None => println!("  Skin class: not set"),
    }
    println!("  SPF: {}", config.profile.protection_factor);
    println!("  Sound: {:?}", config.profile.notification_sound);
    Ok(())
}

fn parse_sound(value: &str) -> Result<NotificationSound> {
    match value.to_lowercase().as_str() {
        "default" => Ok(NotificationSound::Default),
        "ringtone" => Ok(NotificationSound::Ringtone),
        "mute" => Ok(NotificationSound::Mute),
        other => Err(Error::Config(format!(
            "unknown sound '{}' (expected default, ringtone or mute)",
            other
        ))),
    }
}

fn print_status(status: &SessionStatus) {
    match status.state {
        SessionState::Idle => println!("No active session."),
        SessionState::Finished => {
            if let Some(snapshot) = &status.finished {
                print_snapshot(snapshot);
            }
        }
        SessionState::Running => {
            println!("Session running");
            match status.planned_end_time {
                Some(end) => println!(
                    "  Remaining: {} (ends {})",
                    format_duration(status.remaining_seconds),
                    end.with_timezone(&Local).format("%H:%M:%S")
                ),
                None => println!("  Remaining: {}", format_duration(status.remaining_seconds)),
            }
            println!("  Elapsed:   {}", format_duration(status.elapsed_seconds));
            println!(
                "  UV Index:  {:.1} ({})",
                status.current_uv_index,
                UvLevel::from_index(status.current_uv_index).label()
            );
            println!(
                "  Dose:      {:.0} of {:.0} ({:.2} SED)",
                status.accumulated_dose, status.burn_limit_dose, status.standard_erythemal_dose
            );
        }
    }
}

fn print_snapshot(snapshot: &FinishedSnapshot) {
    let reason = match snapshot.end_reason {
        EndReason::UserStopped => "stopped",
        EndReason::ThresholdReached => "burn threshold reached",
    };
    println!("  Ended:    {}", reason);
    println!("  Duration: {}", format_duration(snapshot.duration_seconds));
    println!(
        "  Dose:     {:.0} ({:.2} SED)",
        snapshot.accumulated_dose,
        snapshot.standard_erythemal_dose()
    );
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, secs)
    } else {
        format!("{}m {:02}s", minutes, secs)
    }
}
