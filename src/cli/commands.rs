//! Subcommand handlers for capture, list-usb and config actions.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::args::ConfigAction;
use crate::clock::{spawn_countdown, Clock, Countdown, SystemClock};
use crate::config::{default_path as get_config_path, Config, DEFAULT_CONFIG};
use crate::device::dslr::usb;
use crate::device::BackendKind;
use crate::handoff::{spawn_save, ReviewSink, SaveDependencies};
use crate::session::{Artifact, CaptureMode, SessionManager, SessionState};

/// How often the countdown display refreshes.
const COUNTDOWN_INTERVAL: Duration = Duration::from_millis(100);

static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Check if Ctrl+C has been received.
pub fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, cancelling session...");
    })
}

/// Prints a one-line summary of the finished artifact.
struct ConsoleReview;

impl ReviewSink for ConsoleReview {
    fn present(&mut self, mode: CaptureMode, artifact: &Artifact) {
        println!("Captured {}: {}", mode, artifact.describe());
    }
}

/// Run one capture session on `backend` and save its artifact.
pub fn run_capture(
    config: &Config,
    mode: CaptureMode,
    backend: BackendKind,
    save: bool,
) -> Result<(), String> {
    let factory = config.device_factory(backend).map_err(|e| e.to_string())?;
    setup_ctrlc_handler().map_err(|e| format!("Failed to set Ctrl+C handler: {}", e))?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut manager =
            SessionManager::new(factory, Arc::clone(&clock), config.session.timings());

        println!("Starting {} session on the {} backend", mode, backend);
        let handle = manager.begin_session(mode);

        let mut ticker = tokio::time::interval(config.session.tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut countdown = None;

        let state = loop {
            ticker.tick().await;

            if ctrlc_received() {
                manager.cancel_session(handle);
                return Err("Session cancelled".to_string());
            }

            let state = manager.poll_tick(handle);

            if countdown.is_none() {
                if let (Some(session_clock), Some(token)) =
                    (manager.session_clock(handle), manager.cancel_token(handle))
                {
                    let (rx, _task) =
                        spawn_countdown(Arc::clone(&clock), session_clock, COUNTDOWN_INTERVAL, token);
                    countdown = Some(tokio::spawn(print_countdown(rx)));
                }
            }

            if state.is_terminal() {
                break state;
            }
        };

        if let Some(printer) = countdown {
            let _ = printer.await;
        }

        if let SessionState::Failed(e) = state {
            return Err(format!("Session failed: {}", e));
        }
        let artifact = manager
            .take_artifact(handle)
            .ok_or_else(|| "Session completed without an artifact".to_string())?;
        ConsoleReview.present(mode, &artifact);

        if save {
            let deps = SaveDependencies::files(&config.output.save_dir);
            let saved = spawn_save(&deps, mode, artifact)
                .await
                .map_err(|e| format!("Save task failed: {}", e))?
                .map_err(|e| format!("Failed to save {}: {}", mode, e))?;
            println!("Saved #{} to {}", saved.counter, saved.path.display());
        }
        Ok(())
    })
}

async fn print_countdown(mut rx: tokio::sync::watch::Receiver<Countdown>) {
    loop {
        let value = *rx.borrow_and_update();
        match value {
            Countdown::Remaining(secs) => {
                print!("\r  {} ", secs);
                std::io::stdout().flush().ok();
            }
            Countdown::Finished => {
                println!("\r  done");
                return;
            }
        }
        if rx.changed().await.is_err() {
            println!();
            return;
        }
    }
}

/// List USB devices and print them to stdout.
pub fn list_usb(vendor: Option<&str>) {
    match usb::list_usb_devices() {
        Ok(devices) => {
            let matching: Vec<_> = devices
                .iter()
                .filter(|d| vendor.map_or(true, |v| d.matches_vendor(v)))
                .collect();

            if matching.is_empty() {
                match vendor {
                    Some(v) => println!("No USB devices matching '{}'.", v),
                    None => println!("No USB devices found."),
                }
                println!();
                println!("Make sure the camera is connected, switched on and not asleep.");
            } else {
                println!("USB devices:");
                for device in matching {
                    println!("  {}", device);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: failed to run lsusb: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>) {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    match action {
        ConfigAction::Show => {
            let config = match Config::load(Some(&config_path)) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            match toml::to_string_pretty(&config) {
                Ok(text) => {
                    println!("Current configuration:");
                    println!();
                    println!("{}", text);
                }
                Err(e) => {
                    eprintln!("Error rendering config: {}", e);
                    std::process::exit(1);
                }
            }

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'darkroom-booth config show' to view current settings.");
                std::process::exit(1);
            }

            // Create parent directories if needed
            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Error creating config directory: {}", e);
                    std::process::exit(1);
                }
            }

            if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG) {
                eprintln!("Error writing config file: {}", e);
                std::process::exit(1);
            }

            println!("Created config file: {}", config_path.display());
        }
    }
}
