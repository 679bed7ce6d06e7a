use clap::Parser;

use darkroom_booth::cli::{self, Args, Command};
use darkroom_booth::config::Config;
use darkroom_booth::device::BackendKind;

fn main() {
    let args = Args::parse();

    match args.command {
        Command::Capture {
            mode,
            backend,
            no_save,
        } => {
            let config = match Config::load(args.config.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            // Backend: CLI > config
            let backend = backend
                .map(BackendKind::from)
                .unwrap_or(config.device.backend);

            if let Err(e) = cli::run_capture(&config, mode.into(), backend, !no_save) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Command::ListUsb { vendor } => cli::list_usb(vendor.as_deref()),
        Command::Config { action } => cli::handle_config_action(action, args.config.as_deref()),
    }
}
