use std::{env, process};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [--nofork] [--debug] [--version] --config=CONFIG_FILE", program);
    eprintln!("       {} CONFIG_FILE", program);
    process::exit(1);
}

fn main() {
    let program = env::args().next().unwrap_or_else(|| "selkie".to_owned());
    let mut config_path = None;
    let mut debug = false;

    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            config_path = Some(path.to_owned());
        } else if arg == "--debug" {
            debug = true;
        } else if arg == "--nofork" {
            // Daemonisation is left to the process supervisor; accepted for
            // compatibility with init scripts.
        } else if arg == "--version" {
            println!(concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")));
            return;
        } else if arg.starts_with('-') {
            usage(&program);
        } else if config_path.is_none() {
            config_path = Some(arg);
        } else {
            usage(&program);
        }
    }

    match config_path {
        Some(config_path) => selkie::start(config_path, debug),
        None => usage(&program),
    }
}
