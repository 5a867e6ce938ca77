//! selkie, an IRC server that speaks RFC 1459 and RFC 2812.
//!
//! # Usage
//!
//! You need a configuration file, and pass its name as an argument.  The git
//! repository contains an example `doc/selkie.conf`, with comments
//! describing the different options.
//!
//! During development: `cargo run -- doc/selkie.conf`
//!
//! For an optimized build:
//!
//! ```console
//! cargo install --path .
//! selkie selkie.conf
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub use crate::state::State;
use std::process;

// The public surface doubles as the module ABI: modules subscribe to the
// hooks in `hooks`, attach state through `extension`, and work with the
// `user` and `channel` objects the core hands them.
pub mod channel;
pub mod config;
pub mod conn;
pub mod engine;
pub mod extension;
pub mod hooks;
mod lines;
pub mod modules;
mod state;
pub mod user;
mod users;
mod util;
pub mod xline;

/// The configuration file could not be read or parsed.
pub const EXIT_CONFIG: i32 = 2;
/// The socket engine could not be initialized.  Fatal, logged to stderr.
pub const EXIT_SOCKETENGINE: i32 = 3;

/// The beginning of everything.
pub fn start(config_path: String, debug: bool) -> ! {
    let default_filter = if debug { "selkie=trace" } else { "selkie=debug" };
    let log_settings = env_logger::Env::new()
        .filter_or("SELKIE_LOG", default_filter)
        .write_style("SELKIE_LOG_STYLE");
    env_logger::Builder::from_env(log_settings)
        .format(|buf, r| {
            use std::io::Write;
            writeln!(buf, "[{:<5} {}] {}", r.level(), r.target(), r.args())
        })
        .init();

    let cfg = match config::Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Could not load {}: {}", config_path, err);
            process::exit(EXIT_CONFIG);
        }
    };

    let mut state = match State::new(cfg, Some(config_path)) {
        Ok(state) => state,
        Err(err) => {
            log::error!("Could not initialize the socket engine: {}", err);
            eprintln!("ERROR: Could not initialize the socket engine: {}", err);
            eprintln!("ERROR: This is a fatal error, exiting now.");
            process::exit(EXIT_SOCKETENGINE);
        }
    };

    if let Err(err) = state.listen() {
        log::error!("Failed to bind: {}", err);
        eprintln!("ERROR: Failed to bind: {}", err);
        process::exit(EXIT_SOCKETENGINE);
    }

    state.run()
}
