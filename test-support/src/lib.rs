pub mod fake_friendlycaptcha;
pub mod fake_smtp;

use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

/// Routes `log` (and `tracing` events, via its `log` feature) to the terminal. Safe to call from
/// every test; only the first call installs the logger.
pub fn setup_logging() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}
