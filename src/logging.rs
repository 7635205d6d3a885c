use std::str::FromStr;

use tracing::Level;

/// Installs the global fmt subscriber. Unknown level names fall back to INFO.
pub fn init_logging(level: &str) {
    let max_level = Level::from_str(level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(max_level).init();
}
