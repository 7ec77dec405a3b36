//! ログ初期化

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` があればそれを優先し、なければ `--verbose` で debug / 通常は info
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("battery_oqc={0},battery_oqc_common={0},warn", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
