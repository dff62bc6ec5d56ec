use std::path::PathBuf;
use std::sync::OnceLock;

static BASE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the base directory for logs and debug artifacts.
/// Defaults to the process working directory.
pub fn get_base_dir() -> &'static PathBuf {
    BASE_DIR.get_or_init(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Returns the logs directory: `<base>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_base_dir().join("logs")
}

/// Returns the challenge debug directory: `<base>/captcha_debug/`
pub fn get_debug_dir() -> PathBuf {
    get_base_dir().join("captcha_debug")
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    std::fs::create_dir_all(get_debug_dir())?;
    Ok(())
}
