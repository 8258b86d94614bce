use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the per-user data directory: `<data_local>/titlewatch/`
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("titlewatch")
}

/// Returns the logs directory: `<data_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Returns the default template directory: `<exe_dir>/resources/`
pub fn get_resources_dir() -> PathBuf {
    get_exe_dir().join("resources")
}

/// Resolves a template file name against the template directory.
/// Absolute paths are returned unchanged.
pub fn resolve_template(resources_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        resources_dir.join(file)
    }
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_template_relative() {
        let resolved = resolve_template(Path::new("/opt/res"), Path::new("exit.png"));
        assert_eq!(resolved, PathBuf::from("/opt/res/exit.png"));
    }

    #[test]
    fn test_resolve_template_absolute() {
        let resolved = resolve_template(Path::new("/opt/res"), Path::new("/tmp/exit.png"));
        assert_eq!(resolved, PathBuf::from("/tmp/exit.png"));
    }
}
