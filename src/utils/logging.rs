use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Optional transcript logger for the terminal front-end.
///
/// Distinct from the `tracing` diagnostics: this captures the visible chat
/// transcript (user and assistant turns) to a plain text file the user
/// asked for with `--log`.
pub struct LoggingState {
    file_path: Option<String>,
    is_active: bool,
}

impl LoggingState {
    pub fn new(log_file: Option<String>) -> Self {
        let is_active = log_file.is_some();
        LoggingState {
            file_path: log_file,
            is_active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn log_turn(&self, speaker: &str, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        if !self.is_active {
            return Ok(());
        }

        let file_path = match &self.file_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        writeln!(
            file,
            "[{}] {}:",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            speaker
        )?;
        for line in content.lines() {
            writeln!(file, "{}", line)?;
        }
        writeln!(file)?;

        file.flush()?;
        Ok(())
    }

    pub fn get_status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
            (Some(path), false) => format!(
                "paused ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }
}
