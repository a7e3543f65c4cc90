use crate::Result;
use log::debug;
use std::path::Path;

/// Input and output plumbing for the scan driver
pub mod io {
    use super::*;
    use std::fs::File;
    use std::io::{self, BufReader, BufWriter, Read, Write};

    /// Open the target list, or stdin when no path (or `-`) is given.
    pub fn open_input(path: Option<&Path>) -> Result<Box<dyn Read + Send>> {
        match path {
            Some(path) if path != Path::new("-") => {
                debug!("Reading targets from {}", path.display());
                Ok(Box::new(BufReader::new(File::open(path)?)))
            }
            _ => Ok(Box::new(io::stdin())),
        }
    }

    /// Create the results sink, or stdout when no path (or `-`) is given.
    pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
        match path {
            Some(path) if path != Path::new("-") => {
                debug!("Writing results to {}", path.display());
                Ok(Box::new(BufWriter::new(File::create(path)?)))
            }
            _ => Ok(Box::new(BufWriter::new(io::stdout()))),
        }
    }

    /// Append one value as a JSON line.
    pub fn write_json_line<W: Write + ?Sized, T: serde::Serialize>(out: &mut W, value: &T) -> Result<()> {
        serde_json::to_writer(&mut *out, value)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Time and formatting utilities
pub mod time {
    use std::time::{Duration, SystemTime};

    /// Format duration as human readable string
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else if secs > 0 {
            format!("{}s", seconds)
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    pub fn elapsed_since(start: SystemTime) -> Duration {
        SystemTime::now().duration_since(start).unwrap_or_default()
    }
}
