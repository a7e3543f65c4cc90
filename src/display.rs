use crate::event::EventKind;
use crate::types::Grab;
use colored::*;
use std::collections::BTreeMap;

/// Running totals for a scan, fed one Grab at a time.
#[derive(Debug, Default, Clone)]
pub struct ScanSummary {
    pub total: usize,
    pub completed: usize,
    pub unreachable: usize,
    /// Conversations that stopped early, keyed by the step that failed.
    pub failed_steps: BTreeMap<String, usize>,
    pub invalid_targets: usize,
}

impl ScanSummary {
    pub fn record(&mut self, grab: &Grab) {
        self.total += 1;
        if grab.is_success() {
            self.completed += 1;
            return;
        }
        match grab.log.last() {
            Some(event) if !event.is_success() => {
                *self.failed_steps.entry(event.kind.name().to_string()).or_insert(0) += 1;
            }
            // Nothing was attempted on the wire, so the dial itself failed.
            _ => self.unreachable += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.failed_steps.values().sum()
    }
}

/// Colored terminal output for the scan driver
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    /// One line per grab: host, the steps it ran, and where it stopped.
    pub fn print_grab(&self, grab: &Grab) {
        if self.quiet_mode {
            return;
        }

        let host = match &grab.domain {
            Some(domain) if !domain.is_empty() => format!("{} ({})", grab.host, domain),
            _ => grab.host.to_string(),
        };
        let steps = grab
            .kinds()
            .iter()
            .map(EventKind::name)
            .collect::<Vec<_>>()
            .join(" > ");

        if self.use_colors {
            match &grab.error {
                None => println!("  {} {} {}", "✓".bright_green().bold(), host.bright_white(), steps.bright_black()),
                Some(error) => println!(
                    "  {} {} {} {}",
                    "✗".bright_red().bold(),
                    host.bright_white(),
                    steps.bright_black(),
                    error.red()
                ),
            }
        } else {
            match &grab.error {
                None => println!("[✓] {} {}", host, steps),
                Some(error) => println!("[✗] {} {} {}", host, steps, error),
            }
        }
    }

    pub fn print_scan_summary(&self, summary: &ScanSummary, elapsed: &str) {
        if self.quiet_mode {
            return;
        }

        println!();
        self.print_section_header("GRAB SUMMARY");
        if self.use_colors {
            println!("  {}: {}", "Targets".bright_white().bold(), summary.total.to_string().cyan().bold());
            println!("  {}: {}", "Completed".bright_white().bold(), summary.completed.to_string().green().bold());
            println!(
                "  {}: {}",
                "Unreachable".bright_white().bold(),
                summary.unreachable.to_string().yellow().bold()
            );
            if summary.invalid_targets > 0 {
                println!(
                    "  {}: {}",
                    "Skipped records".bright_white().bold(),
                    summary.invalid_targets.to_string().yellow()
                );
            }
            for (step, count) in &summary.failed_steps {
                println!("  {} {}: {}", "Failed at".bright_white().bold(), step.cyan(), count.to_string().red().bold());
            }
            println!("  {}: {}", "Elapsed".bright_white().bold(), elapsed.bright_black());
        } else {
            println!("Targets: {}", summary.total);
            println!("Completed: {}", summary.completed);
            println!("Unreachable: {}", summary.unreachable);
            if summary.invalid_targets > 0 {
                println!("Skipped records: {}", summary.invalid_targets);
            }
            for (step, count) in &summary.failed_steps {
                println!("Failed at {}: {}", step, count);
            }
            println!("Elapsed: {}", elapsed);
        }
        println!();
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    /// Errors are printed even in quiet mode.
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!();
            println!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┐");
            println!("  {} {} {}", "│".bright_cyan(), title.bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = title.len()).bright_black(),
                    "│".bright_cyan()
                );
            }
            println!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┘");
            println!();
        } else {
            let border = "=".repeat(title.len() + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}
