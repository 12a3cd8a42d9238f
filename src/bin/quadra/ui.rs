use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy)]
enum Role {
    Heading,
    Key,
    Bullet,
    Good,
    Bad,
    Busy,
}

/// Terminal output for text mode. Styling and spinners are only used when
/// stdout is a terminal.
pub struct Ui {
    styled: bool,
}

impl Ui {
    pub fn new(plain: bool) -> Self {
        let styled = !plain && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if styled {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self { styled }
    }

    fn paint(&self, role: Role, text: impl Display) -> String {
        if !self.styled {
            return text.to_string();
        }
        let style = match role {
            Role::Heading => Style::new().fg(Color::Purple).bold(),
            Role::Key => Style::new().fg(Color::LightBlue).bold(),
            Role::Bullet => Style::new().fg(Color::LightBlue),
            Role::Good => Style::new().fg(Color::LightGreen).bold(),
            Role::Bad => Style::new().fg(Color::Yellow).bold(),
            Role::Busy => Style::new().fg(Color::LightCyan),
        };
        style.paint(text.to_string()).to_string()
    }

    /// Titled block of right-aligned `key: value` rows.
    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        println!("{}", self.paint(Role::Heading, format!("▸ {title}")));
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in rows {
            let key = format!("{key:>width$}:");
            println!("  {} {value}", self.paint(Role::Key, key));
        }
    }

    /// Titled bullet list; an empty list prints `(none)`.
    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        println!("{}", self.paint(Role::Heading, format!("▸ {title}")));
        let bullet = if self.styled { "•" } else { "-" };
        let mut empty = true;
        for entry in entries {
            empty = false;
            println!("  {} {entry}", self.paint(Role::Bullet, bullet));
        }
        if empty {
            println!("  (none)");
        }
    }

    pub fn success(&self, message: &str) {
        println!("{} {message}", self.paint(Role::Good, "✔"));
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{} {message}", self.paint(Role::Bad, "⚠"));
    }

    /// Starts timing a step, with a spinner when styled.
    pub fn task(&self, label: &str) -> Task<'_> {
        let spinner = self.styled.then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{prefix} {spinner} {msg}") {
                bar.set_style(style);
            }
            bar.set_prefix(self.paint(Role::Busy, "▶"));
            bar.set_message(label.to_owned());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Task {
            ui: self,
            label: label.to_owned(),
            started: Instant::now(),
            spinner,
            done: false,
        }
    }
}

/// A running step; dropping it unfinished reports the interruption.
pub struct Task<'a> {
    ui: &'a Ui,
    label: String,
    started: Instant,
    spinner: Option<ProgressBar>,
    done: bool,
}

impl Task<'_> {
    pub fn finish(mut self) -> Duration {
        self.done = true;
        if let Some(bar) = self.spinner.take() {
            bar.finish_and_clear();
        }
        self.started.elapsed()
    }
}

impl Drop for Task<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let message = format!(
            "{} failed after {}",
            self.label,
            format_duration(self.started.elapsed())
        );
        match self.spinner.take() {
            Some(bar) => bar.abandon_with_message(message),
            None => self.ui.warn(&message),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.0}ms", secs * 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
    }
}
