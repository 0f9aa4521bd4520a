use std::collections::VecDeque;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners + ring-buffer logs, cleared on completion.
    Normal,
    /// Like Normal but keeps log lines after step completion.
    Verbose,
    /// Spinners only, no log lines.
    Quiet,
    /// No ANSI, plain println output (for piped/non-TTY).
    Plain,
    /// Nothing at all; stdout is reserved for JSON.
    Silent,
}

/// Numbered steps with spinners and checkmarks.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

/// A running step. Consumed by [`Step::finish`] or [`Step::fail`].
///
/// Log lines are encoded as extra lines in the spinner's message rather than
/// separate bars, so indicatif's line accounting stays correct on redraw.
pub struct Step {
    bar: ProgressBar,
    multi: MultiProgress,
    prefix: String,
    label: String,
    log_lines: VecDeque<String>,
    kept_lines: Vec<String>,
    mode: OutputMode,
}

const MAX_LOG_LINES: usize = 8;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .expect("valid progress template")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .expect("valid progress template")
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2717} {msg:.red}")
        .expect("valid progress template")
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = match mode {
            OutputMode::Plain | OutputMode::Silent => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
            _ => MultiProgress::new(),
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    /// Start the next numbered step.
    pub fn begin(&mut self, label: &str) -> Step {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        if !matches!(self.mode, OutputMode::Plain | OutputMode::Silent) {
            bar.enable_steady_tick(Duration::from_millis(80));
        }

        Step {
            bar,
            multi: self.multi.clone(),
            prefix,
            label: label.to_string(),
            log_lines: VecDeque::new(),
            kept_lines: Vec::new(),
            mode: self.mode,
        }
    }

    /// Print an info line under the steps.
    pub fn info(&self, text: &str) {
        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Plain => println!("      \u{2192} {text}"),
            _ => {
                self.multi.println(format!("      \u{2192} {text}")).ok();
            }
        }
    }
}

impl Step {
    /// Add an output line under this step (ring buffer).
    pub fn log(&mut self, line: &str) {
        match self.mode {
            OutputMode::Quiet | OutputMode::Silent => return,
            OutputMode::Plain => {
                println!("        {line}");
                return;
            }
            OutputMode::Normal | OutputMode::Verbose => {}
        }

        if self.mode == OutputMode::Verbose {
            self.kept_lines.push(line.to_string());
        }
        if self.log_lines.len() >= MAX_LOG_LINES {
            self.log_lines.pop_front();
        }
        self.log_lines.push_back(line.to_string());

        let mut msg = self.label.clone();
        for l in &self.log_lines {
            msg.push_str("\n        ");
            msg.push_str(l);
        }
        self.bar.set_message(msg);
    }

    pub fn finish(self, done_label: impl Into<String>) {
        self.complete(done_label.into(), done_style(), '\u{2713}');
    }

    pub fn fail(self, label: impl Into<String>) {
        self.complete(label.into(), failed_style(), '\u{2717}');
    }

    fn complete(self, label: String, style: ProgressStyle, mark: char) {
        if self.mode == OutputMode::Verbose {
            for line in &self.kept_lines {
                self.multi.println(format!("        {line}")).ok();
            }
        }
        if self.mode == OutputMode::Plain {
            println!("[{}] {mark} {label}", self.prefix);
        }
        // Resetting the message collapses the log lines back into one row.
        self.bar.set_style(style);
        self.bar.finish_with_message(label);
    }
}
