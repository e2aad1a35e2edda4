//! User-facing output for pull and push.
//!
//! [`Notifier`] routes messages either to `env_logger` (text mode, `-v` and up) or to an
//! `indicatif` spinner (quiet mode). Per-entry archive/extract lines and the rewrite
//! notices all go through here so the CLI verbosity switch controls them in one place.

use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Record};
use std::cell::RefCell;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Spinner, warnings only
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: env_logger::Logger,
    multi_progress: Option<MultiProgress>,
    spinner: RefCell<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        let logger = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build();

        let multi_progress = if verbosity == VerbosityLevel::Quiet {
            Some(MultiProgress::new())
        } else {
            None
        };

        Self {
            verbosity,
            logger,
            multi_progress,
            spinner: RefCell::new(None),
        }
    }

    fn emit(&self, level: Level, message: &str) {
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }

    pub fn info(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => {
                let mut spinner = self.spinner.borrow_mut();
                let spinner = spinner.get_or_insert_with(|| {
                    let bar = multi_progress.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}")
                    {
                        bar.set_style(style);
                    }
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                spinner.set_message(message.to_string());
            }
            None => self.emit(Level::Info, message),
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.emit(Level::Debug, message);
        }
    }

    /// Warnings are shown at every verbosity, above the spinner in quiet mode.
    pub fn warn(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => {
                let _ = multi_progress.println(format!("warning: {}", message));
            }
            None => self.emit(Level::Warn, message),
        }
    }

    /// Progress bar over `length` steps; `None` outside quiet mode.
    pub fn create_progress_bar(&self, length: u64, message: &str) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let bar = multi_progress.add(ProgressBar::new(length));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(message.to_string());
        Some(bar)
    }

    /// Clears the quiet-mode spinner, leaving `message` as the final line.
    pub fn finish(&self, message: &str) {
        match self.spinner.borrow_mut().take() {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => self.emit(Level::Info, message),
        }
    }
}
