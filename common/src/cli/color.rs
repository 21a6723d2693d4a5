//! `--color` policy shared by both binaries.
//!
//! The command-line choice wins. In `auto`, `NO_COLOR` or `EMACS` turn color
//! off, otherwise color follows whether the stream is a terminal.

use clap::ValueEnum;
use std::env;

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorWhen {
    // ---
    /// Color only when writing to a TTY.
    #[default]
    Auto,

    Always,

    Never,
}

impl ColorWhen {
    // ---
    /// Whether ANSI color should be used for `stream`.
    pub fn should_color(self, stream: atty::Stream) -> bool {
        // ---
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => auto_allows_color() && atty::is(stream),
        }
    }

    pub fn should_color_stderr(self) -> bool {
        self.should_color(atty::Stream::Stderr)
    }
}

fn auto_allows_color() -> bool {
    env::var_os("NO_COLOR").is_none() && env::var_os("EMACS").is_none()
}
