use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::storage::{KvStore, THEME_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(anyhow!("invalid theme: {other} (expected light or dark)")),
        }
    }
}

/// Reads the theme slot. Missing, unreadable or unknown values fall back to
/// [`Theme::Light`].
#[tracing::instrument(skip(kv))]
pub fn load_theme<S: KvStore>(kv: &S) -> Theme {
    match kv.get(THEME_KEY) {
        Ok(Some(raw)) => raw.parse::<Theme>().unwrap_or_else(|err| {
            warn!(error = %err, "stored theme is malformed; using light");
            Theme::Light
        }),
        Ok(None) => Theme::Light,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "failed to read theme; using light");
            Theme::Light
        }
    }
}

/// Writes the theme slot. A failed write is returned as a notice; the caller
/// keeps using `theme` for the rest of the session.
#[tracing::instrument(skip(kv))]
pub fn save_theme<S: KvStore>(kv: &mut S, theme: Theme) -> Option<String> {
    match kv.set(THEME_KEY, theme.as_str()) {
        Ok(()) => {
            debug!(theme = %theme, "saved theme");
            None
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "failed to save theme");
            Some(format!("failed to save theme: {err:#}"))
        }
    }
}

/// Flips the stored theme and returns the new one.
pub fn toggle_theme<S: KvStore>(kv: &mut S) -> (Theme, Option<String>) {
    let next = load_theme(kv).toggled();
    let warning = save_theme(kv, next);
    (next, warning)
}
