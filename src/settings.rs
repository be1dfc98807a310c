use std::path::PathBuf;

use actix_web::cookie::time::Duration;

use crate::thread_path;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("{name} must be a non-negative integer, got `{value}`")] NotANumber { name: &'static str, value: String },
    #[error("{name} contains an invalid path `{value}`")] BadPath { name: &'static str, value: String },
}

/// Runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub bind: String,
    /// Normalized thread prefixes. Empty means every path is accepted.
    pub allowed_paths: Vec<String>,
    /// How long the ownership cookie lives, i.e. the edit/delete window.
    pub edit_window: Duration,
    pub origins: Vec<String>,
    pub data_dir: PathBuf,
    pub enable_hsts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            allowed_paths: Vec::new(),
            edit_window: Duration::seconds(900),
            origins: vec!["http://localhost:5173".into()],
            data_dir: PathBuf::from("data"),
            enable_hsts: false,
        }
    }
}

fn list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

fn flag_env(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut s = Self::default();
        if let Ok(bind) = std::env::var("MARGINALIA_BIND") {
            s.bind = bind;
        }
        s = s.with_allowed_paths(list_env("MARGINALIA_ALLOWED_PATHS"))?;
        if let Ok(v) = std::env::var("MARGINALIA_EDIT_WINDOW") {
            let secs: i64 = v.trim().parse().ok().filter(|n| *n >= 0)
                .ok_or(SettingsError::NotANumber { name: "MARGINALIA_EDIT_WINDOW", value: v.clone() })?;
            s.edit_window = Duration::seconds(secs);
        }
        let origins = list_env("MARGINALIA_ORIGINS");
        if !origins.is_empty() {
            s.origins = origins;
        }
        if let Ok(dir) = std::env::var("MARGINALIA_DATA_DIR") {
            s.data_dir = PathBuf::from(dir);
        }
        s.enable_hsts = flag_env("MARGINALIA_ENABLE_HSTS");
        Ok(s)
    }

    /// Restrict comments to threads under these prefixes.
    pub fn with_allowed_paths<I, S>(mut self, paths: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_paths = paths
            .into_iter()
            .map(|p| {
                thread_path::normalize(p.as_ref()).map_err(|_| SettingsError::BadPath {
                    name: "MARGINALIA_ALLOWED_PATHS",
                    value: p.as_ref().to_owned(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn with_edit_window(mut self, window: Duration) -> Self {
        self.edit_window = window;
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_paths_are_normalized() {
        let s = Settings::default().with_allowed_paths(["blog/", "/docs//"]).unwrap();
        assert_eq!(s.allowed_paths, vec!["/blog".to_string(), "/docs".to_string()]);
    }

    #[test]
    fn invalid_allowed_path_is_an_error() {
        assert!(Settings::default().with_allowed_paths(["/%FF"]).is_err());
    }

    #[test]
    fn defaults_are_permissive() {
        let s = Settings::default();
        assert!(s.allowed_paths.is_empty());
        assert_eq!(s.edit_window, Duration::seconds(900));
        assert_eq!(s.snapshot_path(), PathBuf::from("data/state.json"));
    }
}
