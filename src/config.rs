use anyhow::{bail, Context};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const PASSWORD_ENV: &str = "OBS_PASSWORD";

#[derive(Debug, Clone)]
pub struct Config {
    pub obs: ObsConfig,
    pub sources: Vec<OverlaySource>,
    pub reload_delay: Duration,
    pub check_interval: Duration,
    pub call_timeout: Duration,
    pub cache_file: PathBuf,
    pub player_command: String,
    pub folder_refresh: FolderRefresh,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            obs: ObsConfig::default(),
            sources: default_sources(),
            reload_delay: Duration::from_millis(1000),
            check_interval: Duration::from_millis(1000),
            call_timeout: Duration::from_millis(5000),
            cache_file: PathBuf::from("./.spotify-current-song.json"),
            player_command: "sp".to_string(),
            folder_refresh: FolderRefresh::Button,
        }
    }
}

impl Config {
    /// Loads the configuration from `explicit`, or from the first candidate
    /// file found next to the working directory or the executable.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file does not exist: {}", path.display());
                }
                Self::from_file(path)?
            }
            None => match candidates().into_iter().find(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };

        if let Ok(password) = env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                config.obs.password = Some(password);
            }
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }
}

fn candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(current_dir) = env::current_dir() {
        candidates.push(current_dir.join("config.toml"));
        candidates.push(current_dir.join("config").join("config.toml"));
        candidates.push(current_dir.join("config").join("nowplaying-obs.toml"));
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("config.toml"));
            candidates.push(dir.join("config").join("config.toml"));
            candidates.push(dir.join("config").join("nowplaying-obs.toml"));
        }
    }

    candidates
}

#[derive(Debug, Clone)]
pub struct ObsConfig {
    pub url: String,
    pub password: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4455".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SourceKind {
    /// A scene item that is hidden and re-shown to reload it.
    #[serde(rename = "source", alias = "direct")]
    DirectSource,
    /// A browser source refreshed through its own refresh primitive.
    #[serde(rename = "folder", alias = "container")]
    ContainerFolder,
}

/// One overlay element the reload sequence acts on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySource {
    pub name: String,
    #[serde(alias = "type")]
    pub kind: SourceKind,
    pub scene_name: String,
}

impl OverlaySource {
    pub fn new(name: &str, kind: SourceKind, scene_name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            scene_name: scene_name.to_string(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == SourceKind::DirectSource
    }
}

fn default_sources() -> Vec<OverlaySource> {
    vec![
        OverlaySource::new("Spotify", SourceKind::DirectSource, "overlay"),
        OverlaySource::new("Spotify Card", SourceKind::ContainerFolder, "overlay"),
    ]
}

/// How folder sources are refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderRefresh {
    /// Press the browser source's "refresh cache" property button.
    #[default]
    Button,
    /// Write the current `url` setting back so the source reloads it.
    Settings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigDocument {
    obs_url: Option<String>,
    obs_password: Option<String>,
    sources: Option<Vec<OverlaySource>>,
    reload_delay: Option<u64>,
    cache_file: Option<PathBuf>,
    check_interval: Option<u64>,
    call_timeout: Option<u64>,
    player_command: Option<String>,
    folder_refresh: Option<FolderRefresh>,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let defaults = Config::default();
        let millis = |ms: Option<u64>, fallback: Duration| {
            ms.map(Duration::from_millis).unwrap_or(fallback)
        };

        Config {
            obs: ObsConfig {
                url: value.obs_url.unwrap_or(defaults.obs.url),
                password: value.obs_password.filter(|p| !p.is_empty()),
            },
            sources: value.sources.unwrap_or(defaults.sources),
            reload_delay: millis(value.reload_delay, defaults.reload_delay),
            check_interval: millis(value.check_interval, defaults.check_interval)
                .max(Duration::from_millis(1)),
            call_timeout: millis(value.call_timeout, defaults.call_timeout),
            cache_file: value.cache_file.unwrap_or(defaults.cache_file),
            player_command: value.player_command.unwrap_or(defaults.player_command),
            folder_refresh: value.folder_refresh.unwrap_or(defaults.folder_refresh),
        }
    }
}
