use argh::FromArgs;
use color_eyre::{eyre::eyre, Report};
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn default_flag_limit() -> usize {
    250
}

fn default_period() -> u64 {
    60
}

fn default_flag_lifetime() -> u64 {
    11 * 60
}

fn default_capacity() -> usize {
    16
}

/// How and where flags are submitted
#[derive(Debug, Clone, Deserialize)]
pub struct Submit {
    /// max flags per period
    #[serde(default = "default_flag_limit")]
    pub flag_limit: usize,
    /// seconds
    #[serde(default = "default_period")]
    pub period: u64,
    /// queued flags older than this many seconds are skipped
    #[serde(default = "default_flag_lifetime")]
    pub flag_lifetime: u64,
    pub protocol_name: String,
    /// only read by the protocol itself
    #[serde(default)]
    pub protocol: toml::Table,
}

impl Submit {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    pub fn validate(&self) -> Result<(), Report> {
        if self.flag_limit == 0 {
            return Err(eyre!("submit.flag_limit must be positive"));
        }
        if self.period == 0 {
            return Err(eyre!("submit.period must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    /// e.g. sqlite://flags.sqlite
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Announcer {
    /// events buffered per live subscriber before it is dropped
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for Announcer {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Root {
    pub submit: Submit,
    pub database: Database,
    #[serde(default)]
    pub announcer: Announcer,
}

impl Root {
    pub fn from_toml(text: &str) -> Result<Self, Report> {
        let root: Root = toml::from_str(text)?;
        root.submit.validate()?;
        Ok(root)
    }
}

/// Somewhere a fresh configuration can be read from. The submit loop asks
/// for a new snapshot every cycle.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Result<Arc<Root>, Report>;
}

/// Re-read from disk on every snapshot, so edits apply on the next cycle
#[derive(Debug, Clone)]
pub struct TomlFile {
    path: PathBuf,
}

impl TomlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for TomlFile {
    fn snapshot(&self) -> Result<Arc<Root>, Report> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| eyre!("reading {}: {e}", self.path.display()))?;
        Ok(Arc::new(Root::from_toml(&text)?))
    }
}

/// In-process configuration that someone else can swap out
#[derive(Debug)]
pub struct Shared {
    current: RwLock<Arc<Root>>,
}

impl Shared {
    pub fn new(root: Root) -> Self {
        Self {
            current: RwLock::new(Arc::new(root)),
        }
    }

    pub fn set(&self, root: Root) -> Result<(), Report> {
        root.submit.validate()?;
        *self.current.write() = Arc::new(root);
        Ok(())
    }
}

impl ConfigSource for Shared {
    fn snapshot(&self) -> Result<Arc<Root>, Report> {
        Ok(self.current.read().clone())
    }
}

#[derive(FromArgs)]
/// Innlevering, the flag submitter
pub struct Args {
    /// path to toml configuration file
    #[argh(positional)]
    pub toml: String,

    /// enable debug logging
    #[argh(switch)]
    pub debug: bool,
}

impl Args {
    pub fn get_config(&self) -> Result<Root, Report> {
        let toml = std::fs::read_to_string(&self.toml)?;
        Root::from_toml(&toml)
    }

    pub fn config_source(&self) -> TomlFile {
        TomlFile::new(&self.toml)
    }

    pub fn setup_logging(&self) -> Result<(), Report> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if self.debug {
                "debug,sqlx=warn"
            } else {
                "info"
            }
            .into()
        });

        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;

        Ok(())
    }
}
