use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report};
use innlevering::config::Submit;
use innlevering::types::{Flag, SubmitResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// implementations
mod faust;
pub use faust::FaustSubmitter;
mod dummy;
pub use dummy::DummySubmitter;

/// Did not manage to submit
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("{0}")]
    NetworkError(#[from] std::io::Error),
    /// The format of the response was not as expected
    #[error("{0}")]
    FormatError(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

impl SubmitError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::NetworkError(_) => "NetworkError",
            SubmitError::FormatError(_) => "FormatError",
            SubmitError::Timeout(_) => "Timeout",
        }
    }

    /// Short text stored with every flag of the failed batch
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Implements the low-level operation of submitting a bunch of flags.
///
/// Must return one result per flag. Anything going wrong with the
/// checksystem itself should be an `Err`, the caller keeps the flags queued.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        flags: &[Flag],
        config: &Submit,
    ) -> Result<Vec<SubmitResult>, SubmitError>;
}

type Factory = Box<dyn Fn(&toml::Table) -> Result<Arc<dyn Submitter>, Report> + Send + Sync>;

/// Protocols by name. Looked up from the current config every cycle, so the
/// protocol can be changed without a restart.
pub struct Submitters {
    factories: HashMap<String, Factory>,
}

impl Submitters {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&toml::Table) -> Result<Arc<dyn Submitter>, Report> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn from_conf(&self, submit: &Submit) -> Result<Arc<dyn Submitter>, Report> {
        let factory = self
            .factories
            .get(&submit.protocol_name)
            .ok_or(eyre!("Unknown submitter {}", submit.protocol_name))?;

        factory(&submit.protocol)
    }
}

impl Default for Submitters {
    fn default() -> Self {
        let mut submitters = Self::empty();
        submitters.register("dummy", dummy);
        submitters.register("faust", faust);
        submitters
    }
}

fn dummy(_: &toml::Table) -> Result<Arc<dyn Submitter>, Report> {
    Ok(Arc::new(DummySubmitter {}))
}

fn faust(table: &toml::Table) -> Result<Arc<dyn Submitter>, Report> {
    Ok(Arc::new(FaustSubmitter::from_table(table)?))
}

impl fmt::Debug for Submitters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn submit(name: &str, protocol: &str) -> Submit {
        Submit {
            flag_limit: 10,
            period: 1,
            flag_lifetime: 60,
            protocol_name: name.to_string(),
            protocol: toml::from_str(protocol).unwrap(),
        }
    }

    #[test]
    fn resolves_by_name() {
        let submitters = Submitters::default();
        assert!(submitters.from_conf(&submit("dummy", "")).is_ok());
        assert!(submitters
            .from_conf(&submit("faust", r#"host = "127.0.0.1:1337""#))
            .is_ok());
    }

    #[test]
    fn unknown_or_incomplete_is_an_error() {
        let submitters = Submitters::default();
        assert!(submitters.from_conf(&submit("netcat", "")).is_err());
        // faust needs a host
        assert!(submitters.from_conf(&submit("faust", "")).is_err());
    }

    #[test]
    fn error_description() {
        let err = SubmitError::NetworkError(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(err.describe(), "NetworkError: connection refused");
        assert_eq!(
            SubmitError::Timeout(Duration::from_secs(3)).describe(),
            "Timeout: no answer within 3s"
        );
    }
}
