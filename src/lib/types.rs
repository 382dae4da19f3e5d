use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::models::FlagModel;

/// Outcome of a flag. Protocols may report statuses this crate does not
/// know about, those end up in `Other` and are stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::EnumString, strum::EnumIter)]
pub enum FlagStatus {
    /// Waiting to be submitted
    #[strum(serialize = "QUEUED")]
    Queued,
    /// Expired before it was ever sent
    #[strum(serialize = "SKIPPED")]
    Skipped,
    #[strum(serialize = "ACCEPTED")]
    Accepted,
    #[strum(serialize = "REJECTED")]
    Rejected,
    #[strum(serialize = "DUPLICATE")]
    Duplicate,
    /// Flag belongs to our own team
    #[strum(serialize = "OWN")]
    Own,
    #[strum(serialize = "OLD")]
    Old,
    #[strum(serialize = "INVALID")]
    Invalid,
    /// Server refused the flag for a reason of its own
    #[strum(serialize = "ERROR")]
    Error,
    #[strum(default)]
    Other(String),
}

impl FlagStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FlagStatus::Queued => "QUEUED",
            FlagStatus::Skipped => "SKIPPED",
            FlagStatus::Accepted => "ACCEPTED",
            FlagStatus::Rejected => "REJECTED",
            FlagStatus::Duplicate => "DUPLICATE",
            FlagStatus::Own => "OWN",
            FlagStatus::Old => "OLD",
            FlagStatus::Invalid => "INVALID",
            FlagStatus::Error => "ERROR",
            FlagStatus::Other(s) => s,
        }
    }

    /// Everything except `Queued` is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlagStatus::Queued)
    }
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FlagStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub value: String,
    pub sploit: String,
    pub team: String,
    /// unix seconds
    pub discovered_at: i64,
    pub status: FlagStatus,
    pub checksystem_response: Option<String>,
    /// 0 if never processed
    pub sent_cycle: i64,
}

impl Flag {
    /// A freshly captured flag
    pub fn queued(value: &str, sploit: &str, team: &str, discovered_at: i64) -> Self {
        Self {
            value: value.to_owned(),
            sploit: sploit.to_owned(),
            team: team.to_owned(),
            discovered_at,
            status: FlagStatus::Queued,
            checksystem_response: None,
            sent_cycle: 0,
        }
    }

    pub fn from_model(model: FlagModel) -> Self {
        let FlagModel {
            value,
            sploit,
            team,
            discovered_at,
            status,
            checksystem_response,
            sent_cycle,
        } = model;

        // EnumString has a default variant, so this never fails
        let status = FlagStatus::from_str(&status).unwrap_or_else(|_| {
            warn!("Unparseable status {status} for flag {value}");
            FlagStatus::Other(status.clone())
        });

        Self {
            value,
            sploit,
            team,
            discovered_at,
            status,
            checksystem_response,
            sent_cycle,
        }
    }

    pub fn to_model(self) -> FlagModel {
        let Flag {
            value,
            sploit,
            team,
            discovered_at,
            status,
            checksystem_response,
            sent_cycle,
        } = self;

        FlagModel {
            value,
            sploit,
            team,
            discovered_at,
            status: status.to_string(),
            checksystem_response,
            sent_cycle,
        }
    }
}

/// What a protocol says about one flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitResult {
    pub flag: String,
    pub status: FlagStatus,
    pub response: String,
}

impl SubmitResult {
    pub fn new(flag: impl Into<String>, status: FlagStatus, response: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            status,
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn flag_ser_deser() {
        for status in FlagStatus::iter().filter(|s| !matches!(s, FlagStatus::Other(_))) {
            let status_str = status.to_string();
            let status2 = FlagStatus::from_str(&status_str).unwrap();
            assert_eq!(status, status2);
        }
    }

    #[test]
    fn unknown_status_is_kept() {
        let status = FlagStatus::from_str("RESUBMIT_LATER").unwrap();
        assert_eq!(status, FlagStatus::Other("RESUBMIT_LATER".to_string()));
        assert_eq!(status.to_string(), "RESUBMIT_LATER");
        assert!(status.is_terminal());
        assert!(!FlagStatus::Queued.is_terminal());
    }

    #[test]
    fn model_conversion() {
        let mut flag = Flag::queued("FLAG{a}", "sploit.py", "10.0.1.1", 1000);
        flag.status = FlagStatus::Accepted;
        flag.sent_cycle = 4;

        let model = flag.clone().to_model();
        assert_eq!(model.status, "ACCEPTED");
        assert_eq!(Flag::from_model(model), flag);
    }
}
