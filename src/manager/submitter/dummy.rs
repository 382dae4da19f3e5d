use async_trait::async_trait;
use innlevering::config::Submit;
use innlevering::types::{Flag, FlagStatus, SubmitResult};
use rand::Rng;

use super::{SubmitError, Submitter};

/// Makes up an answer for every flag, for trying the farm without a game
#[derive(Clone, Debug)]
pub struct DummySubmitter {}

#[async_trait]
impl Submitter for DummySubmitter {
    async fn submit(
        &self,
        flags: &[Flag],
        _config: &Submit,
    ) -> Result<Vec<SubmitResult>, SubmitError> {
        let mut rng = rand::thread_rng();
        let statuses = flags
            .iter()
            .map(|flag| {
                let status = match rng.gen_range(0..=99) {
                    0..=49 => FlagStatus::Accepted,
                    50..=59 => FlagStatus::Duplicate,
                    60..=69 => FlagStatus::Own,
                    70..=79 => FlagStatus::Old,
                    80..=89 => FlagStatus::Invalid,
                    _ => FlagStatus::Queued,
                };
                SubmitResult::new(flag.value.clone(), status.clone(), format!("dummy {status}"))
            })
            .collect();
        Ok(statuses)
    }
}
