use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report};
use innlevering::config::Submit;
use innlevering::types::{Flag, FlagStatus, SubmitResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{SubmitError, Submitter};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Line based protocol used by FAUST CTF: a greeting ending in an empty
/// line, then one flag per line in, one `<flag> <CODE> [message]` line out.
#[derive(Clone, Debug)]
pub struct FaustSubmitter {
    host: String,
    /// for the whole connection
    timeout: Duration,
}

impl FaustSubmitter {
    pub fn new(host: String, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    pub fn from_table(table: &toml::Table) -> Result<Self, Report> {
        let host = table
            .get("host")
            .ok_or(eyre!("Faust submitter requires host"))?
            .as_str()
            .ok_or(eyre!("Faust submitter host must be a string"))?
            .to_owned();

        let timeout = match table.get("timeout") {
            Some(secs) => {
                let secs = secs
                    .as_integer()
                    .filter(|s| *s > 0)
                    .ok_or(eyre!("Faust submitter timeout must be a positive integer"))?;
                Duration::from_secs(secs as u64)
            }
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self::new(host, timeout))
    }

    async fn exchange(&self, flags: &[Flag]) -> Result<Vec<SubmitResult>, SubmitError> {
        let socket = tokio::net::TcpStream::connect(&self.host).await?;

        // bufread over it
        let mut socket = tokio::io::BufStream::new(socket);

        debug!("Opened socket to {}.", self.host);

        // greeting, ends with an empty line
        let mut line = String::new();
        loop {
            line.clear();
            if socket.read_line(&mut line).await? == 0 {
                return Err(SubmitError::FormatError(
                    "connection closed during greeting".to_string(),
                ));
            }
            if line.trim().is_empty() {
                break;
            }
        }
        debug!("Header read.");

        // send all flags
        let all_flags = flags
            .iter()
            .map(|f| f.value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        socket.write_all(all_flags.as_bytes()).await?;
        socket.flush().await?;

        let mut statuses = Vec::with_capacity(flags.len());
        while statuses.len() < flags.len() {
            line.clear();
            if socket.read_line(&mut line).await? == 0 {
                warn!(
                    "EOF after {} of {} responses",
                    statuses.len(),
                    flags.len()
                );
                return Err(SubmitError::FormatError(format!(
                    "connection closed after {} of {} responses",
                    statuses.len(),
                    flags.len()
                )));
            }

            let body = line.trim();
            if body.is_empty() {
                continue;
            }
            statuses.push(parse_line(body)?);
        }

        debug!("Got all {} flags, so stopping.", flags.len());

        Ok(statuses)
    }
}

fn parse_line(line: &str) -> Result<SubmitResult, SubmitError> {
    let (flag, rest) = line
        .split_once(' ')
        .ok_or_else(|| SubmitError::FormatError(format!("unexpected line {line:?}")))?;

    // msg is optional
    let code = rest.split_once(' ').map_or(rest, |(code, _msg)| code);

    let status = match code {
        "OK" => FlagStatus::Accepted,
        "DUP" => FlagStatus::Duplicate,
        "OWN" => FlagStatus::Own,
        "OLD" => FlagStatus::Old,
        "INV" => FlagStatus::Invalid,
        // not accepting flags right now, try again later
        "ERR" => FlagStatus::Queued,
        _ => {
            warn!("Unknown flag status: {code} for flag {flag}, putting ERROR");
            FlagStatus::Error
        }
    };

    Ok(SubmitResult::new(flag, status, rest.trim()))
}

#[async_trait]
impl Submitter for FaustSubmitter {
    async fn submit(
        &self,
        flags: &[Flag],
        _config: &Submit,
    ) -> Result<Vec<SubmitResult>, SubmitError> {
        if flags.is_empty() {
            return Ok(Vec::new());
        }

        tokio::time::timeout(self.timeout, self.exchange(flags))
            .await
            .map_err(|_| SubmitError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const GREETING: &[u8] = b"FAUST CTF Flag Submission Server\nOne flag per line please!\n\n";

    fn config() -> Submit {
        Submit {
            flag_limit: 10,
            period: 1,
            flag_lifetime: 60,
            protocol_name: "faust".to_string(),
            protocol: toml::Table::new(),
        }
    }

    fn flags(values: &[&str]) -> Vec<Flag> {
        values
            .iter()
            .map(|v| Flag::queued(v, "a.py", "10.0.1.1", 0))
            .collect()
    }

    /// Answers each flag line with `reply(flag)`, giving up after `max` lines
    async fn server(max: usize, reply: fn(&str) -> String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            write.write_all(GREETING).await.unwrap();

            let mut lines = BufReader::new(read).lines();
            let mut answered = 0;
            while answered < max {
                let Ok(Some(flag)) = lines.next_line().await else {
                    break;
                };
                let answer = reply(&flag) + "\n";
                write.write_all(answer.as_bytes()).await.unwrap();
                answered += 1;
            }

            // half close so the client sees EOF, not a reset
            let _ = write.shutdown().await;
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        addr
    }

    #[tokio::test]
    async fn submits_and_parses() {
        let addr = server(usize::MAX, |flag| match flag {
            "FLAG_A" => format!("{flag} OK"),
            "FLAG_B" => format!("{flag} DUP already submitted"),
            "FLAG_C" => format!("{flag} ERR competition not running"),
            _ => format!("{flag} WAT"),
        })
        .await;

        let submitter = FaustSubmitter::new(addr, Duration::from_secs(5));
        let results = submitter
            .submit(&flags(&["FLAG_A", "FLAG_B", "FLAG_C", "FLAG_D"]), &config())
            .await
            .unwrap();

        assert_eq!(
            results,
            vec![
                SubmitResult::new("FLAG_A", FlagStatus::Accepted, "OK"),
                SubmitResult::new("FLAG_B", FlagStatus::Duplicate, "DUP already submitted"),
                SubmitResult::new("FLAG_C", FlagStatus::Queued, "ERR competition not running"),
                SubmitResult::new("FLAG_D", FlagStatus::Error, "WAT"),
            ]
        );
    }

    #[tokio::test]
    async fn early_close_is_an_error() {
        let addr = server(1, |flag| format!("{flag} OK")).await;

        let submitter = FaustSubmitter::new(addr, Duration::from_secs(5));
        let err = submitter
            .submit(&flags(&["FLAG_A", "FLAG_B"]), &config())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::FormatError(_)), "{err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let submitter = FaustSubmitter::new(addr, Duration::from_millis(200));
        let err = submitter
            .submit(&flags(&["FLAG_A"]), &config())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection() {
        // grab a free port, then close it
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let submitter = FaustSubmitter::new(addr, Duration::from_secs(5));
        let err = submitter
            .submit(&flags(&["FLAG_A"]), &config())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::NetworkError(_)), "{err:?}");
    }

    #[test]
    fn table_parsing() {
        let table: toml::Table = toml::from_str("host = \"10.0.13.37:1337\"\ntimeout = 3").unwrap();
        let faust = FaustSubmitter::from_table(&table).unwrap();
        assert_eq!(faust.host, "10.0.13.37:1337");
        assert_eq!(faust.timeout, Duration::from_secs(3));

        let table: toml::Table = toml::from_str("host = 5").unwrap();
        assert!(FaustSubmitter::from_table(&table).is_err());

        let table: toml::Table = toml::from_str("host = \"h:1\"\ntimeout = 0").unwrap();
        assert!(FaustSubmitter::from_table(&table).is_err());
    }
}
