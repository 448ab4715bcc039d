use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::Message;
use crate::source::{MessageStream, Source, SourceChannel};
use crate::{Error, Result};

/// FileSource replays a file of JSON envelopes, one per line, and completes at the
/// end of the file. Malformed lines are logged and skipped.
pub struct FileSource {
    path: PathBuf,
    channel: SourceChannel,
    stopped: CancellationToken,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channel: SourceChannel::default(),
            stopped: CancellationToken::new(),
        }
    }

    async fn read_lines(&self, cln_token: &CancellationToken) -> Result<usize> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| Error::Source(format!("can not open {}: {e}", self.path.display())))?;
        let mut lines = BufReader::new(file).lines();
        let mut count = 0;

        loop {
            let line = tokio::select! {
                biased;
                _ = cln_token.cancelled() => return Ok(count),
                _ = self.stopped.cancelled() => return Ok(count),
                line = lines.next_line() => line.map_err(|e| {
                    Error::Source(format!("can not read {}: {e}", self.path.display()))
                })?,
            };

            let Some(line) = line else {
                return Ok(count);
            };
            if line.trim().is_empty() {
                continue;
            }

            let msg = match Message::from_json(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(path = %self.path.display(), ?e, "skipping malformed line");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = cln_token.cancelled() => return Ok(count),
                _ = self.stopped.cancelled() => return Ok(count),
                sent = self.channel.send(msg) => sent?,
            }
            count += 1;
        }
    }
}

#[async_trait]
impl Source for FileSource {
    fn data(&self) -> MessageStream {
        self.channel.stream()
    }

    async fn run(&self, cln_token: CancellationToken) -> Result<()> {
        let result = self.read_lines(&cln_token).await;
        self.channel.close();

        let count = result?;
        info!(path = %self.path.display(), count, "finished reading file");
        Ok(())
    }

    fn stop(&self) {
        self.stopped.cancel();
    }
}
