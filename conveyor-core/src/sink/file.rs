use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::config::components::sink::{FileMode, FileSinkSettings, output_key};
use crate::message::{Message, WritableMessage};
use crate::sink::{Sink, SinkContext, render};
use crate::{Error, Result};

/// Appends every message as one JSON line to a file. The file is opened when the sink
/// is created, in truncate mode it is emptied at that point.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

pub(crate) fn new_from_config(
    _ctx: &SinkContext,
    config: &Config,
    name: &str,
) -> Result<Arc<dyn Sink>> {
    let settings: FileSinkSettings = config.unmarshal_key(&output_key(name))?;
    Ok(Arc::new(FileSink::new(settings)?))
}

impl FileSink {
    pub fn new(settings: FileSinkSettings) -> Result<Self> {
        if settings.filename.is_empty() {
            return Err(Error::Config("file sink needs a filename".to_string()));
        }
        let path = PathBuf::from(settings.filename);

        let mut options = std::fs::OpenOptions::new();
        options.create(true);
        match settings.mode {
            FileMode::Append => options.append(true),
            FileMode::Truncate => options.write(true).truncate(true),
        };
        let file = options
            .open(&path)
            .map_err(|e| Error::Sink(format!("can not open {}: {e}", path.display())))?;

        Ok(Self {
            path,
            file: Mutex::new(File::from_std(file)),
        })
    }

    async fn write_messages(&self, messages: Vec<Message>) -> Result<()> {
        let mut buf = String::new();
        for msg in &messages {
            buf.push_str(&msg.to_json()?);
            buf.push('\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| Error::Sink(format!("can not write to {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| Error::Sink(format!("can not flush {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_one(&self, msg: &dyn WritableMessage) -> Result<()> {
        self.write_messages(vec![msg.to_message()?]).await
    }

    async fn write(&self, batch: &[Box<dyn WritableMessage>]) -> Result<()> {
        self.write_messages(render(batch)?).await
    }
}
