use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Output, OutputKind};
use crate::domain::{Content, SendError};
use crate::layout::Layout;

type Sink = Box<dyn Write + Send>;

/// Writes one JSON object per message, newline terminated.
pub struct StdoutOutput {
    name: String,
    sink: Mutex<Sink>,
}

impl StdoutOutput {
    pub fn new(name: String) -> Self {
        Self::with_sink(name, Box::new(std::io::stdout()))
    }

    pub fn with_sink(name: String, sink: Sink) -> Self {
        Self {
            name,
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Output for StdoutOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Stdout
    }

    fn describe_layout_capability(&self) -> Layout {
        Layout::Markdown
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        let encode = |reason: String| SendError::Encode {
            output: self.name.clone(),
            reason,
        };
        let mut line = serde_json::to_vec(content).map_err(|e| encode(e.to_string()))?;
        line.push(b'\n');

        let mut sink = self
            .sink
            .lock()
            .map_err(|_| encode("sink lock poisoned".to_string()))?;
        sink.write_all(&line)
            .and_then(|_| sink.flush())
            .map_err(|e| SendError::Transport {
                output: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_json_lines() {
        let buf = Shared::default();
        let output = StdoutOutput::with_sink("out".into(), Box::new(buf.clone()));
        let content = Content::from([("title".to_string(), "a".to_string())]);
        output.send(&content).await.unwrap();
        output.send(&content).await.unwrap();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "{\"title\":\"a\"}\n{\"title\":\"a\"}\n");
    }
}
