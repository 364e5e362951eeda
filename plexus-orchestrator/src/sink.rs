//! Combined log sink. Every process output line funnels through one writer
//! task, which numbers it and writes it whole.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SINK_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn marker(self) -> char {
        match self {
            Stream::Stdout => '|',
            Stream::Stderr => '!',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub process: String,
    pub stream: Stream,
    pub text: String,
}

impl LogLine {
    fn render(&self, seq: u64) -> String {
        format!("{seq} {}{} {}\n", self.process, self.stream.marker(), self.text)
    }
}

/// Cloneable producer side of the sink. The writer task ends once every
/// sender is dropped.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: mpsc::Sender<LogLine>,
}

impl LogSender {
    /// Queue one line. Returns `false` once the writer task is gone.
    pub async fn send(&self, process: &str, stream: Stream, text: String) -> bool {
        self.tx
            .send(LogLine {
                process: process.to_string(),
                stream,
                text,
            })
            .await
            .is_ok()
    }
}

/// Start the writer task over `writer`. The task resolves to the number of
/// lines written.
pub fn spawn_sink<W>(mut writer: W) -> (LogSender, JoinHandle<std::io::Result<u64>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<LogLine>(SINK_CAPACITY);
    let task = tokio::spawn(async move {
        let mut seq = 0_u64;
        while let Some(line) = rx.recv().await {
            seq += 1;
            writer.write_all(line.render(seq).as_bytes()).await?;
            writer.flush().await?;
        }
        writer.shutdown().await?;
        Ok(seq)
    });
    (LogSender { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_numbered_and_tagged() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (sender, task) = spawn_sink(client);

        let other = sender.clone();
        assert!(sender.send("p1", Stream::Stdout, "hello".to_string()).await);
        assert!(other.send("p2", Stream::Stderr, "oops".to_string()).await);
        assert!(sender.send("p1", Stream::Stdout, String::new()).await);
        drop(sender);
        drop(other);

        assert_eq!(task.await.unwrap().unwrap(), 3);
        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, "1 p1| hello\n2 p2! oops\n3 p1| \n");
    }

    #[tokio::test]
    async fn concurrent_senders_never_split_lines() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (sender, task) = spawn_sink(client);
        let mut producers = Vec::new();
        for p in 0..4 {
            let sender = sender.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    sender
                        .send(&format!("p{p}"), Stream::Stdout, format!("line {i}"))
                        .await;
                }
            }));
        }
        drop(sender);
        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(task.await.unwrap().unwrap(), 200);

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out)
            .await
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 200);
        for (i, line) in lines.iter().enumerate() {
            let (seq, rest) = line.split_once(' ').unwrap();
            assert_eq!(seq.parse::<usize>().unwrap(), i + 1);
            assert!(rest.starts_with('p') && rest.contains("| line "), "torn line: {line}");
        }
    }
}
