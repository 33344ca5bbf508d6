use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::error::{BackupError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// one consumer's view of the forked stream
pub type ForkReader = StreamReader<ReceiverStream<std::result::Result<Bytes, std::io::Error>>, Bytes>;

pub struct ForkHandle {
    pub readers: Vec<ForkReader>,
    pub task: JoinHandle<Result<()>>,
}

/// tees `source` into `n` independent readers (C7). Each reader is backed by
/// a bounded channel of `capacity` chunks — a slow consumer applies
/// backpressure to the whole fork rather than letting the forker buffer
/// unboundedly in memory. If any consumer is dropped mid-stream the fork
/// task exits with an error rather than silently continuing with a partial
/// export.
pub fn fork<R>(mut source: R, n: usize, capacity: usize) -> ForkHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut senders = Vec::with_capacity(n);
    let mut readers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, std::io::Error>>(capacity);
        senders.push(tx);
        readers.push(StreamReader::new(ReceiverStream::new(rx)));
    }

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let read = source.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            let chunk = Bytes::copy_from_slice(&buf[..read]);
            for tx in &senders {
                if tx.send(Ok(chunk.clone())).await.is_err() {
                    return Err(BackupError::TransferFailed(
                        "stream fork consumer disconnected before export completed".into(),
                    ));
                }
            }
        }
        Ok(())
    });

    ForkHandle { readers, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn every_reader_receives_the_full_stream_byte_for_byte() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(4096);
        let source = Cursor::new(payload.clone());

        let mut handle = fork(source, 3, 4);
        let mut outputs = vec![];
        for mut reader in handle.readers.drain(..) {
            let mut out = vec![];
            reader.read_to_end(&mut out).await.unwrap();
            outputs.push(out);
        }

        handle.task.await.unwrap().unwrap();
        for out in outputs {
            assert_eq!(out, payload);
        }
    }

    #[tokio::test]
    async fn a_dropped_consumer_fails_the_fork_task() {
        let payload = vec![0u8; CHUNK_SIZE * 8];
        let source = Cursor::new(payload);

        let mut handle = fork(source, 2, 1);
        // drop one reader immediately, keep the other draining slowly
        let mut survivor = handle.readers.remove(0);
        drop(handle.readers);

        let mut out = vec![];
        let _ = survivor.read_to_end(&mut out).await;

        let result = handle.task.await.unwrap();
        assert!(result.is_err());
    }
}
