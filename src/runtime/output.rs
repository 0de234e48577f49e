//! Renderer output handling: install-prompt auto-answer and a bounded stderr tail.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::ChildStdin,
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::domain::DeckId;

const TAIL_CAPACITY: usize = 4 * 1024;
const PROMPT_WINDOW: usize = 256;

pub type SharedStdin = Arc<AsyncMutex<Option<ChildStdin>>>;

/// Interactive "install theme now?" style question the renderer asks on first use.
pub fn is_install_prompt(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("install") && (lowered.contains('?') || lowered.contains("(y/n)"))
}

/// Last few KiB of a stream, kept for error reports.
#[derive(Debug, Default, Clone)]
pub struct OutputTail {
    bytes: Arc<Mutex<VecDeque<u8>>>,
}

impl OutputTail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: &[u8]) {
        let mut bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bytes.extend(chunk.iter().copied());
        let overflow = bytes.len().saturating_sub(TAIL_CAPACITY);
        bytes.drain(..overflow);
    }

    pub fn snapshot(&self) -> String {
        let bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (front, back) = bytes.as_slices();
        let mut joined = Vec::with_capacity(bytes.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        String::from_utf8_lossy(&joined).trim().to_string()
    }
}

/// Drain one output stream of a renderer, answering install prompts and
/// optionally recording what it printed into `tail`.
pub fn watch_stream<R>(
    deck_id: DeckId,
    stream_name: &'static str,
    mut reader: R,
    stdin: SharedStdin,
    tail: Option<OutputTail>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0_u8; 2048];
        let mut window = String::new();
        loop {
            let read = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    debug!(
                        target = "runtime::supervisor",
                        op = "watch_output",
                        deck_id = %deck_id,
                        stream = stream_name,
                        error = %err,
                        "Renderer output stream closed with error"
                    );
                    break;
                }
            };
            let chunk = &buf[..read];
            if let Some(tail) = &tail {
                tail.push(chunk);
            }

            window.push_str(&String::from_utf8_lossy(chunk));
            if window.len() > PROMPT_WINDOW {
                let mut cut = window.len() - PROMPT_WINDOW;
                while !window.is_char_boundary(cut) {
                    cut += 1;
                }
                window.drain(..cut);
            }

            if is_install_prompt(&window) {
                window.clear();
                answer_yes(deck_id, stream_name, &stdin).await;
            }
        }
    })
}

async fn answer_yes(deck_id: DeckId, stream_name: &'static str, stdin: &SharedStdin) {
    let mut guard = stdin.lock().await;
    let Some(pipe) = guard.as_mut() else {
        return;
    };
    let written = async {
        pipe.write_all(b"y\n").await?;
        pipe.flush().await
    }
    .await;
    match written {
        Ok(()) => info!(
            target = "runtime::supervisor",
            op = "answer_install_prompt",
            result = "ok",
            deck_id = %deck_id,
            stream = stream_name,
            "Answered renderer install prompt"
        ),
        Err(err) => {
            warn!(
                target = "runtime::supervisor",
                op = "answer_install_prompt",
                result = "error",
                deck_id = %deck_id,
                stream = stream_name,
                error = %err,
                "Failed to answer renderer install prompt"
            );
            guard.take();
        }
    }
}
