// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::VecDeque,
    io::{BufWriter, Write},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffered sink for the protocol log lines.
///
/// Handlers push lines from the hot path; a flush drains the queue in one
/// batch and appends the trailing newline each line is promised to carry.
/// The write target is injected so the binary can hand in stdout while tests
/// hand in a shared buffer.
pub struct BufferedLog {
    queue: Mutex<VecDeque<String>>,
    stream: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for BufferedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedLog")
            .field("queued", &lock(&self.queue).len())
            .finish()
    }
}

impl BufferedLog {
    pub fn new(stream: impl Write + Send + 'static) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            stream: Mutex::new(Box::new(stream)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(BufWriter::new(std::io::stdout()))
    }

    pub fn push(&self, line: String) {
        lock(&self.queue).push_back(line);
    }

    /// Drains up to `limit` queued lines (all of them when `None`).
    pub fn flush(&self, limit: Option<usize>) {
        let batch: Vec<String> = {
            let mut queue = lock(&self.queue);
            let take = limit.map_or(queue.len(), |n| n.min(queue.len()));
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return;
        }

        let mut stream = lock(&self.stream);
        for line in &batch {
            if writeln!(stream, "{line}").is_err() {
                debug!("log sink write failed, dropping {} lines", batch.len());
                return;
            }
        }
        if let Err(e) = stream.flush() {
            debug!("log sink flush failed: {e}");
        }
    }

    pub fn close(&self) {
        self.flush(None);
    }
}
