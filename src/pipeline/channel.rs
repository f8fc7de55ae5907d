//! Bounded, cancellable channel handles between adjacent stages.
//!
//! Each handle pairs a crossbeam endpoint with the pipeline's cancellation
//! token, so every blocking send or receive also wakes on cancellation.
//! Dropping the `StageOutput` closes the channel; the downstream `recv`
//! then drains what is buffered and reports the end of the stream.

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::message::Message;
use crossbeam_channel::{bounded, select, Receiver, Sender};

/// Create one bounded channel for an adjacent stage pair.
pub fn stage_channel(capacity: usize, cancel: &CancellationToken) -> (StageOutput, StageInput) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        StageOutput {
            tx,
            cancel: cancel.clone(),
            sent: 0,
        },
        StageInput {
            rx,
            cancel: cancel.clone(),
            received: 0,
        },
    )
}

/// Receiving end held by a processor or sink.
#[derive(Debug)]
pub struct StageInput {
    rx: Receiver<Message>,
    cancel: CancellationToken,
    received: u64,
}

impl StageInput {
    /// Block until a message arrives.
    ///
    /// Returns `Ok(None)` once the upstream has closed and the buffer is
    /// empty, and `Err(Cancelled)` as soon as cancellation is triggered.
    pub fn recv(&mut self) -> StageResult<Option<Message>> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(msg) => {
                    self.received += 1;
                    Ok(Some(msg))
                }
                Err(_) => Ok(None),
            },
            recv(self.cancel.signal()) -> _ => Err(StageError::Cancelled),
        }
    }

    /// Messages received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Messages currently buffered in the channel.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Sending end held by a source or processor.
#[derive(Debug)]
pub struct StageOutput {
    tx: Sender<Message>,
    cancel: CancellationToken,
    sent: u64,
}

impl StageOutput {
    /// Block until the downstream has room for `message`.
    ///
    /// A downstream that has already gone away only does so while the
    /// pipeline is shutting down, so that is reported as `Cancelled` too.
    pub fn send(&mut self, message: Message) -> StageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        select! {
            send(self.tx, message) -> res => match res {
                Ok(()) => {
                    self.sent += 1;
                    Ok(())
                }
                Err(_) => Err(StageError::Cancelled),
            },
            recv(self.cancel.signal()) -> _ => Err(StageError::Cancelled),
        }
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::port::PayloadKind;
    use std::thread;
    use std::time::{Duration, Instant};

    fn msg(seq: u64) -> Message {
        Message::new(seq, PayloadKind::Bytes, Vec::new())
    }

    #[test]
    fn test_close_drains_buffer_then_ends() {
        let token = CancellationToken::new();
        let (mut out, mut input) = stage_channel(4, &token);
        out.send(msg(1)).unwrap();
        out.send(msg(2)).unwrap();
        assert_eq!(out.sent(), 2);
        drop(out);

        assert_eq!(input.recv().unwrap().map(|m| m.seq), Some(1));
        assert_eq!(input.recv().unwrap().map(|m| m.seq), Some(2));
        assert!(input.recv().unwrap().is_none());
        assert_eq!(input.received(), 2);
    }

    #[test]
    fn test_full_channel_blocks_until_cancel() {
        let token = CancellationToken::new();
        let (mut out, input) = stage_channel(1, &token);
        out.send(msg(1)).unwrap();
        assert_eq!(input.pending(), 1);
        assert_eq!(out.capacity(), 1);

        let canceller = token.canceller();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(matches!(out.send(msg(2)), Err(StageError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_empty_channel_recv_wakes_on_cancel() {
        let token = CancellationToken::new();
        let (_out, mut input) = stage_channel(1, &token);
        let canceller = token.canceller();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert!(matches!(input.recv(), Err(StageError::Cancelled)));
        handle.join().unwrap();
    }

    #[test]
    fn test_send_to_dropped_receiver_reports_cancelled() {
        let token = CancellationToken::new();
        let (mut out, input) = stage_channel(1, &token);
        drop(input);
        assert!(matches!(out.send(msg(1)), Err(StageError::Cancelled)));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let token = CancellationToken::new();
        let (out, _input) = stage_channel(0, &token);
        assert_eq!(out.capacity(), 1);
    }
}
