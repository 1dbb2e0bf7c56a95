use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rdkafka::error::KafkaError;

use super::{
    DeadLetter, DeadLetterSink, InboundMessage, MessageHeader, MessageSource, SinkError,
    SourceError,
};

/// Build a message on partition 0 of `orders`
pub(crate) fn inbound(offset: i64, payload: &[u8]) -> InboundMessage {
    InboundMessage {
        topic: "orders".to_string(),
        partition: 0,
        offset,
        key: Some(format!("key-{}", offset).into_bytes()),
        payload: Some(payload.to_vec()),
        headers: vec![MessageHeader::new("producer", "test")],
    }
}

/// Source that replays a fixed script of fetch results and records commits.
///
/// Once the script is exhausted it either ends the stream or blocks forever.
pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Result<InboundMessage, SourceError>>>,
    committed: Mutex<Vec<i64>>,
    block_when_empty: bool,
    fail_commits: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedSource {
    pub(crate) fn new(messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        Self::scripted(messages.into_iter().map(Ok))
    }

    pub(crate) fn scripted(
        script: impl IntoIterator<Item = Result<InboundMessage, SourceError>>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            committed: Mutex::new(Vec::new()),
            block_when_empty: false,
            fail_commits: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Never report end of stream; wait forever instead
    pub(crate) fn blocking(mut self) -> Self {
        self.block_when_empty = true;
        self
    }

    pub(crate) fn fail_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }

    /// Offsets committed so far, in commit order
    pub(crate) fn committed(&self) -> Vec<i64> {
        self.committed.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Script entries not fetched yet
    pub(crate) fn pending(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

/// Transient broker error for scripts
pub(crate) fn fetch_error() -> SourceError {
    SourceError::Kafka(KafkaError::NoMessageReceived)
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch(&self) -> Result<InboundMessage, SourceError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None if self.block_when_empty => std::future::pending().await,
            None => Err(SourceError::EndOfStream),
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), SourceError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(SourceError::Kafka(KafkaError::NoMessageReceived));
        }
        self.committed.lock().unwrap().push(message.offset);
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps every dead letter in memory and can be made to fail.
#[derive(Default)]
pub(crate) struct RecordingSink {
    letters: Mutex<Vec<DeadLetter>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub(crate) fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn write(&self, letter: &DeadLetter) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::CircuitOpen);
        }
        self.letters.lock().unwrap().push(letter.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
