//! Event stream consumer.
//!
//! The node pushes a never-ending, line-delimited body of [`Event`]s. Lines are
//! framed with a fixed capacity; longer lines arrive as continued fragments and
//! are reassembled before decoding. Each record goes through the event decode
//! and the result-wrapper decode, then to the topic projection.
//!
//! Termination rules:
//! * an empty line (including end of body) ends the stream cleanly
//! * a read error is transient and the next read is attempted, up to a bound
//!   on consecutive errors
//! * any decode failure abandons the stream, since resuming inside a corrupt
//!   line-oriented feed is not safe
//! * a record longer than the configured bound abandons the stream
//! * an unrecognized topic is skipped

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::actions::Dashboard;
use super::codec;
use super::error::{CodecError, DecodeStage, TransportError};
use super::gateway::build_client;
use super::projection;
use super::topics::{Event, Topic};
use super::{BridgeConfig, ReconnectPolicy};

/// Default bound on a reassembled record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1 << 20;

/// Byte source behind the framer: an HTTP body or a captured feed.
pub trait ChunkSource: Send {
    /// Next chunk of bytes, `None` at end of input.
    fn next_chunk(&mut self)
    -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;
}

impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(TransportError::Body)
    }
}

/// In-memory [`ChunkSource`], used to replay captured feeds.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    chunks: VecDeque<Result<Vec<u8>, String>>,
}

impl MemoryFeed {
    /// Empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed delivering `data` in chunks of at most `chunk_size` bytes.
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        let mut feed = Self::new();
        for chunk in data.chunks(chunk_size.max(1)) {
            feed.push_chunk(chunk);
        }
        feed
    }

    /// Queue a chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> &mut Self {
        self.chunks.push_back(Ok(chunk.to_vec()));
        self
    }

    /// Queue a read failure.
    pub fn push_error(&mut self, message: &str) -> &mut Self {
        self.chunks.push_back(Err(message.to_string()));
        self
    }
}

impl ChunkSource for MemoryFeed {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.chunks.pop_front() {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(message)) => Err(TransportError::Read(message)),
            None => Ok(None),
        }
    }
}

/// A piece of a line. `continued` means the line goes on in the next
/// fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragment bytes, without the line terminator
    pub bytes: Vec<u8>,
    /// Whether more of the same line follows
    pub continued: bool,
}

/// Source of line fragments.
pub trait FragmentSource: Send {
    /// Next fragment; an empty, non-continued fragment at end of input.
    fn next_fragment(&mut self) -> impl Future<Output = Result<Fragment, TransportError>> + Send;
}

/// Splits a [`ChunkSource`] into line fragments of bounded size.
pub struct LineFramer<C> {
    source: C,
    buffer: Vec<u8>,
    capacity: usize,
    exhausted: bool,
}

impl<C: ChunkSource> LineFramer<C> {
    /// Framer emitting fragments of at most `capacity` bytes.
    pub fn new(source: C, capacity: usize) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            capacity: capacity.max(1),
            exhausted: false,
        }
    }
}

impl<C: ChunkSource> FragmentSource for LineFramer<C> {
    async fn next_fragment(&mut self) -> Result<Fragment, TransportError> {
        loop {
            let window = self.buffer.len().min(self.capacity);
            if let Some(newline) = self.buffer[..window].iter().position(|b| *b == b'\n') {
                let mut bytes: Vec<u8> = self.buffer.drain(..=newline).collect();
                bytes.pop();
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                return Ok(Fragment {
                    bytes,
                    continued: false,
                });
            }

            if self.buffer.len() >= self.capacity {
                let bytes = self.buffer.drain(..self.capacity).collect();
                return Ok(Fragment {
                    bytes,
                    continued: true,
                });
            }

            if self.exhausted {
                return Ok(Fragment {
                    bytes: std::mem::take(&mut self.buffer),
                    continued: false,
                });
            }

            match self.source.next_chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }
    }
}

/// Outcome of one [`RecordReader::next_record`] call.
#[derive(Debug)]
pub enum RecordRead {
    /// A complete, reassembled record
    Record(Vec<u8>),
    /// Empty line: the stream is over
    End,
    /// A read failed at a record boundary; try again
    Transient(TransportError),
    /// Too many consecutive read failures
    Exhausted(u32),
    /// The record grew past the size bound; carries the bytes read so far
    Oversized(usize),
}

/// Reassembles continued fragments into complete records.
pub struct RecordReader<F> {
    source: F,
    max_errors: u32,
    max_bytes: usize,
    consecutive_errors: u32,
}

impl<F: FragmentSource> RecordReader<F> {
    /// Reader giving up after `max_errors` consecutive read failures.
    pub fn new(source: F, max_errors: u32) -> Self {
        Self {
            source,
            max_errors,
            max_bytes: DEFAULT_MAX_RECORD_BYTES,
            consecutive_errors: 0,
        }
    }

    /// Give up on records longer than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Read the next complete record.
    pub async fn next_record(&mut self) -> RecordRead {
        let first = match self.source.next_fragment().await {
            Ok(fragment) => {
                self.consecutive_errors = 0;
                fragment
            }
            Err(err) if self.note_failure(&err) => {
                return RecordRead::Exhausted(self.consecutive_errors);
            }
            Err(err) => return RecordRead::Transient(err),
        };

        if first.bytes.is_empty() && !first.continued {
            return RecordRead::End;
        }

        let split = first.continued;
        let mut record = first.bytes;
        let mut continued = split;
        while continued {
            if record.len() > self.max_bytes {
                return RecordRead::Oversized(record.len());
            }
            match self.source.next_fragment().await {
                Ok(fragment) => {
                    self.consecutive_errors = 0;
                    record.extend_from_slice(&fragment.bytes);
                    continued = fragment.continued;
                }
                Err(err) => {
                    if self.note_failure(&err) {
                        return RecordRead::Exhausted(self.consecutive_errors);
                    }
                }
            }
        }

        // A `\r\n` split across fragments leaves the `\r` behind.
        if split && record.last() == Some(&b'\r') {
            record.pop();
        }
        if record.len() > self.max_bytes {
            return RecordRead::Oversized(record.len());
        }
        RecordRead::Record(record)
    }

    // True once consecutive failures exceed the bound.
    fn note_failure(&mut self, err: &TransportError) -> bool {
        self.consecutive_errors += 1;
        tracing::warn!(
            errors = self.consecutive_errors,
            "event stream read failed: {err}"
        );
        self.consecutive_errors > self.max_errors
    }
}

/// Consumer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opening the push connection
    Connecting,
    /// Reading records
    Streaming,
    /// Stopped for good
    Terminated,
}

/// Why a stream session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Empty line or end of body
    EndOfStream,
    /// A record could not be decoded
    DecodeFailure(String),
    /// The connection could not be opened
    ConnectFailed(String),
    /// Consecutive read failures exceeded the bound
    ReadErrors(u32),
}

/// Totals for one consumed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Records projected onto the page
    pub records: u64,
    /// Records with an unrecognized topic
    pub ignored: u64,
    /// How the session ended
    pub termination: Termination,
}

/// Totals over the consumer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// Records projected onto the page
    pub records: u64,
    /// Records with an unrecognized topic
    pub ignored: u64,
    /// Connections opened
    pub connections: u32,
    /// How the last session ended
    pub termination: Termination,
}

/// Long-lived consumer of the node's event stream.
pub struct EventConsumer {
    dashboard: Arc<Dashboard>,
    http: reqwest::Client,
    url: String,
    frame_capacity: usize,
    max_read_errors: u32,
    max_record_bytes: usize,
    reconnect: ReconnectPolicy,
    state: watch::Sender<StreamState>,
}

impl EventConsumer {
    /// Consumer writing through `dashboard`.
    pub fn new(dashboard: Arc<Dashboard>, config: &BridgeConfig) -> Result<Self, TransportError> {
        let http = build_client(None).map_err(TransportError::Request)?;
        let (state, _) = watch::channel(StreamState::Connecting);
        Ok(Self {
            dashboard,
            http,
            url: config.events_url.clone(),
            frame_capacity: config.frame_capacity,
            max_read_errors: config.max_read_errors,
            max_record_bytes: config.max_record_bytes,
            reconnect: config.reconnect.clone(),
            state,
        })
    }

    /// Watch the consumer's state.
    pub fn states(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Run the consumer on its own task.
    pub fn spawn(self) -> JoinHandle<StreamReport> {
        tokio::spawn(self.run())
    }

    /// Connect, consume and, depending on the reconnect policy, reconnect
    /// until the policy says stop.
    pub async fn run(self) -> StreamReport {
        let mut report = StreamReport {
            records: 0,
            ignored: 0,
            connections: 0,
            termination: Termination::EndOfStream,
        };
        let mut attempt = 0u32;

        loop {
            self.state.send_replace(StreamState::Connecting);
            let mut delivered = false;
            report.termination = match self.connect().await {
                Ok(response) => {
                    report.connections += 1;
                    self.state.send_replace(StreamState::Streaming);
                    tracing::info!(url = %self.url, "event stream connected");
                    let framer = LineFramer::new(response, self.frame_capacity);
                    let outcome = self.consume(framer).await;
                    report.records += outcome.records;
                    report.ignored += outcome.ignored;
                    delivered = outcome.records + outcome.ignored > 0;
                    outcome.termination
                }
                Err(err) => {
                    tracing::error!(url = %self.url, "event stream connection failed: {err}");
                    Termination::ConnectFailed(err.to_string())
                }
            };

            if delivered {
                attempt = 0;
            }
            match self.reconnect.delay_for(attempt) {
                Some(delay) => {
                    attempt += 1;
                    tracing::warn!(
                        termination = ?report.termination,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "event stream ended, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::info!(termination = ?report.termination, "event stream terminated");
                    self.state.send_replace(StreamState::Terminated);
                    return report;
                }
            }
        }
    }

    /// Consume one session from an already open source.
    pub async fn consume<F: FragmentSource>(&self, source: F) -> SessionOutcome {
        let mut reader =
            RecordReader::new(source, self.max_read_errors).with_max_bytes(self.max_record_bytes);
        let mut records = 0;
        let mut ignored = 0;

        let termination = loop {
            match reader.next_record().await {
                RecordRead::Record(bytes) => match self.handle_record(&bytes).await {
                    Ok(true) => records += 1,
                    Ok(false) => ignored += 1,
                    Err(err) => {
                        tracing::error!("abandoning event stream: {err}");
                        break Termination::DecodeFailure(err.to_string());
                    }
                },
                RecordRead::End => {
                    tracing::debug!("empty line on event stream");
                    break Termination::EndOfStream;
                }
                RecordRead::Transient(_) => continue,
                RecordRead::Exhausted(errors) => break Termination::ReadErrors(errors),
                RecordRead::Oversized(read) => {
                    tracing::error!(
                        read,
                        limit = self.max_record_bytes,
                        "abandoning event stream: record too long"
                    );
                    break Termination::DecodeFailure(format!(
                        "record exceeds {} bytes",
                        self.max_record_bytes
                    ));
                }
            }
        };

        SessionOutcome {
            records,
            ignored,
            termination,
        }
    }

    async fn connect(&self) -> Result<reqwest::Response, TransportError> {
        self.http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(TransportError::Request)
    }

    // Ok(false) for an unrecognized topic.
    async fn handle_record(&self, bytes: &[u8]) -> Result<bool, CodecError> {
        let event: Event =
            serde_json::from_slice(bytes).map_err(CodecError::decode(DecodeStage::Event))?;
        let topic = Topic::from_wire(&event.result.topic);
        let payload = codec::decode_result_wrapper(event.result.val.as_bytes())?;
        tracing::debug!(%topic, bytes = payload.len(), "event received");

        match projection::project(&topic, &payload)? {
            Some(projection) => {
                self.dashboard.apply(projection).await;
                Ok(true)
            }
            None => {
                tracing::debug!(%topic, "ignoring event with unrecognized topic");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(VecDeque<Result<Fragment, TransportError>>);

    impl Scripted {
        fn new(fragments: &[(&str, bool)]) -> Self {
            Self(
                fragments
                    .iter()
                    .map(|(text, continued)| {
                        Ok(Fragment {
                            bytes: text.as_bytes().to_vec(),
                            continued: *continued,
                        })
                    })
                    .collect(),
            )
        }
    }

    impl FragmentSource for Scripted {
        async fn next_fragment(&mut self) -> Result<Fragment, TransportError> {
            self.0.pop_front().unwrap_or(Ok(Fragment {
                bytes: Vec::new(),
                continued: false,
            }))
        }
    }

    #[tokio::test]
    async fn continued_fragments_reassemble_into_one_record() {
        let source = Scripted::new(&[
            ("{\"result\":", true),
            ("{\"topic\":\"Peers\"", true),
            (",\"val\":\"3\"}}", false),
        ]);
        let mut reader = RecordReader::new(source, 4);

        let RecordRead::Record(record) = reader.next_record().await else {
            panic!("expected a record");
        };
        let value: serde_json::Value = serde_json::from_slice(&record).unwrap();
        assert_eq!(value["result"]["topic"], "Peers");
        assert!(matches!(reader.next_record().await, RecordRead::End));
    }

    #[tokio::test]
    async fn read_error_inside_continuation_is_retried() {
        let mut source = Scripted::new(&[("{\"a\":", true)]);
        source.0.push_back(Err(TransportError::Read("reset".into())));
        source.0.push_back(Ok(Fragment {
            bytes: b"1}".to_vec(),
            continued: false,
        }));
        let mut reader = RecordReader::new(source, 4);

        let RecordRead::Record(record) = reader.next_record().await else {
            panic!("expected a record");
        };
        assert_eq!(record, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn consecutive_read_errors_are_bounded() {
        let mut feed = MemoryFeed::new();
        for _ in 0..3 {
            feed.push_error("connection reset");
        }
        let mut reader = RecordReader::new(LineFramer::new(feed, 64), 2);

        assert!(matches!(reader.next_record().await, RecordRead::Transient(_)));
        assert!(matches!(reader.next_record().await, RecordRead::Transient(_)));
        assert!(matches!(reader.next_record().await, RecordRead::Exhausted(3)));
    }

    #[tokio::test]
    async fn carriage_return_split_from_newline_is_dropped() {
        let source = Scripted::new(&[("abc\r", true), ("", false), ("next", false)]);
        let mut reader = RecordReader::new(source, 4);

        assert!(matches!(reader.next_record().await, RecordRead::Record(ref r) if r == b"abc"));
        assert!(matches!(reader.next_record().await, RecordRead::Record(ref r) if r == b"next"));
    }

    #[tokio::test]
    async fn crlf_on_the_frame_boundary_is_stripped() {
        let feed = MemoryFeed::from_bytes(b"abc\r\nxy\r\n", 5);
        let mut reader = RecordReader::new(LineFramer::new(feed, 4), 4);

        assert!(matches!(reader.next_record().await, RecordRead::Record(ref r) if r == b"abc"));
        assert!(matches!(reader.next_record().await, RecordRead::Record(ref r) if r == b"xy"));
        assert!(matches!(reader.next_record().await, RecordRead::End));
    }

    #[tokio::test]
    async fn records_past_the_size_bound_are_refused() {
        let line = "x".repeat(40) + "\n";
        let feed = MemoryFeed::from_bytes(line.as_bytes(), 64);
        let mut reader = RecordReader::new(LineFramer::new(feed, 8), 4).with_max_bytes(16);

        assert!(matches!(reader.next_record().await, RecordRead::Oversized(24)));
    }

    #[tokio::test]
    async fn record_at_the_size_bound_is_accepted() {
        let feed = MemoryFeed::from_bytes(b"0123456789abcdef\n", 64);
        let mut reader = RecordReader::new(LineFramer::new(feed, 8), 4).with_max_bytes(16);

        assert!(matches!(reader.next_record().await, RecordRead::Record(ref r) if r.len() == 16));
    }

    #[tokio::test]
    async fn framer_splits_long_lines() {
        let feed = MemoryFeed::from_bytes(b"abcdefghij\r\nxy\n", 3);
        let mut framer = LineFramer::new(feed, 4);

        let mut fragments = Vec::new();
        loop {
            let fragment = framer.next_fragment().await.unwrap();
            let done = fragment.bytes.is_empty() && !fragment.continued;
            fragments.push((String::from_utf8(fragment.bytes).unwrap(), fragment.continued));
            if done {
                break;
            }
        }

        assert_eq!(
            fragments,
            vec![
                ("abcd".to_string(), true),
                ("efgh".to_string(), true),
                ("ij".to_string(), false),
                ("xy".to_string(), false),
                (String::new(), false),
            ]
        );
    }

    #[tokio::test]
    async fn framer_returns_unterminated_tail_before_end() {
        let feed = MemoryFeed::from_bytes(b"tail", 2);
        let mut framer = LineFramer::new(feed, 16);

        assert_eq!(framer.next_fragment().await.unwrap().bytes, b"tail");
        assert!(framer.next_fragment().await.unwrap().bytes.is_empty());
    }
}
