//! Message emitter: newline-delimited JSON output channel.

use std::collections::HashMap;
use std::io::{self, Write};

use tapkit_types::message::{
    ActivateVersionMessage, BatchMessage, Message, MessageKind, RecordMessage, SchemaMessage,
    StateMessage,
};

/// Per-kind message transform applied before serialization.
///
/// Each hook returns zero or more replacement messages. The defaults pass
/// the message through unchanged.
pub trait Mapper: Send {
    fn map_schema(&mut self, message: SchemaMessage) -> Vec<Message> {
        vec![Message::Schema(message)]
    }

    fn map_record(&mut self, message: RecordMessage) -> Vec<Message> {
        vec![Message::Record(message)]
    }

    fn map_state(&mut self, message: StateMessage) -> Vec<Message> {
        vec![Message::State(message)]
    }

    fn map_activate_version(&mut self, message: ActivateVersionMessage) -> Vec<Message> {
        vec![Message::ActivateVersion(message)]
    }

    fn map_batch(&mut self, message: BatchMessage) -> Vec<Message> {
        vec![Message::Batch(message)]
    }
}

fn apply(mapper: &mut dyn Mapper, message: Message) -> Vec<Message> {
    match message {
        Message::Schema(m) => mapper.map_schema(m),
        Message::Record(m) => mapper.map_record(m),
        Message::State(m) => mapper.map_state(m),
        Message::ActivateVersion(m) => mapper.map_activate_version(m),
        Message::Batch(m) => mapper.map_batch(m),
    }
}

/// Writes messages to a sink, one JSON line each, flushing after every line.
pub struct MessageEmitter<W: Write> {
    sink: W,
    mapper: Option<Box<dyn Mapper>>,
    counts: HashMap<MessageKind, u64>,
}

impl<W: Write> MessageEmitter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            mapper: None,
            counts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_mapper(mut self, mapper: Box<dyn Mapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Emit one message (or whatever the mapper turns it into).
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error. Write failures are fatal for the run.
    pub fn emit(&mut self, message: Message) -> io::Result<()> {
        let messages = match self.mapper.as_deref_mut() {
            Some(mapper) => apply(mapper, message),
            None => vec![message],
        };
        for message in messages {
            let mut line = serde_json::to_vec(&message).map_err(io::Error::other)?;
            line.push(b'\n');
            self.sink.write_all(&line)?;
            self.sink.flush()?;
            *self.counts.entry(message.kind()).or_default() += 1;
        }
        Ok(())
    }

    /// Messages written so far, by kind, after mapping.
    #[must_use]
    pub fn count(&self, kind: MessageKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
