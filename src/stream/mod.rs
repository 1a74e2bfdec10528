//! Server push stream: transport, framing and record parsing

mod ingest;
mod record;
mod sse;
mod transport;

pub use ingest::run_ingest;
pub use record::{IngestRecord, RecordError, parse_record};
pub use sse::SseParser;
pub use transport::{EventStream, HttpTransport, PushTransport};
