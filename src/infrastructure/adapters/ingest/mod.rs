//! Ingest - 传输层事件接入

mod stream_ingestor;

pub use stream_ingestor::{
    IngestOutcome, IngestStats, StreamIngestor, TransportEvent, TransportPayload,
};
