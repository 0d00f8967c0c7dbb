//! Bulk Loader (C6): streaming N-Triples/N-Quads ingestion.

pub mod ntriples;
pub mod pipeline;

pub use ntriples::{detect_format, open_reader, ParseStats, ParsedQuad, ParsedTerm, RdfFormat};
pub use pipeline::{load_file, validate_file, LoadProgress, LoadReport};
