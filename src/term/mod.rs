//! Term identity: content-addressed encoding (C1) and the bounded
//! process-wide cache in front of it (C2).

pub mod cache;
pub mod codec;

pub use cache::TermCache;
pub use codec::{decode, encode, Term, TermKind, TermRow, RDF_LANG_STRING, XSD_STRING};
