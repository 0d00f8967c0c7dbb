//! Term Codec (C1) — maps RDF terms to stable, content-addressed UUIDs.
//!
//! The encoding must be stable across processes and versions: two
//! processes computing the UUID for the same term, with the same space,
//! must produce identical bytes. Derivation uses namespaced UUIDv5
//! (SHA-1 based, RFC 4122 §4.3) rather than random UUIDs, which is what
//! makes term identity content-addressed and inserts idempotent.

use uuid::Uuid;

/// Fixed namespace UUID all URI and literal term UUIDs are derived under.
/// An arbitrary, stable constant — changing it would change every term's
/// identity, so it must never be regenerated.
const URI_NAMESPACE: Uuid = Uuid::from_u128(0x6f68_7eff_2d1a_4a61_9b2a_2d6f_5a31_1c01);
const LITERAL_NAMESPACE: Uuid = Uuid::from_u128(0x8a3d_0b8e_9f2c_4d7a_bf5e_7c2a_4e9d_3b02);
const BLANK_NAMESPACE: Uuid = Uuid::from_u128(0x1c5a_9e2b_6f4d_4a8c_9d3b_1a7e_5c6f_0203);

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

const NUMERIC_DATATYPES: &[&str] = &[
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#float",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#unsignedLong",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TermKind {
    Uri,
    BlankNode,
    Literal,
}

impl TryFrom<i16> for TermKind {
    type Error = String;

    fn try_from(value: i16) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(TermKind::Uri),
            1 => Ok(TermKind::BlankNode),
            2 => Ok(TermKind::Literal),
            other => Err(format!("unknown term kind discriminant: {other}")),
        }
    }
}

/// A fully classified RDF term, ready to be encoded or freshly decoded
/// from a term-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub uuid: Uuid,
    pub kind: TermKind,
    pub lexical: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

impl Term {
    pub fn uri(lexical: impl Into<String>) -> Self {
        encode_uri(lexical.into())
    }

    pub fn blank_node(space_id: &str, label: impl Into<String>) -> Self {
        encode_blank_node(space_id, label.into())
    }

    pub fn plain_literal(lexical: impl Into<String>) -> Self {
        encode_literal(lexical.into(), None, None)
    }

    pub fn lang_literal(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        encode_literal(lexical.into(), None, Some(language.into()))
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        encode_literal(lexical.into(), Some(datatype.into()), None)
    }

    /// Implicit-or-explicit effective datatype, per the classification
    /// rules: a language-tagged literal is `rdf:langString`; an
    /// untyped, untagged literal is `xsd:string`.
    pub fn effective_datatype(&self) -> &str {
        if self.language.is_some() {
            RDF_LANG_STRING
        } else {
            self.datatype.as_deref().unwrap_or(XSD_STRING)
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == TermKind::Literal
            && NUMERIC_DATATYPES.contains(&self.effective_datatype())
    }
}

fn encode_uri(lexical: String) -> Term {
    let uuid = Uuid::new_v5(&URI_NAMESPACE, lexical.as_bytes());
    Term {
        uuid,
        kind: TermKind::Uri,
        lexical,
        datatype: None,
        language: None,
    }
}

/// Blank-node UUIDs are derived under a namespace scoped to the space,
/// so that the same label in two different spaces never collides, while
/// the same label reused within one load session unifies deterministically.
fn encode_blank_node(space_id: &str, label: String) -> Term {
    let space_namespace = Uuid::new_v5(&BLANK_NAMESPACE, space_id.as_bytes());
    let uuid = Uuid::new_v5(&space_namespace, label.as_bytes());
    Term {
        uuid,
        kind: TermKind::BlankNode,
        lexical: label,
        datatype: None,
        language: None,
    }
}

fn encode_literal(lexical: String, datatype: Option<String>, language: Option<String>) -> Term {
    // Language tags compare case-insensitively per BCP-47; normalize to
    // lowercase before hashing so two differently-cased tags unify.
    let language = language.map(|l| l.to_lowercase());
    let key_datatype = if language.is_some() {
        RDF_LANG_STRING
    } else {
        datatype.as_deref().unwrap_or(XSD_STRING)
    };
    let key = format!(
        "{}\u{0}{}\u{0}{}",
        lexical,
        key_datatype,
        language.as_deref().unwrap_or("")
    );
    let uuid = Uuid::new_v5(&LITERAL_NAMESPACE, key.as_bytes());
    Term {
        uuid,
        kind: TermKind::Literal,
        lexical,
        datatype,
        language,
    }
}

/// Encodes an already-classified term back into its UUID, used by the
/// translator to lower a SPARQL constant to a UUID without a round trip
/// through the term cache/database.
pub fn encode(kind: TermKind, lexical: &str, datatype: Option<&str>, language: Option<&str>, space_id: &str) -> Term {
    match kind {
        TermKind::Uri => encode_uri(lexical.to_string()),
        TermKind::BlankNode => encode_blank_node(space_id, lexical.to_string()),
        TermKind::Literal => encode_literal(
            lexical.to_string(),
            datatype.map(str::to_string),
            language.map(str::to_string),
        ),
    }
}

/// A raw term-table row, as read back from Postgres.
pub struct TermRow {
    pub uuid: Uuid,
    pub kind: TermKind,
    pub lexical: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

/// Reconstructs a [`Term`] from a term-table row. The round-trip law
/// `decode(encode(t)) == t` holds modulo language-tag case, because
/// encoding always lowercases the tag before storing.
pub fn decode(row: TermRow) -> Term {
    Term {
        uuid: row.uuid,
        kind: row.kind,
        lexical: row.lexical,
        datatype: row.datatype,
        language: row.language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_uuid_is_deterministic_across_calls() {
        let a = Term::uri("http://ex/a");
        let b = Term::uri("http://ex/a");
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn blank_nodes_scoped_per_space_do_not_collide() {
        let a = Term::blank_node("space1", "b1");
        let b = Term::blank_node("space2", "b1");
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn blank_nodes_with_same_label_in_same_space_unify() {
        let a = Term::blank_node("space1", "b1");
        let b = Term::blank_node("space1", "b1");
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn literal_identity_distinguishes_datatype_and_language() {
        let plain = Term::plain_literal("hello");
        let english = Term::lang_literal("hello", "en");
        let typed = Term::typed_literal("hello", "http://ex/customType");
        assert_ne!(plain.uuid, english.uuid);
        assert_ne!(plain.uuid, typed.uuid);
        assert_ne!(english.uuid, typed.uuid);
    }

    #[test]
    fn language_tags_compare_case_insensitively() {
        let a = Term::lang_literal("hello", "EN");
        let b = Term::lang_literal("hello", "en");
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn classification_defaults() {
        let plain = Term::plain_literal("hello");
        assert_eq!(plain.effective_datatype(), XSD_STRING);

        let english = Term::lang_literal("hello", "en");
        assert_eq!(english.effective_datatype(), RDF_LANG_STRING);

        let num = Term::typed_literal("5", "http://www.w3.org/2001/XMLSchema#integer");
        assert!(num.is_numeric());
        assert!(!plain.is_numeric());
    }

    #[test]
    fn round_trip_decode_of_encode() {
        let t = Term::lang_literal("world", "EN");
        let row = TermRow {
            uuid: t.uuid,
            kind: t.kind,
            lexical: t.lexical.clone(),
            datatype: t.datatype.clone(),
            language: t.language.clone(),
        };
        let decoded = decode(row);
        assert_eq!(decoded, t);
    }
}
