//! # Literal Codec
//!
//! Conversion between native values and store literals. The codec is a
//! collaborator: sessions take any `LiteralCodec`, and `XsdCodec` covers
//! the common XSD datatypes.

use crate::primitives::{
    RDF_LANG_STRING, XSD_ANY_URI, XSD_BOOLEAN, XSD_DECIMAL, XSD_INT, XSD_INTEGER, XSD_LONG,
    XSD_STRING,
};
use crate::{EngineError, Iri, Literal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeValue {
    String(String),
    LangString { value: String, language: String },
    Integer(i64),
    Boolean(bool),
    /// Exact decimal, kept in its canonical lexical form.
    Decimal(String),
    Iri(Iri),
    /// A literal of a datatype the codec does not know.
    Typed(Literal),
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Decimal(s) => f.write_str(s),
            Self::LangString { value, language } => write!(f, "{}@{}", value, language),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Iri(iri) => write!(f, "{}", iri),
            Self::Typed(literal) => write!(f, "{}", literal),
        }
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for NativeValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Native value to literal conversion.
pub trait LiteralCodec: Send + Sync {
    fn encode(&self, value: &NativeValue) -> Result<Literal, EngineError>;

    /// Decode a literal, optionally towards a target datatype.
    fn decode(&self, literal: &Literal, target: Option<&Iri>) -> Result<NativeValue, EngineError>;

    /// Whether the codec understands this datatype.
    fn is_datatype(&self, datatype: &Iri) -> bool;
}

/// Codec for `xsd:string`, `rdf:langString`, the XSD integer family,
/// `xsd:boolean`, `xsd:decimal` and `xsd:anyURI`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XsdCodec;

const KNOWN: &[&str] = &[
    XSD_STRING,
    RDF_LANG_STRING,
    XSD_INTEGER,
    XSD_LONG,
    XSD_INT,
    XSD_BOOLEAN,
    XSD_DECIMAL,
    XSD_ANY_URI,
];

fn parse_integer(lexical: &str) -> Result<i64, EngineError> {
    lexical
        .trim()
        .parse::<i64>()
        .map_err(|e| EngineError::Codec(format!("invalid integer {:?}: {}", lexical, e)))
}

/// `[+-]?[0-9]+`, the lexical space of xsd:integer.
fn is_integer_lexical(lexical: &str) -> bool {
    let trimmed = lexical.trim();
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_boolean(lexical: &str) -> Result<bool, EngineError> {
    match lexical.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(EngineError::Codec(format!("invalid boolean {:?}", other))),
    }
}

fn parse_decimal(lexical: &str) -> Result<String, EngineError> {
    let trimmed = lexical.trim();
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    let valid = !(whole.is_empty() && fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(EngineError::Codec(format!("invalid decimal {:?}", lexical)))
    }
}

impl LiteralCodec for XsdCodec {
    fn encode(&self, value: &NativeValue) -> Result<Literal, EngineError> {
        Ok(match value {
            NativeValue::String(s) => Literal::string(s.clone()),
            NativeValue::LangString { value, language } => {
                Literal::lang_string(value.clone(), language.clone())
            }
            NativeValue::Integer(n) => Literal::typed(n.to_string(), Iri::new(XSD_INTEGER)),
            NativeValue::Boolean(b) => Literal::typed(b.to_string(), Iri::new(XSD_BOOLEAN)),
            NativeValue::Decimal(d) => Literal::typed(parse_decimal(d)?, Iri::new(XSD_DECIMAL)),
            NativeValue::Iri(iri) => Literal::typed(iri.as_str(), Iri::new(XSD_ANY_URI)),
            NativeValue::Typed(literal) => literal.clone(),
        })
    }

    fn decode(&self, literal: &Literal, target: Option<&Iri>) -> Result<NativeValue, EngineError> {
        let datatype = target.unwrap_or(&literal.datatype).as_str();
        let lexical = literal.lexical.as_str();

        if let Some(language) = &literal.language {
            if target.is_none() || datatype == RDF_LANG_STRING {
                return Ok(NativeValue::LangString {
                    value: lexical.to_string(),
                    language: language.clone(),
                });
            }
        }

        match datatype {
            XSD_STRING | RDF_LANG_STRING => Ok(NativeValue::String(lexical.to_string())),
            XSD_INTEGER => match parse_integer(lexical) {
                Ok(n) => Ok(NativeValue::Integer(n)),
                // Out of i64 range: keep the lexical form.
                Err(_) if is_integer_lexical(lexical) => Ok(NativeValue::Typed(Literal::typed(
                    lexical.trim(),
                    Iri::new(XSD_INTEGER),
                ))),
                Err(e) => Err(e),
            },
            XSD_LONG | XSD_INT => parse_integer(lexical).map(NativeValue::Integer),
            XSD_BOOLEAN => parse_boolean(lexical).map(NativeValue::Boolean),
            XSD_DECIMAL => parse_decimal(lexical).map(NativeValue::Decimal),
            XSD_ANY_URI => Ok(NativeValue::Iri(Iri::new(lexical))),
            _ => Ok(NativeValue::Typed(literal.clone())),
        }
    }

    fn is_datatype(&self, datatype: &Iri) -> bool {
        KNOWN.contains(&datatype.as_str())
    }
}
