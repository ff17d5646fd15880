//! # Vocabulary and Limits
//!
//! Fixed IRIs the engine relies on and the defaults compiled into it.

/// The `rdf:type` predicate.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// The implicit root type every resource has.
///
/// It is never asserted in the store and never reported by the TypeManager.
pub const ROOT_TYPE: &str = "http://www.w3.org/2000/01/rdf-schema#Resource";

/// Language-tagged string datatype.
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// XSD datatypes understood by the default codec.
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
pub const XSD_INT: &str = "http://www.w3.org/2001/XMLSchema#int";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";

/// Prefixes every repository knows about.
pub const DEFAULT_NAMESPACES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
];

/// Default number of entries held by an eager identity cache.
pub const DEFAULT_EAGER_CAPACITY: usize = 10_000;

/// Default number of entries held by a change-tracked cache.
pub const DEFAULT_TRACKED_CAPACITY: u64 = 10_000;

/// Maximum length of a name passed to `Session::resolve`.
pub const MAX_NAME_LENGTH: usize = 4096;
