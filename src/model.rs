//! RDF terms and statements exchanged at the store boundary.

use std::fmt;

use serde::Serialize;

/// Well-known XML Schema datatypes.
pub mod xsd {
    /// `xsd:string`
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    /// `xsd:integer`
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// `xsd:decimal`
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    /// `xsd:float`
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
    /// `xsd:double`
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    /// `xsd:boolean`
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// `xsd:int`
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    /// `xsd:long`
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    /// `xsd:short`
    pub const SHORT: &str = "http://www.w3.org/2001/XMLSchema#short";
    /// `xsd:byte`
    pub const BYTE: &str = "http://www.w3.org/2001/XMLSchema#byte";
}

/// Absolute IRI.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Iri(String);

impl Iri {
    /// Wraps `iri` without validation.
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    /// The full IRI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte offset where the local name starts: just past the last `#`,
    /// else the last `/`, else the last `:`. Zero when none is present.
    pub fn local_name_index(&self) -> usize {
        self.0
            .rfind('#')
            .or_else(|| self.0.rfind('/'))
            .or_else(|| self.0.rfind(':'))
            .map_or(0, |i| i + 1)
    }

    /// Namespace part (up to and including the separator).
    pub fn namespace(&self) -> &str {
        &self.0[..self.local_name_index()]
    }

    /// Local name part.
    pub fn local_name(&self) -> &str {
        &self.0[self.local_name_index()..]
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Blank node identified by a store-local label.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BNode(String);

impl BNode {
    /// Creates a blank node with the given label.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The blank node label.
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Literal: a label with an optional language tag or datatype.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Literal {
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datatype: Option<Iri>,
}

impl Literal {
    /// Plain literal.
    pub fn simple(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            language: None,
            datatype: None,
        }
    }

    /// Language-tagged literal.
    pub fn with_language(label: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            language: Some(language.into()),
            datatype: None,
        }
    }

    /// Typed literal.
    pub fn typed(label: impl Into<String>, datatype: Iri) -> Self {
        Self {
            label: label.into(),
            language: None,
            datatype: Some(datatype),
        }
    }

    /// Lexical form.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Language tag, if any.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Datatype, if any.
    pub fn datatype(&self) -> Option<&Iri> {
        self.datatype.as_ref()
    }

    /// Label parsed as a double. `None` when it does not parse.
    pub fn as_f64(&self) -> Option<f64> {
        self.label.trim().parse::<f64>().ok()
    }

    /// Returns true for the XML Schema numeric datatypes.
    pub fn is_numeric(&self) -> bool {
        self.datatype.as_ref().is_some_and(|dt| {
            matches!(
                dt.as_str(),
                xsd::INTEGER
                    | xsd::DECIMAL
                    | xsd::FLOAT
                    | xsd::DOUBLE
                    | xsd::INT
                    | xsd::LONG
                    | xsd::SHORT
                    | xsd::BYTE
            )
        })
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for ch in self.label.chars() {
            match ch {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\r' => f.write_str("\\r")?,
                other => write!(f, "{other}")?,
            }
        }
        f.write_str("\"")?;
        if let Some(lang) = &self.language {
            write!(f, "@{lang}")
        } else if let Some(dt) = &self.datatype {
            write!(f, "^^{dt}")
        } else {
            Ok(())
        }
    }
}

/// Any RDF term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// IRI reference.
    Iri(Iri),
    /// Blank node.
    BNode(BNode),
    /// Literal.
    Literal(Literal),
}

impl Value {
    /// Shorthand for an IRI value.
    pub fn iri(iri: impl Into<String>) -> Self {
        Value::Iri(Iri::new(iri))
    }

    /// Shorthand for a blank node value.
    pub fn bnode(id: impl Into<String>) -> Self {
        Value::BNode(BNode::new(id))
    }

    /// Shorthand for a plain literal value.
    pub fn literal(label: impl Into<String>) -> Self {
        Value::Literal(Literal::simple(label))
    }

    /// Shorthand for a typed literal value.
    pub fn typed_literal(label: impl Into<String>, datatype: &str) -> Self {
        Value::Literal(Literal::typed(label, Iri::new(datatype)))
    }

    /// `xsd:integer` literal.
    pub fn integer(v: i64) -> Self {
        Value::typed_literal(v.to_string(), xsd::INTEGER)
    }

    /// Returns true for IRIs and blank nodes.
    pub fn is_resource(&self) -> bool {
        matches!(self, Value::Iri(_) | Value::BNode(_))
    }

    /// The literal, if this is one.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Lexical text: the IRI, the blank node label, or the literal label.
    pub fn lexical(&self) -> &str {
        match self {
            Value::Iri(iri) => iri.as_str(),
            Value::BNode(b) => b.id(),
            Value::Literal(lit) => lit.label(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Iri(iri) => iri.fmt(f),
            Value::BNode(b) => write!(f, "_:{}", b.0),
            Value::Literal(lit) => lit.fmt(f),
        }
    }
}

impl From<Iri> for Value {
    fn from(iri: Iri) -> Self {
        Value::Iri(iri)
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        Value::Literal(lit)
    }
}

impl From<BNode> for Value {
    fn from(b: BNode) -> Self {
        Value::BNode(b)
    }
}

/// A quad. `context` is `None` for the default graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Statement {
    /// Subject (IRI or blank node).
    pub subject: Value,
    /// Predicate.
    pub predicate: Iri,
    /// Object.
    pub object: Value,
    /// Named graph, or `None` for the default graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Statement {
    /// Builds a statement.
    pub fn new(subject: Value, predicate: Iri, object: Value, context: Option<Value>) -> Self {
        Self {
            subject,
            predicate,
            object,
            context,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {ctx}")?;
        }
        f.write_str(" .")
    }
}

/// Context restriction for statement lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextPattern<'a> {
    /// Statements in any graph.
    Any,
    /// Statements in the default graph only.
    Default,
    /// Statements in the given named graph.
    Named(&'a Value),
}
