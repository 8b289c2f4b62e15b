//! Configuration expressions and string interpolation.
//!
//! Property values in a stack file are [`Expr`]s. Strings may embed
//! `${config.<param>}` or `${<resource>.<attribute>...}` references, which
//! are kept as [`Template`] segments until evaluation. Evaluation is pure:
//! the caller supplies a lookup for references, and sensitivity flows from
//! every looked-up value into whatever is derived from it.

use std::collections::BTreeMap;
use std::fmt;

use rigging_common::constants::CONFIG_NAMESPACE;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::value::Value;

/// An unevaluated property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A string, possibly containing interpolations.
    Template(Template),
    /// An integer literal.
    Integer(i64),
    /// A boolean literal.
    Bool(bool),
    /// A list of expressions.
    List(Vec<Expr>),
    /// A map of expressions.
    Map(BTreeMap<String, Expr>),
    /// An expression whose value is marked secret.
    Secret(Box<Expr>),
}

/// A string split into literal text and references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

/// One piece of a [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// An interpolated reference.
    Ref(Reference),
}

/// A reference to a parameter or to an attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    /// `${config.<name>}`
    Param(String),
    /// `${<resource>.<attribute>[.<path>...]}`
    Attribute {
        /// Logical name of the referenced resource.
        resource: String,
        /// Attribute name followed by any nested keys.
        path: Vec<String>,
    },
}

impl Reference {
    /// Returns the referenced resource name, if this is an attribute reference.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::Param(_) => None,
            Self::Attribute { resource, .. } => Some(resource),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(name) => write!(f, "${{{CONFIG_NAMESPACE}.{name}}}"),
            Self::Attribute { resource, path } => write!(f, "${{{resource}.{}}}", path.join(".")),
        }
    }
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_reference(inner: &str) -> std::result::Result<Reference, String> {
    let parts: Vec<&str> = inner.trim().split('.').collect();
    if parts.iter().any(|p| p.is_empty() || !p.chars().all(is_name_char)) {
        return Err(format!("malformed reference \"${{{inner}}}\""));
    }
    match parts.as_slice() {
        [ns, name] if *ns == CONFIG_NAMESPACE => Ok(Reference::Param((*name).to_string())),
        [ns, ..] if *ns == CONFIG_NAMESPACE => Err(format!(
            "parameter reference \"${{{inner}}}\" must have the form ${{{CONFIG_NAMESPACE}.<name>}}"
        )),
        [resource, path @ ..] if !path.is_empty() => Ok(Reference::Attribute {
            resource: (*resource).to_string(),
            path: path.iter().map(|s| (*s).to_string()).collect(),
        }),
        _ => Err(format!(
            "reference \"${{{inner}}}\" must name a resource and an attribute"
        )),
    }
}

impl Template {
    /// Splits raw string text into literal and reference segments.
    ///
    /// `$${` produces a literal `${`.
    ///
    /// # Errors
    ///
    /// Returns a message describing an unterminated or malformed reference.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after
                    .find('}')
                    .ok_or_else(|| format!("unterminated reference in \"{raw}\""))?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Ref(parse_reference(&after[..end])?));
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Creates a template holding only literal text.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(text)]
        };
        Self { segments }
    }

    /// Returns the segments in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the reference if the template is exactly one interpolation.
    #[must_use]
    pub fn sole_reference(&self) -> Option<&Reference> {
        match self.segments.as_slice() {
            [Segment::Ref(reference)] => Some(reference),
            _ => None,
        }
    }

    /// Returns the text if the template contains no references.
    #[must_use]
    pub fn as_literal(&self) -> Option<String> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Ref(_) => None,
            })
            .collect()
    }

    fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Ref(reference) => Some(reference),
            Segment::Literal(_) => None,
        })
    }
}

impl Expr {
    /// Creates a string expression without interpolations.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Template(Template::literal(text))
    }

    /// Collects every reference inside the expression, in source order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            Self::Template(template) => found.extend(template.references()),
            Self::Integer(_) | Self::Bool(_) => {}
            Self::List(items) => items.iter().for_each(|item| item.collect_references(found)),
            Self::Map(entries) => entries
                .values()
                .for_each(|item| item.collect_references(found)),
            Self::Secret(inner) => inner.collect_references(found),
        }
    }

    /// Returns whether the expression contains no references.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.references().is_empty()
    }

    /// Evaluates the expression, resolving references through `lookup`.
    ///
    /// A string made of a single interpolation yields the referenced value
    /// unchanged; any other string renders each reference inline. The
    /// result is secret if any looked-up value was secret or the
    /// expression is wrapped in `SECRET`.
    ///
    /// # Errors
    ///
    /// Returns whatever `lookup` returns for an unavailable reference.
    pub fn evaluate<F>(&self, lookup: &F) -> Result<Sensitive<Value>>
    where
        F: Fn(&Reference) -> Result<Sensitive<Value>>,
    {
        match self {
            Self::Template(template) => evaluate_template(template, lookup),
            Self::Integer(n) => Ok(Sensitive::plain(Value::Integer(*n))),
            Self::Bool(b) => Ok(Sensitive::plain(Value::Bool(*b))),
            Self::List(items) => {
                let values = items
                    .iter()
                    .map(|item| item.evaluate(lookup))
                    .collect::<Result<Sensitive<Vec<Value>>>>()?;
                Ok(values.map(Value::List))
            }
            Self::Map(entries) => {
                let values = entries
                    .iter()
                    .map(|(key, item)| Ok(item.evaluate(lookup)?.map(|v| (key.clone(), v))))
                    .collect::<Result<Sensitive<Vec<(String, Value)>>>>()?;
                Ok(values.map(|pairs| Value::Map(pairs.into_iter().collect())))
            }
            Self::Secret(inner) => Ok(inner.evaluate(lookup)?.into_secret()),
        }
    }

    /// Evaluates an expression that contains no references.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Config` if the expression contains references.
    pub fn evaluate_literal(&self) -> Result<Sensitive<Value>> {
        self.evaluate(&|reference| {
            Err(RiggingError::Config {
                message: format!("reference {reference} is not allowed here"),
            })
        })
    }
}

fn evaluate_template<F>(template: &Template, lookup: &F) -> Result<Sensitive<Value>>
where
    F: Fn(&Reference) -> Result<Sensitive<Value>>,
{
    if let Some(reference) = template.sole_reference() {
        return lookup(reference);
    }
    let mut rendered = Sensitive::plain(String::new());
    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => rendered = rendered.map(|s| s + text),
            Segment::Ref(reference) => {
                let value = lookup(reference)?;
                rendered = rendered.combine(value, |s, v| s + &v.render());
            }
        }
    }
    Ok(rendered.map(Value::String))
}
