//! Directive model.
//!
//! A [`Directive`] declares the functions of an application and the handlers
//! that compose them into request pipelines.  It is what `Directive.yaml`
//! deserializes into:
//!
//! ```yaml
//! identifier: dev.rhost.appname
//! version: v0.1.1
//! functions:
//!   - name: getUser
//!     namespace: db
//! handlers:
//!   - type: request
//!     method: GET
//!     resource: /api/v1/user
//!     steps:
//!       - group: [db#getUser, db#getUserDetails]
//!       - fn: api#returnUser
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DirectiveError, Result};

/// Namespace assumed when a function or reference names none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Separates a namespace from a function name.
pub const NAMESPACE_SEPARATOR: char = '#';

/// Separates a function reference from a version.
pub const VERSION_SEPARATOR: char = '@';

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

/// `namespace`, or the default namespace when it is blank.
pub(crate) fn namespace_or_default(namespace: &str) -> &str {
    if namespace.trim().is_empty() { DEFAULT_NAMESPACE } else { namespace }
}

fn default_input_type() -> String {
    "request".to_owned()
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Declarative manifest of functions and request-handling pipelines.
///
/// Must be validated with [`Directive::validate`] before it can drive
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub identifier: String,
    pub version: String,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

/// A function present inside the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Mapping from an input to a composition of functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    #[serde(flatten)]
    pub input: Input,
    #[serde(default)]
    pub steps: Vec<Executable>,
}

/// The input a handler responds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Input source kind.  Only `request` is dispatched today.
    #[serde(rename = "type", default = "default_input_type")]
    pub kind: String,
    /// HTTP method, matched case-insensitively.
    #[serde(default)]
    pub method: String,
    /// Path pattern; segments starting with `:` capture a parameter.
    #[serde(default)]
    pub resource: String,
}

/// One step of a handler pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawExecutable", into = "RawExecutable")]
pub enum Executable {
    /// One function, dispatched alone.
    Single(String),
    /// Functions dispatched concurrently; all finish before the next step.
    Group(Vec<String>),
}

/// Wire shape of a step: exactly one of `fn` or `group`.
#[derive(Serialize, Deserialize)]
struct RawExecutable {
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<Vec<String>>,
}

impl TryFrom<RawExecutable> for Executable {
    type Error = DirectiveError;

    fn try_from(raw: RawExecutable) -> Result<Self> {
        match (raw.function, raw.group) {
            (Some(function), None) => Ok(Self::Single(function)),
            (None, Some(group)) => Ok(Self::Group(group)),
            (Some(_), Some(_)) => Err(DirectiveError::InvalidStep {
                reason: "step sets both `fn` and `group`".into(),
            }),
            (None, None) => Err(DirectiveError::InvalidStep {
                reason: "step sets neither `fn` nor `group`".into(),
            }),
        }
    }
}

impl From<Executable> for RawExecutable {
    fn from(step: Executable) -> Self {
        match step {
            Executable::Single(function) => Self {
                function: Some(function),
                group: None,
            },
            Executable::Group(group) => Self {
                function: None,
                group: Some(group),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Impls
// ---------------------------------------------------------------------------

impl Function {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// `namespace#name`, with a blank namespace read as the default one.
    pub fn reference(&self) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{}", namespace_or_default(&self.namespace), self.name)
    }

    /// `namespace#name@version`.
    pub fn fqfn(&self, version: &str) -> String {
        format!("{}{VERSION_SEPARATOR}{version}", self.reference())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{NAMESPACE_SEPARATOR}{}", self.namespace, self.name)
    }
}

impl Input {
    pub fn request(method: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            kind: default_input_type(),
            method: method.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.resource)
    }
}

impl Handler {
    pub fn new(input: Input, steps: Vec<Executable>) -> Self {
        Self { input, steps }
    }
}

impl Executable {
    pub fn single(reference: impl Into<String>) -> Self {
        Self::Single(reference.into())
    }

    pub fn group<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Group(references.into_iter().map(Into::into).collect())
    }

    /// Every function reference in this step, in declared order.
    pub fn references(&self) -> &[String] {
        match self {
            Self::Single(reference) => std::slice::from_ref(reference),
            Self::Group(references) => references,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl Directive {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            version: version.into(),
            functions: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Parse a directive from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Encode the directive as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a directive from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode the directive as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a directive file.  `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let directive = if is_json {
            Self::from_json(&text)?
        } else {
            Self::from_yaml(&text)?
        };

        tracing::debug!(
            path = %path.display(),
            identifier = %directive.identifier,
            functions = directive.functions.len(),
            handlers = directive.handlers.len(),
            "directive loaded"
        );
        Ok(directive)
    }
}
