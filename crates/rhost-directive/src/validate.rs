//! Validation and name resolution.
//!
//! [`Directive::validate`] is the only way to obtain a [`ValidatedDirective`],
//! the form dispatch accepts.  Validation checks that every step reference
//! resolves to exactly one declared function and applies the configured
//! [`GroupPolicy`].

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DirectiveError, Result};
use crate::model::{
    DEFAULT_NAMESPACE, Directive, Function, NAMESPACE_SEPARATOR, VERSION_SEPARATOR, namespace_or_default,
};

/// Where group steps may appear in a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// Groups may appear at any position.
    #[default]
    Anywhere,
    /// Groups may only precede every single step.
    LeadingOnly,
}

impl fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anywhere => f.write_str("anywhere"),
            Self::LeadingOnly => f.write_str("leading_only"),
        }
    }
}

impl FromStr for GroupPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "anywhere" => Ok(Self::Anywhere),
            "leading_only" => Ok(Self::LeadingOnly),
            other => Err(format!("unknown group policy `{other}`, expected `anywhere` or `leading_only`")),
        }
    }
}

/// A directive that passed validation.  Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDirective {
    directive: Directive,
    policy: GroupPolicy,
}

impl ValidatedDirective {
    /// The policy this directive was validated under.
    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    pub fn into_inner(self) -> Directive {
        self.directive
    }

    /// Resolve a step reference to its declared function.
    pub fn function(&self, reference: &str) -> Result<&Function> {
        self.directive.lookup(reference)?.ok_or_else(|| DirectiveError::MissingFunction {
            reference: reference.to_owned(),
        })
    }
}

impl Deref for ValidatedDirective {
    type Target = Directive;

    fn deref(&self) -> &Directive {
        &self.directive
    }
}

impl Directive {
    /// Check the directive and promote it to a [`ValidatedDirective`].
    ///
    /// Empty namespaces are normalized to the default namespace first.
    pub fn validate(mut self, policy: GroupPolicy) -> Result<ValidatedDirective> {
        if self.identifier.trim().is_empty() {
            return Err(DirectiveError::MissingIdentifier);
        }
        if self.version.trim().is_empty() {
            return Err(DirectiveError::MissingVersion);
        }

        let mut declared = std::collections::HashSet::new();
        for (index, function) in self.functions.iter_mut().enumerate() {
            if function.name.trim().is_empty() {
                return Err(DirectiveError::EmptyFunctionName { index });
            }
            if function.namespace.trim().is_empty() {
                function.namespace = DEFAULT_NAMESPACE.to_owned();
            }
            if !declared.insert(function.reference()) {
                return Err(DirectiveError::DuplicateFunction {
                    reference: function.reference(),
                });
            }
        }

        for handler in &self.handlers {
            let name = handler.input.to_string();
            if handler.steps.is_empty() {
                return Err(DirectiveError::EmptyHandler { handler: name });
            }

            let mut seen_single = false;
            for (step_index, step) in handler.steps.iter().enumerate() {
                if step.is_group() {
                    if step.references().is_empty() {
                        return Err(DirectiveError::EmptyGroup {
                            handler: name,
                            step: step_index,
                        });
                    }
                    if seen_single && policy == GroupPolicy::LeadingOnly {
                        return Err(DirectiveError::GroupAfterSingle {
                            handler: name,
                            step: step_index,
                        });
                    }
                } else {
                    seen_single = true;
                }

                for reference in step.references() {
                    if self.lookup(reference)?.is_none() {
                        return Err(DirectiveError::MissingFunction {
                            reference: reference.clone(),
                        });
                    }
                }
            }
        }

        tracing::debug!(
            identifier = %self.identifier,
            version = %self.version,
            functions = self.functions.len(),
            handlers = self.handlers.len(),
            policy = %policy,
            "directive validated"
        );

        Ok(ValidatedDirective {
            directive: self,
            policy,
        })
    }

    /// Fully qualified name of a declared function: `namespace#name@version`.
    ///
    /// A reference without a namespace, or with an empty one (`#name`), is
    /// looked up in the default namespace.  Declared functions with a blank
    /// namespace count as default too, so this works before validation.
    pub fn fqfn(&self, reference: &str) -> Result<String> {
        let unknown = || DirectiveError::UnknownFunction {
            reference: reference.to_owned(),
        };

        let unversioned = self.strip_version(reference)?;
        let (namespace, name) = unversioned
            .split_once(NAMESPACE_SEPARATOR)
            .unwrap_or((DEFAULT_NAMESPACE, unversioned));
        let namespace = namespace_or_default(namespace);

        self.functions
            .iter()
            .find(|f| namespace_or_default(&f.namespace) == namespace && f.name == name)
            .map(|f| f.fqfn(&self.version))
            .ok_or_else(unknown)
    }

    /// Find the function a step reference points at.
    ///
    /// A bare name is searched across every namespace and must match one
    /// function; `namespace#name` must match exactly.  Either form may carry
    /// `@version`, which must be the directive's own.
    pub(crate) fn lookup(&self, reference: &str) -> Result<Option<&Function>> {
        let unversioned = self.strip_version(reference)?;
        if unversioned.is_empty() {
            return Ok(None);
        }

        if let Some((namespace, name)) = unversioned.split_once(NAMESPACE_SEPARATOR) {
            let namespace = namespace_or_default(namespace);
            return Ok(self
                .functions
                .iter()
                .find(|f| namespace_or_default(&f.namespace) == namespace && f.name == name));
        }

        let mut matches = self.functions.iter().filter(|f| f.name == unversioned);
        let Some(first) = matches.next() else {
            return Ok(None);
        };
        let rest: Vec<&Function> = matches.collect();
        if rest.is_empty() {
            return Ok(Some(first));
        }

        Err(DirectiveError::Ambiguous {
            reference: reference.to_owned(),
            candidates: std::iter::once(first)
                .chain(rest)
                .map(Function::reference)
                .collect(),
        })
    }

    fn strip_version<'a>(&self, reference: &'a str) -> Result<&'a str> {
        match reference.split_once(VERSION_SEPARATOR) {
            Some((unversioned, version)) if version == self.version => Ok(unversioned),
            Some(_) => Err(DirectiveError::VersionMismatch {
                reference: reference.to_owned(),
                version: self.version.clone(),
            }),
            None => Ok(reference),
        }
    }
}
