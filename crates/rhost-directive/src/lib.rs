//! Directive model for rhost.
//!
//! A directive declares which functions an application is made of and how
//! handlers compose them into request pipelines.  This crate provides:
//!
//! - **Model**: [`Directive`], [`Function`], [`Handler`], and the
//!   [`Executable`] step union, parsed from YAML or JSON.
//! - **Validation**: [`Directive::validate`] promotes a directive to a
//!   [`ValidatedDirective`] under a [`GroupPolicy`].
//! - **Names**: [`Directive::fqfn`] resolves `namespace#name@version`.

pub mod error;
pub mod model;
pub mod validate;

pub use error::{DirectiveError, Result};
pub use model::{DEFAULT_NAMESPACE, Directive, Executable, Function, Handler, Input};
pub use validate::{GroupPolicy, ValidatedDirective};
