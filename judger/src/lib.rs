//! Sandboxed execution and judging of untrusted code submissions.
//!
//! A submission is resolved to a language runtime ([`lang`]), its runtime
//! image is provisioned and it is run once per test case in a fresh,
//! resource-capped container ([`runner`]). [`judge`] turns the raw run
//! outcomes into a verdict.

pub mod config;
pub mod judge;
pub mod lang;
pub mod prelude;
pub mod runner;
pub mod util;

#[cfg(test)]
mod test;
