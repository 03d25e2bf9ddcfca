//! Grant model and token verification for Parley.
//!
//! A grant is a colon-delimited capability string such as `account:create`.
//! Held grants may end in a `*` segment (`account:*`) or be the bare `*`
//! wildcard, which satisfies every requirement.

mod grant;
mod token;

pub use grant::{
    derived_grant, Grant, GrantDecision, GrantParseError, GrantRequirement, GrantSet,
};
pub use token::{AccessError, StaticTokenVerifier, TokenVerifier, VerifiedToken};
