//! # FreeScholar (publication platform backend)
//!
//! `freescholar` serves user accounts, publication records and full-text search
//! for a scholarly social platform. Two subsystems carry the real invariants:
//!
//! ## Publication writes
//!
//! A publication, its ordered author associations and its keyword associations
//! are written in a single relational transaction. Only after commit is a
//! denormalized search document handed to a background synchronizer, which
//! mirrors it into the search engine on a best-effort basis. Search failures
//! never change the outcome reported to the caller; the relational store stays
//! authoritative.
//!
//! ## Sessions
//!
//! Bearer tokens are signed JWTs. Logout blacklists a token in the key-value
//! store until it would have expired anyway. Password-reset tokens are single
//! use: they are only redeemable while a presence entry exists in the same
//! store, and redemption removes it.

pub mod api;
pub mod auth;
pub mod cli;
pub mod error;
pub mod kv;
pub mod publications;
pub mod search;
pub mod storage;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
