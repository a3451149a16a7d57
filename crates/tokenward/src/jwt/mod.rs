//! JWT decoding and validation
//!
//! - `token` splits a compact JWS and parses header and claims
//! - `validator` selects the signing key, verifies the signature with
//!   `jsonwebtoken` and checks the registered claims

mod token;
mod validator;

pub use validator::TokenValidator;
