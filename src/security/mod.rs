//! Security primitives
//!
//! Short-lived media-socket tokens, tenant API-key digests, and the
//! at-rest encryption used for provider-credential blobs. Keys come from
//! the environment at process start and are immutable for the process
//! lifetime.

pub mod apikey;
pub mod credentials;
pub mod token;

pub use apikey::{hash_api_key, verify_api_key};
pub use credentials::{decrypt_credential, encrypt_credential};
pub use token::{issue_media_token, verify_media_token};
