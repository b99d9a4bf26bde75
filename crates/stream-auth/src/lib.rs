//! Authenticated session for the record stream ingestion API.
//!
//! - [`Credentials`]: long-lived authorization token, signing secret and tenant
//! - [`HttpTransport`]: the request/response seam, with [`ReqwestTransport`] for real traffic
//! - [`AuthSession`]: access/refresh token pair with one-shot refresh-and-replay on 403

mod credentials;
mod error;
mod session;
mod transport;

pub use credentials::{Credentials, WILDCARD_TENANT};
pub use error::{AuthError, AuthResult};
pub use session::{compute_key, AuthSession, TokenPair};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
