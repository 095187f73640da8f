//! Session credentials and their issuance

pub mod callback;
pub mod credential;
pub mod issuer;
pub mod statement;

pub use callback::{AuthCallback, OAuthAuthCallback, WalletAuthCallback};
pub use credential::{SessionCredential, SessionKey};
pub use issuer::{IssuerConfig, SessionIssuer};
pub use statement::{AuthSig, AuthStatement};
