//! Authentication core: password hashing, access-token signing, refresh-token
//! lifecycle, credential extraction and the session authority tying them
//! together, plus the Rocket guards that expose it to handlers.

pub mod authority;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guards;
pub mod identity;
pub mod jwt;
pub mod memory;
pub mod passwords;
pub mod refresh_store;
pub mod repository;
pub mod responses;
pub mod routes;

pub use authority::{Access, LoginSession, SessionAuthority, authorize};
pub use config::{AuthConfig, PasswordParams};
pub use error::{AuthError, AuthResult};
pub use guards::{AuthUser, RequestHeaders, ServiceCaller};
pub use identity::Identity;
pub use jwt::{AccessTokenCodec, SignedAccessToken};
pub use memory::MemorySessionRepository;
pub use passwords::PasswordService;
pub use refresh_store::{RefreshTokenState, RefreshTokenStore};
pub use repository::{PgSessionRepository, SessionRepository, StoreError};
