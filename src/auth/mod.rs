//! Azure AD authentication module.
//!
//! Provides OAuth2 with PKCE authentication, the browser sign-in flow,
//! and the session manager that hands out access credentials.

pub mod callback_server;
pub mod credential;
pub mod identity;
pub mod interactive;
pub mod oauth;
pub mod session;

pub use credential::{AuthenticatedSession, Credential};
pub use identity::Identity;
pub use interactive::{BrowserSignIn, CancelHandle, InteractiveAuthenticator};
pub use oauth::OAuth2Client;
pub use session::SessionManager;
