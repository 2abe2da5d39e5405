mod session;
mod token_store;

pub use session::{Credentials, Generation, SessionManager, LOGIN_PATH, REFRESH_PATH};
pub use token_store::{
    KeyringTokenStore, MemoryTokenStore, StoreError, TokenStore, KEYRING_USER_SESSION_TOKENS,
};
