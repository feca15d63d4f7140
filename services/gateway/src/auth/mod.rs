//! Authentication and authorization for gateway routes.
pub mod middleware;
pub mod validator;

pub use middleware::{AuthContext, require_admin, require_principal};
pub use validator::{AuthFailure, AuthStateSource, AuthValidator, Authenticated, ResolvedAuthState};
