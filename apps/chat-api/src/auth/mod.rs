pub mod middleware;

pub use middleware::AuthUser;
