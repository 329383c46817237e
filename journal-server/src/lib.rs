pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;
pub mod subsystems;
