mod config;
mod daemon;
mod handler;
mod tcp;

pub use config::{LimitsSection, LoggingSection, ServerConfig, ServerSection};
pub use daemon::Daemon;
pub use handler::RequestHandler;
pub use tcp::TcpServer;
