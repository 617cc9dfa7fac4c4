mod connection;

pub use connection::CacheClient;
