pub mod connection;
pub mod decoder;
pub mod error_handler;
pub mod query;
pub mod supervisor;

pub use {
    connection::{BitsocketSource, ConnectionError, FeedSource, FeedStream, StreamError, DEFAULT_FEED_URL},
    decoder::{decode_message, FeedEvent, Tx, TxOutput},
    error_handler::ExponentialBackoff,
    query::FeedQuery,
    supervisor::{spawn_supervisor, EpochTx, SupervisorConfig, SupervisorHandle, SupervisorState, SupervisorStats},
};
