// Logs module - output routing from child pipes into per-instance log files

mod router;
mod sink;

pub use router::{route_pipes, RouterHandle, LOG_CHANNEL_CAPACITY};
pub use sink::{LogSink, LogSource, SinkPaths};
