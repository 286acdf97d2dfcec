pub mod http;
pub mod keyed_lock;
pub mod logging;
pub mod timing;
