pub mod backend;
pub mod pool;
pub mod requests;
pub mod session;
pub mod stream;
pub mod workflow;
