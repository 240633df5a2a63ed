//! Stream serving for the example listener.

pub mod handlers;
pub mod serve;
