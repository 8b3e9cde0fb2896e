pub mod client;
pub mod middleware;
pub mod models;
pub mod refresh;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
