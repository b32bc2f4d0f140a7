mod auth;
mod comments;
mod helpers;
mod misc;
mod password;
mod posts;
mod repository;
mod server;
mod session;
mod shared;
mod subs;
mod trim;

#[cfg(test)]
mod test_support;

pub use server::{ApiError, ApiJson, serve};
