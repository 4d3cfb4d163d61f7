#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod form;
pub mod operator;
pub mod prompt;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod submit;

pub use error::{Error, Result};
