//! Motor-controller link library.
//!
//! Lets several independent control loops share one half-duplex serial
//! link to daisy-chained motor controllers. See [`mux`] for the
//! multiplexer itself; [`config`], [`diagnostics`] and [`error`] carry the
//! ambient pieces.
//!
//! The library never installs a logger; it only emits through `log`.

#![deny(unused_must_use)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod mux;

pub use config::LinkConfig;
pub use error::{Error, Result};
