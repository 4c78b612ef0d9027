//! Interface between the node and the application built on top of it.

pub mod application;

pub use application::{Application, ApplicationError, InmemApplication};
