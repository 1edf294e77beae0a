#![allow(non_snake_case)]

#[macro_use]
extern crate dlopen_derive;

use std::io;

use thiserror::Error;

use visa::VisaError;

pub mod app;
pub mod bridge;
pub mod resolver;
pub mod visa;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load VISA library: {0}")]
    Library(#[from] dlopen::Error),
    #[error("Error while communicating with device: {0}")]
    Visa(VisaError),
    #[error("No connected instrument identifies itself matching `{key}`")]
    NotFound { key: String },
    #[error("IO Error occurred: {0}")]
    Io(#[from] io::Error),
    #[error("Instrument is disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;
