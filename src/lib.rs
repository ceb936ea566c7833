//! Downloads and decrypts Deezer track streams.
//!
//! A track stream is split into 2 KiB chunks of which every third is
//! encrypted with Blowfish-CBC under a key derived from the track ID. This
//! crate locates the stream, fetches its chunks in order, decrypts them and
//! assembles the plain audio:
//!
//! * [`decrypt`] - key derivation and chunk decryption
//! * [`fetch`] - ordered chunk retrieval over HTTP
//! * [`assemble`] - strictly ordered output
//! * [`pipeline`] - fetch, decrypt and assemble with cancellation
//! * [`download`] - the [`Downloader`](download::Downloader) facade
//! * [`catalog`] - links, albums and searches on the public catalog
//! * [`tag`] - metadata, cover art and lyrics for downloaded audio
//!
//! No secrets are included. The session credential and the shared secret
//! that keys derive from must be provided in a secrets file, see
//! [`config::Secrets`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[macro_use]
extern crate log;

pub mod arl;
pub mod assemble;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod http;
pub mod locator;
pub mod pipeline;
pub mod protocol;
pub mod tag;
pub mod track;

#[cfg(test)]
mod testing;
