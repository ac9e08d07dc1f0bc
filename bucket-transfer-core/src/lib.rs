#![doc = "bucket-transfer-core: core logic library for bucket-transfer."]

//! This crate contains the store contracts, the transfer pipeline and the
//! credential lifecycle. Concrete network clients live in the CLI crate.
//!
//! # Usage
//! Implement [`contract::SourceStore`] and [`contract::DestinationStore`] for your
//! clients and call [`transfer::transfer`].

pub mod contract;
pub mod credentials;
pub mod staging;
pub mod token_store;
pub mod transfer;
