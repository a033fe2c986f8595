//! Discover the SunSpec models a Modbus device implements and decode them into a typed schema.
//!
//! A discovery pass reads from a [`source::RegisterSource`], walks the model chain with the
//! [`scanner`], decodes every block against a [`catalog::Catalog`] with the [`decoder`] and
//! collects the result into a [`schema::SchemaDevice`]. [`discovery::discover`] ties these
//! together.

pub mod catalog;
pub mod commands;
pub mod connection;
pub mod decoder;
pub mod discovery;
pub mod modbus;
pub mod output;
pub mod recorded;
pub mod scanner;
pub mod schema;
pub mod source;
pub mod sunspec;
