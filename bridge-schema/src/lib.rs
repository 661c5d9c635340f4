// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain model and table layout shared by the storage engine, the indexer
//! and the relayer.

pub mod models;
pub mod schema;

pub use models::*;
