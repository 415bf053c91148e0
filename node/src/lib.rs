// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod telemetry;
pub mod store;
pub mod watermarks;
pub mod ingest;
pub mod matching;
pub mod history;
pub mod engine;
pub mod retry;
pub mod api;
pub mod server;
