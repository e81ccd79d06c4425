pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod intent;
pub mod model;
pub mod model_map;
pub mod normalizer;
pub mod reassembler;
pub mod recovery;
pub mod services;
pub mod stream;
pub mod telemetry;
pub mod tools;
pub mod translator;
pub mod upstream;
