pub mod accumulator;
pub mod app;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod store;

#[cfg(test)]
mod testing;
