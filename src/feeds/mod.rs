pub mod ingest;
pub mod yahoo;
