pub mod application_reader;
pub mod event_writer;
