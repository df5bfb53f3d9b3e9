use crate::domain::permit::ApplicationId;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;

/// One `application_id,user_id` row of a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedApplication {
    pub application_id: ApplicationId,
    pub user_id: String,
}

/// Reads applications to register from a CSV source.
///
/// Wraps `csv::Reader`, trimming whitespace around every field.
pub struct ApplicationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ApplicationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the rows; a bad row yields an error and the
    /// iterator carries on with the next one.
    pub fn applications(self) -> impl Iterator<Item = Result<SeedApplication>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
