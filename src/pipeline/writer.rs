use anyhow::{Context, Result};

use crate::model::ImageResult;
use crate::storage::{ResultCollection, ResultStore};

/// Routes finished results to the success or failure collection.
pub struct ResultWriter<'a, S: ResultStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: ResultStore + ?Sized> ResultWriter<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Append `result` to the collection matching its status.
    pub fn write(&mut self, result: &ImageResult) -> Result<ResultCollection> {
        let collection = ResultCollection::for_status(result.status());
        self.store
            .insert_result(collection, result)
            .with_context(|| {
                format!(
                    "failed to persist result for image {} into {}",
                    result.image_id(),
                    collection.table()
                )
            })?;
        Ok(collection)
    }
}
