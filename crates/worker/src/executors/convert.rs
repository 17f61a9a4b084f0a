use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bindery_pipeline::ConversionPipeline;

use super::{BatchContext, ItemExecutor, ItemSuccess};
use crate::error::ItemFailure;
use crate::store::{ConvertParameters, WorkItem};

/// Runs the conversion pipeline for one catalog file.
pub struct ConvertExecutor {
    pipeline: Arc<ConversionPipeline>,
}

impl ConvertExecutor {
    pub fn new(pipeline: Arc<ConversionPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ItemExecutor for ConvertExecutor {
    async fn run(&self, ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure> {
        let WorkItem::File { path, .. } = item else {
            return Err(ItemFailure::Invalid(format!(
                "item {} is not a catalog file",
                item.id()
            )));
        };
        let params: ConvertParameters = serde_json::from_value(ctx.parameters.clone())
            .map_err(|e| ItemFailure::Invalid(format!("malformed conversion parameters: {e}")))?;

        let outcome = self
            .pipeline
            .convert(Path::new(path), &params.options, Some(ctx.batch_id))
            .await?;

        Ok(ItemSuccess {
            library_id: outcome.library_id.or(ctx.library_id),
            reversible: false,
            metadata: None,
        })
    }
}
