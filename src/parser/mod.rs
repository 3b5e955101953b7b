pub mod classify;
pub mod fields;
pub mod images;
pub mod rows;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::assets::AssetStore;
use crate::config::{FailurePolicy, RetryPolicy, Settings};
use crate::convert::{DocumentConverter, StagedUpload};
use crate::error::ExtractError;
use classify::{classify, HeaderRules};
use fields::{map_row, CandidateStudent, EventContext, ImageSlots};
use rows::{RawRow, RowExtractor};

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub rules: HeaderRules,
    pub folder: String,
    pub retry: RetryPolicy,
    pub row_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl ExtractOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        ExtractOptions {
            rules: settings.header.rules(),
            folder: settings.asset_folder.clone(),
            retry: RetryPolicy::from(&settings.upload),
            row_concurrency: settings.upload.row_concurrency.max(1),
            failure_policy: settings.upload.failure_policy,
        }
    }
}

/// Markup → rows → classified rows → candidates, in document order.
pub async fn extract_candidates<S: AssetStore>(
    markup: &str,
    ctx: &EventContext,
    store: &S,
    opts: &ExtractOptions,
) -> Result<Vec<CandidateStudent>, ExtractError> {
    let kept = RowExtractor::new(markup).filter(|row| {
        let verdict = classify(&row.cells, &opts.rules);
        if !verdict.is_kept() {
            debug!(row = row.ordinal, ?verdict, cells = ?row.cells, "skipped row");
        }
        verdict.is_kept()
    });

    let candidates: Vec<CandidateStudent> = stream::iter(kept)
        .map(|row| build_candidate(row, ctx, store, opts))
        .buffered(opts.row_concurrency.max(1))
        .try_collect()
        .await?;

    info!(
        candidates = candidates.len(),
        activity = ctx.activity(),
        position = %ctx.position(),
        "extracted roster"
    );
    Ok(candidates)
}

async fn build_candidate<S: AssetStore>(
    row: RawRow<'_>,
    ctx: &EventContext,
    store: &S,
    opts: &ExtractOptions,
) -> Result<CandidateStudent, ExtractError> {
    match images::upload_row_images(&row, store, &opts.folder, &opts.retry).await {
        Ok(urls) => Ok(map_row(&row, ctx, ImageSlots::bind(urls))),
        Err(source) => match opts.failure_policy {
            FailurePolicy::Abort => Err(ExtractError::AssetUpload {
                row: row.ordinal,
                source,
            }),
            FailurePolicy::Flag => {
                warn!(row = row.ordinal, "keeping row without images: {}", source);
                let mut student = map_row(&row, ctx, ImageSlots::default());
                student.images_missing = true;
                Ok(student)
            }
        },
    }
}

/// Convert a staged upload and extract its candidates. The staged file is
/// gone by the time this returns, whether conversion worked or not.
pub async fn preview_document<S: AssetStore>(
    staged: StagedUpload,
    converter: &dyn DocumentConverter,
    ctx: &EventContext,
    store: &S,
    opts: &ExtractOptions,
) -> Result<Vec<CandidateStudent>, ExtractError> {
    let converted = converter.to_markup(staged.path());
    staged.discard();
    let markup = converted?;
    debug!(bytes = markup.len(), "converted document");
    extract_candidates(&markup, ctx, store, opts).await
}
