//! Optimistic commit: conditional update against the full snapshot
//!
//! The write filter pins the document by `_id` and by every top-level field
//! as it was read, plus `$exists: false` for schema fields that were absent.
//! A concurrent change to any field makes the filter miss, the update
//! reports `matched_count == 0`, and the transform starts over from Locate.

use super::{Plan, TransformContext, TransformOutcome, TransformSpec};
use rand::Rng;
use shapedb_core::{Document, Error, Result, Value};
use shapedb_storage::{FindOptions, UpdateOptions};
use std::time::Duration;
use tracing::debug;

pub(super) async fn run(
    ctx: &TransformContext<'_>,
    filter: &Document,
    spec: &TransformSpec,
    attempts: usize,
    max_backoff_ms: u64,
) -> Result<Option<TransformOutcome>> {
    let collection = ctx.registry.name();
    let mut last_error = None;

    for attempt in 1..=attempts {
        let Some(stored) = ctx
            .store
            .find_one(collection, filter, &FindOptions::new())
            .await?
        else {
            return Ok(None);
        };

        let plan = Plan::build(ctx.registry, ctx.warnings, spec, &stored)?;
        if plan.patch.is_empty() {
            return Ok(Some(plan.unchanged()));
        }

        let guard = snapshot_filter(ctx, &stored);
        let result = ctx
            .store
            .update_one(collection, &guard, &plan.patch, UpdateOptions::default())
            .await?;
        if result.matched_count > 0 {
            return Ok(Some(plan.committed(result)));
        }

        debug!(
            collection = %collection,
            id = %plan.id,
            attempt,
            attempts,
            "Optimistic transform lost a race"
        );
        last_error = Some(Error::ConcurrentModification {
            collection: collection.to_string(),
            id: plan.id,
            attempts,
        });
        if attempt < attempts {
            tokio::time::sleep(jitter(max_backoff_ms)).await;
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::InvalidTransform("max_retries must be at least 1".to_string())
    }))
}

/// Filter matching the document only while it is unchanged since `stored` was read
fn snapshot_filter(ctx: &TransformContext<'_>, stored: &Document) -> Document {
    let mut guard = Document::new();
    for (key, value) in stored {
        let mut condition = Document::new();
        if value.is_null() {
            // `{$eq: null}` alone also matches a missing field
            condition.insert("$exists".to_string(), Value::Bool(true));
        }
        condition.insert("$eq".to_string(), value.clone());
        guard.insert(key.clone(), Value::Object(condition));
    }
    for key in ctx.registry.paths().top_level() {
        if !stored.contains_key(key) {
            let mut absent = Document::new();
            absent.insert("$exists".to_string(), Value::Bool(false));
            guard.insert(key.to_string(), Value::Object(absent));
        }
    }
    guard
}

fn jitter(max_backoff_ms: u64) -> Duration {
    let ms = rand::thread_rng().gen_range(0..max_backoff_ms.max(1));
    Duration::from_millis(ms)
}
