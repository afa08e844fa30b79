//! Handler execution helpers
//!
//! Handlers wrap their service call in [`execute_logged`] so every operation
//! is timed and logged the same way.

use std::future::Future;
use std::time::Instant;

use crate::error::ApiResult;
use crate::utils::logging::log_operation;

/// Run an operation, logging its duration and error label.
///
/// # Example
///
/// ```rust,ignore
/// async fn manual_sync(
///     State(ctx): State<Arc<AppContext>>,
///     Path(id): Path<String>,
/// ) -> ApiResult<Json<SyncSummary>> {
///     execute_logged("connections::sync", async {
///         Ok(Json(ctx.engine.sync_connection(&id, SyncTrigger::Manual).await?))
///     })
///     .await
/// }
/// ```
pub async fn execute_logged<Fut, T>(operation: &str, fut: Fut) -> ApiResult<T>
where
    Fut: Future<Output = ApiResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    log_operation(operation, start.elapsed(), result.as_ref().err().map(|err| err.label()));
    result
}

#[cfg(test)]
mod tests {
    use calsync_domain::CalSyncError;

    use super::*;
    use crate::error::ApiError;

    #[tokio::test]
    async fn passes_results_through() {
        let ok = execute_logged("test::ok", async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(ok.ok(), Some(7));

        let err = execute_logged("test::err", async {
            Err::<(), _>(ApiError::from(CalSyncError::NotFound("c1".into())))
        })
        .await;
        assert_eq!(err.err().map(|e| e.label()), Some("not_found"));
    }
}
