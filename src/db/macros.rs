/// Read-through lookup against a `ResultCache`.
///
/// Evaluates to `AppResult<T>`: a hit is deserialized and returned, a miss
/// awaits `$block` and queues the value for storage under `$key` for `$ttl`.
/// Errors from `$block` propagate and are never cached; use
/// `return Ok::<_, AppError>(..)` for early returns inside it.
///
/// ```rust,ignore
/// cached!(self.cache, CacheKey::SimilarMovies { movie_id, limit }, ttl, async {
///     self.similar_uncached(movie_id, limit).await
/// })
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_from_cache(&$key).await? {
            tracing::debug!(key = %$key, "Cache hit");
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.set_in_background(&$key, &value, $ttl);
            Ok(value)
        }
    }};
}
