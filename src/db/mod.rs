pub mod cache;
mod macros;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod repo;

pub use cache::{CacheKey, MemoryCache, ResultCache};
pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore};
pub use self::redis::{create_redis_client, CacheWriterHandle, RedisCache};
pub use repo::{BookmarkStore, GenreStore, MovieCatalog, RatingStore, UserStore};
