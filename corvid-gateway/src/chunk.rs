//! Member chunk reassembly.
//!
//! Member queries come back paginated as GUILD_MEMBERS_CHUNK dispatches.
//! Chunks are buffered per guild until the final page arrives, then the
//! whole list is drained into the cache in cooperative time slices so the
//! receive loop and heartbeat are never starved by a large guild.

use corvid_cache::MemberCache;
use corvid_model::Snowflake;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Processing budget before yielding back to the scheduler.
const PROCESS_SLICE: Duration = Duration::from_millis(50);

/// Reassembles paginated member chunk responses.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    /// Accumulated members per guild, removed once the final chunk lands.
    accumulators: DashMap<Snowflake, Vec<Value>>,
}

impl ChunkAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any guild has chunks buffered.
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Handle one GUILD_MEMBERS_CHUNK payload.
    pub async fn process(&self, cache: &dyn MemberCache, chunk: Value) {
        let Some(guild_id) = chunk
            .get("guild_id")
            .and_then(|id| serde_json::from_value::<Snowflake>(id.clone()).ok())
        else {
            warn!("member chunk without a guild id, dropping");
            return;
        };

        let guild = cache.guild(guild_id);
        if let Some(guild) = &guild {
            // the guild must read as un-chunked while pages are in flight
            if guild.chunked.is_set() {
                guild.chunked.clear();
            }
        }

        let members: Vec<Value> = chunk
            .get("members")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let index = chunk.get("chunk_index").and_then(Value::as_u64).unwrap_or(0);
        let count = chunk.get("chunk_count").and_then(Value::as_u64).unwrap_or(1);

        self.accumulators
            .entry(guild_id)
            .or_default()
            .extend(members.iter().cloned());

        if index + 1 != count {
            debug!(
                guild_id = %guild_id,
                members = members.len(),
                "buffered member chunk"
            );
            return;
        }

        let members = self
            .accumulators
            .remove(&guild_id)
            .map(|(_, accumulated)| accumulated)
            .unwrap_or(members);

        info!(guild_id = %guild_id, members = members.len(), "processing member chunks");
        let started = Instant::now();
        let mut slice = Instant::now();

        for member in &members {
            cache.place_member_data(guild_id, member);
            if slice.elapsed() > PROCESS_SLICE {
                tokio::task::yield_now().await;
                slice = Instant::now();
            }
        }

        if let Some(guild) = guild {
            guild.chunked.set();
        }
        info!(
            guild_id = %guild_id,
            elapsed_s = started.elapsed().as_secs_f64(),
            "cached member chunks"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_cache::Guild;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct RecordingCache {
        guild: Arc<Guild>,
        placed: Mutex<Vec<u64>>,
    }

    impl RecordingCache {
        fn new(guild_id: Snowflake) -> Self {
            Self {
                guild: Arc::new(Guild::new(guild_id)),
                placed: Mutex::new(Vec::new()),
            }
        }
    }

    impl MemberCache for RecordingCache {
        fn place_member_data(&self, _guild_id: Snowflake, member: &Value) {
            let id = member["user"]["id"].as_str().unwrap().parse().unwrap();
            self.placed.lock().push(id);
        }

        fn guild(&self, _guild_id: Snowflake) -> Option<Arc<Guild>> {
            Some(self.guild.clone())
        }
    }

    fn chunk(guild_id: u64, index: u64, count: u64, ids: std::ops::Range<u64>) -> Value {
        let members: Vec<Value> = ids
            .map(|id| json!({"user": {"id": id.to_string()}}))
            .collect();
        json!({
            "guild_id": guild_id.to_string(),
            "chunk_index": index,
            "chunk_count": count,
            "members": members,
        })
    }

    #[tokio::test]
    async fn non_final_chunks_only_buffer() {
        let assembler = ChunkAssembler::new();
        let cache = RecordingCache::new(Snowflake::new(1));

        assembler.process(&cache, chunk(1, 0, 3, 0..500)).await;

        assert!(cache.placed.lock().is_empty());
        assert!(!assembler.is_empty());
        assert!(!cache.guild.chunked.is_set());
    }

    #[tokio::test]
    async fn final_chunk_drains_everything_in_arrival_order() {
        let assembler = ChunkAssembler::new();
        let cache = RecordingCache::new(Snowflake::new(1));

        assembler.process(&cache, chunk(1, 0, 3, 0..500)).await;
        assembler.process(&cache, chunk(1, 1, 3, 500..1000)).await;
        assembler.process(&cache, chunk(1, 2, 3, 1000..1123)).await;

        let placed = cache.placed.lock();
        assert_eq!(placed.len(), 1123);
        assert!(placed.windows(2).all(|pair| pair[0] < pair[1]));
        drop(placed);

        assert!(assembler.is_empty());
        assert!(cache.guild.chunked.is_set());
    }

    #[tokio::test]
    async fn chunking_clears_a_previously_set_signal() {
        let assembler = ChunkAssembler::new();
        let cache = RecordingCache::new(Snowflake::new(1));
        cache.guild.chunked.set();

        assembler.process(&cache, chunk(1, 0, 2, 0..10)).await;
        assert!(!cache.guild.chunked.is_set());

        assembler.process(&cache, chunk(1, 1, 2, 10..20)).await;
        assert!(cache.guild.chunked.is_set());
        assert_eq!(cache.placed.lock().len(), 20);
    }

    #[tokio::test]
    async fn single_chunk_response_completes_immediately() {
        let assembler = ChunkAssembler::new();
        let cache = RecordingCache::new(Snowflake::new(9));

        assembler.process(&cache, chunk(9, 0, 1, 0..25)).await;

        assert_eq!(cache.placed.lock().len(), 25);
        assert!(assembler.is_empty());
        assert!(cache.guild.chunked.is_set());
    }

    #[tokio::test]
    async fn interleaved_guilds_accumulate_independently() {
        let assembler = ChunkAssembler::new();
        let cache = RecordingCache::new(Snowflake::new(1));

        assembler.process(&cache, chunk(1, 0, 2, 0..5)).await;
        assembler.process(&cache, chunk(2, 0, 1, 100..110)).await;

        // guild 2 finished, guild 1 still buffering
        assert_eq!(cache.placed.lock().len(), 10);
        assert!(!assembler.is_empty());

        assembler.process(&cache, chunk(1, 1, 2, 5..10)).await;
        assert_eq!(cache.placed.lock().len(), 20);
        assert!(assembler.is_empty());
    }
}
