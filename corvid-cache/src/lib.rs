//! Corvid Cache - in-memory cache for chat entities.
//!
//! The gateway core only depends on the [`MemberCache`] seam: placing member
//! data received in chunk responses and looking up guilds to flip their
//! chunk-completion signal. [`InMemoryCache`] is the concurrent default
//! implementation, backed by DashMap.
#![deny(unsafe_code)]

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use corvid_model::{Flag, Snowflake};

/// A guild as tracked by the cache.
///
/// Only the identity and chunking state matter to the gateway core; richer
/// guild data lives with whatever higher layer populates the cache.
#[derive(Debug)]
pub struct Guild {
    /// The guild's id.
    pub id: Snowflake,
    /// Set once every member chunk for this guild has been processed.
    pub chunked: Flag,
}

impl Guild {
    /// Create a new guild entry with the chunked signal cleared.
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            chunked: Flag::new(),
        }
    }
}

/// Cache surface the gateway writes member-chunk results through.
pub trait MemberCache: Send + Sync {
    /// Store one member payload for a guild.
    fn place_member_data(&self, guild_id: Snowflake, member: &Value);

    /// Look up a guild by id.
    fn guild(&self, guild_id: Snowflake) -> Option<Arc<Guild>>;
}

/// Concurrent in-memory cache.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    guilds: DashMap<Snowflake, Arc<Guild>>,
    members: DashMap<(Snowflake, Snowflake), Value>,
}

impl InMemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a guild, returning the cached handle.
    pub fn insert_guild(&self, id: Snowflake) -> Arc<Guild> {
        let guild = Arc::new(Guild::new(id));
        self.guilds.insert(id, guild.clone());
        guild
    }

    /// Look up a cached member payload.
    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Value> {
        self.members
            .get(&(guild_id, user_id))
            .map(|entry| entry.clone())
    }

    /// Number of members cached for a guild.
    pub fn member_count(&self, guild_id: Snowflake) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .count()
    }
}

impl MemberCache for InMemoryCache {
    fn place_member_data(&self, guild_id: Snowflake, member: &Value) {
        // Member payloads nest the user object; a member without one (rare
        // partial payloads) is keyed under the zero id and overwritten.
        let user_id = member
            .get("user")
            .and_then(|user| user.get("id"))
            .and_then(Self::snowflake_from)
            .unwrap_or_default();

        self.members.insert((guild_id, user_id), member.clone());
    }

    fn guild(&self, guild_id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.get(&guild_id).map(|entry| entry.clone())
    }
}

impl InMemoryCache {
    fn snowflake_from(value: &Value) -> Option<Snowflake> {
        match value {
            Value::String(s) => s.parse::<u64>().ok().map(Snowflake::new),
            Value::Number(n) => n.as_u64().map(Snowflake::new),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn places_members_by_user_id() {
        let cache = InMemoryCache::new();
        let guild_id = Snowflake::new(1234);
        cache.insert_guild(guild_id);

        cache.place_member_data(guild_id, &json!({"user": {"id": "42"}, "nick": "corvid"}));
        cache.place_member_data(guild_id, &json!({"user": {"id": 43}}));

        assert_eq!(cache.member_count(guild_id), 2);
        let member = cache.member(guild_id, Snowflake::new(42)).unwrap();
        assert_eq!(member["nick"], "corvid");
    }

    #[test]
    fn guild_lookup_and_chunked_signal() {
        let cache = InMemoryCache::new();
        let id = Snowflake::new(9);
        cache.insert_guild(id);

        let guild = cache.guild(id).expect("guild cached");
        assert!(!guild.chunked.is_set());
        guild.chunked.set();
        assert!(cache.guild(id).unwrap().chunked.is_set());
        assert!(cache.guild(Snowflake::new(10)).is_none());
    }
}
