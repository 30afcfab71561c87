//! Gateway intents.
//!
//! Intents are a bitfield sent with IDENTIFY that controls which event
//! families the gateway streams to the session. Privileged intents need
//! explicit approval on the developer portal.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Bitfield of event families the session subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild create/update/delete, roles, channels.
        const GUILDS = 1 << 0;

        /// Member joins, updates, removes. **Privileged.**
        const GUILD_MEMBERS = 1 << 1;

        /// Bans and moderation actions.
        const GUILD_MODERATION = 1 << 2;

        /// Emoji and sticker updates.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;

        /// Integration updates.
        const GUILD_INTEGRATIONS = 1 << 4;

        /// Webhook updates.
        const GUILD_WEBHOOKS = 1 << 5;

        /// Invite creation and deletion.
        const GUILD_INVITES = 1 << 6;

        /// Voice state updates.
        const GUILD_VOICE_STATES = 1 << 7;

        /// Presence updates. **Privileged.**
        const GUILD_PRESENCES = 1 << 8;

        /// Messages in guilds.
        const GUILD_MESSAGES = 1 << 9;

        /// Message reactions in guilds.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;

        /// Typing indicators in guilds.
        const GUILD_MESSAGE_TYPING = 1 << 11;

        /// Direct messages.
        const DIRECT_MESSAGES = 1 << 12;

        /// Reactions on direct messages.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;

        /// Typing indicators in direct messages.
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// Message content in message events. **Privileged.**
        const MESSAGE_CONTENT = 1 << 15;

        /// Scheduled event updates.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;

        /// All intents that do not require approval.
        const NON_PRIVILEGED = Self::GUILDS.bits()
            | Self::GUILD_MODERATION.bits()
            | Self::GUILD_EMOJIS_AND_STICKERS.bits()
            | Self::GUILD_INTEGRATIONS.bits()
            | Self::GUILD_WEBHOOKS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits()
            | Self::DIRECT_MESSAGE_TYPING.bits()
            | Self::GUILD_SCHEDULED_EVENTS.bits();

        /// Intents that require approval.
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();

        /// Every intent, privileged included.
        const ALL = Self::NON_PRIVILEGED.bits() | Self::PRIVILEGED.bits();
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::NON_PRIVILEGED
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u64::deserialize(deserializer)?;
        Ok(Intents::from_bits_truncate(bits))
    }
}
