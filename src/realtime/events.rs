//! Which cache keys each realtime event invalidates.
//!
//! Events that change lobby membership or existence refresh the lobby
//! listing together with the lobby itself; events that change a player's
//! status inside a lobby refresh only that lobby.

use std::fmt;

use crate::cache::QueryKey;

/// Entity a private channel is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Game,
    Lobby,
}

/// What an event invalidates, relative to the channel's entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidates {
    /// `["game", id]`
    Game,
    /// `["lobby", id]`
    Lobby,
    /// `["lobby", id]` and `["lobbies"]`
    LobbyAndListing,
}

impl Invalidates {
    /// Concrete keys for the entity `id`.
    pub fn keys(self, id: &str) -> Vec<QueryKey> {
        match self {
            Self::Game => vec![QueryKey::game(id)],
            Self::Lobby => vec![QueryKey::lobby(id)],
            Self::LobbyAndListing => vec![QueryKey::lobby(id), QueryKey::lobbies()],
        }
    }
}

const GAME_EVENTS: &[(&str, Invalidates)] = &[
    ("GameActionProcessed", Invalidates::Game),
    ("GameCompleted", Invalidates::Game),
    ("GameForfeited", Invalidates::Game),
];

const LOBBY_EVENTS: &[(&str, Invalidates)] = &[
    ("PlayerJoined", Invalidates::LobbyAndListing),
    ("PlayerLeft", Invalidates::LobbyAndListing),
    ("LobbyStarting", Invalidates::LobbyAndListing),
    ("LobbyCancelled", Invalidates::LobbyAndListing),
    ("PlayerStatusChanged", Invalidates::Lobby),
    ("ReadyCheckStarted", Invalidates::Lobby),
];

impl ChannelKind {
    /// Name prefix of this kind's channels.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Game => "private-game",
            Self::Lobby => "private-lobby",
        }
    }

    /// `private-<kind>.<id>`
    pub fn channel_name(self, id: &str) -> String {
        format!("{}.{id}", self.prefix())
    }

    /// Every event this kind listens for, with what it invalidates.
    pub fn event_table(self) -> &'static [(&'static str, Invalidates)] {
        match self {
            Self::Game => GAME_EVENTS,
            Self::Lobby => LOBBY_EVENTS,
        }
    }

    /// Keys to invalidate when `event` arrives on the channel for `id`.
    /// Empty for events this kind does not listen for.
    pub fn invalidations(self, event: &str, id: &str) -> Vec<QueryKey> {
        self.event_table()
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, invalidates)| invalidates.keys(id))
            .unwrap_or_default()
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Game => write!(f, "game"),
            Self::Lobby => write!(f, "lobby"),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(ChannelKind::Game.channel_name("01HV"), "private-game.01HV");
        assert_eq!(ChannelKind::Lobby.channel_name("01HW"), "private-lobby.01HW");
    }

    #[test]
    fn game_events_invalidate_the_game() {
        for event in ["GameActionProcessed", "GameCompleted", "GameForfeited"] {
            assert_eq!(
                ChannelKind::Game.invalidations(event, "G1"),
                vec![QueryKey::game("G1")],
                "{event}"
            );
        }
    }

    #[test]
    fn membership_events_refresh_the_listing() {
        for event in ["PlayerJoined", "PlayerLeft", "LobbyStarting", "LobbyCancelled"] {
            assert_eq!(
                ChannelKind::Lobby.invalidations(event, "L1"),
                vec![QueryKey::lobby("L1"), QueryKey::lobbies()],
                "{event}"
            );
        }
    }

    #[test]
    fn status_events_refresh_only_the_lobby() {
        for event in ["PlayerStatusChanged", "ReadyCheckStarted"] {
            assert_eq!(
                ChannelKind::Lobby.invalidations(event, "L1"),
                vec![QueryKey::lobby("L1")],
                "{event}"
            );
        }
    }

    #[test]
    fn events_are_scoped_to_their_kind() {
        assert!(ChannelKind::Game.invalidations("PlayerJoined", "G1").is_empty());
        assert!(ChannelKind::Lobby.invalidations("GameCompleted", "L1").is_empty());
        assert!(ChannelKind::Lobby.invalidations("pusher:ping", "L1").is_empty());
    }

    #[test]
    fn table_sizes() {
        assert_eq!(ChannelKind::Game.event_table().len(), 3);
        assert_eq!(ChannelKind::Lobby.event_table().len(), 6);
    }
}
