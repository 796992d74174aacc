//! Per-channel state handed to every event handler.

use crate::actors::connection::ConnectionActorHandle;
use crate::actors::messages::{Caller, JoinRequest};
use crate::actors::registry::RoomRegistryActorHandle;
use crate::actors::room::RoomActorHandle;
use crate::errors::RcError;
use crate::session::RoomId;

use common::types::{ChannelId, Identity, IdentityId};
use tracing::{debug, warn};

/// What a channel knows about itself: who it is and which room it is in.
///
/// Owned by the channel's connection actor, so handlers get it mutably and
/// without locking.
#[derive(Debug)]
pub struct ChannelContext {
    channel_id: ChannelId,
    identity: Option<Identity>,
    room: Option<RoomActorHandle>,
    registry: RoomRegistryActorHandle,
    connection: ConnectionActorHandle,
}

impl ChannelContext {
    #[must_use]
    pub fn new(
        channel_id: ChannelId,
        identity: Option<Identity>,
        registry: RoomRegistryActorHandle,
        connection: ConnectionActorHandle,
    ) -> Self {
        Self {
            channel_id,
            identity,
            room: None,
            registry,
            connection,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn identity_id(&self) -> Option<&IdentityId> {
        self.identity.as_ref().map(|identity| &identity.id)
    }

    /// # Errors
    ///
    /// `RcError::Unauthorized` if the channel presented no identity.
    pub fn identity(&self) -> Result<&Identity, RcError> {
        self.identity.as_ref().ok_or(RcError::Unauthorized)
    }

    pub fn caller(&self) -> Result<Caller, RcError> {
        Ok(Caller {
            identity_id: self.identity()?.id.clone(),
            channel_id: self.channel_id,
        })
    }

    /// The room this channel is in.
    ///
    /// # Errors
    ///
    /// `RcError::NotInRoom` if it has not joined one.
    pub fn current_room(&self) -> Result<RoomActorHandle, RcError> {
        self.room.clone().ok_or(RcError::NotInRoom)
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room.as_ref().map(RoomActorHandle::room_id)
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryActorHandle {
        &self.registry
    }

    /// A join request for this channel.
    pub fn join_request(&self) -> Result<JoinRequest, RcError> {
        Ok(JoinRequest {
            identity: self.identity()?.clone(),
            channel_id: self.channel_id,
            connection: self.connection.clone(),
        })
    }

    pub fn enter_room(&mut self, room: RoomActorHandle) {
        self.room = Some(room);
    }

    /// Forget the current room if it is `room_id`, without telling it.
    /// Returns whether anything was forgotten.
    pub fn forget_room(&mut self, room_id: &RoomId) -> bool {
        if self.room_id() == Some(room_id) {
            self.room = None;
            true
        } else {
            false
        }
    }

    /// Leave the current room, releasing it from the registry if this was
    /// its last peer. No-op outside a room.
    pub async fn leave_room(&mut self) {
        let Some(room) = self.room.take() else {
            return;
        };
        let Ok(caller) = self.caller() else {
            return;
        };

        let outcome = room.leave(caller).await;
        if !outcome.room_emptied {
            return;
        }

        match self.registry.release_room(room.room_id().clone()).await {
            Ok(released) => debug!(
                target: "rc.dispatch",
                room_id = %room.room_id(),
                released,
                "Last peer left room"
            ),
            Err(e) => warn!(
                target: "rc.dispatch",
                room_id = %room.room_id(),
                error = %e,
                "Failed to release empty room"
            ),
        }
    }
}
