//! A meeting engine wired to in-memory stores and the fake videoserver.
//!
//! Every harness owns one room with one owner. Tests add members and
//! outsiders as they need them.

use crate::sink::RecordingSink;
use crate::time::{ManualClock, SequentialIds};
use crate::videoserver::FakeVideoServer;
use common::secret::SecretString;
use common::types::{RoomId, SessionId, UserId};
use meeting_engine::config::{Config, RoomSettings};
use meeting_engine::models::{JoinOutcome, JoinSettings, Meeting, MeetingType, Participant, Requester};
use meeting_engine::repositories::{InMemoryRoomDirectory, InMemoryStore, RoomDirectory};
use meeting_engine::{EngineParts, MeetingEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Operation timeout unless a test asks for another one.
pub const DEFAULT_TEST_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EngineHarness {
    pub engine: Arc<MeetingEngine>,
    pub videoserver: FakeVideoServer,
    pub store: InMemoryStore,
    pub rooms: InMemoryRoomDirectory,
    pub sink: RecordingSink,
    pub clock: ManualClock,
    pub ids: SequentialIds,
    pub room_id: RoomId,
    /// Owner of `room_id`.
    pub owner: Requester,
    pub cancel_token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct EngineHarnessBuilder {
    operation_timeout: Duration,
    room_settings: RoomSettings,
}

impl Default for EngineHarnessBuilder {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_TEST_OPERATION_TIMEOUT,
            room_settings: RoomSettings::default(),
        }
    }
}

impl EngineHarnessBuilder {
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn room_settings(mut self, settings: RoomSettings) -> Self {
        self.room_settings = settings;
        self
    }

    pub async fn build(self) -> EngineHarness {
        let videoserver = FakeVideoServer::start().await;
        let store = InMemoryStore::new();
        let room_id = RoomId::new();
        let owner = Requester::new(UserId::new(), SessionId::new());
        let rooms = InMemoryRoomDirectory::new().with_owner(room_id, owner.user_id);
        let sink = RecordingSink::new();
        let clock = ManualClock::default();
        let ids = SequentialIds::new();
        let cancel_token = CancellationToken::new();

        let config = Config {
            videoserver_url: videoserver.uri(),
            videoserver_api_secret: SecretString::from("test-apisecret"),
            videoserver_timeout: Duration::from_secs(10),
            videoserver_connect_timeout: Duration::from_secs(1),
            room_settings: self.room_settings,
            operation_timeout: self.operation_timeout,
            health_bind_address: "127.0.0.1:0".to_string(),
            reconcile_interval: None,
            log_json: false,
        };

        let parts = EngineParts {
            meetings: Arc::new(store.clone()),
            participants: Arc::new(store.clone()),
            waiting: Arc::new(store.clone()),
            gateway_meetings: Arc::new(store.clone()),
            gateway_sessions: Arc::new(store.clone()),
            rooms: Arc::new(rooms.clone()),
            sink: Arc::new(sink.clone()),
            clock: Arc::new(clock.clone()),
            ids: Arc::new(ids.clone()),
        };
        let engine = MeetingEngine::new(&config, parts, cancel_token.child_token())
            .expect("engine should build");

        EngineHarness {
            engine: Arc::new(engine),
            videoserver,
            store,
            rooms,
            sink,
            clock,
            ids,
            room_id,
            owner,
            cancel_token,
        }
    }
}

impl EngineHarness {
    #[must_use]
    pub fn builder() -> EngineHarnessBuilder {
        EngineHarnessBuilder::default()
    }

    /// Harness with default settings.
    pub async fn start() -> Self {
        Self::builder().build().await
    }

    /// A new plain member of the harness room, on a fresh session.
    pub async fn add_member(&self) -> Requester {
        let requester = Requester::new(UserId::new(), SessionId::new());
        self.rooms
            .add_member(&self.room_id, &requester.user_id, false, false)
            .await
            .expect("add member");
        requester
    }

    /// A new owner of the harness room, on a fresh session.
    pub async fn add_owner(&self) -> Requester {
        let requester = Requester::new(UserId::new(), SessionId::new());
        self.rooms
            .add_member(&self.room_id, &requester.user_id, true, false)
            .await
            .expect("add owner");
        requester
    }

    /// A user outside the harness room.
    #[must_use]
    pub fn outsider(&self) -> Requester {
        Requester::new(UserId::new(), SessionId::new())
    }

    /// Create a meeting in the harness room as its owner.
    pub async fn create_meeting(&self, meeting_type: MeetingType) -> Meeting {
        self.engine
            .create_meeting(&self.room_id, meeting_type, &self.owner)
            .await
            .expect("create meeting")
    }

    /// Join with everything off and expect a live participant.
    pub async fn join(&self, meeting: &Meeting, requester: &Requester) -> Participant {
        self.join_with(meeting, requester, JoinSettings::default())
            .await
    }

    pub async fn join_with(
        &self,
        meeting: &Meeting,
        requester: &Requester,
        settings: JoinSettings,
    ) -> Participant {
        match self
            .engine
            .insert_participant(&meeting.id, settings, &requester.user_id, &requester.session_id)
            .await
            .expect("insert participant")
        {
            JoinOutcome::Joined(participant) => participant,
            JoinOutcome::Queued(entry) => panic!("expected to join, was queued: {entry:?}"),
        }
    }

    /// Current state of the meeting.
    pub async fn meeting(&self, meeting: &Meeting) -> Meeting {
        self.engine
            .get_meeting(&meeting.id)
            .await
            .expect("get meeting")
    }

    /// The gateway-active invariant: a gateway meeting is recorded exactly
    /// when the meeting is active, and gateway sessions mirror participants
    /// down to their stream flags.
    pub async fn assert_gateway_consistent(&self, meeting: &Meeting) {
        let active = self
            .store
            .meetings()
            .iter()
            .find(|m| m.id == meeting.id)
            .is_some_and(|m| m.active);
        let recorded = self
            .store
            .gateway_meetings()
            .iter()
            .any(|g| g.meeting_id == meeting.id);
        assert_eq!(
            active, recorded,
            "meeting active={active} but gateway meeting recorded={recorded}"
        );

        // (user, session, audio, video, screen)
        let mut participants: Vec<(UserId, SessionId, bool, bool, bool)> = self
            .store
            .participants()
            .iter()
            .filter(|p| p.meeting_id == meeting.id)
            .map(|p| {
                (
                    p.user_id,
                    p.session_id,
                    p.audio_stream_on,
                    p.video_stream_on,
                    p.screen_stream_on,
                )
            })
            .collect();
        let mut sessions: Vec<(UserId, SessionId, bool, bool, bool)> = self
            .store
            .gateway_sessions()
            .iter()
            .filter(|s| s.meeting_id == meeting.id)
            .map(|s| {
                (
                    s.user_id,
                    s.session_id,
                    s.audio_stream_on,
                    s.video_out_stream_on,
                    s.screen_stream_on,
                )
            })
            .collect();
        participants.sort();
        sessions.sort();
        assert_eq!(
            participants, sessions,
            "gateway sessions do not mirror participants"
        );
    }
}

impl Drop for EngineHarness {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
