//! The channel engine: membership, invite lists, fan-out, and the bounded
//! replay buffer.
//!
//! Each channel's state sits behind its own mutex; a broadcast appends to
//! the replay buffer and enqueues to every member under that one lock, which
//! is the per-channel serialization point. Enqueueing never blocks, so a
//! slow member cannot stall the rest.

use crate::session::Session;
use agentchat_protocol::frames::{ChannelInfo, ServerFrame};
use agentchat_types::error::ChannelError;
use agentchat_types::ids::AgentId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Channels every relay starts with.
pub const DEFAULT_CHANNELS: [&str; 2] = ["#general", "#agents"];

struct ChannelState {
    invited: HashSet<AgentId>,
    members: HashMap<u64, Arc<Session>>,
    replay: VecDeque<ServerFrame>,
}

/// One broadcast group.
pub struct Channel {
    pub name: String,
    pub invite_only: bool,
    state: Mutex<ChannelState>,
}

impl Channel {
    fn new(name: &str, invite_only: bool) -> Arc<Self> {
        Arc::new(Channel {
            name: name.to_string(),
            invite_only,
            state: Mutex::new(ChannelState {
                invited: HashSet::new(),
                members: HashMap::new(),
                replay: VecDeque::new(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn mark_replay(frame: &ServerFrame) -> ServerFrame {
    let mut copy = frame.clone();
    match &mut copy {
        ServerFrame::Msg { replay, .. }
        | ServerFrame::AgentJoined { replay, .. }
        | ServerFrame::AgentLeft { replay, .. } => *replay = true,
        _ => {}
    }
    copy
}

/// The channel index plus creation rules.
pub struct ChannelEngine {
    replay_window: usize,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelEngine {
    /// Builds the engine with the boot channels in place.
    pub fn new(replay_window: usize) -> Self {
        let mut map = HashMap::new();
        for name in DEFAULT_CHANNELS {
            map.insert(name.to_string(), Channel::new(name, false));
        }
        ChannelEngine {
            replay_window,
            channels: RwLock::new(map),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.read().get(name).cloned()
    }

    /// Creates a channel and auto-joins the creator; invite-only channels
    /// seed the invite set with the creator.
    pub fn create(
        &self,
        name: &str,
        invite_only: bool,
        creator: &Arc<Session>,
    ) -> Result<(Vec<String>, Vec<ServerFrame>), ChannelError> {
        {
            let mut channels = self.write();
            if channels.contains_key(name) {
                return Err(ChannelError::Exists(name.to_string()));
            }
            let channel = Channel::new(name, invite_only);
            if invite_only {
                channel.lock().invited.insert(creator.agent_id.clone());
            }
            channels.insert(name.to_string(), channel);
        }
        self.join(name, creator)
    }

    /// Adds the session, broadcasts `AGENT_JOINED` to prior members, and
    /// returns the member list plus the replay frames for the joiner.
    pub fn join(
        &self,
        name: &str,
        session: &Arc<Session>,
    ) -> Result<(Vec<String>, Vec<ServerFrame>), ChannelError> {
        let channel = self
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;

        let (agents, replay) = {
            let mut state = channel.lock();
            state.members.retain(|_, s| !s.is_closed());
            if channel.invite_only && !state.invited.contains(&session.agent_id) {
                return Err(ChannelError::NotInvited(name.to_string()));
            }

            let already_member = state.members.contains_key(&session.id);
            if !already_member {
                let joined = ServerFrame::AgentJoined {
                    channel: name.to_string(),
                    agent: session.agent_id.to_string(),
                    replay: false,
                };
                for member in state.members.values() {
                    member.send(joined.clone());
                }
                Self::buffer(&mut state.replay, self.replay_window, &joined);
                state.members.insert(session.id, session.clone());
            }

            let agents = state
                .members
                .values()
                .map(|s| s.agent_id.to_string())
                .collect();
            let replay = state.replay.iter().map(mark_replay).collect();
            (agents, replay)
        };

        session
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        Ok((agents, replay))
    }

    /// Removes the session and broadcasts `AGENT_LEFT` to the remaining
    /// members.
    pub fn leave(&self, name: &str, session: &Arc<Session>) -> Result<(), ChannelError> {
        let channel = self
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        {
            let mut state = channel.lock();
            if state.members.remove(&session.id).is_none() {
                return Err(ChannelError::NotJoined(name.to_string()));
            }
            let left = ServerFrame::AgentLeft {
                channel: name.to_string(),
                agent: session.agent_id.to_string(),
                replay: false,
            };
            for member in state.members.values() {
                member.send(left.clone());
            }
            Self::buffer(&mut state.replay, self.replay_window, &left);
        }
        session
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        Ok(())
    }

    /// Fan-out of a channel `MSG` to every member, sender included.
    pub fn broadcast_msg(
        &self,
        name: &str,
        sender: &Arc<Session>,
        content: &str,
    ) -> Result<(), ChannelError> {
        let channel = self
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        let mut state = channel.lock();
        state.members.retain(|_, s| !s.is_closed());
        if !state.members.contains_key(&sender.id) {
            return Err(if channel.invite_only {
                ChannelError::NotInvited(name.to_string())
            } else {
                ChannelError::NotJoined(name.to_string())
            });
        }
        let frame = ServerFrame::Msg {
            from: sender.agent_id.to_string(),
            to: name.to_string(),
            content: content.to_string(),
            replay: false,
        };
        for member in state.members.values() {
            member.send(frame.clone());
        }
        Self::buffer(&mut state.replay, self.replay_window, &frame);
        Ok(())
    }

    /// Broadcasts an arbitrary frame to every channel the session has
    /// joined, without buffering (presence changes).
    pub fn broadcast_to_joined(&self, session: &Arc<Session>, frame: &ServerFrame) {
        let joined: Vec<String> = session
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for name in joined {
            if let Some(channel) = self.get(&name) {
                let state = channel.lock();
                for member in state.members.values() {
                    if member.id != session.id {
                        member.send(frame.clone());
                    }
                }
            }
        }
    }

    /// Adds an agent to a channel's invite set. The inviter must be a
    /// member.
    pub fn invite(
        &self,
        name: &str,
        inviter: &Arc<Session>,
        target: &AgentId,
    ) -> Result<(), ChannelError> {
        let channel = self
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        let mut state = channel.lock();
        if !state.members.contains_key(&inviter.id) {
            return Err(ChannelError::NotJoined(name.to_string()));
        }
        state.invited.insert(target.clone());
        Ok(())
    }

    /// Removes the session from every channel it joined, broadcasting the
    /// departures. Used at disconnect and eviction.
    pub fn detach(&self, session: &Arc<Session>) {
        let joined: Vec<String> = {
            let mut channels = session.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels.drain().collect()
        };
        for name in joined {
            if let Some(channel) = self.get(&name) {
                let mut state = channel.lock();
                if state.members.remove(&session.id).is_some() {
                    let left = ServerFrame::AgentLeft {
                        channel: name.clone(),
                        agent: session.agent_id.to_string(),
                        replay: false,
                    };
                    for member in state.members.values() {
                        member.send(left.clone());
                    }
                    Self::buffer(&mut state.replay, self.replay_window, &left);
                }
            }
        }
    }

    /// Public channels with member counts; invite-only channels stay unlisted.
    pub fn list_public(&self) -> Vec<ChannelInfo> {
        let channels = self.read();
        let mut rows: Vec<ChannelInfo> = channels
            .values()
            .filter(|c| !c.invite_only)
            .map(|c| ChannelInfo {
                channel: c.name.clone(),
                agents: c.lock().members.len(),
            })
            .collect();
        rows.sort_by(|a, b| a.channel.cmp(&b.channel));
        rows
    }

    /// Member ids of one channel.
    pub fn agents_in(&self, name: &str) -> Result<Vec<String>, ChannelError> {
        let channel = self
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        let state = channel.lock();
        Ok(state.members.values().map(|s| s.agent_id.to_string()).collect())
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    fn buffer(replay: &mut VecDeque<ServerFrame>, window: usize, frame: &ServerFrame) {
        if window == 0 {
            return;
        }
        if replay.len() == window {
            replay.pop_front();
        }
        replay.push_back(frame.clone());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Channel>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Channel>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}
